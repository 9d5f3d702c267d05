// Avro wire codec.
//
// Every BLOCK message carries its payload in the Avro "schemaless" binary
// encoding together with the inline JSON schema that produced it, so any
// consumer can decode without a registry. The envelope itself travels under
// the fixed MESSAGE_SCHEMA below.

use std::sync::LazyLock;

use apache_avro::types::Value as AvroValue;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use serde_json::{Map, Number, Value};

use crate::error::{MaestroError, Result};
use crate::models::messages::BusMessage;

const MESSAGE_SCHEMA_JSON: &str = r#"
{
    "type": "record",
    "name": "message",
    "namespace": "maestro.process",
    "fields": [
        {"name": "type", "type": "string"},
        {"name": "key", "type": "string", "default": "undefined"},
        {"name": "data", "type": "bytes"},
        {"name": "servo", "type": "string", "default": "undefined"},
        {"name": "schem", "type": "string", "default": "undefined"}
    ]
}
"#;

/// Parsed envelope schema, shared process-wide.
pub static MESSAGE_SCHEMA: LazyLock<Schema> =
    LazyLock::new(|| Schema::parse_str(MESSAGE_SCHEMA_JSON).expect("envelope schema is valid"));

/// Serialize a record dictionary under its self-describing schema.
pub fn serialize(data: &Value, schema_json: &Value) -> Result<Vec<u8>> {
    let schema = Schema::parse_str(&schema_json.to_string())?;
    let value = json_to_avro(&schema, data)?;
    Ok(to_avro_datum(&schema, value)?)
}

/// Deserialize schemaless Avro bytes under the given schema.
pub fn deserialize(bytes: &[u8], schema_json: &Value) -> Result<Value> {
    let schema = Schema::parse_str(&schema_json.to_string())?;
    let value = from_avro_datum(&schema, &mut &bytes[..], None)?;
    avro_to_json(value)
}

/// Encode a bus envelope to its wire bytes.
pub fn encode_message(message: &BusMessage) -> Result<Vec<u8>> {
    let record = AvroValue::Record(vec![
        ("type".to_string(), AvroValue::String(message.message_type.clone())),
        ("key".to_string(), AvroValue::String(message.key.clone())),
        ("data".to_string(), AvroValue::Bytes(message.data.clone())),
        ("servo".to_string(), AvroValue::String(message.servo.clone())),
        ("schem".to_string(), AvroValue::String(message.schem.clone())),
    ]);
    Ok(to_avro_datum(&MESSAGE_SCHEMA, record)?)
}

/// Decode wire bytes back into a bus envelope.
pub fn decode_message(bytes: &[u8]) -> Result<BusMessage> {
    let value = from_avro_datum(&MESSAGE_SCHEMA, &mut &bytes[..], None)?;
    let AvroValue::Record(fields) = value else {
        return Err(MaestroError::bus("envelope is not a record"));
    };

    let mut message = BusMessage {
        message_type: String::new(),
        key: String::new(),
        data: Vec::new(),
        servo: String::new(),
        schem: String::new(),
    };

    for (name, value) in fields {
        match (name.as_str(), value) {
            ("type", AvroValue::String(s)) => message.message_type = s,
            ("key", AvroValue::String(s)) => message.key = s,
            ("data", AvroValue::Bytes(b)) => message.data = b,
            ("servo", AvroValue::String(s)) => message.servo = s,
            ("schem", AvroValue::String(s)) => message.schem = s,
            (name, value) => {
                return Err(MaestroError::bus(format!(
                    "unexpected envelope field `{name}`: {value:?}"
                )))
            }
        }
    }

    Ok(message)
}

/// Build an Avro value from JSON, guided by the schema so numbers land on
/// the width the writer declared.
fn json_to_avro(schema: &Schema, value: &Value) -> Result<AvroValue> {
    match schema {
        Schema::Null => match value {
            Value::Null => Ok(AvroValue::Null),
            other => Err(mismatch("null", other)),
        },
        Schema::Boolean => value
            .as_bool()
            .map(AvroValue::Boolean)
            .ok_or_else(|| mismatch("boolean", value)),
        Schema::Int => value
            .as_i64()
            .map(|n| AvroValue::Int(n as i32))
            .ok_or_else(|| mismatch("int", value)),
        Schema::Long => value
            .as_i64()
            .map(AvroValue::Long)
            .ok_or_else(|| mismatch("long", value)),
        Schema::Float => value
            .as_f64()
            .map(|n| AvroValue::Float(n as f32))
            .ok_or_else(|| mismatch("float", value)),
        Schema::Double => value
            .as_f64()
            .map(AvroValue::Double)
            .ok_or_else(|| mismatch("double", value)),
        Schema::String => value
            .as_str()
            .map(|s| AvroValue::String(s.to_string()))
            .ok_or_else(|| mismatch("string", value)),
        Schema::Bytes => match value {
            Value::String(s) => Ok(AvroValue::Bytes(s.as_bytes().to_vec())),
            Value::Array(items) => {
                let bytes = items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .filter(|n| *n <= u8::MAX as u64)
                            .map(|n| n as u8)
                            .ok_or_else(|| mismatch("bytes", value))
                    })
                    .collect::<Result<Vec<u8>>>()?;
                Ok(AvroValue::Bytes(bytes))
            }
            other => Err(mismatch("bytes", other)),
        },
        Schema::Array(inner) => {
            let items = value.as_array().ok_or_else(|| mismatch("array", value))?;
            let items = items
                .iter()
                .map(|item| json_to_avro(&inner.items, item))
                .collect::<Result<Vec<AvroValue>>>()?;
            Ok(AvroValue::Array(items))
        }
        Schema::Record(record) => {
            let object = value.as_object().ok_or_else(|| mismatch("record", value))?;
            let mut fields = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                let field_value = object.get(&field.name).ok_or_else(|| {
                    MaestroError::bus(format!(
                        "record `{}` is missing field `{}`",
                        record.name, field.name
                    ))
                })?;
                fields.push((field.name.clone(), json_to_avro(&field.schema, field_value)?));
            }
            Ok(AvroValue::Record(fields))
        }
        Schema::Union(union) => {
            for (position, variant) in union.variants().iter().enumerate() {
                if let Ok(resolved) = json_to_avro(variant, value) {
                    return Ok(AvroValue::Union(position as u32, Box::new(resolved)));
                }
            }
            Err(mismatch("union", value))
        }
        other => Err(MaestroError::bus(format!(
            "unsupported schema for wire records: {other:?}"
        ))),
    }
}

/// Collapse a decoded Avro value back into plain JSON.
fn avro_to_json(value: AvroValue) -> Result<Value> {
    match value {
        AvroValue::Null => Ok(Value::Null),
        AvroValue::Boolean(b) => Ok(Value::Bool(b)),
        AvroValue::Int(n) => Ok(Value::from(n)),
        AvroValue::Long(n) => Ok(Value::from(n)),
        AvroValue::Float(n) => Number::from_f64(n as f64)
            .map(Value::Number)
            .ok_or_else(|| MaestroError::bus("non-finite float on the wire")),
        AvroValue::Double(n) => Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| MaestroError::bus("non-finite double on the wire")),
        AvroValue::String(s) => Ok(Value::String(s)),
        AvroValue::Bytes(bytes) | AvroValue::Fixed(_, bytes) => {
            Ok(Value::Array(bytes.into_iter().map(Value::from).collect()))
        }
        AvroValue::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(avro_to_json)
                .collect::<Result<Vec<Value>>>()?,
        )),
        AvroValue::Record(fields) => {
            let mut object = Map::new();
            for (name, value) in fields {
                object.insert(name, avro_to_json(value)?);
            }
            Ok(Value::Object(object))
        }
        AvroValue::Map(entries) => {
            let mut object = Map::new();
            for (name, value) in entries {
                object.insert(name, avro_to_json(value)?);
            }
            Ok(Value::Object(object))
        }
        AvroValue::Union(_, inner) => avro_to_json(*inner),
        AvroValue::Enum(_, symbol) => Ok(Value::String(symbol)),
        other => Err(MaestroError::bus(format!(
            "unsupported value on the wire: {other:?}"
        ))),
    }
}

fn mismatch(expected: &str, got: &Value) -> MaestroError {
    MaestroError::bus(format!("expected {expected}, got `{got}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::messages::SignalKind;
    use serde_json::json;

    fn weather_schema() -> Value {
        json!({
            "doc": "A weather reading.",
            "name": "Weather",
            "namespace": "tests",
            "type": "record",
            "fields": [
                {"name": "station", "type": "string"},
                {"name": "time", "type": "long"},
                {"name": "temp", "type": "int"},
            ],
        })
    }

    const WEATHER_BYTES: &[u8] = b"\x18012650-99999\xac\xb1\xf0\xd6\x0a\xde\x01";

    #[test]
    fn serializes_known_byte_vector() {
        let record = json!({
            "station": "012650-99999",
            "temp": 111,
            "time": 1433275478u32,
        });
        let bytes = serialize(&record, &weather_schema()).unwrap();
        assert_eq!(bytes, WEATHER_BYTES);
    }

    #[test]
    fn deserializes_known_byte_vector() {
        let record = deserialize(WEATHER_BYTES, &weather_schema()).unwrap();
        assert_eq!(
            record,
            json!({"station": "012650-99999", "time": 1433275478u32, "temp": 111})
        );
    }

    #[test]
    fn round_trips_nested_arrays_and_records() {
        let schema = json!({
            "type": "record",
            "name": "Path",
            "namespace": "tests",
            "fields": [
                {"name": "label", "type": "string"},
                {"name": "points", "type": {"type": "array", "items": {
                    "type": "record",
                    "name": "Point",
                    "fields": [
                        {"name": "x", "type": "int"},
                        {"name": "y", "type": "int"},
                    ],
                }}},
            ],
        });
        let record = json!({
            "label": "diagonal",
            "points": [{"x": 1, "y": 2}, {"x": 3, "y": 4}],
        });

        let bytes = serialize(&record, &schema).unwrap();
        assert_eq!(deserialize(&bytes, &schema).unwrap(), record);
    }

    #[test]
    fn missing_record_field_is_an_error() {
        let record = json!({"station": "012650-99999", "time": 1});
        assert!(serialize(&record, &weather_schema()).is_err());
    }

    #[test]
    fn envelope_round_trips() {
        let block = BusMessage::block("T0.Point", vec![0x02, 0x04], "{\"type\":\"record\"}");
        let decoded = decode_message(&encode_message(&block).unwrap()).unwrap();
        assert_eq!(decoded, block);

        let signal = BusMessage::signal(SignalKind::PoissonPill);
        let decoded = decode_message(&encode_message(&signal).unwrap()).unwrap();
        assert_eq!(decoded, signal);
        assert_eq!(decoded.signal_kind().unwrap(), SignalKind::PoissonPill);
    }
}
