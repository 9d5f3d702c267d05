// Typed-record schema system.
//
// Components exchange records described by a tagged-union field schema. A
// `RecordDescriptor` derives the self-describing Avro schema transported on
// every BLOCK message, so consumers need no out-of-band registry.

use serde_json::{json, Map, Value};

use crate::error::{MaestroError, Result};

/// Atomic field types and their Avro names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl AtomicKind {
    pub fn avro_name(&self) -> &'static str {
        match self {
            AtomicKind::String => "string",
            AtomicKind::Integer => "int",
            AtomicKind::Float => "float",
            AtomicKind::Boolean => "boolean",
        }
    }
}

/// The type of a record field: atomic, an array of some kind, or a nested
/// record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Atomic(AtomicKind),
    Array(Box<FieldKind>),
    Record(RecordDescriptor),
}

impl FieldKind {
    pub fn string() -> Self {
        FieldKind::Atomic(AtomicKind::String)
    }

    pub fn integer() -> Self {
        FieldKind::Atomic(AtomicKind::Integer)
    }

    pub fn float() -> Self {
        FieldKind::Atomic(AtomicKind::Float)
    }

    pub fn boolean() -> Self {
        FieldKind::Atomic(AtomicKind::Boolean)
    }

    pub fn array_of(items: FieldKind) -> Self {
        FieldKind::Array(Box::new(items))
    }

    /// The Avro schema fragment for this kind.
    fn schema(&self) -> Value {
        match self {
            FieldKind::Atomic(atomic) => json!(atomic.avro_name()),
            FieldKind::Array(items) => json!({"type": "array", "items": items.schema()}),
            FieldKind::Record(descriptor) => descriptor.schema(),
        }
    }
}

/// One declared field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub default: Option<Value>,
}

/// Schema of a named record: an ordered set of fields under a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDescriptor {
    pub namespace: String,
    pub name: String,
    pub fields: Vec<FieldSpec>,
    /// Explicit schema overriding the derived one.
    pub schema_override: Option<Value>,
}

impl RecordDescriptor {
    pub fn builder(namespace: impl Into<String>, name: impl Into<String>) -> RecordBuilder {
        RecordBuilder {
            namespace: namespace.into(),
            name: name.into(),
            fields: Vec::new(),
            schema_override: None,
        }
    }

    /// The self-describing Avro record schema, recursing into arrays and
    /// nested records.
    pub fn schema(&self) -> Value {
        if let Some(schema) = &self.schema_override {
            return schema.clone();
        }

        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|field| json!({"name": field.name, "type": field.kind.schema()}))
            .collect();

        json!({
            "namespace": self.namespace,
            "name": self.name,
            "type": "record",
            "fields": fields,
        })
    }

    /// Start an instance of this record.
    pub fn record(&self) -> DataRecord {
        DataRecord {
            descriptor: self.clone(),
            values: Map::new(),
        }
    }
}

/// Builder enforcing the declaration-order rule: once a field carries a
/// default, every following field must too.
pub struct RecordBuilder {
    namespace: String,
    name: String,
    fields: Vec<FieldSpec>,
    schema_override: Option<Value>,
}

impl RecordBuilder {
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        default: Value,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            default: Some(default),
        });
        self
    }

    pub fn schema_override(mut self, schema: Value) -> Self {
        self.schema_override = Some(schema);
        self
    }

    pub fn build(self) -> Result<RecordDescriptor> {
        let mut defaults_started = false;
        for field in &self.fields {
            match (&field.default, defaults_started) {
                (Some(_), _) => defaults_started = true,
                (None, true) => {
                    return Err(MaestroError::validation(format!(
                        "non-default field `{}` of record `{}` follows a defaulted field",
                        field.name, self.name
                    )))
                }
                (None, false) => {}
            }
        }

        Ok(RecordDescriptor {
            namespace: self.namespace,
            name: self.name,
            fields: self.fields,
            schema_override: self.schema_override,
        })
    }
}

/// One instance of a record, carrying its descriptor and field values.
#[derive(Debug, Clone)]
pub struct DataRecord {
    descriptor: RecordDescriptor,
    values: Map<String, Value>,
}

impl DataRecord {
    /// Record name, used as the second half of the BLOCK key.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &RecordDescriptor {
        &self.descriptor
    }

    /// Set a declared field. Unknown names are rejected.
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Result<Self> {
        if !self.descriptor.fields.iter().any(|f| f.name == field) {
            return Err(MaestroError::validation(format!(
                "record `{}` has no field `{field}`",
                self.descriptor.name
            )));
        }
        self.values.insert(field.to_string(), value.into());
        Ok(self)
    }

    /// The canonical dictionary representation: field-ordered, with
    /// declared defaults applied to unset fields.
    pub fn get_dict(&self) -> Result<Value> {
        let mut dict = Map::new();
        for field in &self.descriptor.fields {
            let value = self
                .values
                .get(&field.name)
                .cloned()
                .or_else(|| field.default.clone())
                .ok_or_else(|| {
                    MaestroError::validation(format!(
                        "missing value for field `{}` of record `{}`",
                        field.name, self.descriptor.name
                    ))
                })?;
            dict.insert(field.name.clone(), value);
        }
        Ok(Value::Object(dict))
    }

    /// The wire schema for this record.
    pub fn get_schema(&self) -> Value {
        self.descriptor.schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_descriptor() -> RecordDescriptor {
        RecordDescriptor::builder("maestro.tests", "DataChunk")
            .field("my_number", FieldKind::integer())
            .field("my_float", FieldKind::float())
            .field("my_string", FieldKind::string())
            .field("my_boolean", FieldKind::boolean())
            .field("my_list", FieldKind::array_of(FieldKind::integer()))
            .build()
            .unwrap()
    }

    #[test]
    fn derives_record_schema() {
        let descriptor = chunk_descriptor();
        let schema = descriptor.schema();

        assert_eq!(schema["name"], "DataChunk");
        assert_eq!(schema["type"], "record");
        assert_eq!(
            schema["fields"],
            json!([
                {"name": "my_number", "type": "int"},
                {"name": "my_float", "type": "float"},
                {"name": "my_string", "type": "string"},
                {"name": "my_boolean", "type": "boolean"},
                {"name": "my_list", "type": {"type": "array", "items": "int"}},
            ])
        );
    }

    #[test]
    fn derives_nested_record_schema() {
        let point = RecordDescriptor::builder("maestro.tests", "Point")
            .field("x", FieldKind::integer())
            .field("y", FieldKind::integer())
            .build()
            .unwrap();
        let path = RecordDescriptor::builder("maestro.tests", "Path")
            .field("points", FieldKind::array_of(FieldKind::Record(point)))
            .build()
            .unwrap();

        let schema = path.schema();
        assert_eq!(schema["fields"][0]["type"]["type"], "array");
        assert_eq!(schema["fields"][0]["type"]["items"]["name"], "Point");
    }

    #[test]
    fn dict_applies_declared_defaults() {
        let descriptor = RecordDescriptor::builder("maestro.tests", "DataChunk")
            .field("my_number", FieldKind::integer())
            .field_with_default("my_string", FieldKind::string(), json!("hello"))
            .build()
            .unwrap();

        let record = descriptor.record().set("my_number", 0).unwrap();
        assert_eq!(
            record.get_dict().unwrap(),
            json!({"my_number": 0, "my_string": "hello"})
        );
    }

    #[test]
    fn dict_with_all_defaults_needs_no_values() {
        let descriptor = RecordDescriptor::builder("maestro.tests", "DataChunk")
            .field_with_default("my_number", FieldKind::integer(), json!(0))
            .field_with_default("my_string", FieldKind::string(), json!("hello"))
            .build()
            .unwrap();

        assert_eq!(
            descriptor.record().get_dict().unwrap(),
            json!({"my_number": 0, "my_string": "hello"})
        );
    }

    #[test]
    fn non_default_field_after_default_is_rejected() {
        let result = RecordDescriptor::builder("maestro.tests", "DataChunk")
            .field_with_default("my_number", FieldKind::integer(), json!(0))
            .field("my_string", FieldKind::string())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn missing_value_without_default_is_an_error() {
        let descriptor = chunk_descriptor();
        assert!(descriptor.record().get_dict().is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let descriptor = chunk_descriptor();
        assert!(descriptor.record().set("nope", 1).is_err());
    }

    #[test]
    fn schema_override_wins() {
        let explicit = json!({"type": "record", "name": "Custom", "fields": []});
        let descriptor = RecordDescriptor::builder("maestro.tests", "Ignored")
            .schema_override(explicit.clone())
            .build()
            .unwrap();
        assert_eq!(descriptor.schema(), explicit);
    }
}
