// Shared record catalog: the typed records built-in components exchange.

use serde_json::json;

use maestro_core::datatype::{DataRecord, FieldKind, RecordDescriptor};
use maestro_core::error::Result;
use maestro_core::models::Resource;

const NAMESPACE: &str = "maestro.catalog";

/// A single file held in some storage backend.
pub fn temp_file(resource: &Resource) -> Result<DataRecord> {
    RecordDescriptor::builder(NAMESPACE, "TempFile")
        .field("resource", FieldKind::string())
        .build()?
        .record()
        .set("resource", resource.resource.clone())
}

/// An archive held in some storage backend.
pub fn compressed_file(resource: &Resource, file_format: &str) -> Result<DataRecord> {
    RecordDescriptor::builder(NAMESPACE, "CompressedFile")
        .field("resource", FieldKind::string())
        .field_with_default("file_format", FieldKind::string(), json!(".zip"))
        .build()?
        .record()
        .set("resource", resource.resource.clone())?
        .set("file_format", file_format)
}

/// A delimited text dataset with its parsing hints.
pub fn simple_tabular_dataset(
    resource: &Resource,
    delimiter: &str,
    file_format: &str,
) -> Result<DataRecord> {
    RecordDescriptor::builder(NAMESPACE, "SimpleTabularDataset")
        .field("resource", FieldKind::string())
        .field("delimiter", FieldKind::string())
        .field_with_default("encoding", FieldKind::string(), json!("utf-8"))
        .field_with_default("file_format", FieldKind::string(), json!(".csv"))
        .build()?
        .record()
        .set("resource", resource.resource.clone())?
        .set("delimiter", delimiter)?
        .set("file_format", file_format)
}

/// A value fed into the workflow from outside while it runs.
pub fn dynamic_parameter(value: &str) -> Result<DataRecord> {
    RecordDescriptor::builder(NAMESPACE, "DynamicParameter")
        .field("value", FieldKind::string())
        .build()?
        .record()
        .set("value", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabular_dataset_applies_encoding_default() {
        let resource = Resource::local("/tmp/out.tsv");
        let record = simple_tabular_dataset(&resource, "\t", ".tsv").unwrap();

        assert_eq!(record.name(), "SimpleTabularDataset");
        assert_eq!(
            record.get_dict().unwrap(),
            json!({
                "resource": "/tmp/out.tsv",
                "delimiter": "\t",
                "encoding": "utf-8",
                "file_format": ".tsv",
            })
        );
    }

    #[test]
    fn compressed_file_defaults_to_zip() {
        let resource = Resource::local("/tmp/archive.tar.gz");
        let record = compressed_file(&resource, ".tar.gz").unwrap();
        assert_eq!(
            record.get_dict().unwrap(),
            json!({"resource": "/tmp/archive.tar.gz", "file_format": ".tar.gz"})
        );

        let schema = record.get_schema();
        assert_eq!(schema["fields"][1]["name"], "file_format");
    }

    #[test]
    fn records_carry_their_wire_schema() {
        let resource = Resource::local("/tmp/file.bin");
        let schema = temp_file(&resource).unwrap().get_schema();
        assert_eq!(schema["namespace"], "maestro.catalog");
        assert_eq!(schema["fields"][0]["name"], "resource");
        assert_eq!(schema["fields"][0]["type"], "string");
    }
}
