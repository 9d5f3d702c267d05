// Built-in component catalog.

mod dynamic_parameter;
mod import_file;
mod import_tsv;
mod read_tsv;
pub mod records;
mod revoke_execution;

pub use dynamic_parameter::DynamicParameter;
pub use import_file::ImportFile;
pub use import_tsv::ImportTsv;
pub use read_tsv::ReadTsv;
pub use revoke_execution::RevokeExecution;

/// Module key of the built-in revocation component, enqueued by the
/// scheduler when a workflow is revoked.
pub const REVOKE_EXECUTION_MODULE: &str = "maestro.catalog.RevokeExecution";
