// Persistence layer: document state store plus artifact storage backends.

pub mod artifact;
pub mod state;

pub use artifact::{
    get_available_storage, ArtifactStore, HdfsStorage, LocalStorage, MinioStorage, StorageLayout,
};
pub use state::{Database, TaskPatch, WorkflowPatch};
