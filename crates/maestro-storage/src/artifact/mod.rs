// Artifact storage backends: put/get of data files across local disk,
// MinIO and HDFS, with a URI scheme per backend.

mod base;
mod hdfs;
mod local;
mod minio;

use std::sync::Arc;

use maestro_core::config::Settings;
use maestro_core::error::Result;

pub use base::{ArtifactStore, StorageLayout};
pub use hdfs::HdfsStorage;
pub use local::LocalStorage;
pub use minio::MinioStorage;

/// Pick a backend from the settings. MinIO is preferred over HDFS, and HDFS
/// is preferred over local storage.
pub fn get_available_storage(
    settings: &Settings,
    bucket_name: &str,
    folder_name: &str,
) -> Result<Arc<dyn ArtifactStore>> {
    if settings.minio_host.is_some() {
        return Ok(Arc::new(MinioStorage::new(settings, bucket_name, folder_name)?));
    }

    if settings.hdfs_host.is_some() {
        tracing::debug!("MinIO storage not set, falling back to HDFS storage");
        return Ok(Arc::new(HdfsStorage::new(settings, bucket_name, folder_name)?));
    }

    tracing::debug!("remote storage not set, falling back to local storage");
    tracing::warn!("local storage does not support distributed execution");
    Ok(Arc::new(LocalStorage::new(settings, bucket_name, folder_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_prefers_minio_then_hdfs_then_local() {
        let mut settings = Settings {
            data_dir: std::env::temp_dir(),
            ..Default::default()
        };

        let storage = get_available_storage(&settings, "author", "wf/task").unwrap();
        assert_eq!(storage.scheme(), "");

        settings.hdfs_host = Some("namenode".to_string());
        let storage = get_available_storage(&settings, "author", "wf/task").unwrap();
        assert_eq!(storage.scheme(), "hdfs:/");

        settings.minio_host = Some("minio".to_string());
        let storage = get_available_storage(&settings, "author", "wf/task").unwrap();
        assert_eq!(storage.scheme(), "minio://");
    }
}
