// Local filesystem backend. Only suitable for single-node deployments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use maestro_core::config::Settings;
use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{Resource, LOCAL_SCHEME};

use super::base::{ArtifactStore, StorageLayout};

pub struct LocalStorage {
    layout: StorageLayout,
}

impl LocalStorage {
    pub fn new(settings: &Settings, bucket_name: &str, folder_name: &str) -> Self {
        Self {
            layout: StorageLayout::new(settings.data_dir.clone(), bucket_name, folder_name),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalStorage {
    fn scheme(&self) -> &'static str {
        LOCAL_SCHEME
    }

    fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    async fn setup(&self) -> Result<Resource> {
        self.layout.ensure_local_dir()?;
        Ok(Resource::local(self.layout.local_dir.to_string_lossy()))
    }

    async fn put_file(&self, file_path: &Path, rename: Option<&str>) -> Result<Resource> {
        let (staged, _) = self.layout.stage_file(file_path, rename)?;
        Ok(Resource::local(staged.to_string_lossy()))
    }

    async fn get_file(&self, uri: &str) -> Result<PathBuf> {
        let path = PathBuf::from(uri);
        if !path.is_file() {
            return Err(MaestroError::FileNotFound(uri.to_string()));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn storage(dir: &Path) -> LocalStorage {
        let settings = Settings {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        LocalStorage::new(&settings, "anonymous", "wf/task")
    }

    #[tokio::test]
    async fn get_file_returns_existing_paths_unchanged() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());
        storage.setup().await.unwrap();

        let file = storage.local_dir().join("data.txt");
        fs::write(&file, "payload").unwrap();

        let found = storage.get_file(&file.to_string_lossy()).await.unwrap();
        assert_eq!(found, file);
    }

    #[tokio::test]
    async fn get_file_fails_for_missing_paths() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path());

        let err = storage.get_file("nonexistent.txt").await.unwrap_err();
        assert!(matches!(err, MaestroError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn put_file_returns_a_local_resource() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        let storage = storage(dir.path());
        storage.setup().await.unwrap();

        let source = other.path().join("report.csv");
        fs::write(&source, "a,b\n1,2\n").unwrap();

        let resource = storage.put_file(&source, None).await.unwrap();
        assert_eq!(resource.scheme, "");
        assert!(PathBuf::from(&resource.resource).is_file());
    }
}
