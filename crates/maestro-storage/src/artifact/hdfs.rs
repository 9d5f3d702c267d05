// HDFS backend over the WebHDFS REST gateway.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use maestro_core::config::Settings;
use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{Resource, HDFS_SCHEME};

use super::base::{parse_remote_uri, ArtifactStore, StorageLayout};

pub struct HdfsStorage {
    layout: StorageLayout,
    endpoint: String,
    username: String,
    http: reqwest::Client,
}

impl HdfsStorage {
    pub fn new(settings: &Settings, bucket_name: &str, folder_name: &str) -> Result<Self> {
        let endpoint = settings
            .hdfs_endpoint()
            .ok_or_else(|| MaestroError::config("HDFS_HOST is not set"))?;

        Ok(Self {
            layout: StorageLayout::new(settings.data_dir.clone(), bucket_name, folder_name),
            endpoint,
            username: settings.hdfs_username.clone(),
            http: reqwest::Client::new(),
        })
    }

    fn op_url(&self, path: &str, op: &str) -> String {
        format!(
            "{}/webhdfs/v1/{path}?op={op}&user.name={}",
            self.endpoint, self.username
        )
    }
}

#[async_trait]
impl ArtifactStore for HdfsStorage {
    fn scheme(&self) -> &'static str {
        HDFS_SCHEME
    }

    fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    async fn setup(&self) -> Result<Resource> {
        self.layout.ensure_local_dir()?;

        let remote_dir = format!("{}/{}", self.layout.bucket_name, self.layout.folder_name);
        let response = self
            .http
            .put(self.op_url(&remote_dir, "MKDIRS"))
            .send()
            .await
            .map_err(MaestroError::storage)?;
        if !response.status().is_success() {
            return Err(MaestroError::storage(format!(
                "could not create `{remote_dir}`: {}",
                response.status()
            )));
        }

        Resource::hdfs(format!("{HDFS_SCHEME}{remote_dir}/"))
    }

    async fn put_file(&self, file_path: &Path, rename: Option<&str>) -> Result<Resource> {
        let (staged, file_name) = self.layout.stage_file(file_path, rename)?;
        let remote_path = format!(
            "{}/{}/{file_name}",
            self.layout.bucket_name, self.layout.folder_name
        );

        let bytes = fs::read(&staged).map_err(MaestroError::storage)?;
        let url = format!("{}&overwrite=true", self.op_url(&remote_path, "CREATE"));
        let response = self
            .http
            .put(url)
            .body(bytes)
            .send()
            .await
            .map_err(MaestroError::storage)?;
        if !response.status().is_success() {
            return Err(MaestroError::storage(format!(
                "could not upload `{remote_path}`: {}",
                response.status()
            )));
        }

        Resource::hdfs(format!("{HDFS_SCHEME}{remote_path}"))
    }

    async fn get_file(&self, uri: &str) -> Result<PathBuf> {
        let (bucket_name, object_key) = parse_remote_uri(uri, HDFS_SCHEME)?;

        let local_path = self.layout.temp_dir.join(bucket_name).join(object_key);
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(MaestroError::storage)?;
        }

        let lock_path = format!("{}.lock", local_path.display());
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(MaestroError::storage)?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(MaestroError::storage)?;

        if !local_path.is_file() {
            let remote_path = format!("{bucket_name}/{object_key}");
            let response = self
                .http
                .get(self.op_url(&remote_path, "OPEN"))
                .send()
                .await
                .map_err(MaestroError::storage)?;
            if !response.status().is_success() {
                return Err(MaestroError::storage(format!(
                    "could not open `{remote_path}`: {}",
                    response.status()
                )));
            }
            let bytes = response.bytes().await.map_err(MaestroError::storage)?;
            fs::write(&local_path, bytes).map_err(MaestroError::storage)?;
        }

        Ok(local_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_file_rejects_foreign_schemes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            hdfs_host: Some("namenode".to_string()),
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let storage = HdfsStorage::new(&settings, "author", "wf/task").unwrap();

        let err = storage
            .get_file("minio://author/wf/task/file.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, MaestroError::NotValidScheme { .. }));
    }

    #[test]
    fn op_urls_carry_the_acting_user() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            hdfs_host: Some("namenode".to_string()),
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let storage = HdfsStorage::new(&settings, "author", "wf/task").unwrap();
        assert_eq!(
            storage.op_url("author/wf/task/x", "OPEN"),
            "http://namenode:9000/webhdfs/v1/author/wf/task/x?op=OPEN&user.name=root"
        );
    }
}
