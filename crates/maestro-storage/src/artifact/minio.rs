// MinIO backend, spoken to through the S3 API with path-style addressing.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

use maestro_core::config::Settings;
use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{Resource, MINIO_SCHEME};

use super::base::{parse_remote_uri, ArtifactStore, StorageLayout};

pub struct MinioStorage {
    layout: StorageLayout,
    client: aws_sdk_s3::Client,
}

impl MinioStorage {
    pub fn new(settings: &Settings, bucket_name: &str, folder_name: &str) -> Result<Self> {
        let endpoint = settings
            .minio_endpoint()
            .ok_or_else(|| MaestroError::config("MINIO_HOST is not set"))?;

        let bucket_name = settings
            .minio_bucket
            .as_deref()
            .unwrap_or(bucket_name);

        let credentials = Credentials::new(
            settings.minio_access_key.clone(),
            settings.minio_secret_key.clone(),
            None,
            None,
            "maestro",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            layout: StorageLayout::new(settings.data_dir.clone(), bucket_name, folder_name),
            client: aws_sdk_s3::Client::from_conf(config),
        })
    }

    fn uri(&self, object_key: &str) -> String {
        format!("{MINIO_SCHEME}{}/{object_key}", self.layout.bucket_name)
    }

    fn read_only_policy(&self) -> String {
        // TODO: replace the public-read bucket policy with scoped credentials
        serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "",
                "Effect": "Allow",
                "Principal": {"AWS": "*"},
                "Action": "s3:GetObject",
                "Resource": format!("arn:aws:s3:::{}/*", self.layout.bucket_name),
            }],
        })
        .to_string()
    }
}

#[async_trait]
impl ArtifactStore for MinioStorage {
    fn scheme(&self) -> &'static str {
        MINIO_SCHEME
    }

    fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    async fn setup(&self) -> Result<Resource> {
        self.layout.ensure_local_dir()?;

        let created = self
            .client
            .create_bucket()
            .bucket(&self.layout.bucket_name)
            .send()
            .await;

        match created {
            Ok(_) => {
                self.client
                    .put_bucket_policy()
                    .bucket(&self.layout.bucket_name)
                    .policy(self.read_only_policy())
                    .send()
                    .await
                    .map_err(MaestroError::storage)?;
            }
            Err(err) => {
                let already_there = err.as_service_error().is_some_and(|e| {
                    e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                });
                if !already_there {
                    return Err(MaestroError::storage(err));
                }
            }
        }

        Resource::minio(self.uri(&format!("{}/", self.layout.folder_name)))
    }

    async fn put_file(&self, file_path: &Path, rename: Option<&str>) -> Result<Resource> {
        let (staged, file_name) = self.layout.stage_file(file_path, rename)?;
        let object_key = format!("{}/{file_name}", self.layout.folder_name);

        let body = ByteStream::from_path(&staged)
            .await
            .map_err(MaestroError::storage)?;

        self.client
            .put_object()
            .bucket(&self.layout.bucket_name)
            .key(&object_key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                MaestroError::storage(format!(
                    "could not put `{object_key}` into `{}`: {e}",
                    self.layout.bucket_name
                ))
            })?;

        Resource::minio(self.uri(&object_key))
    }

    async fn get_file(&self, uri: &str) -> Result<PathBuf> {
        let (bucket_name, object_key) = parse_remote_uri(uri, MINIO_SCHEME)?;

        let local_path = self.layout.temp_dir.join(bucket_name).join(object_key);
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(MaestroError::storage)?;
        }

        // Advisory lock so concurrent consumers of the same object do not
        // download it twice.
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
            let object = self
                .client
                .get_object()
                .bucket(bucket_name)
                .key(object_key)
                .send()
                .await
                .map_err(|e| {
                    MaestroError::storage(format!(
                        "could not get `{object_key}` from `{bucket_name}`: {e}"
                    ))
                })?;
            let bytes = object
                .body
                .collect()
                .await
                .map_err(MaestroError::storage)?
                .into_bytes();
            fs::write(&local_path, bytes).map_err(MaestroError::storage)?;
        }

        Ok(local_path)
    }
}
