// Typed URIs locating artifacts across storage backends

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{MaestroError, Result};

/// Scheme of a local filesystem path.
pub const LOCAL_SCHEME: &str = "";
/// Scheme of an object stored in MinIO.
pub const MINIO_SCHEME: &str = "minio://";
/// Scheme of an object stored in HDFS.
pub const HDFS_SCHEME: &str = "hdfs:/";

/// A tagged URI locating an artifact in some backend.
///
/// The `resource` string always starts with its `scheme`; an empty scheme
/// denotes a plain local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    #[serde(default)]
    pub scheme: String,
    pub resource: String,
}

impl Resource {
    /// Build a resource, enforcing the scheme-prefix invariant.
    pub fn new(scheme: impl Into<String>, resource: impl Into<String>) -> Result<Self> {
        let scheme = scheme.into();
        let resource = resource.into();
        if !resource.starts_with(&scheme) {
            return Err(MaestroError::validation(format!(
                "invalid resource: `{resource}` does not start with scheme `{scheme}`"
            )));
        }
        Ok(Self { scheme, resource })
    }

    /// A plain local filesystem path.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            scheme: LOCAL_SCHEME.to_string(),
            resource: path.into(),
        }
    }

    pub fn minio(uri: impl Into<String>) -> Result<Self> {
        Self::new(MINIO_SCHEME, uri)
    }

    pub fn hdfs(uri: impl Into<String>) -> Result<Self> {
        Self::new(HDFS_SCHEME, uri)
    }

    /// The URI with the backend scheme stripped.
    pub fn path(&self) -> &str {
        &self.resource[self.scheme.len()..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_must_have_scheme() {
        assert!(Resource::minio("minio://bucket/folder/file.txt").is_ok());
        assert!(Resource::minio("/bucket/folder/file.txt").is_err());
        assert!(Resource::hdfs("hdfs:/bucket/folder/file.txt").is_ok());
    }

    #[test]
    fn local_resource_accepts_any_path() {
        let res = Resource::local("/tmp/out.csv");
        assert_eq!(res.scheme, "");
        assert_eq!(res.path(), "/tmp/out.csv");
    }

    #[test]
    fn path_strips_scheme() {
        let res = Resource::minio("minio://bucket/wf/task/log.txt").unwrap();
        assert_eq!(res.path(), "bucket/wf/task/log.txt");
    }
}
