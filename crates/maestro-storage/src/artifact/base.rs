// Backend-independent storage behavior: the capability trait plus the local
// scratch-directory layout shared by every backend.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use maestro_core::error::{MaestroError, Result};
use maestro_core::models::Resource;

/// Uniform capability set over artifact backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// The URI scheme this backend produces.
    fn scheme(&self) -> &'static str;

    fn layout(&self) -> &StorageLayout;

    /// Ensure the local scratch dir (and, for remote backends, the remote
    /// bucket/namespace) exists. Idempotent.
    async fn setup(&self) -> Result<Resource>;

    /// Upload a file and return the resource identifying it. The source is
    /// first staged into the local dir when it lives outside of it.
    async fn put_file(&self, file_path: &Path, rename: Option<&str>) -> Result<Resource>;

    /// Download an object to its deterministic local path (unless already
    /// on disk) and return that path.
    async fn get_file(&self, uri: &str) -> Result<PathBuf>;

    /// Remove the local scratch dir. Files named in `omit_files` are kept,
    /// renamed to `<name>.old`; when nothing is omitted the directory itself
    /// goes away.
    fn remove_local_dir(&self, omit_files: &[&str]) -> Result<()> {
        self.layout().remove_local_dir(omit_files)
    }

    /// Remove the remote counterpart of the scratch dir. Declared on every
    /// backend but currently a no-op.
    async fn remove_remote_dir(&self) -> Result<()> {
        Ok(())
    }

    fn local_dir(&self) -> &Path {
        &self.layout().local_dir
    }

    fn temp_dir(&self) -> &Path {
        &self.layout().temp_dir
    }
}

/// Scratch-directory layout: `DATA_DIR/bucket/folder`.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub bucket_name: String,
    pub folder_name: String,
    pub temp_dir: PathBuf,
    pub local_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(temp_dir: impl Into<PathBuf>, bucket_name: &str, folder_name: &str) -> Self {
        let temp_dir = temp_dir.into();
        let local_dir = temp_dir.join(bucket_name).join(folder_name);
        Self {
            bucket_name: bucket_name.to_string(),
            folder_name: folder_name.to_string(),
            temp_dir,
            local_dir,
        }
    }

    pub fn ensure_local_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.local_dir)
            .map_err(|e| MaestroError::storage(format!("could not create scratch dir: {e}")))
    }

    /// Stage a file into the local dir: copy it in when it lives outside,
    /// rename when requested. Returns the staged path and final file name.
    pub fn stage_file(&self, file_path: &Path, rename: Option<&str>) -> Result<(PathBuf, String)> {
        let file_name = match rename {
            Some(name) => name.to_string(),
            None => file_path
                .file_name()
                .ok_or_else(|| {
                    MaestroError::storage(format!("`{}` has no file name", file_path.display()))
                })?
                .to_string_lossy()
                .to_string(),
        };

        let target = self.local_dir.join(&file_name);

        if !file_path.starts_with(&self.local_dir) {
            fs::copy(file_path, &target).map_err(|e| {
                MaestroError::storage(format!(
                    "could not copy `{}` into scratch dir: {e}",
                    file_path.display()
                ))
            })?;
        } else if file_path != target {
            fs::rename(file_path, &target).map_err(MaestroError::storage)?;
        }

        Ok((target, file_name))
    }

    pub fn remove_local_dir(&self, omit_files: &[&str]) -> Result<()> {
        tracing::warn!(
            dir = %self.local_dir.display(),
            "directory is being deleted from the local filesystem"
        );

        let entries = fs::read_dir(&self.local_dir).map_err(MaestroError::storage)?;
        for entry in entries {
            let entry = entry.map_err(MaestroError::storage)?;
            let item_path = entry.path();
            let item_name = entry.file_name().to_string_lossy().to_string();

            if omit_files.contains(&item_name.as_str()) {
                let kept = self.local_dir.join(format!("{item_name}.old"));
                fs::rename(&item_path, &kept).map_err(MaestroError::storage)?;
                continue;
            }

            tracing::warn!(item = %item_path.display(), "item marked for removal");
            if item_path.is_dir() {
                let _ = fs::remove_dir_all(&item_path);
            } else {
                fs::remove_file(&item_path).map_err(MaestroError::storage)?;
            }
        }

        if omit_files.is_empty() {
            let _ = fs::remove_dir_all(&self.local_dir);
        }

        Ok(())
    }
}

/// Split a remote URI into `(bucket, object_key)` after checking its scheme.
pub(crate) fn parse_remote_uri<'a>(uri: &'a str, scheme: &str) -> Result<(&'a str, &'a str)> {
    let rest = uri
        .strip_prefix(scheme)
        .ok_or_else(|| MaestroError::not_valid_scheme(scheme, uri))?;
    rest.split_once('/')
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .ok_or_else(|| {
            MaestroError::storage(format!("`{uri}` does not name a bucket and an object"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_derives_local_dir() {
        let layout = StorageLayout::new("/tmp", "author", "wf/task");
        assert_eq!(layout.local_dir, PathBuf::from("/tmp/author/wf/task"));
    }

    #[test]
    fn stage_copies_outside_files_in() {
        let scratch = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();

        let layout = StorageLayout::new(scratch.path(), "author", "wf/task");
        layout.ensure_local_dir().unwrap();

        let source = elsewhere.path().join("data.csv");
        fs::write(&source, "a,b\n").unwrap();

        let (staged, name) = layout.stage_file(&source, None).unwrap();
        assert_eq!(name, "data.csv");
        assert_eq!(staged, layout.local_dir.join("data.csv"));
        assert!(staged.is_file());
        // source stays in place on copy
        assert!(source.is_file());
    }

    #[test]
    fn stage_renames_inside_files() {
        let scratch = tempdir().unwrap();
        let layout = StorageLayout::new(scratch.path(), "author", "wf/task");
        layout.ensure_local_dir().unwrap();

        let source = layout.local_dir.join("tmp-123");
        fs::write(&source, "log line\n").unwrap();

        let (staged, name) = layout.stage_file(&source, Some("log.txt")).unwrap();
        assert_eq!(name, "log.txt");
        assert!(staged.is_file());
        assert!(!source.exists());
    }

    #[test]
    fn remove_local_dir_keeps_omitted_files_as_old() {
        let scratch = tempdir().unwrap();
        let layout = StorageLayout::new(scratch.path(), "author", "wf/task");
        layout.ensure_local_dir().unwrap();

        fs::write(layout.local_dir.join("log.txt"), "kept").unwrap();
        fs::write(layout.local_dir.join("data.bin"), "dropped").unwrap();

        layout.remove_local_dir(&["log.txt"]).unwrap();

        assert!(layout.local_dir.join("log.txt.old").is_file());
        assert!(!layout.local_dir.join("log.txt").exists());
        assert!(!layout.local_dir.join("data.bin").exists());
        // with omissions the directory itself survives
        assert!(layout.local_dir.is_dir());
    }

    #[test]
    fn remove_local_dir_without_omissions_removes_the_dir() {
        let scratch = tempdir().unwrap();
        let layout = StorageLayout::new(scratch.path(), "author", "wf/task");
        layout.ensure_local_dir().unwrap();
        fs::write(layout.local_dir.join("data.bin"), "x").unwrap();

        layout.remove_local_dir(&[]).unwrap();
        assert!(!layout.local_dir.exists());
    }

    #[test]
    fn remote_uris_split_into_bucket_and_key() {
        let (bucket, key) =
            parse_remote_uri("minio://author/wf/task/out.tsv", "minio://").unwrap();
        assert_eq!(bucket, "author");
        assert_eq!(key, "wf/task/out.tsv");

        assert!(matches!(
            parse_remote_uri("/author/out.tsv", "minio://"),
            Err(MaestroError::NotValidScheme { .. })
        ));
    }
}
