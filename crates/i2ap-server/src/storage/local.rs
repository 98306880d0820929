//! Directory-backed object store
//!
//! Each bucket is a subdirectory of the root and each key a relative file
//! path inside it. Useful for single-node deployments and development.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

use super::{ObjectStore, StorageError, StorageResult, StoredObject};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        checked_relative(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = checked_relative(key)?;
        Ok(self.bucket_dir(bucket)?.join(relative))
    }
}

/// Keys must stay inside their bucket directory
fn checked_relative(key: &str) -> StorageResult<PathBuf> {
    let path = PathBuf::from(key);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if key.is_empty() || escapes {
        return Err(StorageError::Backend(format!("Invalid object key: '{}'", key)));
    }
    Ok(path)
}

fn map_missing(err: std::io::Error, bucket: &str, key: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::not_found(bucket, key)
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        fs::create_dir_all(self.bucket_dir(bucket)?).await?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(fs::metadata(self.bucket_dir(bucket)?)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        match fs::remove_dir_all(self.bucket_dir(bucket)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::BucketNotFound(bucket.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<StoredObject> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a sibling temp file first so readers never see a partial blob
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(StoredObject::new(key, &data))
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).await.map_err(|e| map_missing(e, bucket, key))
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let path = self.object_path(bucket, key)?;
        Ok(fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Deleting an absent object is not an error, as with S3
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        let data = self.get(src_bucket, src_key).await?;
        self.put(dest_bucket, dest_key, data).await?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let base = self.bucket_dir(bucket)?;
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) && !key.contains(".tmp-") {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
