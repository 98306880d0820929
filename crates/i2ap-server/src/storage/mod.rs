//! Object storage
//!
//! Every backend implements [`ObjectStore`]: bucket-scoped puts, gets, copies
//! and listings. Job state, staged input files and archives all go through this
//! trait, so the rest of the crate never touches a vendor client directly.
//!
//! Backends are chosen by [`connect`] from the configured storage type:
//!
//! | type                         | backend                         |
//! |------------------------------|---------------------------------|
//! | `googlestorage`, `minio`, `s3` | [`s3::S3Store`] (S3 API)      |
//! | `ftp`                        | [`ftp::FtpStore`]               |
//! | `sftp`                       | [`sftp::SftpStore`] (SSH)       |
//! | `local`                      | [`local::LocalStore`]           |
//! | `memory`                     | [`memory::MemoryStore`]         |

use async_trait::async_trait;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub mod config;
pub mod ftp;
pub mod local;
pub mod memory;
pub mod s3;
pub mod session;
pub mod sftp;

use config::{StorageKind, StorageSettings};

/// Errors raised by storage backends
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Invalid storage type: {0}")]
    InvalidType(String),

    #[error("Invalid object pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result of a successful put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    /// Hex SHA-256 of the stored bytes
    pub checksum: String,
}

impl StoredObject {
    pub fn new(key: &str, data: &[u8]) -> Self {
        Self {
            key: key.to_string(),
            size: data.len() as u64,
            checksum: sha256_hex(data),
        }
    }
}

/// Bucket-scoped blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs
    fn kind(&self) -> &'static str;

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<StoredObject>;

    /// Fetch a whole object. Missing objects are [`StorageError::NotFound`].
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()>;

    /// Keys in `bucket` starting with `prefix`, sorted
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Build the configured backend
pub async fn connect(settings: &StorageSettings) -> StorageResult<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match settings.kind {
        StorageKind::GoogleStorage | StorageKind::Minio | StorageKind::S3 => {
            Arc::new(s3::S3Store::new(settings).await?)
        },
        StorageKind::Ftp => Arc::new(ftp::FtpStore::new(ftp::FtpSettings::from(settings))),
        StorageKind::Sftp => Arc::new(sftp::SftpStore::new(sftp::SftpSettings::from(settings))),
        StorageKind::Local => Arc::new(local::LocalStore::new(&settings.root)),
        StorageKind::Memory => Arc::new(memory::MemoryStore::new()),
    };
    info!(backend = store.kind(), "Object store initialized");
    Ok(store)
}

/// Copy an object then delete the source.
///
/// The destination bucket and key default to the source ones, so moving a
/// staged file to the archive bucket only needs `dest_bucket`.
#[instrument(skip(store))]
pub async fn move_object(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    dest_bucket: Option<&str>,
    dest_key: Option<&str>,
) -> StorageResult<()> {
    let dest_bucket = dest_bucket.unwrap_or(bucket);
    let dest_key = dest_key.unwrap_or(key);

    if dest_bucket == bucket && dest_key == key {
        debug!("Move source and destination are identical, nothing to do");
        return Ok(());
    }

    store.copy(bucket, key, dest_bucket, dest_key).await?;
    store.delete(bucket, key).await?;

    info!("Moved {}/{} to {}/{}", bucket, key, dest_bucket, dest_key);
    Ok(())
}

/// Read and decode a JSON object
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
) -> StorageResult<T> {
    let bytes = store.get(bucket, key).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encode and write a JSON object
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    value: &T,
) -> StorageResult<StoredObject> {
    let bytes = serde_json::to_vec(value)?;
    store.put(bucket, key, bytes).await
}

fn folder_pattern(folder: &str, pattern: &str) -> StorageResult<Regex> {
    let folder = folder.trim_end_matches('/');
    let expr = if folder.is_empty() {
        format!("^{}.*", pattern)
    } else {
        format!("^{}/{}.*", regex::escape(folder), pattern)
    };
    Regex::new(&expr).map_err(|e| StorageError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Keys under `folder` whose remaining name matches the regex `pattern`.
pub async fn list_matching(
    store: &dyn ObjectStore,
    bucket: &str,
    folder: &str,
    pattern: &str,
) -> StorageResult<Vec<String>> {
    let matcher = folder_pattern(folder, pattern)?;
    let prefix = folder.trim_end_matches('/');
    let keys = store.list(bucket, prefix).await?;
    Ok(keys.into_iter().filter(|k| matcher.is_match(k)).collect())
}

/// Delete every key [`list_matching`] returns; yields the number deleted.
pub async fn delete_matching(
    store: &dyn ObjectStore,
    bucket: &str,
    folder: &str,
    pattern: &str,
) -> StorageResult<usize> {
    let keys = list_matching(store, bucket, folder, pattern).await?;
    for key in &keys {
        store.delete(bucket, key).await?;
    }
    Ok(keys.len())
}

pub async fn any_matching(
    store: &dyn ObjectStore,
    bucket: &str,
    folder: &str,
    pattern: &str,
) -> StorageResult<bool> {
    Ok(!list_matching(store, bucket, folder, pattern).await?.is_empty())
}

/// Prefix for listing everything in `folder`; empty means the whole bucket
fn folder_prefix(folder: &str) -> String {
    match folder.trim_matches('/') {
        "" => String::new(),
        folder => format!("{}/", folder),
    }
}

/// Copy every object under `folder` into `dest_bucket` under the same keys.
///
/// Returns the number of objects copied.
#[instrument(skip(store))]
pub async fn copy_folder(
    store: &dyn ObjectStore,
    bucket: &str,
    folder: &str,
    dest_bucket: &str,
) -> StorageResult<usize> {
    let keys = store.list(bucket, &folder_prefix(folder)).await?;
    for key in &keys {
        store.copy(bucket, key, dest_bucket, key).await?;
    }
    info!(copied = keys.len(), "Copied folder");
    Ok(keys.len())
}

/// Delete every object under `folder`; yields the number deleted
#[instrument(skip(store))]
pub async fn delete_folder(store: &dyn ObjectStore, bucket: &str, folder: &str) -> StorageResult<usize> {
    let keys = store.list(bucket, &folder_prefix(folder)).await?;
    for key in &keys {
        store.delete(bucket, key).await?;
    }
    info!(deleted = keys.len(), "Deleted folder");
    Ok(keys.len())
}

fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_bucket("stage").await.unwrap();
        store.create_bucket("archive").await.unwrap();
        for key in ["exports/orders_2024.csv", "exports/orders_2025.csv", "exports/items.csv", "other/orders.csv"] {
            store.put("stage", key, b"a,b\n1,2\n".to_vec()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_connect_picks_backend_by_kind() {
        let mut settings = StorageSettings::in_memory();
        assert_eq!(connect(&settings).await.unwrap().kind(), "memory");

        settings.kind = StorageKind::Sftp;
        settings.endpoint = Some("sftp://files.example.com".into());
        assert_eq!(connect(&settings).await.unwrap().kind(), "sftp");

        settings.kind = StorageKind::Ftp;
        settings.endpoint = Some("ftp://files.example.com".into());
        assert_eq!(connect(&settings).await.unwrap().kind(), "ftp");
    }

    #[test]
    fn test_stored_object_checksum() {
        let object = StoredObject::new("k", b"Hello, World!");
        assert_eq!(object.size, 13);
        assert_eq!(
            object.checksum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[tokio::test]
    async fn test_move_defaults_to_same_key() {
        let store = seeded().await;

        move_object(&store, "stage", "exports/items.csv", Some("archive"), None)
            .await
            .unwrap();

        assert!(!store.exists("stage", "exports/items.csv").await.unwrap());
        assert!(store.exists("archive", "exports/items.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_move_within_bucket_renames() {
        let store = seeded().await;

        move_object(&store, "stage", "exports/items.csv", None, Some("done/items.csv"))
            .await
            .unwrap();

        assert!(store.exists("stage", "done/items.csv").await.unwrap());
        assert!(!store.exists("stage", "exports/items.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let store = seeded().await;
        let err = move_object(&store, "stage", "nope.csv", Some("archive"), None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_matching_uses_folder_and_pattern() {
        let store = seeded().await;

        let keys = list_matching(&store, "stage", "exports", "orders_").await.unwrap();
        assert_eq!(keys, vec!["exports/orders_2024.csv", "exports/orders_2025.csv"]);

        assert!(any_matching(&store, "stage", "exports/", "items").await.unwrap());
        assert!(!any_matching(&store, "stage", "exports", "customers").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_matching_counts() {
        let store = seeded().await;

        let deleted = delete_matching(&store, "stage", "exports", "orders_20").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.list("stage", "exports").await.unwrap(), vec!["exports/items.csv"]);
    }

    #[tokio::test]
    async fn test_copy_folder_keeps_keys() {
        let store = seeded().await;
        store.put("stage", "exportsold/x.csv", b"x".to_vec()).await.unwrap();

        let copied = copy_folder(&store, "stage", "exports/", "archive").await.unwrap();
        assert_eq!(copied, 3);
        assert_eq!(
            store.list("archive", "").await.unwrap(),
            vec!["exports/items.csv", "exports/orders_2024.csv", "exports/orders_2025.csv"]
        );
        // Source is untouched
        assert_eq!(store.list("stage", "exports/").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_folder_spares_siblings() {
        let store = seeded().await;
        store.put("stage", "exportsold/x.csv", b"x".to_vec()).await.unwrap();

        assert_eq!(delete_folder(&store, "stage", "exports").await.unwrap(), 3);
        assert_eq!(
            store.list("stage", "").await.unwrap(),
            vec!["exportsold/x.csv", "other/orders.csv"]
        );
        assert_eq!(delete_folder(&store, "stage", "exports").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let store = seeded().await;
        let err = list_matching(&store, "stage", "exports", "orders_(").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPattern { .. }));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = seeded().await;
        put_json(&store, "stage", "meta.json", &serde_json::json!({"rows": 3}))
            .await
            .unwrap();
        let value: serde_json::Value = get_json(&store, "stage", "meta.json").await.unwrap();
        assert_eq!(value["rows"], 3);
    }
}
