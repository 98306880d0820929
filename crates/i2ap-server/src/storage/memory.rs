//! In-process object store
//!
//! Buckets are created implicitly on first write. Nothing survives a restart.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{ObjectStore, StorageError, StorageResult, StoredObject};

#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects across all buckets
    pub async fn object_count(&self) -> usize {
        self.buckets.read().await.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.buckets.read().await.contains_key(bucket))
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.buckets
            .write()
            .await
            .remove(bucket)
            .map(|_| ())
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<StoredObject> {
        let stored = StoredObject::new(key, &data);
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data);
        Ok(stored)
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| StorageError::not_found(bucket, key))
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key)))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        if let Some(objects) = self.buckets.write().await.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
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
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
