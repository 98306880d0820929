//! S3-API object store
//!
//! Serves AWS S3, MinIO and Google Cloud Storage (through its
//! S3-interoperable endpoint with HMAC keys).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, error::DisplayErrorContext, primitives::ByteStream, Client};
use tracing::{debug, info, instrument};

use super::config::{StorageKind, StorageSettings};
use super::{ObjectStore, StorageError, StorageResult, StoredObject};

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    kind: StorageKind,
}

fn backend_error<E>(context: &str, err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::Backend(format!("{}: {}", context, DisplayErrorContext(&err)))
}

impl S3Store {
    pub async fn new(settings: &StorageSettings) -> StorageResult<Self> {
        debug!("Initializing S3 store with settings: {:?}", settings);

        let region = Region::new(settings.region.clone());

        // Without static keys fall back to the default AWS credential chain
        let mut builder = if settings.access_key.is_empty() {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        } else {
            let credentials = Credentials::new(
                &settings.access_key,
                &settings.secret_key,
                None,
                None,
                "i2ap-storage",
            );
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(credentials)
                .region(region)
        };

        builder = builder.force_path_style(settings.path_style);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            kind: settings.kind,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn kind(&self) -> &'static str {
        match self.kind {
            StorageKind::GoogleStorage => "googlestorage",
            StorageKind::Minio => "minio",
            _ => "s3",
        }
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.bucket_exists(bucket).await? {
            return Ok(());
        }
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| backend_error("Failed to create bucket", e))?;
        info!("Created bucket {}", bucket);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(backend_error("Failed to check bucket", e)),
        }
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| backend_error("Failed to delete bucket", e))?;
        info!("Deleted bucket {}", bucket);
        Ok(())
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<StoredObject> {
        let stored = StoredObject::new(key, &data);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| backend_error("Failed to upload object", e))?;

        debug!("Uploaded {} bytes to {}/{}", stored.size, bucket, key);
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(StorageError::not_found(bucket, key));
            },
            Err(e) => return Err(backend_error("Failed to download object", e)),
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read object body: {}", e)))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from {}/{}", data.len(), bucket, key);
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(backend_error("Failed to check object existence", e)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error("Failed to delete object", e))?;
        debug!("Deleted {}/{}", bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        if !self.exists(src_bucket, src_key).await? {
            return Err(StorageError::not_found(src_bucket, src_key));
        }

        self.client
            .copy_object()
            .bucket(dest_bucket)
            .copy_source(format!("{}/{}", src_bucket, src_key))
            .key(dest_key)
            .send()
            .await
            .map_err(|e| backend_error("Failed to copy object", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| backend_error("Failed to list objects", e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_construction_is_offline() {
        let store = S3Store::new(&StorageSettings::for_minio("http://127.0.0.1:9"))
            .await
            .unwrap();
        assert_eq!(store.kind(), "minio");
    }
}
