//! Plain FTP object store
//!
//! Buckets are top-level directories on the server and keys are paths inside
//! them. Sessions and retries come from [`super::session`].

use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use suppaftp::{FtpError, FtpStream, Status};
use tracing::{debug, warn};

use super::config::StorageSettings;
use super::session::{
    bucket_dir, parent_dirs, remote_path, run_with_retry, split_endpoint, BlockingSession,
    RETRY_DELAY_SECS,
};
use super::{ObjectStore, StorageError, StorageResult, StoredObject};

pub const DEFAULT_FTP_PORT: u16 = 21;

#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub retry_delay: Duration,
}

impl From<&StorageSettings> for FtpSettings {
    fn from(settings: &StorageSettings) -> Self {
        let (host, port) = split_endpoint(settings.endpoint.as_deref(), "ftp", DEFAULT_FTP_PORT);

        Self {
            host,
            port,
            username: settings.user.clone(),
            password: settings.password.clone(),
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
        }
    }
}

impl BlockingSession for FtpStream {
    type Settings = FtpSettings;
    const PROTOCOL: &'static str = "FTP";

    fn open(settings: &FtpSettings) -> StorageResult<Self> {
        debug!("Connecting to FTP server: {}:{}", settings.host, settings.port);

        let mut stream = FtpStream::connect(format!("{}:{}", settings.host, settings.port))
            .map_err(|e| ftp_error("connect", e))?;

        // Extended passive mode behaves better behind NAT
        stream.set_mode(suppaftp::Mode::ExtendedPassive);

        stream
            .login(&settings.username, &settings.password)
            .map_err(|e| ftp_error("login", e))?;
        stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .map_err(|e| ftp_error("set binary mode", e))?;

        Ok(stream)
    }

    fn close(mut self) {
        if let Err(e) = self.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }
    }
}

pub struct FtpStore {
    settings: FtpSettings,
}

impl FtpStore {
    pub fn new(settings: FtpSettings) -> Self {
        Self { settings }
    }

    async fn run<T, F>(&self, operation: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut FtpStream) -> StorageResult<T> + Send + Sync + 'static,
    {
        run_with_retry::<FtpStream, _, _>(&self.settings, self.settings.retry_delay, operation, op).await
    }
}

fn ftp_error(context: &str, err: FtpError) -> StorageError {
    StorageError::Backend(format!("FTP {} failed: {}", context, err))
}

fn is_unavailable(err: &FtpError) -> bool {
    matches!(err, FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable)
}

#[async_trait]
impl ObjectStore for FtpStore {
    fn kind(&self) -> &'static str {
        "ftp"
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = bucket_dir(bucket);
        self.run("mkdir", move |stream| match stream.mkdir(&dir) {
            Ok(()) => Ok(()),
            // Already there
            Err(e) if is_unavailable(&e) => Ok(()),
            Err(e) => Err(ftp_error("mkdir", e)),
        })
        .await
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let dir = bucket_dir(bucket);
        self.run("cwd", move |stream| match stream.cwd(&dir) {
            Ok(()) => Ok(true),
            Err(e) if is_unavailable(&e) => Ok(false),
            Err(e) => Err(ftp_error("cwd", e)),
        })
        .await
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = bucket_dir(bucket);
        let name = bucket.to_string();
        self.run("rmdir", move |stream| match stream.rmdir(&dir) {
            Ok(()) => Ok(()),
            Err(e) if is_unavailable(&e) => Err(StorageError::BucketNotFound(name.clone())),
            Err(e) => Err(ftp_error("rmdir", e)),
        })
        .await
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<StoredObject> {
        let stored = StoredObject::new(key, &data);
        let path = remote_path(bucket, key);
        let data = Arc::new(data);

        self.run("put", move |stream| {
            for dir in parent_dirs(&path) {
                // Existing directories answer 550, which is fine here
                let _ = stream.mkdir(&dir);
            }
            let mut reader = Cursor::new(data.as_slice());
            stream
                .put_file(&path, &mut reader)
                .map_err(|e| ftp_error("put", e))?;
            Ok(())
        })
        .await?;

        Ok(stored)
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let path = remote_path(bucket, key);
        let (bucket, key) = (bucket.to_string(), key.to_string());

        self.run("get", move |stream| match stream.retr_as_buffer(&path) {
            Ok(buffer) => Ok(buffer.into_inner()),
            Err(e) if is_unavailable(&e) => Err(StorageError::not_found(&bucket, &key)),
            Err(e) => Err(ftp_error("get", e)),
        })
        .await
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let path = remote_path(bucket, key);
        self.run("size", move |stream| match stream.size(&path) {
            Ok(_) => Ok(true),
            Err(e) if is_unavailable(&e) => Ok(false),
            Err(e) => Err(ftp_error("size", e)),
        })
        .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = remote_path(bucket, key);
        self.run("delete", move |stream| match stream.rm(&path) {
            Ok(()) => Ok(()),
            Err(e) if is_unavailable(&e) => Ok(()),
            Err(e) => Err(ftp_error("delete", e)),
        })
        .await
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        // FTP has no server-side copy
        let data = self.get(src_bucket, src_key).await?;
        self.put(dest_bucket, dest_key, data).await?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let root = bucket_dir(bucket);
        let prefix = prefix.to_string();

        self.run("list", move |stream| {
            let mut keys = Vec::new();
            let mut pending = vec![String::new()];

            while let Some(relative) = pending.pop() {
                let dir = if relative.is_empty() {
                    root.clone()
                } else {
                    format!("{}/{}", root, relative)
                };
                let lines = match stream.list(Some(&dir)) {
                    Ok(lines) => lines,
                    Err(e) if is_unavailable(&e) => continue,
                    Err(e) => return Err(ftp_error("list", e)),
                };

                for entry in lines.iter().filter_map(|line| FtpEntry::parse(line)) {
                    if entry.name == "." || entry.name == ".." {
                        continue;
                    }
                    let key = if relative.is_empty() {
                        entry.name
                    } else {
                        format!("{}/{}", relative, entry.name)
                    };
                    if entry.is_directory {
                        pending.push(key);
                    } else if key.starts_with(&prefix) {
                        keys.push(key);
                    }
                }
            }

            keys.sort();
            Ok(keys)
        })
        .await
    }
}

/// Parsed Unix-style `LIST` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

impl FtpEntry {
    /// Parse `drwxr-xr-x 2 ftp ftp 4096 Jan 15 12:00 name with spaces`
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }

        let is_directory = parts[0].starts_with('d');
        let name = if parts.len() >= 9 {
            parts[8..].join(" ")
        } else {
            parts.last()?.to_string()
        };
        let size = parts.get(4).and_then(|s| s.parse().ok());

        Some(Self {
            name,
            is_directory,
            size,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::config::StorageKind;

    #[test]
    fn test_parse_file_entry() {
        let entry =
            FtpEntry::parse("-rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 orders 2024.csv").unwrap();
        assert_eq!(entry.name, "orders 2024.csv");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, Some(1234));
    }

    #[test]
    fn test_parse_directory_entry() {
        let entry = FtpEntry::parse("drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 exports").unwrap();
        assert_eq!(entry.name, "exports");
        assert!(entry.is_directory);
    }

    #[test]
    fn test_parse_short_line() {
        assert!(FtpEntry::parse("total 8").is_none());
    }

    #[test]
    fn test_settings_from_endpoint() {
        let mut storage = StorageSettings::in_memory();
        storage.kind = StorageKind::Ftp;
        storage.endpoint = Some("ftp://files.example.com:2121".into());
        storage.user = "etl".into();

        let settings = FtpSettings::from(&storage);
        assert_eq!(settings.host, "files.example.com");
        assert_eq!(settings.port, 2121);
        assert_eq!(settings.username, "etl");

        storage.endpoint = Some("files.example.com".into());
        assert_eq!(FtpSettings::from(&storage).port, DEFAULT_FTP_PORT);
    }

    #[tokio::test]
    async fn test_unreachable_server_gives_backend_error() {
        let store = FtpStore::new(FtpSettings {
            host: "127.0.0.1".into(),
            port: 9,
            username: "u".into(),
            password: "p".into(),
            retry_delay: Duration::from_millis(1),
        });

        let err = store.get("stage", "a.csv").await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }
}
