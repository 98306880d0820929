//! SFTP object store over libssh2
//!
//! Same layout as the FTP store: buckets are top-level directories and keys
//! are paths inside them. Authentication uses a private key when one is
//! configured and the password otherwise. A configured host fingerprint is
//! checked before any credentials are sent.

use async_trait::async_trait;
use ssh2::{ErrorCode, HashType, Session, Sftp};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::StorageSettings;
use super::session::{
    bucket_dir, parent_dirs, remote_path, run_with_retry, split_endpoint, BlockingSession,
    RETRY_DELAY_SECS,
};
use super::{ObjectStore, StorageError, StorageResult, StoredObject};

pub const DEFAULT_SFTP_PORT: u16 = 22;

/// Milliseconds libssh2 waits on any single blocking call
pub const DEFAULT_SESSION_TIMEOUT_MS: u32 = 30_000;

// libssh2_sftp.h status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

#[derive(Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub key_file: Option<PathBuf>,
    pub host_fingerprint: Option<String>,
    pub timeout_ms: u32,
    pub retry_delay: Duration,
}

impl std::fmt::Debug for SftpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("key_file", &self.key_file)
            .finish_non_exhaustive()
    }
}

impl From<&StorageSettings> for SftpSettings {
    fn from(settings: &StorageSettings) -> Self {
        let (host, port) = split_endpoint(settings.endpoint.as_deref(), "sftp", DEFAULT_SFTP_PORT);
        Self {
            host,
            port,
            username: settings.user.clone(),
            password: settings.password.clone(),
            key_file: settings.key_file.clone(),
            host_fingerprint: settings.host_fingerprint.clone(),
            timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
        }
    }
}

/// An authenticated SSH session with its SFTP channel
pub struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl BlockingSession for SftpSession {
    type Settings = SftpSettings;
    const PROTOCOL: &'static str = "SFTP";

    fn open(settings: &SftpSettings) -> StorageResult<Self> {
        debug!("Connecting to SFTP server: {}:{}", settings.host, settings.port);

        let tcp = TcpStream::connect((settings.host.as_str(), settings.port))?;
        let mut session = Session::new().map_err(|e| sftp_error("session", e))?;
        session.set_timeout(settings.timeout_ms);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| sftp_error("handshake", e))?;

        if let Some(expected) = &settings.host_fingerprint {
            verify_host_key(&session, expected)?;
        }

        match &settings.key_file {
            Some(key) => {
                let passphrase = (!settings.password.is_empty()).then_some(settings.password.as_str());
                session
                    .userauth_pubkey_file(&settings.username, None, key, passphrase)
                    .map_err(|e| sftp_error("key authentication", e))?;
            },
            None => session
                .userauth_password(&settings.username, &settings.password)
                .map_err(|e| sftp_error("password authentication", e))?,
        }
        if !session.authenticated() {
            return Err(StorageError::Backend(format!(
                "SFTP server rejected user {}",
                settings.username
            )));
        }

        let sftp = session.sftp().map_err(|e| sftp_error("open channel", e))?;
        Ok(Self { session, sftp })
    }

    fn close(self) {
        let Self { session, sftp } = self;
        drop(sftp);
        if let Err(e) = session.disconnect(None, "done", None) {
            warn!("Failed to close SFTP session gracefully: {}", e);
        }
    }
}

fn verify_host_key(session: &Session, expected: &str) -> StorageResult<()> {
    let actual = session
        .host_key_hash(HashType::Sha256)
        .map(fingerprint_hex)
        .ok_or_else(|| StorageError::Backend("SFTP server sent no host key".to_string()))?;
    let expected = expected.replace(':', "").to_lowercase();
    if actual != expected {
        return Err(StorageError::Backend(format!(
            "SFTP host key fingerprint {} does not match the configured one",
            actual
        )));
    }
    Ok(())
}

fn fingerprint_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

fn sftp_error(context: &str, err: ssh2::Error) -> StorageError {
    StorageError::Backend(format!("SFTP {} failed: {}", context, err))
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH))
}

pub struct SftpStore {
    settings: SftpSettings,
}

impl SftpStore {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }

    async fn run<T, F>(&self, operation: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut SftpSession) -> StorageResult<T> + Send + Sync + 'static,
    {
        run_with_retry::<SftpSession, _, _>(&self.settings, self.settings.retry_delay, operation, op)
            .await
    }
}

#[async_trait]
impl ObjectStore for SftpStore {
    fn kind(&self) -> &'static str {
        "sftp"
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = PathBuf::from(bucket_dir(bucket));
        self.run("mkdir", move |s| match s.sftp.stat(&dir) {
            Ok(stat) if stat.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Backend(format!(
                "{} exists and is not a directory",
                dir.display()
            ))),
            Err(e) if is_missing(&e) => s.sftp.mkdir(&dir, 0o755).map_err(|e| sftp_error("mkdir", e)),
            Err(e) => Err(sftp_error("stat", e)),
        })
        .await
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let dir = PathBuf::from(bucket_dir(bucket));
        self.run("stat", move |s| match s.sftp.stat(&dir) {
            Ok(stat) => Ok(stat.is_dir()),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(sftp_error("stat", e)),
        })
        .await
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = PathBuf::from(bucket_dir(bucket));
        let name = bucket.to_string();
        self.run("rmdir", move |s| match s.sftp.rmdir(&dir) {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e) => Err(StorageError::BucketNotFound(name.clone())),
            Err(e) => Err(sftp_error("rmdir", e)),
        })
        .await
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> StorageResult<StoredObject> {
        let stored = StoredObject::new(key, &data);
        let path = remote_path(bucket, key);
        let data = Arc::new(data);

        self.run("put", move |s| {
            for dir in parent_dirs(&path) {
                // Existing directories fail mkdir, which is fine here
                let _ = s.sftp.mkdir(Path::new(&dir), 0o755);
            }
            let mut file = s
                .sftp
                .create(Path::new(&path))
                .map_err(|e| sftp_error("create", e))?;
            file.write_all(data.as_slice())?;
            Ok(())
        })
        .await?;

        Ok(stored)
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let path = PathBuf::from(remote_path(bucket, key));
        let (bucket, key) = (bucket.to_string(), key.to_string());

        self.run("get", move |s| {
            let mut file = match s.sftp.open(&path) {
                Ok(file) => file,
                Err(e) if is_missing(&e) => return Err(StorageError::not_found(&bucket, &key)),
                Err(e) => return Err(sftp_error("open", e)),
            };
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
        .await
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let path = PathBuf::from(remote_path(bucket, key));
        self.run("stat", move |s| match s.sftp.stat(&path) {
            Ok(stat) => Ok(stat.is_file()),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(sftp_error("stat", e)),
        })
        .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = PathBuf::from(remote_path(bucket, key));
        self.run("unlink", move |s| match s.sftp.unlink(&path) {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(sftp_error("unlink", e)),
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
        // SFTP v3 has no server-side copy
        let data = self.get(src_bucket, src_key).await?;
        self.put(dest_bucket, dest_key, data).await?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let root = bucket_dir(bucket);
        let prefix = prefix.to_string();

        self.run("list", move |s| {
            let mut keys = Vec::new();
            let mut pending = vec![String::new()];

            while let Some(relative) = pending.pop() {
                let dir = if relative.is_empty() {
                    root.clone()
                } else {
                    format!("{}/{}", root, relative)
                };
                let entries = match s.sftp.readdir(Path::new(&dir)) {
                    Ok(entries) => entries,
                    Err(e) if is_missing(&e) => continue,
                    Err(e) => return Err(sftp_error("readdir", e)),
                };

                for (path, stat) in entries {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if name == "." || name == ".." {
                        continue;
                    }
                    let key = if relative.is_empty() {
                        name.to_string()
                    } else {
                        format!("{}/{}", relative, name)
                    };
                    if stat.is_dir() {
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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::config::StorageKind;
    use std::net::TcpListener;

    fn settings(port: u16) -> SftpSettings {
        SftpSettings {
            host: "127.0.0.1".into(),
            port,
            username: "u".into(),
            password: "p".into(),
            key_file: None,
            host_fingerprint: None,
            timeout_ms: 2_000,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_settings_default_to_ssh_port() {
        let mut storage = StorageSettings::in_memory();
        storage.kind = StorageKind::Sftp;
        storage.endpoint = Some("sftp://files.example.com".into());
        storage.user = "etl".into();
        storage.password = "pw".into();
        storage.key_file = Some(PathBuf::from("/keys/id_rsa"));

        let sftp = SftpSettings::from(&storage);
        assert_eq!(sftp.host, "files.example.com");
        assert_eq!(sftp.port, DEFAULT_SFTP_PORT);
        assert_eq!(sftp.key_file, Some(PathBuf::from("/keys/id_rsa")));
        assert!(!format!("{:?}", sftp).contains("pw"));

        storage.endpoint = Some("files.example.com:2222".into());
        assert_eq!(SftpSettings::from(&storage).port, 2222);
    }

    #[test]
    fn test_fingerprint_hex() {
        assert_eq!(fingerprint_hex(&[0x0a, 0xff, 0x10]), "0aff10");
    }

    #[tokio::test]
    async fn test_unreachable_server_gives_backend_error() {
        // Nothing listens on the discard port
        let store = SftpStore::new(settings(9));
        let err = store.get("stage", "a.csv").await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(ref m) if m.starts_with("SFTP get failed")));
    }

    #[tokio::test]
    async fn test_ftp_server_fails_the_ssh_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in listener.incoming().take(3) {
                let mut stream = stream.unwrap();
                let _ = stream.write_all(b"220 FTP server ready\r\n");
            }
        });

        let store = SftpStore::new(settings(port));
        let err = store.exists("stage", "a.csv").await.unwrap_err();
        match err {
            StorageError::Backend(message) => {
                assert!(message.starts_with("SFTP stat failed after 3 attempts"), "{}", message)
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
