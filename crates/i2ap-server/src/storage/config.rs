use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use super::StorageError;

/// Google Cloud Storage's S3-interoperable endpoint
pub const GCS_INTEROP_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    GoogleStorage,
    Minio,
    S3,
    Ftp,
    Sftp,
    Local,
    Memory,
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "googlestorage" | "gcs" => Ok(StorageKind::GoogleStorage),
            "minio" => Ok(StorageKind::Minio),
            "s3" | "aws" => Ok(StorageKind::S3),
            "ftp" => Ok(StorageKind::Ftp),
            "sftp" => Ok(StorageKind::Sftp),
            "local" => Ok(StorageKind::Local),
            "memory" => Ok(StorageKind::Memory),
            other => Err(StorageError::InvalidType(other.to_string())),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub kind: StorageKind,
    /// S3 endpoint URL, or the FTP/SFTP host
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub user: String,
    pub password: String,
    /// Root directory for the `local` backend
    pub root: PathBuf,
    pub path_style: bool,
    /// SFTP private key; password auth is used when unset
    pub key_file: Option<PathBuf>,
    /// Expected SHA-256 of the SFTP host key, hex with optional colons
    pub host_fingerprint: Option<String>,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("user", &self.user)
            .field("root", &self.root)
            .field("path_style", &self.path_style)
            .field("key_file", &self.key_file)
            .field("host_fingerprint", &self.host_fingerprint)
            .finish_non_exhaustive()
    }
}

impl StorageSettings {
    pub(crate) fn from_lookup(var: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let kind: StorageKind = var("I2AP_STORAGE_TYPE")
            .unwrap_or_else(|| "minio".to_string())
            .parse()?;

        let endpoint = var("I2AP_STORAGE_PROJECT").or_else(|| {
            (kind == StorageKind::GoogleStorage).then(|| GCS_INTEROP_ENDPOINT.to_string())
        });

        Ok(Self {
            kind,
            endpoint,
            region: var("I2AP_STORAGE_REGION").unwrap_or_else(|| match kind {
                StorageKind::GoogleStorage => "auto".to_string(),
                _ => "us-east-1".to_string(),
            }),
            access_key: var("I2AP_STORAGE_KEY")
                .or_else(|| var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_default(),
            secret_key: var("I2AP_STORAGE_SECRET")
                .or_else(|| var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_default(),
            user: var("I2AP_STORAGE_USER").unwrap_or_default(),
            password: var("I2AP_STORAGE_PASSWORD").unwrap_or_default(),
            root: PathBuf::from(var("I2AP_STORAGE_ROOT").unwrap_or_else(|| "./data".to_string())),
            path_style: var("I2AP_STORAGE_PATH_STYLE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(kind == StorageKind::Minio),
            key_file: var("I2AP_STORAGE_KEY_FILE").map(PathBuf::from),
            host_fingerprint: var("I2AP_STORAGE_HOST_FINGERPRINT"),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            kind: StorageKind::Minio,
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            user: String::new(),
            password: String::new(),
            root: PathBuf::new(),
            path_style: true,
            key_file: None,
            host_fingerprint: None,
        }
    }

    pub fn for_local(root: impl Into<PathBuf>) -> Self {
        Self {
            kind: StorageKind::Local,
            root: root.into(),
            ..Self::in_memory()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            kind: StorageKind::Memory,
            endpoint: None,
            region: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            user: String::new(),
            password: String::new(),
            root: PathBuf::new(),
            path_style: false,
            key_file: None,
            host_fingerprint: None,
        }
    }
}
