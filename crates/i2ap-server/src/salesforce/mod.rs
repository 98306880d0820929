//! Salesforce source
//!
//! [`SalesforceApi`] is the narrow surface the sync flow needs: describe an
//! object and run a SOQL query. [`client::SalesforceClient`] implements it
//! over the REST API; tests substitute their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::warehouse::{ColumnType, DataFrame, FrameError};

pub mod client;
pub mod sync;

pub use client::SalesforceClient;
pub use sync::{SyncEngine, SyncOutcome};

/// Manifest listing the objects a full sync covers
pub const MANIFEST_FILE: &str = "salesforce-manifest.json";

/// Fields the query API refuses even though describe lists them
const NON_QUERYABLE_FIELDS: &[&str] = &[
    "HasOpenActivity",
    "HasOverdueTask",
    "BadgeText",
    "IsProfilePhotoActive",
    "IsHighPriority",
    "RecurrenceRegeneratedType",
    "TaskSubtype",
];

#[derive(Debug, thiserror::Error)]
pub enum SalesforceError {
    #[error("Salesforce credentials are not configured")]
    NotConfigured,

    #[error("Salesforce login failed: {0}")]
    Login(String),

    #[error("Salesforce API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed Salesforce response: {0}")]
    Response(String),

    #[error("Cannot read manifest {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type SalesforceResult<T> = std::result::Result<T, SalesforceError>;

/// One field of an object description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfField {
    pub name: String,
    #[serde(rename = "type")]
    pub sf_type: String,
}

impl SfField {
    pub fn new(name: impl Into<String>, sf_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sf_type: sf_type.into(),
        }
    }
}

#[async_trait]
pub trait SalesforceApi: Send + Sync {
    /// Fields of `object`, as reported by describe
    async fn describe(&self, object: &str) -> SalesforceResult<Vec<SfField>>;

    /// Every record matching `soql`, following pagination
    async fn query(&self, soql: &str) -> SalesforceResult<DataFrame>;
}

/// Map a Salesforce field type onto a warehouse column type
pub fn convert_type(sf_type: &str) -> ColumnType {
    match sf_type.trim().to_uppercase().as_str() {
        "BOOLEAN" => ColumnType::Boolean,
        "DOUBLE" | "CURRENCY" => ColumnType::Float,
        "INT" => ColumnType::Integer,
        "DATETIME" => ColumnType::DateTime,
        "DATE" => ColumnType::Date,
        _ => ColumnType::String,
    }
}

/// Drop fields the bulk query cannot select, sorted by name
pub fn filter_fields(fields: Vec<SfField>) -> Vec<SfField> {
    let mut kept: Vec<SfField> = fields
        .into_iter()
        .filter(|f| {
            let sf_type = f.sf_type.to_lowercase();
            sf_type != "address"
                && sf_type != "url"
                && !f.name.contains("Geocode")
                && !NON_QUERYABLE_FIELDS.contains(&f.name.as_str())
        })
        .collect();
    kept.sort_by(|a, b| a.name.cmp(&b.name));
    kept
}

fn default_key_fields() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_last_update_field() -> String {
    "systemmodstamp".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestEntry {
    pub object_name: String,
    #[serde(default = "default_key_fields")]
    pub key_fields: Vec<String>,
    #[serde(default = "default_last_update_field")]
    pub last_update_field: String,
}

impl ManifestEntry {
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            key_fields: default_key_fields(),
            last_update_field: default_last_update_field(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub objects: Vec<ManifestEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<ManifestEntry>),
    Wrapped { objects: Vec<ManifestEntry> },
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let objects = match ManifestFile::deserialize(deserializer)? {
            ManifestFile::List(objects) | ManifestFile::Wrapped { objects } => objects,
        };
        Ok(Self { objects })
    }
}

impl Manifest {
    pub fn path(ddl_dir: &Path) -> PathBuf {
        ddl_dir.join(MANIFEST_FILE)
    }

    pub async fn load(ddl_dir: &Path) -> SalesforceResult<Self> {
        let path = Self::path(ddl_dir);
        let bytes = tokio::fs::read(&path).await.map_err(|e| SalesforceError::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| SalesforceError::Manifest {
            path,
            message: e.to_string(),
        })
    }

    /// Entry for `object`, or one with default keys if the manifest lacks it
    pub fn entry_for(&self, object: &str) -> ManifestEntry {
        self.objects
            .iter()
            .find(|e| e.object_name.eq_ignore_ascii_case(object))
            .cloned()
            .unwrap_or_else(|| ManifestEntry::new(object))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_type() {
        assert_eq!(convert_type("id"), ColumnType::String);
        assert_eq!(convert_type("reference"), ColumnType::String);
        assert_eq!(convert_type("currency"), ColumnType::Float);
        assert_eq!(convert_type("int"), ColumnType::Integer);
        assert_eq!(convert_type("datetime"), ColumnType::DateTime);
        assert_eq!(convert_type("date"), ColumnType::Date);
        assert_eq!(convert_type("boolean"), ColumnType::Boolean);
        assert_eq!(convert_type("encryptedstring"), ColumnType::String);
    }

    #[test]
    fn test_filter_fields_drops_unqueryable_and_sorts() {
        let fields = vec![
            SfField::new("Name", "string"),
            SfField::new("BillingAddress", "address"),
            SfField::new("Website", "url"),
            SfField::new("BillingGeocodeAccuracy", "picklist"),
            SfField::new("HasOpenActivity", "boolean"),
            SfField::new("Id", "id"),
        ];
        let names: Vec<_> = filter_fields(fields).into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Id", "Name"]);
    }

    #[test]
    fn test_manifest_formats() {
        let list: Manifest = serde_json::from_str(
            r#"[{"object-name":"Account"},{"object-name":"Contact","key-fields":["id","accountid"],"last-update-field":"lastmodifieddate"}]"#,
        )
        .unwrap();
        assert_eq!(list.objects.len(), 2);
        assert_eq!(list.objects[0].key_fields, vec!["id"]);
        assert_eq!(list.objects[0].last_update_field, "systemmodstamp");
        assert_eq!(list.objects[1].last_update_field, "lastmodifieddate");

        let wrapped: Manifest =
            serde_json::from_str(r#"{"objects":[{"object-name":"Lead"}]}"#).unwrap();
        assert_eq!(wrapped.objects[0].object_name, "Lead");
    }

    #[tokio::test]
    async fn test_manifest_load_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            Manifest::path(dir.path()),
            r#"[{"object-name":"Account","key-fields":["accountnumber"]}]"#,
        )
        .await
        .unwrap();

        let manifest = Manifest::load(dir.path()).await.unwrap();
        assert_eq!(manifest.entry_for("account").key_fields, vec!["accountnumber"]);
        assert_eq!(manifest.entry_for("Opportunity").key_fields, vec!["id"]);
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(dir.path()).await.unwrap_err();
        assert!(err.to_string().starts_with("Cannot read manifest"));
    }
}
