//! Table layouts and the DDL files that store them
//!
//! A layout lives at `{ddl_dir}/{object}.json`:
//!
//! ```json
//! {"fields":[{"name":"Id","type":"STRING","mode":"NULLABLE"}],"partition":[{"shard":false}]}
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Generic column type shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Timestamp,
}

impl ColumnType {
    /// Case-insensitive; anything unrecognised is treated as text.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "INTEGER" | "INT" | "INT64" | "BIGINT" => ColumnType::Integer,
            "FLOAT" | "FLOAT64" | "DOUBLE" | "NUMERIC" => ColumnType::Float,
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "DATE" => ColumnType::Date,
            "DATETIME" => ColumnType::DateTime,
            "TIMESTAMP" => ColumnType::Timestamp,
            _ => ColumnType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

impl From<String> for ColumnType {
    fn from(s: String) -> Self {
        ColumnType::parse(&s)
    }
}

impl From<ColumnType> for String {
    fn from(t: ColumnType) -> Self {
        t.as_str().to_string()
    }
}

fn default_mode() -> String {
    "NULLABLE".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            mode: default_mode(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    #[serde(default)]
    pub shard: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<ColumnDef>,
    #[serde(default)]
    pub partition: Vec<PartitionSpec>,
}

impl TableSchema {
    pub fn new(fields: Vec<ColumnDef>) -> Self {
        Self {
            fields,
            partition: vec![PartitionSpec { shard: false }],
        }
    }

    pub fn field(&self, name: &str) -> Option<&ColumnDef> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Lowercased, sorted names; two layouts with equal lists match
    pub fn layout_signature(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.iter().map(|f| f.name.to_lowercase()).collect();
        names.sort();
        names
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("No DDL file for '{object}' at {}", .path.display())]
    Missing { object: String, path: PathBuf },

    #[error("Invalid DDL file {}: {source}", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error on DDL file: {0}")]
    Io(#[from] std::io::Error),
}

pub fn schema_path(ddl_dir: &Path, object: &str) -> PathBuf {
    ddl_dir.join(format!("{}.json", object))
}

pub async fn schema_exists(ddl_dir: &Path, object: &str) -> bool {
    tokio::fs::metadata(schema_path(ddl_dir, object))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

pub async fn load_schema(ddl_dir: &Path, object: &str) -> Result<TableSchema, SchemaError> {
    let path = schema_path(ddl_dir, object);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SchemaError::Missing {
                object: object.to_string(),
                path,
            });
        },
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes).map_err(|source| SchemaError::Invalid { path, source })
}

/// Write `fields` as the layout for `object`, replacing any previous file
pub async fn save_schema(
    ddl_dir: &Path,
    object: &str,
    fields: Vec<ColumnDef>,
) -> Result<TableSchema, SchemaError> {
    let schema = TableSchema::new(fields);
    let path = schema_path(ddl_dir, object);

    tokio::fs::create_dir_all(ddl_dir).await?;
    let body = serde_json::to_vec_pretty(&schema)
        .map_err(|source| SchemaError::Invalid { path: path.clone(), source })?;
    tokio::fs::write(&path, body).await?;

    debug!("Saved {} fields to {}", schema.fields.len(), path.display());
    Ok(schema)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_parsing() {
        assert_eq!(ColumnType::parse("integer"), ColumnType::Integer);
        assert_eq!(ColumnType::parse("Timestamp"), ColumnType::Timestamp);
        assert_eq!(ColumnType::parse("GEOGRAPHY"), ColumnType::String);
    }

    #[test]
    fn test_ddl_file_format() {
        let schema: TableSchema = serde_json::from_str(
            r#"{"fields":[{"name":"Id","type":"string","mode":"REQUIRED"},{"name":"Amount","type":"FLOAT"}],
                "partition":[{"shard":false}]}"#,
        )
        .unwrap();

        assert_eq!(schema.fields[0].column_type, ColumnType::String);
        assert_eq!(schema.fields[0].mode, "REQUIRED");
        assert_eq!(schema.fields[1].mode, "NULLABLE");
        assert_eq!(schema.field("amount").unwrap().column_type, ColumnType::Float);

        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["fields"][0]["type"], "STRING");
    }

    #[test]
    fn test_layout_signature_ignores_order_and_case() {
        let a = TableSchema::new(vec![
            ColumnDef::new("Name", ColumnType::String),
            ColumnDef::new("Id", ColumnType::String),
        ]);
        let b = TableSchema::new(vec![
            ColumnDef::new("id", ColumnType::String),
            ColumnDef::new("name", ColumnType::Integer),
        ]);
        assert_eq!(a.layout_signature(), b.layout_signature());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!schema_exists(dir.path(), "Account").await);

        save_schema(dir.path(), "Account", vec![ColumnDef::new("Id", ColumnType::String)])
            .await
            .unwrap();

        assert!(schema_exists(dir.path(), "Account").await);
        let loaded = load_schema(dir.path(), "Account").await.unwrap();
        assert_eq!(loaded.column_names(), vec!["Id"]);
        assert_eq!(loaded.partition, vec![PartitionSpec { shard: false }]);
    }

    #[tokio::test]
    async fn test_missing_schema() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_schema(dir.path(), "Nope").await.unwrap_err();
        assert!(matches!(err, SchemaError::Missing { .. }));
    }
}
