//! SQL warehouse ("mart") access
//!
//! Flows talk to the mart only through [`Warehouse`]. Statement text comes
//! from [`dialect::Dialect`], so supporting another flavour means a new
//! connector plus whatever its dialect lacks.
//!
//! Backends compiled in:
//!
//! - [`postgres::PostgresWarehouse`] on sqlx
//! - [`memory::MemoryWarehouse`] for tests and dry runs
//!
//! BigQuery, Oracle, MySQL and SQL Server are known to the configuration and
//! the dialect, but [`connect`] refuses them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub mod config;
pub mod dialect;
pub mod frame;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod schema;

pub use config::{MartKind, MartSettings};
pub use dialect::Dialect;
pub use frame::{DataFrame, FrameError};
pub use retry::{with_retry, RetryPolicy};
pub use schema::{
    load_schema, save_schema, schema_exists, ColumnDef, ColumnType, SchemaError, TableSchema,
};

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Invalid database type: {0}")]
    InvalidType(String),

    #[error("Unsupported warehouse backend: {0}")]
    Unsupported(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Dataset {0} still holds tables or views")]
    DatasetNotEmpty(String),

    #[error("Table {0} is not empty and the disposition is WRITE_EMPTY")]
    TableNotEmpty(String),

    #[error("Cannot address project '{project}' from a connection to '{connected}'")]
    CrossProject { project: String, connected: String },

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("Column '{column}' has type {type_name}, which cannot be read as text")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("Invalid write disposition: {0}")]
    InvalidDisposition(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

pub type WarehouseResult<T> = std::result::Result<T, WarehouseError>;

/// `[project.]dataset.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: None,
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.project {
            Some(project) => write!(f, "{}.{}.{}", project, self.dataset, self.table),
            None => write!(f, "{}.{}", self.dataset, self.table),
        }
    }
}

/// What a load or copy does with rows already in the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    #[default]
    WriteAppend,
    WriteTruncate,
    /// Refuse to write into a table that already has rows
    WriteEmpty,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::WriteAppend => "WRITE_APPEND",
            Disposition::WriteTruncate => "WRITE_TRUNCATE",
            Disposition::WriteEmpty => "WRITE_EMPTY",
        }
    }
}

impl FromStr for Disposition {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WRITE_APPEND" => Ok(Disposition::WriteAppend),
            "WRITE_TRUNCATE" => Ok(Disposition::WriteTruncate),
            "WRITE_EMPTY" => Ok(Disposition::WriteEmpty),
            _ => Err(WarehouseError::InvalidDisposition(s.to_string())),
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A SQL data mart
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn kind(&self) -> MartKind;

    fn dialect(&self) -> Dialect {
        self.kind().dialect()
    }

    /// Run a statement that returns no rows, with retries
    async fn exec(&self, sql: &str) -> WarehouseResult<()>;

    /// Run a query and collect its rows as text, with retries
    async fn query(&self, sql: &str) -> WarehouseResult<DataFrame>;

    async fn dataset_exists(&self, dataset: &str) -> WarehouseResult<bool>;

    /// Create `dataset` unless it is already there
    async fn create_dataset(&self, dataset: &str) -> WarehouseResult<()>;

    /// Drop `dataset`. Without `cascade` a dataset that still holds tables
    /// or views is refused with [`WarehouseError::DatasetNotEmpty`].
    async fn delete_dataset(&self, dataset: &str, cascade: bool) -> WarehouseResult<()>;

    async fn table_exists(&self, table: &TableRef) -> WarehouseResult<bool>;

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        recreate: bool,
    ) -> WarehouseResult<()>;

    /// Create `table` from the result of `query`, creating its dataset if
    /// needed. An existing table is [`WarehouseError::TableExists`].
    async fn create_table_as(&self, table: &TableRef, query: &str) -> WarehouseResult<()>;

    async fn drop_table(&self, table: &TableRef) -> WarehouseResult<()>;

    /// Define `view` as `query`; `replace` swaps an existing definition
    async fn create_view(&self, view: &TableRef, query: &str, replace: bool) -> WarehouseResult<()>;

    async fn drop_view(&self, view: &TableRef) -> WarehouseResult<()>;

    async fn truncate(&self, table: &TableRef) -> WarehouseResult<()>;

    /// Insert `frame` into `table`, matching frame columns to schema fields by
    /// name. Fields the frame lacks are loaded as NULL.
    async fn load(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        frame: &DataFrame,
        disposition: Disposition,
    ) -> WarehouseResult<u64>;

    async fn row_count(&self, table: &TableRef) -> WarehouseResult<u64>;

    /// Update `table` from `staging` by `keys`, inserting unmatched rows
    async fn merge(
        &self,
        table: &TableRef,
        staging: &TableRef,
        schema: &TableSchema,
        keys: &[String],
    ) -> WarehouseResult<()>;

    /// Copy every row of `src` into the existing table `dest`
    async fn copy_table(
        &self,
        src: &TableRef,
        dest: &TableRef,
        disposition: Disposition,
    ) -> WarehouseResult<()>;
}

/// Map frame columns onto schema fields.
///
/// Returns, per field, the index of the matching frame column if any. Frame
/// columns with no field are reported so callers can warn about them.
pub fn column_mapping(schema: &TableSchema, frame: &DataFrame) -> (Vec<Option<usize>>, Vec<String>) {
    let mapping = schema
        .fields
        .iter()
        .map(|field| frame.column_index(&field.name))
        .collect();
    let extra = frame
        .columns
        .iter()
        .filter(|c| schema.field(c).is_none())
        .cloned()
        .collect();
    (mapping, extra)
}

/// Value to store for one cell of a typed column.
///
/// Blank text means NULL for every type except strings.
pub(crate) fn typed_cell(column_type: ColumnType, value: Option<&str>) -> Option<String> {
    match value {
        Some(v) if column_type != ColumnType::String && v.trim().is_empty() => None,
        other => other.map(str::to_string),
    }
}

/// Build the configured warehouse
pub async fn connect(settings: &MartSettings) -> WarehouseResult<Arc<dyn Warehouse>> {
    let warehouse: Arc<dyn Warehouse> = match settings.kind {
        MartKind::Postgres => Arc::new(postgres::PostgresWarehouse::connect(settings).await?),
        MartKind::Memory => Arc::new(memory::MemoryWarehouse::new()),
        other => return Err(WarehouseError::Unsupported(other.as_str().to_string())),
    };
    info!(backend = settings.kind.as_str(), "Warehouse initialized");
    Ok(warehouse)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_parsing() {
        assert_eq!("write_truncate".parse::<Disposition>().unwrap(), Disposition::WriteTruncate);
        assert_eq!(Disposition::default(), Disposition::WriteAppend);
        let err = "WRITE_SOMETIMES".parse::<Disposition>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid write disposition: WRITE_SOMETIMES");
    }

    #[test]
    fn test_table_ref_display() {
        assert_eq!(TableRef::new("mart", "account").to_string(), "mart.account");
        assert_eq!(
            TableRef::new("mart", "account").with_project("p").to_string(),
            "p.mart.account"
        );
    }

    #[test]
    fn test_column_mapping_is_case_insensitive() {
        let schema = TableSchema::new(vec![
            ColumnDef::new("Id", ColumnType::String),
            ColumnDef::new("Name", ColumnType::String),
        ]);
        let frame = DataFrame::new(vec!["name".into(), "id".into(), "extra".into()]);

        let (mapping, extra) = column_mapping(&schema, &frame);
        assert_eq!(mapping, vec![Some(1), Some(0)]);
        assert_eq!(extra, vec!["extra"]);
    }

    #[tokio::test]
    async fn test_connect_rejects_uncompiled_backends() {
        let mut settings = MartSettings::in_memory();
        settings.kind = MartKind::BigQuery;
        let err = connect(&settings).await.err().unwrap();
        assert_eq!(err.to_string(), "Unsupported warehouse backend: bigquery");

        settings.kind = MartKind::Memory;
        assert_eq!(connect(&settings).await.unwrap().kind(), MartKind::Memory);
    }
}
