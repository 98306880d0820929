//! Salesforce to warehouse sync
//!
//! An object is mirrored into `{dataset}.{object lowercased}`. Full loads
//! truncate and reload. Incremental loads pull records changed since the last
//! recorded sync into a staging table and merge them on the manifest keys.
//! The high-water mark for each table lives in `{dataset}.i2ap_incremental`.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{convert_type, filter_fields, Manifest, ManifestEntry, SalesforceApi, SalesforceError};
use crate::state::{JobState, StateError};
use crate::warehouse::{
    load_schema, save_schema, schema_exists, ColumnDef, ColumnType, DataFrame, Disposition,
    SchemaError, TableRef, TableSchema, Warehouse, WarehouseError,
};
use i2ap_common::JobStatus;

/// Table holding the last synced change per object
pub const INCREMENTAL_TABLE: &str = "i2ap_incremental";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Salesforce(#[from] SalesforceError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// What one object sync did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub object: String,
    pub rows: u64,
    /// False when an incremental request fell back to a full load
    pub incremental: bool,
    pub last_update: Option<String>,
}

pub struct SyncEngine {
    warehouse: Arc<dyn Warehouse>,
    salesforce: Arc<dyn SalesforceApi>,
    ddl_dir: PathBuf,
    dataset: String,
}

impl SyncEngine {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        salesforce: Arc<dyn SalesforceApi>,
        ddl_dir: impl Into<PathBuf>,
        dataset: impl Into<String>,
    ) -> Self {
        Self {
            warehouse,
            salesforce,
            ddl_dir: ddl_dir.into(),
            dataset: dataset.into(),
        }
    }

    fn table(&self, name: &str) -> TableRef {
        TableRef::new(&self.dataset, name.to_lowercase())
    }

    /// Describe `object` in Salesforce and persist the resulting layout
    async fn describe_and_save(&self, object: &str) -> SyncResult<TableSchema> {
        let fields = filter_fields(self.salesforce.describe(object).await?)
            .into_iter()
            .map(|f| ColumnDef::new(f.name, convert_type(&f.sf_type)))
            .collect();
        Ok(save_schema(&self.ddl_dir, &object.to_lowercase(), fields).await?)
    }

    /// Layout of `object`. The local DDL is used unless `refresh` is set or
    /// there is none.
    pub async fn schema_for(&self, object: &str, refresh: bool) -> SyncResult<TableSchema> {
        if refresh {
            return self.describe_and_save(object).await;
        }
        match load_schema(&self.ddl_dir, &object.to_lowercase()).await {
            Ok(schema) => Ok(schema),
            Err(SchemaError::Missing { .. }) => self.describe_and_save(object).await,
            Err(e) => Err(e.into()),
        }
    }

    /// True when Salesforce reports a different column set than the local DDL
    pub async fn layout_changed(&self, object: &str) -> SyncResult<bool> {
        let local = load_schema(&self.ddl_dir, &object.to_lowercase()).await?;
        let mut remote: Vec<String> = filter_fields(self.salesforce.describe(object).await?)
            .into_iter()
            .map(|f| f.name.to_lowercase())
            .collect();
        remote.sort();
        Ok(local.layout_signature() != remote)
    }

    fn incremental_schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnDef::new("dataset", ColumnType::String),
            ColumnDef::new("table_name", ColumnType::String),
            ColumnDef::new("last_modified_date", ColumnType::Timestamp),
        ])
    }

    async fn ensure_incremental_table(&self) -> SyncResult<TableRef> {
        let table = self.table(INCREMENTAL_TABLE);
        if !self.warehouse.table_exists(&table).await? {
            self.warehouse
                .create_table(&table, &Self::incremental_schema(), false)
                .await?;
        }
        Ok(table)
    }

    /// Last recorded change for `table_name`, as `YYYY-MM-DDTHH:MM:SSZ`
    pub async fn last_update(&self, table_name: &str) -> SyncResult<Option<String>> {
        let meta = self.ensure_incremental_table().await?;
        let frame = self
            .warehouse
            .query(&self.warehouse.dialect().select_all_sql(&meta))
            .await?;

        let (Some(ds), Some(tn), Some(lm)) = (
            frame.column_index("dataset"),
            frame.column_index("table_name"),
            frame.column_index("last_modified_date"),
        ) else {
            return Ok(None);
        };

        Ok(frame
            .rows
            .iter()
            .find(|row| {
                row[ds].as_deref() == Some(self.dataset.as_str())
                    && row[tn].as_deref().is_some_and(|t| t.eq_ignore_ascii_case(table_name))
            })
            .and_then(|row| row[lm].as_deref())
            .map(render_last_update))
    }

    async fn set_last_update(&self, table_name: &str, value: &str) -> SyncResult<()> {
        let meta = self.ensure_incremental_table().await?;
        let table_name = table_name.to_lowercase();
        self.warehouse
            .exec(&format!(
                "DELETE FROM {} WHERE dataset = '{}' AND table_name = '{}'",
                self.warehouse.dialect().qualify(&meta),
                self.dataset.replace('\'', "''"),
                table_name.replace('\'', "''"),
            ))
            .await?;

        let mut frame = DataFrame::new(vec![
            "dataset".to_string(),
            "table_name".to_string(),
            "last_modified_date".to_string(),
        ]);
        frame
            .push_row(vec![
                Some(self.dataset.clone()),
                Some(table_name),
                Some(value.to_string()),
            ])
            .map_err(SalesforceError::from)?;
        self.warehouse
            .load(&meta, &Self::incremental_schema(), &frame, Disposition::WriteAppend)
            .await?;
        Ok(())
    }

    /// Mirror one object into the warehouse
    #[instrument(skip(self, entry), fields(object = %entry.object_name))]
    pub async fn sync_object(
        &self,
        job_id: &str,
        entry: &ManifestEntry,
        incremental: bool,
    ) -> SyncResult<SyncOutcome> {
        let table_name = entry.object_name.to_lowercase();
        let table = self.table(&table_name);
        let schema = self.schema_for(&entry.object_name, false).await?;

        let mut incremental = incremental;
        let created = !self.warehouse.table_exists(&table).await?;
        if created {
            self.warehouse.create_table(&table, &schema, false).await?;
            incremental = false;
        }

        let since = if incremental {
            self.last_update(&table_name).await?
        } else {
            None
        };
        if incremental && since.is_none() {
            info!(table = %table, "No sync recorded, running a full load");
            incremental = false;
        }
        if !incremental && !created {
            self.warehouse.truncate(&table).await?;
        }

        let mut soql = format!(
            "SELECT {} FROM {}",
            schema.column_names().join(", "),
            entry.object_name
        );
        if let Some(since) = &since {
            soql.push_str(&format!(" WHERE {} > {}", entry.last_update_field, since));
        }
        let frame = self.salesforce.query(&soql).await?;

        let rows = if incremental {
            let staging = self.table(&format!("{}_{}", table_name, job_id.replace('-', "_")));
            self.warehouse.create_table(&staging, &schema, true).await?;
            let merged = self.merge_via(&table, &staging, &schema, &frame, &entry.key_fields).await;
            if let Err(e) = self.warehouse.drop_table(&staging).await {
                warn!(staging = %staging, "Failed to drop staging table: {}", e);
            }
            merged?
        } else {
            self.warehouse
                .load(&table, &schema, &frame, Disposition::WriteAppend)
                .await?
        };

        let high_water = max_timestamp(&frame, &entry.last_update_field);
        let last_update = match high_water {
            Some(value) => {
                self.set_last_update(&table_name, &value).await?;
                Some(render_last_update(&value))
            },
            None => since,
        };

        info!(table = %table, rows, incremental, "Synced object");
        Ok(SyncOutcome {
            object: entry.object_name.clone(),
            rows,
            incremental,
            last_update,
        })
    }

    async fn merge_via(
        &self,
        table: &TableRef,
        staging: &TableRef,
        schema: &TableSchema,
        frame: &DataFrame,
        keys: &[String],
    ) -> SyncResult<u64> {
        let rows = self
            .warehouse
            .load(staging, schema, frame, Disposition::WriteAppend)
            .await?;
        self.warehouse.merge(table, staging, schema, keys).await?;
        Ok(rows)
    }

    /// Drop and rebuild the table when its layout changed, then sync it
    #[instrument(skip(self, entry), fields(object = %entry.object_name))]
    pub async fn replace_object(&self, job_id: &str, entry: &ManifestEntry) -> SyncResult<SyncOutcome> {
        let object = entry.object_name.to_lowercase();
        let drop = if schema_exists(&self.ddl_dir, &object).await {
            self.layout_changed(&entry.object_name).await?
        } else {
            true
        };

        self.schema_for(&entry.object_name, true).await?;

        let table = self.table(&object);
        if drop && self.warehouse.table_exists(&table).await? {
            info!(table = %table, "Layout changed, dropping table");
            self.warehouse.drop_table(&table).await?;
        }

        self.sync_object(job_id, entry, false).await
    }

    /// Sync every manifest object as a child job of `parent`.
    ///
    /// Children run one after another and a failure does not stop the rest.
    /// The parent ends with the aggregate of its children.
    pub async fn sync_all(
        &self,
        parent: &mut JobState,
        incremental: bool,
        replace: bool,
    ) -> SyncResult<JobStatus> {
        let manifest = Manifest::load(&self.ddl_dir).await?;

        for entry in &manifest.objects {
            let child_id = uuid::Uuid::new_v4().to_string();
            let mut child = parent.spawn_child(&child_id).await?;
            child.change_status(JobStatus::InProgress, None).await?;

            let result = if replace {
                self.replace_object(&child_id, entry).await
            } else {
                self.sync_object(&child_id, entry, incremental).await
            };

            match result {
                Ok(outcome) => {
                    info!(child = %child_id, object = %outcome.object, rows = outcome.rows, "Child sync finished");
                    child.change_status(JobStatus::Complete, None).await?;
                },
                Err(e) => {
                    warn!(child = %child_id, object = %entry.object_name, "Child sync failed: {}", e);
                    child.fail(e.to_string()).await?;
                },
            }
        }

        Ok(parent.finalize_from_children().await?)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
                .map(|dt| dt.and_utc())
                .ok()
        })
}

/// Largest value of `column`, as `YYYY-MM-DD HH:MM:SS` in UTC
fn max_timestamp(frame: &DataFrame, column: &str) -> Option<String> {
    frame
        .column_values(column)?
        .flatten()
        .filter_map(parse_timestamp)
        .max()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Render a stored high-water mark the way SOQL literals expect it
pub fn render_last_update(value: &str) -> String {
    match parse_timestamp(value) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => {
            let trimmed = value.trim();
            let whole = trimmed.split('.').next().unwrap_or(trimmed);
            format!("{}Z", whole.replace(' ', "T").trim_end_matches('Z'))
        },
    }
}
