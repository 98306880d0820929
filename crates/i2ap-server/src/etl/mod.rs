//! Data movement flows run by the background jobs
//!
//! Every flow receives an [`EtlContext`] (store, warehouse and settings) and
//! the job it works for. On success a flow marks its job COMPLETE itself;
//! failures are returned and the [`crate::state::JobRunner`] records them.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{BucketConfig, Config, EventSettings, ProjectConfig};
use crate::events::{EventWriter, JobEventLog};
use crate::state::{JobService, JobState, StateError, StateResult};
use crate::storage::{ObjectStore, StorageError};
use crate::warehouse::{
    load_schema, FrameError, SchemaError, TableRef, TableSchema, Warehouse, WarehouseError,
};

pub mod export;
pub mod replicate;
pub mod template;
pub mod transform;

pub use export::export_table;
pub use replicate::{replicate, ReplicateOutcome, ReplicateRequest};
pub use template::{fill_template, load_template, QueryParam};
pub use transform::{db_to_db, file_to_db, DbToDbRequest, FileToDbRequest};

/// Column stamped on every loaded row
pub const JOB_ID_COLUMN: &str = "job_id";

#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error("Cannot read SQL template {}: {source}", .path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("At least one parameter was not supplied in the call: {0}")]
    MissingTemplateParameter(String),

    #[error("Cannot decompress {file}: {source}")]
    Decompress {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot compress {file}: {source}")]
    Compress {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type EtlResult<T> = std::result::Result<T, EtlError>;

/// Shared handles and settings for the flows
#[derive(Clone)]
pub struct EtlContext {
    pub store: Arc<dyn ObjectStore>,
    pub warehouse: Arc<dyn Warehouse>,
    pub project: ProjectConfig,
    pub buckets: BucketConfig,
    pub events: EventSettings,
    /// Sink for `filelog` and `console` events; `None` leaves them to tracing
    pub event_writer: Option<EventWriter>,
    pub pod: String,
}

impl EtlContext {
    pub fn new(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        pod: impl Into<String>,
    ) -> Self {
        Self {
            store,
            warehouse,
            project: config.project.clone(),
            buckets: config.buckets.clone(),
            events: config.events.clone(),
            event_writer: None,
            pod: pod.into(),
        }
    }

    pub fn with_event_writer(mut self, writer: Option<EventWriter>) -> Self {
        self.event_writer = writer;
        self
    }

    pub fn event_log(&self, job_id: &str) -> JobEventLog {
        let log = JobEventLog::new(
            self.events.kind,
            job_id,
            self.project.project_id.clone(),
            self.events.log_name.clone(),
            self.pod.clone(),
        );
        match &self.event_writer {
            Some(writer) => log.with_writer(writer.clone()),
            None => log,
        }
    }

    /// Open the record for `job_id` in the state bucket
    pub async fn open_job(
        &self,
        service: JobService,
        job_id: &str,
        create: bool,
    ) -> StateResult<JobState> {
        JobState::open(
            Arc::clone(&self.store),
            &self.buckets.state,
            service,
            job_id,
            create,
        )
        .await
    }

    /// `{dataset}.{object}` in the configured dataset
    pub fn table(&self, object: &str) -> TableRef {
        TableRef::new(&self.project.dataset, object)
    }

    /// Load the DDL for `object` and create `table` from it when missing
    pub async fn ensure_table(&self, table: &TableRef, object: &str) -> EtlResult<TableSchema> {
        let schema = load_schema(&self.project.ddl_dir, object).await?;
        if !self.warehouse.table_exists(table).await? {
            self.warehouse.create_table(table, &schema, false).await?;
            info!(table = %table, "Created target table from DDL");
        }
        Ok(schema)
    }
}
