//! Table to table replication

use i2ap_common::JobStatus;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{EtlContext, EtlResult};
use crate::state::JobState;
use crate::warehouse::{load_schema, schema_exists, Disposition, TableRef};

fn default_replicate_disposition() -> Disposition {
    Disposition::WriteTruncate
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplicateRequest {
    pub object_name: String,
    pub source_project: String,
    pub source_dataset: String,
    pub dest_project: String,
    pub dest_dataset: String,
    #[serde(default = "default_replicate_disposition")]
    pub disposition: Disposition,
}

impl ReplicateRequest {
    pub fn source(&self) -> TableRef {
        TableRef::new(&self.source_dataset, &self.object_name).with_project(&self.source_project)
    }

    pub fn destination(&self) -> TableRef {
        TableRef::new(&self.dest_dataset, &self.object_name).with_project(&self.dest_project)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicateOutcome {
    pub source_rows: u64,
    pub dest_rows: u64,
}

/// Copy the source table into the destination, creating it when missing.
///
/// A missing destination is built from the object's DDL when there is one,
/// otherwise as `CREATE TABLE .. AS SELECT` which also copies the rows.
#[instrument(skip(ctx, job, request), fields(job_id = %job.job_id(), object = %request.object_name))]
pub async fn replicate(
    ctx: &EtlContext,
    job: &mut JobState,
    request: &ReplicateRequest,
) -> EtlResult<ReplicateOutcome> {
    let events = ctx.event_log(job.job_id());
    let warehouse = &ctx.warehouse;
    let dialect = warehouse.dialect();
    let src = request.source();
    let dest = request.destination();

    let source_rows = warehouse.row_count(&src).await?;

    let mut copied = false;
    if !warehouse.table_exists(&dest).await? {
        if schema_exists(&ctx.project.ddl_dir, &request.object_name).await {
            let schema = load_schema(&ctx.project.ddl_dir, &request.object_name).await?;
            warehouse.create_table(&dest, &schema, false).await?;
        } else {
            warehouse
                .create_table_as(&dest, &dialect.select_all_sql(&src))
                .await?;
            copied = true;
        }
        info!(dest = %dest, "Created destination table");
    }

    if !copied {
        warehouse.copy_table(&src, &dest, request.disposition).await?;
    }

    let dest_rows = warehouse.row_count(&dest).await?;
    info!(src = %src, dest = %dest, source_rows, dest_rows, "Replication finished");

    job.change_status(JobStatus::Complete, None).await?;
    events.info(
        &format!(
            "Replicate: copied {} ({} rows) to {} ({} rows)",
            src, source_rows, dest, dest_rows
        ),
        "END",
    );
    Ok(ReplicateOutcome {
        source_rows,
        dest_rows,
    })
}
