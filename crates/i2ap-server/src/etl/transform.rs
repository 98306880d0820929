//! DbToDb and FileToDb flows

use flate2::read::GzDecoder;
use i2ap_common::JobStatus;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::{info, instrument};

use super::{fill_template, load_template, EtlContext, EtlError, EtlResult, QueryParam, JOB_ID_COLUMN};
use crate::state::JobState;
use crate::storage;
use crate::warehouse::{DataFrame, Disposition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DbToDbRequest {
    pub object_name: String,
    #[serde(default)]
    pub query_params: Vec<QueryParam>,
    #[serde(default)]
    pub disposition: Disposition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileToDbRequest {
    pub object_name: String,
    pub filename: String,
    #[serde(default)]
    pub disposition: Disposition,
}

/// Run the object's SQL template and load the result into `{dataset}.{object}`
#[instrument(skip(ctx, job, request), fields(job_id = %job.job_id(), object = %request.object_name))]
pub async fn db_to_db(
    ctx: &EtlContext,
    job: &mut JobState,
    request: &DbToDbRequest,
) -> EtlResult<u64> {
    let events = ctx.event_log(job.job_id());

    let template = load_template(&ctx.project.sql_dir, &request.object_name).await?;
    let sql = fill_template(&template, &ctx.project.dataset, &request.query_params)?;
    let frame = ctx
        .warehouse
        .query(&sql)
        .await?
        .with_constant_column(JOB_ID_COLUMN, job.job_id());

    let table = ctx.table(&request.object_name);
    let schema = ctx.ensure_table(&table, &request.object_name).await?;
    let rows = ctx
        .warehouse
        .load(&table, &schema, &frame, request.disposition)
        .await?;

    job.change_status(JobStatus::Complete, None).await?;
    info!(table = %table, rows, "DbToDb finished");
    events.info(
        "Transform.dbToDb(): Completed transformation processing (async follow-up)",
        "END",
    );
    Ok(rows)
}

fn decode_file(filename: &str, bytes: Vec<u8>) -> EtlResult<Vec<u8>> {
    if !filename.to_lowercase().ends_with(".gz") {
        return Ok(bytes);
    }
    let mut decoded = Vec::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut decoded)
        .map_err(|source| EtlError::Decompress {
            file: filename.to_string(),
            source,
        })?;
    Ok(decoded)
}

/// Load a staged CSV into `{dataset}.{object}` and archive it
#[instrument(skip(ctx, job, request), fields(job_id = %job.job_id(), object = %request.object_name))]
pub async fn file_to_db(
    ctx: &EtlContext,
    job: &mut JobState,
    request: &FileToDbRequest,
) -> EtlResult<u64> {
    let events = ctx.event_log(job.job_id());

    let raw = ctx.store.get(&ctx.buckets.stage, &request.filename).await?;
    let filename = request.filename.clone();
    let bytes = tokio::task::spawn_blocking(move || decode_file(&filename, raw))
        .await
        .map_err(|e| EtlError::Decompress {
            file: request.filename.clone(),
            source: std::io::Error::other(e),
        })??;

    let frame = DataFrame::from_csv(&bytes)?.with_constant_column(JOB_ID_COLUMN, job.job_id());

    let table = ctx.table(&request.object_name);
    let schema = ctx.ensure_table(&table, &request.object_name).await?;
    let rows = ctx
        .warehouse
        .load(&table, &schema, &frame, request.disposition)
        .await?;

    storage::move_object(
        ctx.store.as_ref(),
        &ctx.buckets.stage,
        &request.filename,
        Some(&ctx.buckets.archive),
        None,
    )
    .await?;

    job.change_status(JobStatus::Complete, None).await?;
    info!(table = %table, rows, file = %request.filename, "FileToDb finished");
    events.info(
        "Transform.process(): Completed transformation processing (async follow-up)",
        "END",
    );
    Ok(rows)
}
