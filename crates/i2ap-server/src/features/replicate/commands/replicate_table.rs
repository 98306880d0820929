//! Replicate table command

use i2ap_common::{JobAcceptedResponse, JobStatus};
use mediator::Request;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::etl::{replicate, EtlContext, EtlError, ReplicateRequest};
use crate::features::shared::{parse_disposition, require_param, start_job, JobAccepted, ParamError};
use crate::state::{JobRunner, JobService, StateError};
use crate::warehouse::Disposition;

/// Command to copy `{source-project}.{source-dataset}.{object-name}` to the
/// destination dataset. Everything but the disposition is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplicateTableCommand {
    pub object_name: Option<String>,
    pub source_project: Option<String>,
    pub source_dataset: Option<String>,
    pub dest_project: Option<String>,
    pub dest_dataset: Option<String>,
    pub disposition: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicateTableError {
    #[error(transparent)]
    Validation(#[from] ParamError),

    #[error("Job state error: {0}")]
    State(#[from] StateError),
}

impl Request<Result<JobAccepted, ReplicateTableError>> for ReplicateTableCommand {}

impl ReplicateTableCommand {
    #[tracing::instrument(skip(self))]
    pub fn validate(&self) -> Result<ReplicateRequest, ReplicateTableError> {
        Ok(ReplicateRequest {
            object_name: require_param(self.object_name.as_deref(), "object-name")?,
            source_project: require_param(self.source_project.as_deref(), "source-project")?,
            source_dataset: require_param(self.source_dataset.as_deref(), "source-dataset")?,
            dest_project: require_param(self.dest_project.as_deref(), "dest-project")?,
            dest_dataset: require_param(self.dest_dataset.as_deref(), "dest-dataset")?,
            disposition: parse_disposition(self.disposition.as_deref(), Disposition::WriteTruncate)?,
        })
    }
}

pub async fn handle(
    ctx: &EtlContext,
    command: ReplicateTableCommand,
) -> Result<JobAccepted, ReplicateTableError> {
    let request = command.validate()?;

    let job = start_job(ctx, JobService::Replicate).await?;
    let job_id = job.job_id().to_string();
    let events = ctx.event_log(&job_id);

    let work_ctx = ctx.clone();
    let mut work_job = job.clone();
    let work_request = request.clone();
    let task = JobRunner::spawn(job, async move {
        replicate(&work_ctx, &mut work_job, &work_request).await?;
        Ok::<(), EtlError>(())
    });

    let message = format!(
        "i2ap/Replicate: Accepted request to copy {} to {} on pod: {}.",
        request.source(),
        request.destination(),
        ctx.pod
    );
    info!("{}", message);
    events.info(&message, JobStatus::InProgress.as_str());

    Ok(JobAccepted {
        response: JobAcceptedResponse::new(message, &ctx.pod, job_id, JobService::Replicate.as_str()),
        task,
    })
}
