//! Load staged file command

use i2ap_common::{JobAcceptedResponse, JobStatus};
use mediator::Request;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::etl::{file_to_db, EtlContext, EtlError, FileToDbRequest};
use crate::features::shared::{parse_disposition, require_param, start_job, JobAccepted, ParamError};
use crate::state::{JobRunner, JobService, StateError};
use crate::warehouse::Disposition;

/// Command to load `filename` from the stage bucket into `object-name`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadFileCommand {
    pub object_name: Option<String>,
    pub filename: Option<String>,
    pub disposition: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadFileError {
    #[error(transparent)]
    Validation(#[from] ParamError),

    #[error("Job state error: {0}")]
    State(#[from] StateError),
}

impl Request<Result<JobAccepted, LoadFileError>> for LoadFileCommand {}

impl LoadFileCommand {
    #[tracing::instrument(skip(self))]
    pub fn validate(&self) -> Result<FileToDbRequest, LoadFileError> {
        Ok(FileToDbRequest {
            object_name: require_param(self.object_name.as_deref(), "object-name")?,
            filename: require_param(self.filename.as_deref(), "filename")?,
            disposition: parse_disposition(self.disposition.as_deref(), Disposition::WriteAppend)?,
        })
    }
}

pub async fn handle(ctx: &EtlContext, command: LoadFileCommand) -> Result<JobAccepted, LoadFileError> {
    let request = command.validate()?;

    let job = start_job(ctx, JobService::File).await?;
    let job_id = job.job_id().to_string();
    let events = ctx.event_log(&job_id);

    let work_ctx = ctx.clone();
    let mut work_job = job.clone();
    let work_request = request.clone();
    let task = JobRunner::spawn(job, async move {
        file_to_db(&work_ctx, &mut work_job, &work_request).await?;
        Ok::<(), EtlError>(())
    });

    let message = format!(
        "i2ap/Processor.process: Accepted file load request for: {} into {} on pod: {}.",
        request.filename, request.object_name, ctx.pod
    );
    info!("{}", message);
    events.info(&message, JobStatus::InProgress.as_str());

    Ok(JobAccepted {
        response: JobAcceptedResponse::new(message, &ctx.pod, job_id, JobService::File.as_str()),
        task,
    })
}
