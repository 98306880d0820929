//! Run DbToDb command

use i2ap_common::{JobAcceptedResponse, JobStatus};
use mediator::Request;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::etl::{db_to_db, DbToDbRequest, EtlContext, EtlError, QueryParam};
use crate::features::shared::{parse_disposition, require_param, start_job, JobAccepted, ParamError};
use crate::state::{JobRunner, JobService, StateError};
use crate::warehouse::Disposition;

/// Command to run the SQL template for `object-name` into the mart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunDbToDbCommand {
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default)]
    pub query_params: Vec<QueryParam>,
    #[serde(default)]
    pub disposition: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunDbToDbError {
    #[error(transparent)]
    Validation(#[from] ParamError),

    #[error("Job state error: {0}")]
    State(#[from] StateError),
}

impl Request<Result<JobAccepted, RunDbToDbError>> for RunDbToDbCommand {}

impl RunDbToDbCommand {
    #[tracing::instrument(skip(self))]
    pub fn validate(&self) -> Result<DbToDbRequest, RunDbToDbError> {
        Ok(DbToDbRequest {
            object_name: require_param(self.object_name.as_deref(), "object-name")?,
            query_params: self.query_params.clone(),
            disposition: parse_disposition(self.disposition.as_deref(), Disposition::WriteAppend)?,
        })
    }
}

pub async fn handle(
    ctx: &EtlContext,
    command: RunDbToDbCommand,
) -> Result<JobAccepted, RunDbToDbError> {
    let request = command.validate()?;

    let job = start_job(ctx, JobService::Processor).await?;
    let job_id = job.job_id().to_string();
    let events = ctx.event_log(&job_id);

    let work_ctx = ctx.clone();
    let mut work_job = job.clone();
    let work_request = request.clone();
    let task = JobRunner::spawn(job, async move {
        db_to_db(&work_ctx, &mut work_job, &work_request).await?;
        Ok::<(), EtlError>(())
    });

    let message = format!(
        "i2ap/Processor.process: Accepted query load request for: {} on pod: {}.",
        request.object_name, ctx.pod
    );
    info!("{}", message);
    events.info(&message, JobStatus::InProgress.as_str());

    Ok(JobAccepted {
        response: JobAcceptedResponse::new(message, &ctx.pod, job_id, JobService::Processor.as_str()),
        task,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::etl::test_support::context;
    use crate::warehouse::memory::MemoryWarehouse;
    use std::sync::Arc;

    #[test]
    fn test_validate_defaults_and_required_name() {
        let command: RunDbToDbCommand = serde_json::from_str(
            r#"{"object-name":"orders","query-params":[{"key":"CUSTOMER_GROUP","value":17}]}"#,
        )
        .unwrap();
        let request = command.validate().unwrap();
        assert_eq!(request.disposition, Disposition::WriteAppend);
        assert_eq!(request.query_params, vec![QueryParam::new("CUSTOMER_GROUP", "17")]);

        let missing = RunDbToDbCommand::default();
        assert!(matches!(
            missing.validate(),
            Err(RunDbToDbError::Validation(ParamError::Required("object-name")))
        ));
    }

    #[tokio::test]
    async fn test_missing_template_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(MemoryWarehouse::new()));

        let command = RunDbToDbCommand {
            object_name: Some("orders".into()),
            ..Default::default()
        };
        let accepted = handle(&ctx, command).await.unwrap();
        assert_eq!(accepted.response.service, "processor");
        accepted.task.await.unwrap();

        let job = ctx
            .open_job(JobService::Processor, &accepted.response.job_id, false)
            .await
            .unwrap();
        assert_eq!(job.status(), JobStatus::Error);
        assert!(job.record().error.as_deref().unwrap().contains("orders"));
    }
}
