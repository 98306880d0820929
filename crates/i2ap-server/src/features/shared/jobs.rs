//! Creating tracked jobs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use i2ap_common::{JobAcceptedResponse, JobStatus};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::etl::EtlContext;
use crate::state::{JobService, JobState, StateResult};

/// A job that was accepted and is running in the background
#[derive(Debug)]
pub struct JobAccepted {
    pub response: JobAcceptedResponse,
    /// Resolves once the job's outcome is recorded
    pub task: JoinHandle<()>,
}

/// Create a new job record under a fresh id and mark it INPROGRESS
pub async fn start_job(ctx: &EtlContext, service: JobService) -> StateResult<JobState> {
    let job_id = Uuid::new_v4().to_string();
    let mut job = ctx.open_job(service, &job_id, true).await?;
    job.change_status(JobStatus::InProgress, None).await?;
    Ok(job)
}

/// `202 Accepted` with the job id body
pub fn accepted(response: JobAcceptedResponse) -> Response {
    (StatusCode::ACCEPTED, Json(response)).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::etl::test_support::context;
    use crate::warehouse::memory::MemoryWarehouse;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_start_job_persists_in_progress_record() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(MemoryWarehouse::new()));

        let job = start_job(&ctx, JobService::Replicate).await.unwrap();
        assert!(Uuid::parse_str(job.job_id()).is_ok());

        let reread = ctx.open_job(JobService::Replicate, job.job_id(), false).await.unwrap();
        assert!(reread.exists());
        assert_eq!(reread.status(), JobStatus::InProgress);
    }
}
