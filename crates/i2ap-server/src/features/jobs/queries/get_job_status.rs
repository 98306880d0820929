//! Get job status query
//!
//! Reads a job's state record and reports its effective status. Parent jobs
//! also list the status of each child.

use i2ap_common::{ChildStatus, JobStatus, JobStatusResponse};
use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::etl::EtlContext;
use crate::features::shared::validation::{validate_job_id, ParamError};
use crate::state::{JobService, StateError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetJobStatusQuery {
    pub service: JobService,
    pub job_id: String,
}

/// Outcome of a status lookup. Both variants carry a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatusLookup {
    Found(JobStatusResponse),
    NotFound(JobStatusResponse),
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobStatusError {
    #[error(transparent)]
    InvalidJobId(#[from] ParamError),

    #[error("Job state error: {0}")]
    State(#[from] StateError),
}

impl Request<Result<JobStatusLookup, GetJobStatusError>> for GetJobStatusQuery {}

impl GetJobStatusQuery {
    #[tracing::instrument(skip(self), fields(service = %self.service, job_id = %self.job_id))]
    pub fn validate(&self) -> Result<(), GetJobStatusError> {
        validate_job_id(&self.job_id)?;
        Ok(())
    }
}

#[tracing::instrument(skip(ctx), fields(service = %query.service, job_id = %query.job_id))]
pub async fn handle(
    ctx: &EtlContext,
    query: GetJobStatusQuery,
) -> Result<JobStatusLookup, GetJobStatusError> {
    query.validate()?;

    let job = ctx.open_job(query.service, &query.job_id, false).await?;
    // A job nobody has started looks the same as one that never existed
    if !job.exists() || job.status() == JobStatus::New {
        return Ok(JobStatusLookup::NotFound(JobStatusResponse::not_found(
            &ctx.pod,
            &query.job_id,
            query.service.as_str(),
        )));
    }

    let children = job
        .children_statuses()
        .await?
        .into_iter()
        .map(|(job_id, job_status)| ChildStatus { job_id, job_status })
        .collect();
    let record = job.record();

    Ok(JobStatusLookup::Found(JobStatusResponse {
        status_message: "OK".to_string(),
        status: "200 OK".to_string(),
        pod: ctx.pod.clone(),
        job_id: query.job_id.clone(),
        service: query.service.as_str().to_string(),
        state_file_path: Some(job.state_file_path()),
        job_status: Some(job.effective_status().await?),
        start_time: Some(record.start_time),
        end_time: record.end_time,
        parent_id: record.parent_id.clone(),
        children,
        error: record.error.clone(),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::etl::test_support::context;
    use crate::warehouse::memory::MemoryWarehouse;
    use std::sync::Arc;

    fn query(service: JobService, job_id: &str) -> GetJobStatusQuery {
        GetJobStatusQuery {
            service,
            job_id: job_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(MemoryWarehouse::new()));

        let lookup = handle(&ctx, query(JobService::Processor, "nope")).await.unwrap();
        let JobStatusLookup::NotFound(body) = lookup else {
            panic!("expected not found");
        };
        assert_eq!(body.status_message, "Not Found");
        assert_eq!(body.service, "processor");
        assert_eq!(body.pod, "test-pod");
    }

    #[tokio::test]
    async fn test_parent_reports_children_and_failed_child() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(MemoryWarehouse::new()));

        let mut parent = ctx.open_job(JobService::Salesforce, "parent", true).await.unwrap();
        parent.change_status(JobStatus::InProgress, None).await.unwrap();
        let mut ok = parent.spawn_child("child-a").await.unwrap();
        ok.change_status(JobStatus::Complete, None).await.unwrap();
        let mut bad = parent.spawn_child("child-b").await.unwrap();
        bad.fail("describe failed").await.unwrap();

        let lookup = handle(&ctx, query(JobService::Salesforce, "parent")).await.unwrap();
        let JobStatusLookup::Found(body) = lookup else {
            panic!("expected found");
        };
        assert_eq!(body.status, "200 OK");
        assert_eq!(body.job_status, Some(JobStatus::Error));
        assert_eq!(body.state_file_path.as_deref(), Some("state/salesforce/parent.json"));
        assert_eq!(
            body.children,
            vec![
                ChildStatus { job_id: "child-a".into(), job_status: JobStatus::Complete },
                ChildStatus { job_id: "child-b".into(), job_status: JobStatus::Error },
            ]
        );

        let lookup = handle(&ctx, query(JobService::Salesforce, "child-b")).await.unwrap();
        let JobStatusLookup::Found(body) = lookup else {
            panic!("expected found");
        };
        assert_eq!(body.parent_id.as_deref(), Some("parent"));
        assert_eq!(body.error.as_deref(), Some("describe failed"));
        assert!(body.end_time.is_some());
    }

    #[tokio::test]
    async fn test_rejects_path_like_job_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(MemoryWarehouse::new()));

        let err = handle(&ctx, query(JobService::File, "../x")).await.unwrap_err();
        assert!(matches!(err, GetJobStatusError::InvalidJobId(_)));
    }
}
