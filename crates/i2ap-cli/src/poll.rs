//! Polling a job until it finishes
//!
//! COMPLETE is success and INPROGRESS keeps the poll going. A job the server
//! has no record of (404, or a record still at NEW) is an error, as is any
//! other status.

use i2ap_common::{JobStatus, JobStatusResponse};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::client::{ApiClient, StatusLookup};
use crate::error::{CliError, Result};

/// Seconds between status checks when `--interval` is not given
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Apply the poll rule to one lookup. `None` means keep waiting.
pub fn evaluate(service: &str, job_id: &str, lookup: StatusLookup) -> Result<Option<JobStatusResponse>> {
    let response = match lookup {
        StatusLookup::NotFound => return Err(CliError::job_not_found(service, job_id)),
        StatusLookup::Found(response) => response,
    };

    match response.job_status {
        Some(JobStatus::Complete) => Ok(Some(response)),
        Some(JobStatus::InProgress) => Ok(None),
        Some(JobStatus::New) | None => Err(CliError::job_not_found(service, job_id)),
        Some(status) => Err(CliError::JobFailed {
            job_id: job_id.to_string(),
            status: status.to_string(),
            detail: response
                .error
                .clone()
                .unwrap_or_else(|| response.status_message.clone()),
        }),
    }
}

/// Poll `GET /{service}/{job_id}` every `interval` until the job is done
pub async fn wait_for_job(
    client: &ApiClient,
    service: &str,
    job_id: &str,
    interval: Duration,
    timeout: Option<Duration>,
) -> Result<JobStatusResponse> {
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        let lookup = client.job_status(service, job_id).await?;
        if let Some(done) = evaluate(service, job_id, lookup)? {
            info!(service, job_id, "Job complete");
            return Ok(done);
        }

        let mut pause = interval;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(CliError::Timeout {
                    job_id: job_id.to_string(),
                    secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
                });
            }
            pause = pause.min(deadline - now);
        }

        debug!(service, job_id, pause_ms = pause.as_millis() as u64, "Job still in progress");
        sleep(pause).await;
    }
}
