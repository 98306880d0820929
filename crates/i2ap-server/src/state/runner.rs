//! Background execution of jobs
//!
//! Work runs on its own tokio task. A second task waits for it and writes an
//! ERROR record when the work fails or panics, so a job never stays
//! INPROGRESS because its task died. Successful work sets its own terminal
//! status.

use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{error, info_span, warn, Instrument};

use super::JobState;

/// Message recorded when the work task panics
pub const PANIC_MESSAGE: &str = "job task panicked";

pub struct JobRunner;

impl JobRunner {
    /// Run `work` in the background under `state`'s job.
    ///
    /// The returned handle resolves once the job's outcome has been recorded.
    pub fn spawn<F, E>(state: JobState, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let span = info_span!(
            "job",
            job_id = %state.job_id(),
            service = %state.service()
        );

        let worker = tokio::spawn(work.instrument(span.clone()));

        tokio::spawn(
            async move {
                let failure = match worker.await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(e) if e.is_panic() => Some(PANIC_MESSAGE.to_string()),
                    Err(e) => Some(format!("job task was cancelled: {}", e)),
                };

                let Some(message) = failure else {
                    return;
                };
                error!("Job failed: {}", message);

                let mut state = state;
                // The work may have written progress since we captured the handle
                if let Err(e) = state.refresh().await {
                    warn!("Could not refresh job state before recording failure: {}", e);
                }
                if let Err(e) = state.fail(message).await {
                    error!("Could not record job failure: {}", e);
                }
            }
            .instrument(span),
        )
    }
}
