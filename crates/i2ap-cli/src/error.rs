//! Error types for the i2ap CLI
//!
//! Messages are shown to the user as-is, so each one says what went wrong and
//! where to look.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// The server answered with an error body
    #[error("Server error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Origination headers were rejected
    #[error("Request rejected: {0}. Check --client-id and --client-secret (or I2AP_CLIENT_ID / I2AP_CLIENT_SECRET).")]
    Unauthorized(String),

    /// The status endpoint has no record of the job
    #[error("Job '{job_id}' does not exist on service '{service}'.")]
    JobNotFound { service: String, job_id: String },

    /// The job reached a status other than COMPLETE
    #[error("Job '{job_id}' finished with status {status}: {detail}")]
    JobFailed {
        job_id: String,
        status: String,
        detail: String,
    },

    #[error("Timed out after {secs}s waiting for job '{job_id}'. It may still be running; check it with 'i2ap status'.")]
    Timeout { job_id: String, secs: u64 },

    /// HTTP request failed
    #[error("Network request failed: {0}. Check the server URL and that the i2ap server is running.")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("Failed to parse server response: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CliError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn job_not_found(service: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self::JobNotFound {
            service: service.into(),
            job_id: job_id.into(),
        }
    }
}
