//! Job status lifecycle and the JSON bodies exchanged with status endpoints
//!
//! A job moves `NEW -> INPROGRESS -> COMPLETE | ERROR`. The wire strings are the
//! ones stored in job-state blobs and returned by the services, so they must
//! not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::I2apError;

/// Status of a tracked job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobStatus {
    /// Record exists only in memory or was just created
    #[default]
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "INPROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "ERROR")]
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::InProgress => "INPROGRESS",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Error => "ERROR",
        }
    }

    /// COMPLETE and ERROR are final; nothing moves a job out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = I2apError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NEW" => Ok(JobStatus::New),
            "INPROGRESS" | "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETE" => Ok(JobStatus::Complete),
            "ERROR" => Ok(JobStatus::Error),
            _ => Err(I2apError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one child of a parent job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChildStatus {
    pub job_id: String,
    pub job_status: JobStatus,
}

/// Body returned by `GET /{Service}/{job-id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobStatusResponse {
    pub status_message: String,
    /// HTTP status line, e.g. `200 OK`
    pub status: String,
    pub pod: String,
    pub job_id: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusResponse {
    /// Body for a job id that has no state record
    pub fn not_found(
        pod: impl Into<String>,
        job_id: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            status_message: "Not Found".to_string(),
            status: "404 Not Found".to_string(),
            pod: pod.into(),
            job_id: job_id.into(),
            service: service.into(),
            state_file_path: None,
            job_status: None,
            start_time: None,
            end_time: None,
            parent_id: None,
            children: Vec::new(),
            error: None,
        }
    }
}

/// Body returned when a job has been accepted for background processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobAcceptedResponse {
    pub status_message: String,
    pub status: String,
    pub pod: String,
    pub job_id: String,
    pub service: String,
}

impl JobAcceptedResponse {
    pub fn new(
        message: impl Into<String>,
        pod: impl Into<String>,
        job_id: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            status_message: message.into(),
            status: "202 Accepted".to_string(),
            pod: pod.into(),
            job_id: job_id.into(),
            service: service.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str() {
        assert_eq!("NEW".parse::<JobStatus>().unwrap(), JobStatus::New);
        assert_eq!("inprogress".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
        assert_eq!("IN_PROGRESS".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
        assert_eq!("Complete".parse::<JobStatus>().unwrap(), JobStatus::Complete);
        assert_eq!("ERROR".parse::<JobStatus>().unwrap(), JobStatus::Error);
        assert!("STOPPED".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"INPROGRESS\"");

        let parsed: JobStatus = serde_json::from_str("\"COMPLETE\"").unwrap();
        assert_eq!(parsed, JobStatus::Complete);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::New.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn test_not_found_body_omits_state_fields() {
        let body = JobStatusResponse::not_found("pod-1", "abc", "salesforce");
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["status-message"], "Not Found");
        assert_eq!(value["status"], "404 Not Found");
        assert_eq!(value["job-id"], "abc");
        assert!(value.get("job-status").is_none());
        assert!(value.get("children").is_none());
    }

    #[test]
    fn test_accepted_body() {
        let body = JobAcceptedResponse::new("queued", "pod-1", "abc", "processor");
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["status"], "202 Accepted");
        assert_eq!(value["service"], "processor");
    }
}
