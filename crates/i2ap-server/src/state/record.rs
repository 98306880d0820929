//! The persisted job-state blob and status aggregation

use chrono::{DateTime, Utc};
use i2ap_common::JobStatus;
use serde::{Deserialize, Serialize};

/// Contents of `{state-bucket}/{service}/{job-id}.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobRecord {
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobRecord {
    /// A record for a job nobody has written yet
    pub fn fresh(start_time: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::New,
            start_time,
            end_time: None,
            parent_id: None,
            children: Vec::new(),
            error: None,
        }
    }
}

/// Combine child statuses into one parent status.
///
/// Any error wins, then all-complete, then any progress at all. An empty set
/// has no aggregate.
pub fn aggregate<I>(statuses: I) -> Option<JobStatus>
where
    I: IntoIterator<Item = JobStatus>,
{
    let mut seen_any = false;
    let mut all_complete = true;
    let mut any_started = false;

    for status in statuses {
        seen_any = true;
        match status {
            JobStatus::Error => return Some(JobStatus::Error),
            JobStatus::Complete => any_started = true,
            JobStatus::InProgress => {
                any_started = true;
                all_complete = false;
            },
            JobStatus::New => all_complete = false,
        }
    }

    if !seen_any {
        None
    } else if all_complete {
        Some(JobStatus::Complete)
    } else if any_started {
        Some(JobStatus::InProgress)
    } else {
        Some(JobStatus::New)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use JobStatus::*;

    #[test]
    fn test_aggregate_rules() {
        assert_eq!(aggregate(Vec::new()), None);
        assert_eq!(aggregate([Complete, Error, InProgress]), Some(Error));
        assert_eq!(aggregate([Complete, Complete]), Some(Complete));
        assert_eq!(aggregate([Complete, New]), Some(InProgress));
        assert_eq!(aggregate([New, InProgress]), Some(InProgress));
        assert_eq!(aggregate([New, New]), Some(New));
    }

    #[test]
    fn test_record_wire_format() {
        let start = "2024-05-01T10:00:00Z".parse().unwrap();
        let mut record = JobRecord::fresh(start);
        record.status = InProgress;
        record.children.push("child-1".into());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "INPROGRESS");
        assert_eq!(value["start-time"], "2024-05-01T10:00:00Z");
        assert!(value["end-time"].is_null());
        assert!(value["parent-id"].is_null());
        assert_eq!(value["children"][0], "child-1");
    }

    #[test]
    fn test_record_tolerates_missing_optional_keys() {
        let record: JobRecord =
            serde_json::from_str(r#"{"status":"COMPLETE","start-time":"2024-05-01T10:00:00Z"}"#)
                .unwrap();
        assert_eq!(record.status, Complete);
        assert!(record.children.is_empty());
        assert!(record.error.is_none());
    }
}
