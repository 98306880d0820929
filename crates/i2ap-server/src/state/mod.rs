//! Persisted job state
//!
//! Every asynchronous job has one JSON record in the state bucket at
//! `{service}/{job-id}.json`. Services write it while the job runs and the
//! status endpoints read it back. A job can own child jobs; the parent lists
//! their ids and each child points back through `parent-id`.
//!
//! Records are always rewritten whole. There is no locking, so two writers on
//! the same record race and the last one wins.

use chrono::{DateTime, Utc};
use i2ap_common::JobStatus;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::storage::{self, ObjectStore, StorageError};

pub mod record;
pub mod runner;

pub use record::{aggregate, JobRecord};
pub use runner::JobRunner;

/// Errors raised while reading or writing job state
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Job state storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job {job_id} still has unfinished children: {}", .pending.join(", "))]
    ChildrenNotTerminal { job_id: String, pending: Vec<String> },

    #[error("Unknown job service: {0}")]
    UnknownService(String),
}

pub type StateResult<T> = std::result::Result<T, StateError>;

/// Folder in the state bucket that a service writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobService {
    /// Salesforce sync
    Salesforce,
    /// SQL template transforms (DbToDb)
    Processor,
    /// Staged file loads (FileToDb)
    File,
    Replicate,
}

impl JobService {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobService::Salesforce => "salesforce",
            JobService::Processor => "processor",
            JobService::File => "file",
            JobService::Replicate => "replicate",
        }
    }

    /// Path segment of the HTTP route serving this service
    pub fn route(&self) -> &'static str {
        match self {
            JobService::Salesforce => "Sync",
            JobService::Processor => "DbToDb",
            JobService::File => "FileToDb",
            JobService::Replicate => "Replicate",
        }
    }
}

impl std::fmt::Display for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobService {
    type Err = StateError;

    /// Accepts both folder names and route names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "salesforce" | "sync" => Ok(JobService::Salesforce),
            "processor" | "dbtodb" => Ok(JobService::Processor),
            "file" | "filetodb" => Ok(JobService::File),
            "replicate" => Ok(JobService::Replicate),
            _ => Err(StateError::UnknownService(s.to_string())),
        }
    }
}

/// Handle on one job's persisted record
#[derive(Clone)]
pub struct JobState {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    service: JobService,
    job_id: String,
    started: DateTime<Utc>,
    record: JobRecord,
    exists: bool,
}

impl std::fmt::Debug for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobState")
            .field("path", &self.state_file_path())
            .field("record", &self.record)
            .field("exists", &self.exists)
            .finish()
    }
}

impl JobState {
    fn unpulled(
        store: Arc<dyn ObjectStore>,
        bucket: String,
        service: JobService,
        job_id: String,
    ) -> Self {
        let started = Utc::now();
        Self {
            store,
            bucket,
            service,
            job_id,
            started,
            record: JobRecord::fresh(started),
            exists: false,
        }
    }

    /// Load the record for `job_id`.
    ///
    /// A missing record yields a fresh NEW one. With `create` set it is
    /// written immediately so later readers see the job.
    #[instrument(skip(store, bucket), fields(bucket = %bucket.as_ref()))]
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        bucket: impl AsRef<str>,
        service: JobService,
        job_id: &str,
        create: bool,
    ) -> StateResult<Self> {
        let mut state = Self::unpulled(
            store,
            bucket.as_ref().to_string(),
            service,
            job_id.to_string(),
        );
        state.pull().await?;

        if create && !state.exists {
            state.push().await?;
            debug!("Created job record {}", state.state_file_path());
        }

        Ok(state)
    }

    fn key(&self) -> String {
        format!("{}/{}.json", self.service.as_str(), self.job_id)
    }

    /// Re-read the record. A missing blob resets to a fresh record.
    pub async fn pull(&mut self) -> StateResult<()> {
        match storage::get_json::<JobRecord>(self.store.as_ref(), &self.bucket, &self.key()).await
        {
            Ok(record) => {
                self.record = record;
                self.exists = true;
            },
            Err(e) if e.is_not_found() => {
                self.record = JobRecord::fresh(self.started);
                self.exists = false;
            },
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    pub async fn push(&mut self) -> StateResult<()> {
        storage::put_json(self.store.as_ref(), &self.bucket, &self.key(), &self.record).await?;
        self.exists = true;
        Ok(())
    }

    /// Pick up changes other tasks have written since the last pull
    pub async fn refresh(&mut self) -> StateResult<()> {
        self.pull().await
    }

    /// Set the status and persist.
    ///
    /// Terminal statuses stamp the end time with now unless one is given.
    #[instrument(skip(self), fields(job_id = %self.job_id, service = %self.service))]
    pub async fn change_status(
        &mut self,
        status: JobStatus,
        end_time: Option<DateTime<Utc>>,
    ) -> StateResult<()> {
        self.record.status = status;
        match end_time {
            Some(end) => self.record.end_time = Some(end),
            None if status.is_terminal() => self.record.end_time = Some(Utc::now()),
            None => {},
        }
        self.push().await?;
        debug!("Job {} is now {}", self.job_id, status);
        Ok(())
    }

    /// Mark the job ERROR and keep the reason
    pub async fn fail(&mut self, message: impl Into<String>) -> StateResult<()> {
        self.record.error = Some(message.into());
        self.change_status(JobStatus::Error, None).await
    }

    pub fn state_file_path(&self) -> String {
        format!("{}/{}", self.bucket, self.key())
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn service(&self) -> JobService {
        self.service
    }

    pub fn status(&self) -> JobStatus {
        self.record.status
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// Whether the record was found in storage or has been written
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Create a child job under this one and link both records.
    ///
    /// The parent is written first. A child listed by its parent but not yet
    /// written reads as NEW, while a child record naming a parent that does
    /// not list it would be orphaned.
    #[instrument(skip(self), fields(parent = %self.job_id))]
    pub async fn spawn_child(&mut self, child_id: &str) -> StateResult<JobState> {
        let newly_listed = !self.record.children.iter().any(|c| c == child_id);
        if newly_listed {
            self.record.children.push(child_id.to_string());
        }
        if let Err(e) = self.push().await {
            if newly_listed {
                self.record.children.retain(|c| c != child_id);
            }
            return Err(e);
        }

        let mut child = Self::unpulled(
            Arc::clone(&self.store),
            self.bucket.clone(),
            self.service,
            child_id.to_string(),
        );
        child.record.parent_id = Some(self.job_id.clone());
        child.push().await?;

        info!("Job {} spawned child {}", self.job_id, child_id);
        Ok(child)
    }

    /// Current status of every child. Children without a record count as NEW.
    pub async fn children_statuses(&self) -> StateResult<Vec<(String, JobStatus)>> {
        let mut statuses = Vec::with_capacity(self.record.children.len());
        for child_id in &self.record.children {
            let key = format!("{}/{}.json", self.service.as_str(), child_id);
            let status =
                match storage::get_json::<JobRecord>(self.store.as_ref(), &self.bucket, &key).await
                {
                    Ok(record) => record.status,
                    Err(e) if e.is_not_found() => JobStatus::New,
                    Err(e) => return Err(e.into()),
                };
            statuses.push((child_id.clone(), status));
        }
        Ok(statuses)
    }

    /// Status to report for this job, looking through to children.
    ///
    /// A running parent whose child already failed reports ERROR.
    pub async fn effective_status(&self) -> StateResult<JobStatus> {
        let own = self.record.status;
        if own.is_terminal() || self.record.children.is_empty() {
            return Ok(own);
        }

        let children = self.children_statuses().await?;
        if children.iter().any(|(_, s)| *s == JobStatus::Error) {
            Ok(JobStatus::Error)
        } else {
            Ok(own)
        }
    }

    /// Close a parent job with the aggregate of its children.
    #[instrument(skip(self), fields(job_id = %self.job_id))]
    pub async fn finalize_from_children(&mut self) -> StateResult<JobStatus> {
        let children = self.children_statuses().await?;

        let pending: Vec<String> = children
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        if !pending.is_empty() {
            return Err(StateError::ChildrenNotTerminal {
                job_id: self.job_id.clone(),
                pending,
            });
        }

        let failed = children.iter().filter(|(_, s)| *s == JobStatus::Error).count();
        let status = aggregate(children.into_iter().map(|(_, s)| s)).unwrap_or(JobStatus::Complete);
        if status == JobStatus::Error {
            self.record.error = Some(format!("{} child job(s) failed", failed));
        }
        self.change_status(status, None).await?;

        info!("Job {} finalized as {}", self.job_id, status);
        Ok(status)
    }
}
