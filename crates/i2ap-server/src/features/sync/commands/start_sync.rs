//! Start sync command

use i2ap_common::{JobAcceptedResponse, JobStatus};
use mediator::Request;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::etl::EtlContext;
use crate::features::shared::{start_job, JobAccepted};
use crate::salesforce::sync::SyncError;
use crate::salesforce::{Manifest, ManifestEntry, SalesforceApi, SyncEngine};
use crate::state::{JobRunner, JobService, StateError};

/// How rows already in the mart are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadType {
    /// Truncate and reload everything
    #[default]
    TruncReload,
    /// Merge rows changed since the last sync
    Incremental,
    /// Drop tables whose layout changed, then reload
    DropReplace,
}

impl LoadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadType::TruncReload => "TRUNCRELOAD",
            LoadType::Incremental => "INCREMENTAL",
            LoadType::DropReplace => "DROPREPLACE",
        }
    }
}

impl FromStr for LoadType {
    type Err = StartSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TRUNCRELOAD" => Ok(LoadType::TruncReload),
            "INCREMENTAL" => Ok(LoadType::Incremental),
            "DROPREPLACE" => Ok(LoadType::DropReplace),
            _ => Err(StartSyncError::InvalidLoadType(s.to_string())),
        }
    }
}

/// Command to start a Salesforce sync
///
/// Without an object name every manifest object is synced as a child job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StartSyncCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StartSyncError {
    #[error("Invalid load-type: {0}")]
    InvalidLoadType(String),

    #[error("Salesforce credentials are not configured")]
    NotConfigured,

    #[error("Job state error: {0}")]
    State(#[from] StateError),
}

impl Request<Result<JobAccepted, StartSyncError>> for StartSyncCommand {}

impl StartSyncCommand {
    /// Checks the load type and returns it
    #[tracing::instrument(skip(self))]
    pub fn validate(&self) -> Result<LoadType, StartSyncError> {
        match self.load_type.as_deref().map(str::trim) {
            None | Some("") => Ok(LoadType::default()),
            Some(raw) => raw.parse(),
        }
    }

    fn object(&self) -> Option<&str> {
        self.object_name
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
    }
}

pub async fn handle(
    ctx: &EtlContext,
    salesforce: Option<Arc<dyn SalesforceApi>>,
    command: StartSyncCommand,
) -> Result<JobAccepted, StartSyncError> {
    let load_type = command.validate()?;
    let salesforce = salesforce.ok_or(StartSyncError::NotConfigured)?;
    let object = command.object().map(str::to_string);

    let job = start_job(ctx, JobService::Salesforce).await?;
    let job_id = job.job_id().to_string();
    let events = ctx.event_log(&job_id);

    let engine = SyncEngine::new(
        Arc::clone(&ctx.warehouse),
        salesforce,
        ctx.project.ddl_dir.clone(),
        ctx.project.dataset.clone(),
    );
    let ddl_dir = ctx.project.ddl_dir.clone();
    let mut work_job = job.clone();
    let target = object.clone().unwrap_or_else(|| "all objects".to_string());

    let task = JobRunner::spawn(job, async move {
        match object {
            Some(object) => {
                let entry = match Manifest::load(&ddl_dir).await {
                    Ok(manifest) => manifest.entry_for(&object),
                    Err(e) => {
                        warn!("No usable manifest, syncing {} with defaults: {}", object, e);
                        ManifestEntry::new(&object)
                    },
                };
                let job_id = work_job.job_id().to_string();
                let outcome = match load_type {
                    LoadType::DropReplace => engine.replace_object(&job_id, &entry).await?,
                    LoadType::Incremental => engine.sync_object(&job_id, &entry, true).await?,
                    LoadType::TruncReload => engine.sync_object(&job_id, &entry, false).await?,
                };
                work_job.change_status(JobStatus::Complete, None).await?;
                info!(object = %outcome.object, rows = outcome.rows, "Sync finished");
            },
            None => {
                let status = engine
                    .sync_all(
                        &mut work_job,
                        load_type == LoadType::Incremental,
                        load_type == LoadType::DropReplace,
                    )
                    .await?;
                info!(%status, "Sync of all objects finished");
            },
        }
        Ok::<(), SyncError>(())
    });

    let message = format!(
        "i2ap/Salesforce: Accepted {} sync request for: {} on pod: {}.",
        load_type.as_str(),
        target,
        ctx.pod
    );
    info!("{}", message);
    events.info(&message, JobStatus::InProgress.as_str());

    Ok(JobAccepted {
        response: JobAcceptedResponse::new(message, &ctx.pod, job_id, JobService::Salesforce.as_str()),
        task,
    })
}
