//! Sync routes
//!
//! - `POST /Sync` - Start a Salesforce sync
//!
//! Status is served by the jobs feature at `GET /Sync/:job_id`.

use axum::{body::Bytes, extract::State, response::Response, routing::post, Router};

use super::commands::{start_sync::handle, StartSyncCommand, StartSyncError};
use crate::error::AppError;
use crate::features::{shared::accepted, AppState};

pub fn sync_routes() -> Router<AppState> {
    Router::new().route("/Sync", post(start_sync))
}

/// Start a sync
///
/// Body: `{"object-name"?: "Account", "load-type"?: "INCREMENTAL"}`. An
/// empty body syncs every manifest object with a truncate and reload.
async fn start_sync(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let command: StartSyncCommand = if body.iter().all(u8::is_ascii_whitespace) {
        StartSyncCommand::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid sync request body: {}", e)))?
    };

    match handle(&state.ctx, state.salesforce.clone(), command).await {
        Ok(job) => Ok(accepted(job.response)),
        Err(e @ StartSyncError::InvalidLoadType(_)) => Err(AppError::Validation(e.to_string())),
        Err(e @ StartSyncError::NotConfigured) => Err(AppError::Internal(e.to_string())),
        Err(StartSyncError::State(e)) => Err(AppError::State(e)),
    }
}
