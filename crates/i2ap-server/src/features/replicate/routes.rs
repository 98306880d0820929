//! Replicate routes
//!
//! - `GET /Replicate?object-name=..&source-project=..&source-dataset=..&dest-project=..&dest-dataset=..`
//!
//! Status is served by the jobs feature at `GET /Replicate/:job_id`.

use axum::{
    extract::{Query, State},
    response::Response,
    routing::get,
    Router,
};

use super::commands::{replicate_table::handle, ReplicateTableCommand, ReplicateTableError};
use crate::error::AppError;
use crate::features::{shared::accepted, AppState};

pub fn replicate_routes() -> Router<AppState> {
    Router::new().route("/Replicate", get(replicate_table))
}

async fn replicate_table(
    State(state): State<AppState>,
    Query(command): Query<ReplicateTableCommand>,
) -> Result<Response, AppError> {
    match handle(&state.ctx, command).await {
        Ok(job) => Ok(accepted(job.response)),
        Err(ReplicateTableError::Validation(e)) => Err(AppError::Validation(e.to_string())),
        Err(ReplicateTableError::State(e)) => Err(AppError::State(e)),
    }
}
