//! Transform routes
//!
//! - `POST /DbToDb` - Run a SQL template into the mart
//! - `GET /FileToDb?object-name=..&filename=..&disposition=..` - Load a staged file
//!
//! Status is served by the jobs feature at `GET /DbToDb/:job_id` and
//! `GET /FileToDb/:job_id`.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use super::commands::{
    db_to_db::handle as handle_db_to_db, file_to_db::handle as handle_load_file, LoadFileCommand,
    LoadFileError, RunDbToDbCommand, RunDbToDbError,
};
use crate::error::AppError;
use crate::features::{shared::accepted, AppState};

pub fn transform_routes() -> Router<AppState> {
    Router::new()
        .route("/DbToDb", post(run_db_to_db))
        .route("/FileToDb", get(load_file))
}

/// Run a SQL template
///
/// Body: `{"object-name": "orders", "query-params": [{"key": "FROM_DATE", "value": "2017-11-01"}]}`
async fn run_db_to_db(
    State(state): State<AppState>,
    body: Result<Json<RunDbToDbCommand>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(command) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    match handle_db_to_db(&state.ctx, command).await {
        Ok(job) => Ok(accepted(job.response)),
        Err(RunDbToDbError::Validation(e)) => Err(AppError::Validation(e.to_string())),
        Err(RunDbToDbError::State(e)) => Err(AppError::State(e)),
    }
}

/// Load a file from the stage bucket
async fn load_file(
    State(state): State<AppState>,
    Query(command): Query<LoadFileCommand>,
) -> Result<Response, AppError> {
    match handle_load_file(&state.ctx, command).await {
        Ok(job) => Ok(accepted(job.response)),
        Err(LoadFileError::Validation(e)) => Err(AppError::Validation(e.to_string())),
        Err(LoadFileError::State(e)) => Err(AppError::State(e)),
    }
}
