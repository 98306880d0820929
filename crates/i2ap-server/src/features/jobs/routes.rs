//! Job status routes
//!
//! - `GET /Sync/:job_id`
//! - `GET /DbToDb/:job_id`
//! - `GET /FileToDb/:job_id`
//! - `GET /Replicate/:job_id`

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use super::queries::{get_job_status::handle, GetJobStatusError, GetJobStatusQuery, JobStatusLookup};
use crate::error::AppError;
use crate::features::AppState;
use crate::state::JobService;

pub fn jobs_routes() -> Router<AppState> {
    Router::new().route("/:service/:job_id", get(get_job_status))
}

/// Status of a job
///
/// `service` is the route name of the service that ran it, e.g. `DbToDb`.
async fn get_job_status(
    State(state): State<AppState>,
    Path((service, job_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let service: JobService = service
        .parse()
        .map_err(|_| AppError::NotFound(format!("Unknown service: {}", service)))?;
    let query = GetJobStatusQuery { service, job_id };

    match handle(&state.ctx, query).await {
        Ok(JobStatusLookup::Found(body)) => Ok((StatusCode::OK, Json(body)).into_response()),
        Ok(JobStatusLookup::NotFound(body)) => {
            Ok((StatusCode::NOT_FOUND, Json(body)).into_response())
        },
        Err(GetJobStatusError::InvalidJobId(e)) => Err(AppError::Validation(e.to_string())),
        Err(GetJobStatusError::State(e)) => Err(AppError::State(e)),
    }
}
