//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::etl::EtlError;
use crate::salesforce::SalesforceError;
use crate::state::StateError;
use crate::storage::StorageError;
use crate::warehouse::WarehouseError;

/// Message returned when the origination headers do not match
pub const INVALID_ORIGINATION: &str = "i2ap/Processor: Failure; Invalid origination";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("Job state error: {0}")]
    State(#[from] StateError),

    #[error("Salesforce error: {0}")]
    Salesforce(#[from] SalesforceError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<EtlError> for AppError {
    fn from(err: EtlError) -> Self {
        match err {
            EtlError::Storage(e) => AppError::Storage(e),
            EtlError::Warehouse(e) => AppError::Warehouse(e),
            EtlError::State(e) => AppError::State(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Unauthorized(ref message) => (StatusCode::UNAUTHORIZED, message.clone()),
            AppError::Storage(ref e) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
            AppError::Warehouse(ref e) => {
                tracing::error!("Warehouse error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
            AppError::State(ref e) => {
                tracing::error!("Job state error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
            AppError::Salesforce(ref e) => {
                tracing::error!("Salesforce error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
