//! HTTP feature slices
//!
//! Each feature is a vertical slice with its own commands or queries and
//! routes. Commands and queries implement `mediator::Request` and are run by
//! a standalone `handle` function.
//!
//! - **sync**: Salesforce to mart sync
//! - **transform**: DbToDb and FileToDb loads
//! - **replicate**: table copies
//! - **jobs**: status of any job
//! - **welcome**: public banner and health probe
//!
//! Everything except the welcome routes requires the origination headers.

pub mod jobs;
pub mod replicate;
pub mod shared;
pub mod sync;
pub mod transform;
pub mod welcome;

use axum::{middleware::from_fn_with_state, Router};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::etl::EtlContext;
use crate::middleware::require_origination;
use crate::salesforce::SalesforceApi;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct AppState {
    pub ctx: EtlContext,
    pub auth: AuthConfig,
    /// Absent when no Salesforce credentials are configured
    pub salesforce: Option<Arc<dyn SalesforceApi>>,
}

/// Creates the service router with all feature routes mounted
pub fn router(state: AppState) -> Router<()> {
    let protected = Router::new()
        .merge(sync::sync_routes())
        .merge(transform::transform_routes())
        .merge(replicate::replicate_routes())
        .merge(jobs::jobs_routes())
        .route_layer(from_fn_with_state(state.auth.clone(), require_origination));

    Router::new()
        .merge(welcome::welcome_routes())
        .merge(protected)
        .with_state(state)
}
