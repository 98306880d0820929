//! Public routes: the welcome banner and the health probe

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::features::AppState;

pub fn welcome_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
}

async fn welcome(State(state): State<AppState>) -> String {
    format!("Welcome to the Service running on: {}", state.ctx.pod)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "pod": state.ctx.pod,
    }))
}
