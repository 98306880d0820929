//! i2ap Server - Main entry point

use anyhow::Result;
use axum::Router;
use i2ap_common::logging::{self, LogSettings};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::{info, warn};

use i2ap_server::{
    config::Config,
    etl::EtlContext,
    events::EventWriter,
    features::{self, AppState},
    middleware,
    salesforce::{SalesforceApi, SalesforceClient},
    storage, warehouse,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_settings = LogSettings::builder()
        .file_prefix("i2ap-server")
        .directives("i2ap_server=debug,tower_http=debug,sqlx=warn,aws_config=warn")
        .build()
        .merge_env()?;
    let _log_guard = logging::init(&log_settings)?;

    info!("Starting i2ap server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let pod = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    let store = storage::connect(&config.storage).await?;
    let mart = warehouse::connect(&config.mart).await?;

    let salesforce: Option<Arc<dyn SalesforceApi>> = if config.salesforce.is_configured() {
        Some(Arc::new(SalesforceClient::new(config.salesforce.clone())?))
    } else {
        warn!("Salesforce credentials not configured, /Sync will be rejected");
        None
    };

    let event_writer = EventWriter::for_settings(&config.events)?;

    let state = AppState {
        ctx: EtlContext::new(&config, store, mart, pod).with_event_writer(event_writer),
        auth: config.auth.clone(),
        salesforce,
    };

    let app = create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(state: AppState, config: &Config) -> Router {
    features::router(state)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Background jobs are not awaited; their records stay INPROGRESS if cut off
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
