//! i2ap CLI - Main entry point

use clap::Parser;
use i2ap_cli::Cli;
use i2ap_common::logging::{self, LogSettings};
use std::process;
use tracing::error;
use tracing::level_filters::LevelFilter;

#[tokio::main]
async fn main() {
    // A local .env may carry the server URL and client credentials
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Verbose mode logs debug to the console; otherwise only warnings
    let settings = LogSettings::builder()
        .level(if cli.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        })
        .file_prefix("i2ap-cli")
        .build();
    let settings = settings.clone().merge_env().unwrap_or(settings);

    // The CLI works without logging, so setup failures are ignored
    let _guard = logging::init(&settings).ok().flatten();

    if let Err(e) = i2ap_cli::commands::run(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
