//! i2ap CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line client for the i2ap integration service.
//!
//! # Overview
//!
//! - **Submitting jobs**: `i2ap sync`, `i2ap db-to-db`, `i2ap file-to-db` and
//!   `i2ap replicate` start a background job and print the accepted body
//! - **Status**: `i2ap status <service> <job-id>` prints one status lookup
//! - **Waiting**: `i2ap wait <service> <job-id>` polls until the job finishes,
//!   failing when it errors, disappears or runs past `--timeout`
//!
//! Every request carries the `Tt-I2ap-Id` / `Tt-I2ap-Sec` origination headers.

pub mod client;
pub mod commands;
pub mod error;
pub mod poll;

// Re-export commonly used types
pub use client::{ApiClient, Credentials, StatusLookup};
pub use error::{CliError, Result};

use clap::{Args, Parser, Subcommand};

/// i2ap - submit and follow integration jobs
#[derive(Parser, Debug)]
#[command(name = "i2ap")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Server URL
    #[arg(long, env = "I2AP_SERVER_URL", default_value = client::DEFAULT_SERVER_URL, global = true)]
    pub server_url: String,

    /// Client id sent as the origination id
    #[arg(long, env = "I2AP_CLIENT_ID", default_value = "", hide_default_value = true, global = true)]
    pub client_id: String,

    /// Client secret sent as the origination secret
    #[arg(
        long,
        env = "I2AP_CLIENT_SECRET",
        default_value = "",
        hide_default_value = true,
        hide_env_values = true,
        global = true
    )]
    pub client_secret: String,
}

impl Cli {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.client_id, &self.client_secret)
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync Salesforce objects into the warehouse
    Sync {
        /// Sync a single object instead of every object in the manifest
        #[arg(short, long)]
        object: Option<String>,

        /// TRUNCRELOAD, INCREMENTAL or DROPREPLACE
        #[arg(short, long)]
        load_type: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Run an object's SQL template and load the result
    DbToDb {
        /// Object whose template is run
        #[arg(short, long)]
        object: String,

        /// Template parameter, repeatable
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// WRITE_APPEND, WRITE_TRUNCATE or WRITE_EMPTY
        #[arg(short, long)]
        disposition: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Load a staged file into an object's table
    FileToDb {
        /// Destination object
        #[arg(short, long)]
        object: String,

        /// File name in the stage bucket
        #[arg(short, long)]
        file: String,

        /// WRITE_APPEND, WRITE_TRUNCATE or WRITE_EMPTY
        #[arg(short, long)]
        disposition: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Copy a table from one dataset to another
    Replicate {
        /// Table to copy
        #[arg(short, long)]
        object: String,

        #[arg(long)]
        source_project: String,

        #[arg(long)]
        source_dataset: String,

        #[arg(long)]
        dest_project: String,

        #[arg(long)]
        dest_dataset: String,

        /// WRITE_APPEND, WRITE_TRUNCATE or WRITE_EMPTY
        #[arg(short, long)]
        disposition: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Show a job's status
    Status {
        /// Service route or folder name (e.g. Sync, salesforce, DbToDb)
        service: String,

        job_id: String,
    },

    /// Poll a job until it completes
    Wait {
        /// Service route or folder name (e.g. Sync, salesforce, DbToDb)
        service: String,

        job_id: String,

        #[command(flatten)]
        poll: PollArgs,
    },
}

/// Polling options shared by `wait` and the submit commands
#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Seconds between status checks
    #[arg(long, default_value_t = poll::DEFAULT_POLL_INTERVAL_SECS)]
    pub interval: u64,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct WaitArgs {
    /// Poll the job after submitting it
    #[arg(short, long)]
    pub wait: bool,

    #[command(flatten)]
    pub poll: PollArgs,
}

/// Parse `KEY=VALUE`; the value may itself contain `=`
pub fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("REGION=EMEA").unwrap(), ("REGION".into(), "EMEA".into()));
        assert_eq!(parse_param("F=a=b").unwrap(), ("F".into(), "a=b".into()));
        assert_eq!(parse_param("EMPTY=").unwrap(), ("EMPTY".into(), String::new()));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_db_to_db_arguments() {
        let cli = Cli::try_parse_from([
            "i2ap",
            "--client-id",
            "airflow",
            "db-to-db",
            "--object",
            "orders",
            "--param",
            "REGION=EMEA",
            "-p",
            "YEAR=2024",
            "--wait",
            "--interval",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.client_id, "airflow");
        match cli.command {
            Commands::DbToDb {
                object,
                params,
                disposition,
                wait,
            } => {
                assert_eq!(object, "orders");
                assert_eq!(params.len(), 2);
                assert_eq!(params[1], ("YEAR".into(), "2024".into()));
                assert!(disposition.is_none());
                assert!(wait.wait);
                assert_eq!(wait.poll.interval, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_wait_defaults() {
        let cli = Cli::try_parse_from(["i2ap", "wait", "Sync", "abc"]).unwrap();
        match cli.command {
            Commands::Wait {
                service,
                job_id,
                poll,
            } => {
                assert_eq!(service, "Sync");
                assert_eq!(job_id, "abc");
                assert_eq!(poll.interval, poll::DEFAULT_POLL_INTERVAL_SECS);
                assert!(poll.timeout.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_replicate_requires_destination() {
        let result = Cli::try_parse_from([
            "i2ap",
            "replicate",
            "--object",
            "account",
            "--source-project",
            "p",
            "--source-dataset",
            "raw",
            "--dest-project",
            "p",
        ]);
        assert!(result.is_err());
    }
}
