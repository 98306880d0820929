//! Command execution
//!
//! Each command prints the server's JSON body on stdout so scripts can pick
//! the job id out of it.

use i2ap_common::JobAcceptedResponse;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::client::{
    ApiClient, DbToDbRequest, FileToDbRequest, QueryParam, ReplicateRequest, StatusLookup,
    SyncRequest,
};
use crate::error::{CliError, Result};
use crate::poll::wait_for_job;
use crate::{Cli, Commands, PollArgs, WaitArgs};

/// Execute the parsed command line
pub async fn run(cli: &Cli) -> Result<()> {
    let client = ApiClient::new(&cli.server_url, cli.credentials())?;

    match &cli.command {
        Commands::Sync {
            object,
            load_type,
            wait,
        } => {
            let request = SyncRequest {
                object_name: object.clone(),
                load_type: load_type.clone(),
            };
            let accepted = client.sync(&request).await?;
            submitted(&client, accepted, wait).await
        }

        Commands::DbToDb {
            object,
            params,
            disposition,
            wait,
        } => {
            let request = DbToDbRequest {
                object_name: object.clone(),
                query_params: params
                    .iter()
                    .map(|(key, value)| QueryParam {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect(),
                disposition: disposition.clone(),
            };
            let accepted = client.db_to_db(&request).await?;
            submitted(&client, accepted, wait).await
        }

        Commands::FileToDb {
            object,
            file,
            disposition,
            wait,
        } => {
            let request = FileToDbRequest {
                object_name: object.clone(),
                filename: file.clone(),
                disposition: disposition.clone(),
            };
            let accepted = client.file_to_db(&request).await?;
            submitted(&client, accepted, wait).await
        }

        Commands::Replicate {
            object,
            source_project,
            source_dataset,
            dest_project,
            dest_dataset,
            disposition,
            wait,
        } => {
            let request = ReplicateRequest {
                object_name: object.clone(),
                source_project: source_project.clone(),
                source_dataset: source_dataset.clone(),
                dest_project: dest_project.clone(),
                dest_dataset: dest_dataset.clone(),
                disposition: disposition.clone(),
            };
            let accepted = client.replicate(&request).await?;
            submitted(&client, accepted, wait).await
        }

        Commands::Status { service, job_id } => {
            match client.job_status(service, job_id).await? {
                StatusLookup::Found(response) => print_json(&response),
                StatusLookup::NotFound => Err(CliError::job_not_found(service, job_id)),
            }
        }

        Commands::Wait {
            service,
            job_id,
            poll,
        } => wait(&client, service, job_id, poll).await,
    }
}

async fn submitted(client: &ApiClient, accepted: JobAcceptedResponse, args: &WaitArgs) -> Result<()> {
    info!(job_id = %accepted.job_id, service = %accepted.service, "Job accepted");
    print_json(&accepted)?;

    if args.wait {
        wait(client, &accepted.service, &accepted.job_id, &args.poll).await?;
    }
    Ok(())
}

async fn wait(client: &ApiClient, service: &str, job_id: &str, poll: &PollArgs) -> Result<()> {
    if poll.interval == 0 {
        return Err(CliError::config("--interval must be at least 1 second"));
    }
    let response = wait_for_job(
        client,
        service,
        job_id,
        Duration::from_secs(poll.interval),
        poll.timeout.map(Duration::from_secs),
    )
    .await?;
    print_json(&response)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
