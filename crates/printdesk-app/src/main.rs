// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printdesk, a durable print-job lifecycle manager
//
// Entry point. Initialises logging, parses the command line, and dispatches to
// the daemon (`run`) or one of the client commands (`submit`, `status`).

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use printdesk_core::error::{PrintdeskError, Result};
use printdesk_core::types::{JobId, JobStatus, OwnerId};

use services::app_services::AppServices;

#[derive(Parser, Debug)]
#[command(
    name = "printdesk",
    version,
    about = "Durable print-job manager with mock and IPP backends"
)]
struct Cli {
    /// Configuration file (JSON). Defaults to config.json in the data directory.
    #[arg(long, short, env = "PRINTDESK_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatch workers until interrupted
    Run {
        /// Number of dispatch loops (overrides `workers` in the config)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Store a document and enqueue it for printing
    Submit {
        /// Id of the submitting user
        #[arg(long, env = "PRINTDESK_OWNER")]
        owner: String,
        /// Document to print
        file: PathBuf,
    },
    /// Show the status of a job as JSON
    Status {
        job_id: JobId,
        /// Poll until the job reaches a terminal state
        #[arg(long)]
        wait: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "printdesk failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let services = AppServices::init(cli.config.as_deref())?;

    match cli.command {
        Command::Run { workers } => {
            let workers = workers.unwrap_or(services.config().workers);
            tracing::info!(workers, "Printdesk starting");
            services.run_until_interrupted(workers).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Submit { owner, file } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    PrintdeskError::InvalidSubmission(format!(
                        "{} has no usable file name",
                        file.display()
                    ))
                })?
                .to_string();
            let bytes = tokio::fs::read(&file).await?;
            let job_id = services
                .service()
                .submit_document(&OwnerId::new(owner), &name, &bytes)
                .await?;
            println!("{job_id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { job_id, wait } => {
            let mut view = services.service().get_job_status(&job_id).await?;
            if wait {
                let interval = services.config().poll_interval();
                while !view.status.is_terminal() {
                    tokio::time::sleep(interval).await;
                    view = services.service().get_job_status(&job_id).await?;
                }
            }
            println!("{}", serde_json::to_string_pretty(&view)?);

            if wait && view.status == JobStatus::Failed {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
