// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer. Loads configuration, opens the job and blob stores,
// and owns the lifecycle of the dispatch workers.
//
// The job store is a single SQLite file, so a `printdesk submit` in one
// process and a `printdesk run` in another cooperate through the database
// alone.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use printdesk_core::AppConfig;
use printdesk_core::error::Result;
use printdesk_print::runner::StatsSnapshot;
use printdesk_print::{
    BlobStore, Executor, JobRunner, JobStore, PrintService, RunnerOptions, build_executor,
};

use super::data_dir;

const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "jobs.db";
const BLOB_SUBDIR: &str = "uploads";

/// Everything a command needs, built once at startup.
#[derive(Clone)]
pub struct AppServices {
    config: AppConfig,
    service: PrintService,
}

impl AppServices {
    /// Initialise from the data directory.
    ///
    /// The configuration comes from `config_path` (or `config.json` in the
    /// data directory), overlaid with environment variables and validated.
    pub fn init(config_path: Option<&Path>) -> Result<Self> {
        let dir = data_dir::data_dir()?;
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.join(CONFIG_FILE));

        let mut config = AppConfig::load(&path)?;
        config.apply_env()?;
        Self::from_config(config, dir)
    }

    /// Open stores for an already-loaded configuration.
    pub fn from_config(config: AppConfig, data_dir: PathBuf) -> Result<Self> {
        config.validate()?;
        info!(path = %data_dir.display(), backend = ?config.backend, "initialising app services");

        let db_path = config
            .database_path
            .clone()
            .unwrap_or_else(|| data_dir.join(DATABASE_FILE));
        let blob_dir = config
            .blob_dir
            .clone()
            .unwrap_or_else(|| data_dir.join(BLOB_SUBDIR));

        let store = JobStore::open(&db_path)?.with_max_attempts(config.max_attempts);
        let blobs = BlobStore::open(blob_dir)?;

        info!(database = %db_path.display(), "app services initialised");
        Ok(Self {
            config,
            service: PrintService::new(store, blobs),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> &PrintService {
        &self.service
    }

    /// Start `workers` dispatch loops sharing one executor.
    ///
    /// Each loop stops claiming when `shutdown` is cancelled and resolves to
    /// its final counters once its in-flight jobs are recorded.
    pub fn spawn_runners(
        &self,
        workers: usize,
        shutdown: &CancellationToken,
    ) -> Result<JoinSet<StatsSnapshot>> {
        let executor: Arc<dyn Executor> =
            build_executor(&self.config, self.service.blobs().clone())?;
        let options = RunnerOptions::from_config(&self.config);
        let pid = std::process::id();

        let mut runners = JoinSet::new();
        for n in 0..workers.max(1) {
            let runner = JobRunner::new(
                format!("worker-{pid}-{n}"),
                self.service.store().clone(),
                Arc::clone(&executor),
                options,
            )
            .with_wake(self.service.wake_handle());
            runners.spawn(runner.run(shutdown.clone()));
        }
        info!(workers = runners.len(), "dispatch workers started");
        Ok(runners)
    }

    /// Run the workers until Ctrl-C, then shut down gracefully.
    pub async fn run_until_interrupted(&self, workers: usize) -> Result<()> {
        self.run_until(workers, tokio::signal::ctrl_c()).await
    }

    /// Run the workers until `stop` resolves.
    ///
    /// The workers are stopped and drained whether `stop` succeeds or fails;
    /// a failure is returned once the in-flight jobs are recorded.
    pub async fn run_until<F>(&self, workers: usize, stop: F) -> Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let shutdown = CancellationToken::new();
        let runners = self.spawn_runners(workers, &shutdown)?;

        let stopped = stop.await;
        match &stopped {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => error!(error = %e, "cannot wait for interrupt, shutting down"),
        }
        shutdown.cancel();

        let total = drain(runners).await;
        info!(
            claimed = total.claimed,
            completed = total.completed,
            retried = total.retried,
            failed = total.failed,
            "printdesk stopped"
        );
        stopped?;
        Ok(())
    }
}

/// Wait for every runner and sum their counters.
pub async fn drain(mut runners: JoinSet<StatsSnapshot>) -> StatsSnapshot {
    let mut total = StatsSnapshot::default();
    while let Some(joined) = runners.join_next().await {
        match joined {
            Ok(stats) => {
                total.claimed += stats.claimed;
                total.completed += stats.completed;
                total.retried += stats.retried;
                total.failed += stats.failed;
                total.conflicts += stats.conflicts;
                total.store_errors += stats.store_errors;
            }
            Err(e) => error!(error = %e, "dispatch worker panicked"),
        }
    }
    total
}
