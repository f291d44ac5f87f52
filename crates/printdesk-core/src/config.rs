// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.
//
// Settings come from a JSON file (every field optional) and are then
// overlaid with environment variables, so a container can be configured
// without a file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PrintdeskError, Result};

/// Which execution backend completes print jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Completes every job after a fixed delay. No hardware needed.
    Mock,
    /// Sends jobs to a network printer over IPP.
    Ipp,
}

impl std::str::FromStr for BackendKind {
    type Err = PrintdeskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "ipp" => Ok(Self::Ipp),
            other => Err(PrintdeskError::Config(format!(
                "unknown backend '{other}' (expected \"mock\" or \"ipp\")"
            ))),
        }
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Execution backend selected at startup.
    pub backend: BackendKind,
    /// Target printer (`ipp://` or `ipps://`). Required for the IPP backend.
    pub printer_uri: Option<String>,
    /// Attempt ceiling per job, including the first attempt.
    pub max_attempts: u32,
    /// Hard limit on a single execution attempt.
    pub attempt_timeout_seconds: u64,
    /// Base delay before a failed job becomes claimable again.
    pub retry_backoff_seconds: u64,
    /// Upper bound on the exponential backoff.
    pub max_backoff_seconds: u64,
    /// Simulated print time of the mock backend.
    pub mock_delay_ms: u64,
    /// How often the IPP backend asks the printer for the job state.
    pub ipp_poll_interval_ms: u64,
    /// How long the IPP backend waits for the printer to finish a job.
    pub ipp_submission_timeout_seconds: u64,
    /// Idle wait between dispatch scans when nothing wakes the runner.
    pub poll_interval_ms: u64,
    /// In-flight jobs per runner.
    pub max_concurrent_jobs: usize,
    /// Dispatch workers started by the daemon.
    pub workers: usize,
    /// An `in_progress` claim older than this is considered abandoned.
    pub stale_claim_seconds: u64,
    /// SQLite database file. Defaults to `<data dir>/jobs.db`.
    pub database_path: Option<PathBuf>,
    /// Payload blob directory. Defaults to `<data dir>/uploads`.
    pub blob_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mock,
            printer_uri: None,
            max_attempts: 3,
            attempt_timeout_seconds: 120,
            retry_backoff_seconds: 5,
            max_backoff_seconds: 300,
            mock_delay_ms: 2_000,
            ipp_poll_interval_ms: 1_000,
            ipp_submission_timeout_seconds: 90,
            poll_interval_ms: 500,
            max_concurrent_jobs: 4,
            workers: 1,
            stale_claim_seconds: 600,
            database_path: None,
            blob_dir: None,
        }
    }
}

impl AppConfig {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Legacy switch from the first deployment: ENABLE_IPP=true selects
        // the IPP backend. PRINTDESK_BACKEND wins when both are set.
        if let Some(flag) = lookup("ENABLE_IPP") {
            self.backend = if flag.eq_ignore_ascii_case("true") {
                BackendKind::Ipp
            } else {
                BackendKind::Mock
            };
        }
        if let Some(backend) = lookup("PRINTDESK_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(uri) = lookup("PRINTER_URI").filter(|u| !u.is_empty()) {
            self.printer_uri = Some(uri);
        }
        if let Some(v) = lookup("PRINTDESK_MAX_ATTEMPTS") {
            self.max_attempts = parse_number("PRINTDESK_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("PRINTDESK_ATTEMPT_TIMEOUT_SECONDS") {
            self.attempt_timeout_seconds = parse_number("PRINTDESK_ATTEMPT_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("PRINTDESK_RETRY_BACKOFF_SECONDS") {
            self.retry_backoff_seconds = parse_number("PRINTDESK_RETRY_BACKOFF_SECONDS", &v)?;
        }
        if let Some(v) = lookup("PRINTDESK_WORKERS") {
            self.workers = parse_number("PRINTDESK_WORKERS", &v)?;
        }
        if let Some(path) = lookup("PRINTDESK_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.blob_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Reject settings the runner cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Ipp
            && self.printer_uri.as_deref().is_none_or(str::is_empty)
        {
            return Err(PrintdeskError::Config(
                "printer_uri is required when backend is \"ipp\"".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(PrintdeskError::Config("max_attempts must be at least 1".into()));
        }
        if self.attempt_timeout_seconds == 0 {
            return Err(PrintdeskError::Config(
                "attempt_timeout_seconds must be positive".into(),
            ));
        }
        if self.max_concurrent_jobs == 0 || self.workers == 0 {
            return Err(PrintdeskError::Config(
                "workers and max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 || self.ipp_poll_interval_ms == 0 {
            return Err(PrintdeskError::Config("poll intervals must be positive".into()));
        }
        // A live attempt must never look abandoned.
        if self.stale_claim_seconds <= self.attempt_timeout_seconds {
            return Err(PrintdeskError::Config(format!(
                "stale_claim_seconds ({}) must exceed attempt_timeout_seconds ({})",
                self.stale_claim_seconds, self.attempt_timeout_seconds
            )));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }

    pub fn mock_delay(&self) -> Duration {
        Duration::from_millis(self.mock_delay_ms)
    }

    pub fn ipp_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ipp_poll_interval_ms)
    }

    pub fn ipp_submission_timeout(&self) -> Duration {
        Duration::from_secs(self.ipp_submission_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_claim(&self) -> Duration {
        Duration::from_secs(self.stale_claim_seconds)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PrintdeskError::Config(format!("{key}: '{value}' is not a valid number")))
}
