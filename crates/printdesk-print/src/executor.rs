// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Execution backend abstraction.
//
// The runner only ever sees `dyn Executor`; which backend sits behind it is
// decided once at startup from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use printdesk_core::error::{PrintdeskError, Result};
use printdesk_core::types::Job;
use printdesk_core::{AppConfig, BackendKind};

use crate::blob::BlobStore;
use crate::ipp_client::IppClient;
use crate::ipp_executor::IppExecutor;
use crate::mock::MockExecutor;

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The document was printed.  `printer_job_id` is the printer-side job
    /// id when the backend has one.
    Success { printer_job_id: Option<String> },
    /// The attempt failed; the reason keeps the underlying cause.
    Failure(String),
}

impl Outcome {
    pub fn success() -> Self {
        Self::Success {
            printer_job_id: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<PrintdeskError> for Outcome {
    fn from(err: PrintdeskError) -> Self {
        Self::Failure(err.to_string())
    }
}

/// A backend that can print a job.
///
/// Implementations must tolerate being called again for a job whose earlier
/// attempt timed out, and should avoid printing it twice when they can tell.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short backend name for logs (e.g. "mock", "ipp").
    fn name(&self) -> &'static str;

    /// Run one attempt.  Never fails by returning an error: every problem is
    /// reported as `Outcome::Failure`.
    async fn execute(&self, job: &Job) -> Outcome;
}

/// Build the executor selected by `config.backend`.
pub fn build_executor(config: &AppConfig, blobs: BlobStore) -> Result<Arc<dyn Executor>> {
    let executor: Arc<dyn Executor> = match config.backend {
        BackendKind::Mock => Arc::new(MockExecutor::new(config.mock_delay())),
        BackendKind::Ipp => {
            let uri = config.printer_uri.as_deref().ok_or_else(|| {
                PrintdeskError::Config("printer_uri is required when backend is \"ipp\"".into())
            })?;
            let client = IppClient::new(uri)?;
            Arc::new(
                IppExecutor::new(client, blobs)
                    .with_poll_interval(config.ipp_poll_interval())
                    .with_submission_timeout(config.ipp_submission_timeout()),
            )
        }
    };
    info!(backend = executor.name(), "execution backend selected");
    Ok(executor)
}
