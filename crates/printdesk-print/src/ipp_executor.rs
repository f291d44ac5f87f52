// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP backend: submits the job's payload to a network printer and follows the
// printer-side job until it finishes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use printdesk_core::error::{PrintdeskError, Result};
use printdesk_core::types::{Job, JobId};

use crate::blob::BlobStore;
use crate::executor::{Executor, Outcome};
use crate::ipp_client::{IppClient, PrinterJobHandle, PrinterJobState};

/// Executes jobs on the printer behind an [`IppClient`].
///
/// Duplicate detection is best-effort: the handle of every submission is
/// remembered until the printer reports a terminal state, and a later attempt
/// of the same job follows that handle instead of submitting again.  Handles
/// do not survive a restart.
pub struct IppExecutor {
    client: IppClient,
    blobs: BlobStore,
    poll_interval: Duration,
    submission_timeout: Duration,
    submitted: Mutex<HashMap<JobId, PrinterJobHandle>>,
}

impl IppExecutor {
    pub fn new(client: IppClient, blobs: BlobStore) -> Self {
        Self {
            client,
            blobs,
            poll_interval: Duration::from_secs(1),
            submission_timeout: Duration::from_secs(90),
            submitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    fn remembered(&self, job_id: &JobId) -> Option<PrinterJobHandle> {
        self.submitted
            .lock()
            .ok()
            .and_then(|handles| handles.get(job_id).copied())
    }

    fn remember(&self, job_id: JobId, handle: PrinterJobHandle) {
        if let Ok(mut handles) = self.submitted.lock() {
            handles.insert(job_id, handle);
        }
    }

    fn forget(&self, job_id: &JobId) {
        if let Ok(mut handles) = self.submitted.lock() {
            handles.remove(job_id);
        }
    }

    /// Handle of an earlier submission that is still worth following.
    ///
    /// A remembered job the printer canceled or aborted is dropped so the
    /// document is sent again.
    async fn reusable_handle(&self, job: &Job) -> Result<Option<PrinterJobHandle>> {
        let Some(handle) = self.remembered(&job.id) else {
            return Ok(None);
        };
        let status = self.client.poll(handle).await?;
        match status.state {
            PrinterJobState::Canceled | PrinterJobState::Aborted => {
                info!(
                    job_id = %job.id,
                    printer_job_id = %handle,
                    state = %status.state,
                    "earlier submission did not print, resubmitting"
                );
                self.forget(&job.id);
                Ok(None)
            }
            _ => {
                info!(
                    job_id = %job.id,
                    printer_job_id = %handle,
                    "following earlier submission instead of resubmitting"
                );
                Ok(Some(handle))
            }
        }
    }

    async fn submit(&self, job: &Job) -> Result<PrinterJobHandle> {
        let document = self.blobs.read(&job.payload_ref).await?;
        let handle = self
            .client
            .submit(
                document,
                job.document_type(),
                &job.document_name,
                job.owner.as_str(),
            )
            .await?;
        self.remember(job.id, handle);
        Ok(handle)
    }

    async fn print(&self, job: &Job) -> Result<Outcome> {
        let handle = match self.reusable_handle(job).await? {
            Some(handle) => handle,
            None => self.submit(job).await?,
        };

        let deadline = Instant::now() + self.submission_timeout;
        loop {
            let status = self.client.poll(handle).await?;
            debug!(
                job_id = %job.id,
                printer_job_id = %handle,
                state = %status.state,
                "polled printer"
            );

            match status.state {
                PrinterJobState::Completed => {
                    self.forget(&job.id);
                    return Ok(Outcome::Success {
                        printer_job_id: Some(handle.to_string()),
                    });
                }
                PrinterJobState::Canceled | PrinterJobState::Aborted => {
                    self.forget(&job.id);
                    return Err(PrintdeskError::Execution(format!(
                        "printer job {handle} {}",
                        status.describe()
                    )));
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                // The handle is kept: the next attempt follows this
                // submission rather than printing the document twice.
                warn!(job_id = %job.id, printer_job_id = %handle, "printer did not finish in time");
                return Err(PrintdeskError::Execution(format!(
                    "printer job {handle} still {} after {:?}",
                    status.describe(),
                    self.submission_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Executor for IppExecutor {
    fn name(&self) -> &'static str {
        "ipp"
    }

    async fn execute(&self, job: &Job) -> Outcome {
        match self.print(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_execution_failure() {
                    warn!(job_id = %job.id, error = %e, "IPP execution failed");
                } else {
                    error!(job_id = %job.id, error = %e, "IPP execution hit an unexpected error");
                }
                Outcome::from(e)
            }
        }
    }
}
