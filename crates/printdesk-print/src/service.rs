// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Submission and status queries for clients.
//
// Submitting only records a `pending` job and nudges the runners; printing
// always happens asynchronously.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, instrument};

use printdesk_core::error::{PrintdeskError, Result};
use printdesk_core::types::{Job, JobId, JobStatusView, OwnerId, PayloadRef};

use crate::blob::BlobStore;
use crate::store::JobStore;

/// Longest document name kept after sanitizing.
const MAX_DOCUMENT_NAME_LEN: usize = 255;

/// Client-facing front end over the job and blob stores.
#[derive(Clone)]
pub struct PrintService {
    store: JobStore,
    blobs: BlobStore,
    wake: Arc<Notify>,
}

impl PrintService {
    pub fn new(store: JobStore, blobs: BlobStore) -> Self {
        Self {
            store,
            blobs,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Signal fired on every submission.  Hand it to each
    /// [`JobRunner`](crate::runner::JobRunner) via `with_wake`.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Enqueue a job for a payload already in the blob store.
    #[instrument(skip(self, payload_ref), fields(owner = %owner))]
    pub async fn submit_job(
        &self,
        owner: &OwnerId,
        payload_ref: &PayloadRef,
        document_name: &str,
    ) -> Result<JobId> {
        if owner.as_str().trim().is_empty() {
            return Err(PrintdeskError::InvalidSubmission("owner is empty".into()));
        }
        if !self.blobs.contains(payload_ref) {
            return Err(PrintdeskError::InvalidSubmission(format!(
                "unknown payload {payload_ref}"
            )));
        }
        let document_name = sanitize_document_name(document_name)?;

        let owner = owner.clone();
        let payload_ref = payload_ref.clone();
        let job = self
            .store
            .run_blocking(move |s| s.create(&owner, &payload_ref, &document_name))
            .await?;

        self.wake.notify_one();
        info!(job_id = %job.id, document = %job.document_name, "job submitted");
        Ok(job.id)
    }

    /// Store `bytes` and enqueue them in one step.
    pub async fn submit_document(
        &self,
        owner: &OwnerId,
        document_name: &str,
        bytes: &[u8],
    ) -> Result<JobId> {
        if bytes.is_empty() {
            return Err(PrintdeskError::InvalidSubmission("document is empty".into()));
        }
        // Reject a bad name before writing anything.
        sanitize_document_name(document_name)?;

        let payload_ref = self.blobs.write(bytes.to_vec()).await?;
        self.submit_job(owner, &payload_ref, document_name).await
    }

    /// Current status of a job.  Has no side effects.
    pub async fn get_job_status(&self, job_id: &JobId) -> Result<JobStatusView> {
        Ok(self.fetch(job_id).await?.status_view())
    }

    /// Like [`get_job_status`](Self::get_job_status), but a job owned by
    /// someone else is reported as not found.
    pub async fn get_job_status_for(
        &self,
        owner: &OwnerId,
        job_id: &JobId,
    ) -> Result<JobStatusView> {
        let job = self.fetch(job_id).await?;
        if &job.owner != owner {
            return Err(PrintdeskError::NotFound(*job_id));
        }
        Ok(job.status_view())
    }

    /// Every job of `owner`, newest first.
    pub async fn jobs_for_owner(&self, owner: &OwnerId) -> Result<Vec<JobStatusView>> {
        let owner = owner.clone();
        let jobs = self
            .store
            .run_blocking(move |s| s.list_for_owner(&owner))
            .await?;
        Ok(jobs.iter().map(JobStatusView::from).collect())
    }

    async fn fetch(&self, job_id: &JobId) -> Result<Job> {
        let job_id = *job_id;
        self.store.run_blocking(move |s| s.get(&job_id)).await
    }
}

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped, anything outside `[A-Za-z0-9._-]` becomes
/// `_`, and leading dots are stripped so the result is never hidden or a
/// traversal.
pub fn sanitize_document_name(name: &str) -> Result<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let mut cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string();

    cleaned.truncate(MAX_DOCUMENT_NAME_LEN);

    if cleaned.trim_matches('_').is_empty() {
        return Err(PrintdeskError::InvalidSubmission(format!(
            "unusable document name {name:?}"
        )));
    }
    Ok(cleaned)
}
