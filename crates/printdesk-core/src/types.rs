// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printdesk job manager.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identity of the user who submitted a job.
///
/// Authentication happens outside this crate; by the time a submission
/// reaches the job manager the owner is an already-verified opaque id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to an immutable payload blob: the SHA-256 hex digest of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadRef(pub String);

impl PayloadRef {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by a runner.
    Pending,
    /// Claimed by exactly one runner and being executed.
    InProgress,
    /// Printed. Terminal.
    Completed,
    /// Gave up, see `error_detail`. Terminal.
    Failed,
}

impl JobStatus {
    /// Keyword stored in the database and shown to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Edges of the job state machine.
    ///
    /// `InProgress -> Pending` is the retry edge; whether attempts remain is
    /// checked by the store, not here.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Supported input document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Pdf,
    Jpeg,
    Png,
    PlainText,
    PostScript,
    /// Unknown format; the printer gets `application/octet-stream` and may
    /// auto-sense it.
    Unknown,
}

impl DocumentType {
    /// MIME type string for the IPP `document-format` attribute.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::PlainText => "text/plain",
            Self::PostScript => "application/postscript",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Infer document type from file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "txt" => Self::PlainText,
            "ps" | "eps" => Self::PostScript,
            _ => Self::Unknown,
        }
    }

    /// Infer document type from a file name such as `report.PDF`.
    pub fn from_name(name: &str) -> Self {
        name.rsplit_once('.')
            .map(|(_, ext)| Self::from_extension(ext))
            .unwrap_or(Self::Unknown)
    }
}

/// A durable print job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner: OwnerId,
    pub payload_ref: PayloadRef,
    /// Sanitized original file name, used as the printer-side job title.
    pub document_name: String,
    pub status: JobStatus,
    /// Execution attempts so far (incremented on every claim).
    pub attempts: u32,
    /// Attempt ceiling captured from configuration when the job was created.
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set only once the job has `Failed`.
    pub error_detail: Option<String>,
    /// Reason recorded for every failed attempt, oldest first.
    pub error_history: Vec<String>,
    /// Job id assigned by the printer, when the backend reports one.
    pub printer_job_id: Option<String>,
    /// When the current `InProgress` claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Earliest time a `Pending` job may be claimed (retry backoff).
    pub available_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        owner: OwnerId,
        payload_ref: PayloadRef,
        document_name: String,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner,
            payload_ref,
            document_name,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            error_detail: None,
            error_history: Vec::new(),
            printer_job_id: None,
            claimed_at: None,
            available_at: now,
        }
    }

    /// Whether another attempt may be made after the current one fails.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn document_type(&self) -> DocumentType {
        DocumentType::from_name(&self.document_name)
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView::from(self)
    }
}

/// What a polling client sees about a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempts: u32,
    pub document_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printer_job_id: Option<String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            error_detail: if job.status == JobStatus::Failed {
                job.error_detail.clone()
            } else {
                None
            },
            created_at: job.created_at,
            updated_at: job.updated_at,
            attempts: job.attempts,
            document_name: job.document_name.clone(),
            printer_job_id: job.printer_job_id.clone(),
        }
    }
}
