// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printdesk.

use std::time::Duration;

use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Top-level error type for all Printdesk operations.
#[derive(Debug, Error)]
pub enum PrintdeskError {
    // -- Job store --
    /// The storage layer could not be reached or refused the operation.
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    /// Another actor moved the job first. Benign; the caller re-reads and
    /// decides what to do.
    #[error("job {job_id} is no longer {expected:?} (now {actual:?})")]
    Conflict {
        job_id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("illegal job transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    // -- Execution --
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("IPP request failed: {0}")]
    IppRequest(String),

    // -- Submission / payloads --
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("payload blob error: {0}")]
    Blob(String),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintdeskError {
    /// Whether this is a lost compare-and-swap race rather than a real fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the failure belongs to the execution family (retried by the
    /// runner up to the attempt ceiling).
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::Execution(_) | Self::Timeout(_) | Self::IppRequest(_) | Self::Blob(_)
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintdeskError>;
