// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal async IPP client for communicating with a network printer.
//
// Uses the `ipp` crate's async API for the two operations the job manager
// needs:
//   - Print-Job               (RFC 8011 §4.2.1)  submit a document
//   - Get-Job-Attributes      (RFC 8011 §4.3.4)  poll its printer-side state

use std::fmt;
use std::io::Cursor;
use std::time::Duration;

use ipp::prelude::*;
use tracing::{debug, error, info, instrument};

use printdesk_core::error::{PrintdeskError, Result};
use printdesk_core::types::DocumentType;

/// Default limit on a single IPP request/response exchange.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Printer-assigned job id returned by Print-Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrinterJobHandle(pub i32);

impl fmt::Display for PrinterJobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IPP `job-state` values (RFC 8011 §5.3.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterJobState {
    Pending,
    PendingHeld,
    Processing,
    ProcessingStopped,
    Canceled,
    Aborted,
    Completed,
    /// A value outside the RFC range.
    Unknown(i32),
}

impl PrinterJobState {
    pub fn from_ipp_enum(value: i32) -> Self {
        match value {
            3 => Self::Pending,
            4 => Self::PendingHeld,
            5 => Self::Processing,
            6 => Self::ProcessingStopped,
            7 => Self::Canceled,
            8 => Self::Aborted,
            9 => Self::Completed,
            other => Self::Unknown(other),
        }
    }

    /// The printer will not change this job's state any more.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted | Self::Completed)
    }

    pub fn keyword(&self) -> String {
        match self {
            Self::Pending => "pending".into(),
            Self::PendingHeld => "pending-held".into(),
            Self::Processing => "processing".into(),
            Self::ProcessingStopped => "processing-stopped".into(),
            Self::Canceled => "canceled".into(),
            Self::Aborted => "aborted".into(),
            Self::Completed => "completed".into(),
            Self::Unknown(v) => format!("unknown({v})"),
        }
    }
}

impl fmt::Display for PrinterJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keyword())
    }
}

/// Printer-side view of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterJobStatus {
    pub state: PrinterJobState,
    /// `job-state-reasons` keywords, e.g. "media-empty".
    pub reasons: Vec<String>,
    /// `job-state-message`, when the printer sends one.
    pub message: Option<String>,
}

impl PrinterJobStatus {
    /// One-line description used in failure reasons.
    pub fn describe(&self) -> String {
        let mut text = self.state.keyword();
        if !self.reasons.is_empty() {
            text.push_str(&format!(" ({})", self.reasons.join(", ")));
        }
        if let Some(message) = &self.message {
            text.push_str(&format!(": {message}"));
        }
        text
    }
}

/// Async IPP client wrapping the `ipp` crate.
///
/// Each instance is bound to a single printer URI.  All methods are async and
/// require a Tokio runtime.
#[derive(Debug, Clone)]
pub struct IppClient {
    /// The target printer URI (ipp:// or ipps://).
    uri: Uri,
    request_timeout: Duration,
}

impl IppClient {
    /// Create a new client targeting the given printer URI.
    pub fn new(uri: &str) -> Result<Self> {
        let parsed: Uri = uri
            .parse()
            .map_err(|e| PrintdeskError::IppRequest(format!("invalid URI '{uri}': {e}")))?;
        match parsed.scheme_str() {
            Some("ipp") | Some("ipps") | Some("http") | Some("https") => {}
            _ => {
                return Err(PrintdeskError::IppRequest(format!(
                    "invalid URI '{uri}': expected an ipp:// or ipps:// printer address"
                )));
            }
        }
        Ok(Self {
            uri: parsed,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Submit a document to the printer as a Print-Job.
    ///
    /// Returns the job handle assigned by the printer on success.
    ///
    /// # Arguments
    ///
    /// * `document_bytes`: raw bytes of the document to print.
    /// * `document_type`: the document MIME type (used for `document-format`).
    /// * `job_name`: human-readable name shown in the printer queue.
    /// * `user_name`: `requesting-user-name` reported to the printer.
    #[instrument(skip(self, document_bytes), fields(uri = %self.uri, job_name = %job_name))]
    pub async fn submit(
        &self,
        document_bytes: Vec<u8>,
        document_type: DocumentType,
        job_name: &str,
        user_name: &str,
    ) -> Result<PrinterJobHandle> {
        let payload = IppPayload::new(Cursor::new(document_bytes));

        let operation = IppOperationBuilder::print_job(self.uri.clone(), payload)
            .job_title(job_name)
            .user_name(user_name)
            .document_format(document_type.mime_type())
            .build();

        let client = AsyncIppClient::new(self.uri.clone());

        info!(mime = document_type.mime_type(), "sending Print-Job");
        let response = tokio::time::timeout(self.request_timeout, client.send(operation))
            .await
            .map_err(|_| timed_out("Print-Job", self.request_timeout))?
            .map_err(|e| PrintdeskError::IppRequest(format!("Print-Job: {e}")))?;

        let code = response.header().status_code();
        if !code.is_success() {
            error!(status = ?code, "Print-Job rejected");
            return Err(PrintdeskError::IppRequest(format!(
                "Print-Job rejected by printer with status {code:?}"
            )));
        }

        // The job-id is in the Job Attributes group.
        let job_id = extract_job_id(response.attributes()).ok_or_else(|| {
            PrintdeskError::IppRequest("Print-Job response missing job-id attribute".into())
        })?;

        info!(printer_job_id = job_id, "print job accepted by printer");
        Ok(PrinterJobHandle(job_id))
    }

    /// Ask the printer for the current state of a submitted job.
    #[instrument(skip(self), fields(uri = %self.uri, printer_job_id = handle.0))]
    pub async fn poll(&self, handle: PrinterJobHandle) -> Result<PrinterJobStatus> {
        let operation = IppOperationBuilder::get_job_attributes(self.uri.clone(), handle.0).build();
        let client = AsyncIppClient::new(self.uri.clone());

        debug!("sending Get-Job-Attributes");
        let response = tokio::time::timeout(self.request_timeout, client.send(operation))
            .await
            .map_err(|_| timed_out("Get-Job-Attributes", self.request_timeout))?
            .map_err(|e| {
                PrintdeskError::IppRequest(format!("Get-Job-Attributes({handle}): {e}"))
            })?;

        let code = response.header().status_code();
        if !code.is_success() {
            error!(status = ?code, "Get-Job-Attributes failed");
            return Err(PrintdeskError::IppRequest(format!(
                "Get-Job-Attributes({handle}) returned status {code:?}"
            )));
        }

        let status = parse_job_status(response.attributes())?;
        debug!(state = %status.state, "printer job state");
        Ok(status)
    }
}

fn timed_out(operation: &str, after: Duration) -> PrintdeskError {
    PrintdeskError::IppRequest(format!("{operation} timed out after {after:?}"))
}

// ---------------------------------------------------------------------------
// Helper functions for parsing IPP responses
// ---------------------------------------------------------------------------

/// Extract the `job-id` integer from a response's Job Attributes group.
fn extract_job_id(attrs: &IppAttributes) -> Option<i32> {
    attrs
        .groups_of(DelimiterTag::JobAttributes)
        .find_map(|group| match group.attributes().get("job-id")?.value() {
            IppValue::Integer(id) => Some(*id),
            _ => None,
        })
}

/// Parse `job-state`, `job-state-reasons` and `job-state-message` from a
/// Get-Job-Attributes response.
fn parse_job_status(attrs: &IppAttributes) -> Result<PrinterJobStatus> {
    for group in attrs.groups_of(DelimiterTag::JobAttributes) {
        let attributes = group.attributes();

        let Some(state_attr) = attributes.get("job-state") else {
            continue;
        };
        let state = match state_attr.value() {
            IppValue::Enum(v) | IppValue::Integer(v) => PrinterJobState::from_ipp_enum(*v),
            other => {
                return Err(PrintdeskError::IppRequest(format!(
                    "malformed job-state value: {other}"
                )));
            }
        };

        let reasons = attributes
            .get("job-state-reasons")
            .map(|a| keywords(a.value()))
            .unwrap_or_default();

        let message = attributes
            .get("job-state-message")
            .map(|a| a.value().to_string())
            .filter(|m| !m.is_empty());

        return Ok(PrinterJobStatus {
            state,
            reasons,
            message,
        });
    }

    Err(PrintdeskError::IppRequest(
        "Get-Job-Attributes response missing job-state attribute".into(),
    ))
}

/// Flatten a keyword or array-of-keywords attribute value, dropping "none".
fn keywords(value: &IppValue) -> Vec<String> {
    let values: Vec<String> = match value {
        IppValue::Array(items) => items.iter().map(|v| v.to_string()).collect(),
        single => vec![single.to_string()],
    };
    values.into_iter().filter(|k| k != "none").collect()
}
