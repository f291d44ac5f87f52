// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy with exponential backoff + jitter for failed print attempts.
//
// A failed job goes back to `pending` only while it has attempts left; the
// delay before it becomes claimable again doubles with every attempt.

use std::time::Duration;

use printdesk_core::AppConfig;
use printdesk_core::types::{Job, JobId};
use tracing::{debug, warn};

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Result of evaluating a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-release the job, claimable after this delay.
    RetryAfter(Duration),
    /// No attempts left, the job fails.
    Exhausted,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_delay: config.retry_backoff(),
            max_delay: config.max_backoff(),
        }
    }

    /// Decide what happens to a job whose current attempt just failed.
    pub fn decide(&self, job: &Job) -> RetryDecision {
        if job.has_attempts_left() {
            let delay = self.delay_for(job.id, job.attempts);
            debug!(
                job_id = %job.id,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling retry"
            );
            RetryDecision::RetryAfter(delay)
        } else {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max = job.max_attempts,
                "retry limit exhausted"
            );
            RetryDecision::Exhausted
        }
    }

    /// Delay after attempt number `attempt` (1-based) failed.
    ///
    /// delay = min(base * 2^(attempt-1) + jitter, max_delay)
    /// jitter lies in [0, base/2) and is derived from the job id, so jobs that
    /// failed together do not all come back at the same instant.
    pub fn delay_for(&self, job_id: JobId, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponent = attempt.saturating_sub(1).min(16);
        let exp_ms = base_ms.saturating_mul(1u64 << exponent);
        let total_ms = exp_ms.saturating_add(jitter(base_ms / 2, job_id));
        let capped_ms = total_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped_ms)
    }
}

fn jitter(span_ms: u64, job_id: JobId) -> u64 {
    if span_ms == 0 {
        return 0;
    }
    let seed = job_id.0.as_u64_pair().0;
    seed.wrapping_mul(6364136223846793005) % span_ms
}
