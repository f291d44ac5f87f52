// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mock backend: "prints" every job after a fixed delay.  Used for demos and
// tests without hardware.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use printdesk_core::types::{Job, JobId};

use crate::executor::{Executor, Outcome};

/// Completes every job after `delay`.
///
/// A job that already completed here is not printed again: a repeated call
/// returns `Success` immediately.
pub struct MockExecutor {
    delay: Duration,
    completed: Mutex<HashSet<JobId>>,
    prints: AtomicU64,
}

impl MockExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: Mutex::new(HashSet::new()),
            prints: AtomicU64::new(0),
        }
    }

    /// Number of documents actually "printed" (repeats excluded).
    pub fn printed_count(&self) -> u64 {
        self.prints.load(Ordering::Relaxed)
    }

    fn already_printed(&self, job_id: &JobId) -> bool {
        self.completed
            .lock()
            .map(|done| done.contains(job_id))
            .unwrap_or(false)
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn execute(&self, job: &Job) -> Outcome {
        if self.already_printed(&job.id) {
            debug!(job_id = %job.id, "mock already printed this job");
            return Outcome::success();
        }

        tokio::time::sleep(self.delay).await;

        if let Ok(mut done) = self.completed.lock() {
            if done.insert(job.id) {
                self.prints.fetch_add(1, Ordering::Relaxed);
            }
        }
        info!(job_id = %job.id, delay_ms = self.delay.as_millis() as u64, "mock print completed");
        Outcome::success()
    }
}
