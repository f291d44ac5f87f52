// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job runner: the dispatch loop and per-job state machine.
//
//   pending ──claim──▶ in_progress ──success──▶ completed
//      ▲                    │
//      └──failure, retry────┤
//                           └──failure, exhausted──▶ failed
//
// Every edge is a compare-and-swap on the job store, so any number of runners
// (in this process or others sharing the database) can dispatch from the same
// store without further coordination.  Each claimed job runs in its own task;
// the dispatch loop only touches the store briefly and never waits on a
// printer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use printdesk_core::AppConfig;
use printdesk_core::error::{PrintdeskError, Result};
use printdesk_core::types::{Job, JobStatus};

use crate::executor::{Executor, Outcome};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{JobStore, Transition};

/// Upper bound on the backoff applied after consecutive store errors.
const MAX_STORE_ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Runner tuning.
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Jobs this runner executes at the same time.
    pub max_concurrent_jobs: usize,
    /// Idle wait between scans when nothing wakes the runner.
    pub poll_interval: Duration,
    /// Hard limit on one execution attempt.
    pub attempt_timeout: Duration,
    /// Age after which an `in_progress` claim is treated as abandoned.
    pub stale_claim: Duration,
    pub retry: RetryPolicy,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RunnerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            poll_interval: config.poll_interval(),
            attempt_timeout: config.attempt_timeout(),
            stale_claim: config.stale_claim(),
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Live counters for one runner.
#[derive(Debug, Default)]
pub struct RunnerStats {
    claimed: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    conflicts: AtomicU64,
    store_errors: AtomicU64,
}

/// Point-in-time copy of [`RunnerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub claimed: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub conflicts: u64,
    pub store_errors: u64,
}

impl RunnerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a per-job task needs, cloned into each task.
#[derive(Clone)]
struct AttemptContext {
    worker_id: Arc<str>,
    store: JobStore,
    executor: Arc<dyn Executor>,
    stats: Arc<RunnerStats>,
    attempt_timeout: Duration,
    retry: RetryPolicy,
}

/// Claims pending jobs and drives each one to its next state.
pub struct JobRunner {
    ctx: AttemptContext,
    options: RunnerOptions,
    wake: Arc<Notify>,
    slots: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(
        worker_id: impl Into<String>,
        store: JobStore,
        executor: Arc<dyn Executor>,
        options: RunnerOptions,
    ) -> Self {
        let worker_id: String = worker_id.into();
        Self {
            ctx: AttemptContext {
                worker_id: Arc::from(worker_id),
                store,
                executor,
                stats: Arc::new(RunnerStats::default()),
                attempt_timeout: options.attempt_timeout,
                retry: options.retry,
            },
            options,
            wake: Arc::new(Notify::new()),
            slots: Arc::new(Semaphore::new(options.max_concurrent_jobs.max(1))),
        }
    }

    /// Share a wake-up signal with the submission side so new jobs are
    /// picked up without waiting for the next poll.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.ctx.worker_id
    }

    pub fn stats(&self) -> Arc<RunnerStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Dispatch until `shutdown` is cancelled, then wait for in-flight jobs
    /// to record their outcome.
    ///
    /// Store failures are logged and retried with backoff; nothing escapes
    /// this loop.
    #[instrument(skip_all, fields(worker = %self.ctx.worker_id))]
    pub async fn run(self, shutdown: CancellationToken) -> StatsSnapshot {
        info!(
            backend = self.ctx.executor.name(),
            max_concurrent_jobs = self.options.max_concurrent_jobs,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "runner started"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut consecutive_errors: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }

            let idle = match self.dispatch(&mut in_flight).await {
                Ok(0) => {
                    consecutive_errors = 0;
                    self.options.poll_interval
                }
                Ok(_) => {
                    consecutive_errors = 0;
                    continue;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    RunnerStats::bump(&self.ctx.stats.store_errors);
                    let backoff =
                        store_error_backoff(self.options.poll_interval, consecutive_errors);
                    error!(
                        error = %e,
                        consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        "dispatch failed, backing off"
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(idle) => {}
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => log_join(joined),
            }
        }

        info!(in_flight = in_flight.len(), "runner stopping, waiting for in-flight jobs");
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        let stats = self.ctx.stats.snapshot();
        info!(?stats, "runner stopped");
        stats
    }

    /// One scan: reclaim abandoned claims, then claim as many eligible jobs
    /// as there are free slots.  Returns the number of jobs claimed.
    async fn dispatch(&self, in_flight: &mut JoinSet<()>) -> Result<usize> {
        let stale = self.options.stale_claim;
        let reclaimed = self
            .ctx
            .store
            .run_blocking(move |s| s.reclaim_stale(stale))
            .await?;
        if !reclaimed.is_empty() {
            warn!(count = reclaimed.len(), "re-released abandoned claims");
        }

        let free = self.slots.available_permits();
        if free == 0 {
            return Ok(0);
        }

        let candidates = self
            .ctx
            .store
            .run_blocking(move |s| s.list_pending(free))
            .await?;

        let mut claimed = 0;
        for candidate in candidates {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };

            // Fenced on the listed attempt count: if another worker ran and
            // re-queued the job since the listing, this claim loses.
            let job_id = candidate.id;
            let claim = Transition::claim().expecting_attempts(candidate.attempts);
            let result = self
                .ctx
                .store
                .run_blocking(move |s| s.transition(&job_id, claim))
                .await;

            match result {
                Ok(job) if job.status == JobStatus::InProgress => {
                    RunnerStats::bump(&self.ctx.stats.claimed);
                    claimed += 1;
                    info!(job_id = %job.id, attempt = job.attempts, "job claimed");
                    in_flight.spawn(run_attempt(self.ctx.clone(), job, permit));
                }
                Ok(job) => {
                    RunnerStats::bump(&self.ctx.stats.failed);
                    warn!(
                        job_id = %job.id,
                        status = %job.status,
                        "claim refused, attempt ceiling reached"
                    );
                }
                Err(e) if e.is_conflict() => {
                    RunnerStats::bump(&self.ctx.stats.conflicts);
                    debug!(job_id = %job_id, "job already claimed by another worker");
                }
                Err(e @ PrintdeskError::StoreUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "skipping job");
                }
            }
        }
        Ok(claimed)
    }
}

/// Execute one claimed attempt and record its outcome.
async fn run_attempt(ctx: AttemptContext, job: Job, _permit: OwnedSemaphorePermit) {
    let started = Instant::now();
    let outcome = match tokio::time::timeout(ctx.attempt_timeout, ctx.executor.execute(&job)).await
    {
        Ok(outcome) => outcome,
        Err(_) => Outcome::from(PrintdeskError::Timeout(ctx.attempt_timeout)),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let transition = match outcome {
        Outcome::Success { printer_job_id } => {
            Transition::complete().with_printer_job_id(printer_job_id)
        }
        Outcome::Failure(reason) => {
            warn!(job_id = %job.id, attempt = job.attempts, %reason, elapsed_ms, "attempt failed");
            match ctx.retry.decide(&job) {
                RetryDecision::RetryAfter(delay) => Transition::retry(reason, delay),
                RetryDecision::Exhausted => Transition::fail(reason),
            }
        }
    }
    .expecting_attempts(job.attempts);

    let job_id = job.id;
    let recorded = ctx
        .store
        .run_blocking(move |s| s.transition(&job_id, transition))
        .await;

    match recorded {
        Ok(updated) => match updated.status {
            JobStatus::Completed => {
                RunnerStats::bump(&ctx.stats.completed);
                info!(
                    worker = %ctx.worker_id,
                    job_id = %job_id,
                    attempt = updated.attempts,
                    elapsed_ms,
                    "job completed"
                );
            }
            JobStatus::Pending => {
                RunnerStats::bump(&ctx.stats.retried);
                info!(
                    worker = %ctx.worker_id,
                    job_id = %job_id,
                    attempt = updated.attempts,
                    available_at = %updated.available_at,
                    "job re-queued for retry"
                );
            }
            JobStatus::Failed => {
                RunnerStats::bump(&ctx.stats.failed);
                warn!(
                    worker = %ctx.worker_id,
                    job_id = %job_id,
                    attempts = updated.attempts,
                    error = updated.error_detail.as_deref().unwrap_or_default(),
                    "job failed"
                );
            }
            JobStatus::InProgress => {}
        },
        Err(e) if e.is_conflict() => {
            // Someone else (a stale-claim reclaim) moved the job first; their
            // write stands.
            RunnerStats::bump(&ctx.stats.conflicts);
            warn!(
                worker = %ctx.worker_id,
                job_id = %job_id,
                error = %e,
                "outcome not recorded, job abandoned"
            );
        }
        Err(e) => {
            RunnerStats::bump(&ctx.stats.store_errors);
            error!(
                worker = %ctx.worker_id,
                job_id = %job_id,
                error = %e,
                "could not record outcome; claim will be reclaimed once stale"
            );
        }
    }
}

fn store_error_backoff(poll_interval: Duration, consecutive_errors: u32) -> Duration {
    let factor = 1u32 << consecutive_errors.min(6);
    poll_interval
        .saturating_mul(factor)
        .min(MAX_STORE_ERROR_BACKOFF)
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "job task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use printdesk_core::types::{JobId, OwnerId, PayloadRef};

    use crate::blob::BlobStore;
    use crate::executor::build_executor;
    use crate::mock::MockExecutor;
    use crate::test_printer::{self, TestPrinter};
    use printdesk_core::BackendKind;

    fn options() -> RunnerOptions {
        RunnerOptions {
            max_concurrent_jobs: 4,
            poll_interval: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(5),
            stale_claim: Duration::from_secs(60),
            retry: RetryPolicy {
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
        }
    }

    fn submit(store: &JobStore, name: &str) -> Job {
        store
            .create(&OwnerId::new("alice"), &PayloadRef::new("abc"), name)
            .expect("create")
    }

    async fn wait_for(
        store: &JobStore,
        id: JobId,
        within: Duration,
        done: impl Fn(&Job) -> bool,
    ) -> Job {
        let deadline = Instant::now() + within;
        loop {
            let job = store.get(&id).expect("get");
            if done(&job) {
                return job;
            }
            assert!(Instant::now() < deadline, "timed out waiting on {job:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_terminal(store: &JobStore, id: JobId) -> Job {
        wait_for(store, id, Duration::from_secs(5), |j| j.status.is_terminal()).await
    }

    fn start(runner: JobRunner) -> (CancellationToken, tokio::task::JoinHandle<StatsSnapshot>) {
        let token = CancellationToken::new();
        let handle = tokio::spawn(runner.run(token.clone()));
        (token, handle)
    }

    /// Plays back scripted outcomes, then repeats `fallback`.
    struct ScriptedExecutor {
        script: Mutex<VecDeque<Outcome>>,
        fallback: Outcome,
        delay: Duration,
        calls: AtomicU32,
    }

    impl ScriptedExecutor {
        fn new(script: Vec<Outcome>, fallback: Outcome) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, job: &Job) -> Outcome {
            assert_eq!(job.status, JobStatus::InProgress);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    /// Counts executions per job; jobs named `slow*` take `slow` to finish.
    struct CountingExecutor {
        calls: Mutex<HashMap<JobId, u32>>,
        slow: Duration,
    }

    #[async_trait]
    impl Executor for CountingExecutor {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn execute(&self, job: &Job) -> Outcome {
            *self.calls.lock().unwrap().entry(job.id).or_insert(0) += 1;
            if job.document_name.starts_with("slow") {
                tokio::time::sleep(self.slow).await;
            }
            Outcome::success()
        }
    }

    #[tokio::test]
    async fn mock_job_completes_within_delay_window() {
        let store = JobStore::open_in_memory().unwrap();
        let delay = Duration::from_millis(100);
        let executor = Arc::new(MockExecutor::new(delay));
        let runner = JobRunner::new("w1", store.clone(), executor.clone(), options());
        let (token, handle) = start(runner);

        let started = Instant::now();
        let job = submit(&store, "a.pdf");
        let done = wait_terminal(&store, job.id).await;
        let elapsed = started.elapsed();

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 1);
        assert!(elapsed >= delay, "completed too early: {elapsed:?}");
        assert!(elapsed < delay + Duration::from_secs(1), "completed too late: {elapsed:?}");
        assert_eq!(executor.printed_count(), 1);

        token.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn ipp_backend_records_the_printer_job_id() {
        let printer =
            TestPrinter::start(vec![test_printer::PROCESSING, test_printer::COMPLETED]).await;
        let config = AppConfig {
            backend: BackendKind::Ipp,
            printer_uri: Some(printer.uri()),
            ipp_poll_interval_ms: 10,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::open(dir.path()).unwrap();
        let payload_ref = blobs.put(b"%PDF-1.7").unwrap();
        let executor = build_executor(&config, blobs).unwrap();

        let store = JobStore::open_in_memory().unwrap();
        let runner = JobRunner::new("w1", store.clone(), executor, options());
        let (token, handle) = start(runner);

        let job = store
            .create(&OwnerId::new("alice"), &payload_ref, "report.pdf")
            .unwrap();
        let done = wait_terminal(&store, job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.printer_job_id.as_deref(), Some("5"));
        assert_eq!(done.attempts, 1);
        assert_eq!(printer.prints(), 1);

        token.cancel();
        assert_eq!(handle.await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn always_failing_job_fails_after_max_attempts() {
        let store = JobStore::open_in_memory().unwrap().with_max_attempts(3);
        let executor = Arc::new(ScriptedExecutor::new(vec![], Outcome::failure("printer on fire")));
        let runner = JobRunner::new("w1", store.clone(), executor.clone(), options());
        let (token, handle) = start(runner);

        let job = submit(&store, "a.pdf");
        let done = wait_terminal(&store, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempts, 3);
        assert_eq!(done.error_detail.as_deref(), Some("printer on fire"));
        assert_eq!(done.error_history.len(), 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);

        token.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn job_failing_twice_then_succeeding_completes_on_third_attempt() {
        let store = JobStore::open_in_memory().unwrap().with_max_attempts(3);
        let executor = Arc::new(ScriptedExecutor::new(
            vec![Outcome::failure("offline"), Outcome::failure("offline")],
            Outcome::Success {
                printer_job_id: Some("7".into()),
            },
        ));
        let runner = JobRunner::new("w1", store.clone(), executor, options());
        let (token, handle) = start(runner);

        let job = submit(&store, "a.pdf");
        let done = wait_terminal(&store, job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 3);
        assert_eq!(done.printer_job_id.as_deref(), Some("7"));
        assert!(done.error_detail.is_none());
        assert_eq!(done.error_history, vec!["offline", "offline"]);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn attempt_timeout_is_treated_as_failure() {
        let store = JobStore::open_in_memory().unwrap().with_max_attempts(1);
        let executor = Arc::new(
            ScriptedExecutor::new(vec![], Outcome::success()).with_delay(Duration::from_secs(30)),
        );
        let runner = JobRunner::new(
            "w1",
            store.clone(),
            executor,
            RunnerOptions {
                attempt_timeout: Duration::from_millis(50),
                ..options()
            },
        );
        let (token, handle) = start(runner);

        let job = submit(&store, "a.pdf");
        let done = wait_terminal(&store, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempts, 1);
        assert!(done.error_detail.unwrap().contains("timed out"));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retry_backoff_delays_the_next_attempt() {
        let store = JobStore::open_in_memory().unwrap().with_max_attempts(2);
        let executor = Arc::new(ScriptedExecutor::new(
            vec![Outcome::failure("busy")],
            Outcome::success(),
        ));
        let backoff = Duration::from_millis(150);
        let runner = JobRunner::new(
            "w1",
            store.clone(),
            executor,
            RunnerOptions {
                retry: RetryPolicy {
                    base_delay: backoff,
                    max_delay: backoff,
                },
                ..options()
            },
        );
        let (token, handle) = start(runner);

        let started = Instant::now();
        let job = submit(&store, "a.pdf");
        let done = wait_terminal(&store, job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 2);
        assert!(started.elapsed() >= backoff);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn slow_job_does_not_block_dispatch_of_others() {
        let store = JobStore::open_in_memory().unwrap();
        let executor = Arc::new(CountingExecutor {
            calls: Mutex::new(HashMap::new()),
            slow: Duration::from_secs(30),
        });
        let runner = JobRunner::new(
            "w1",
            store.clone(),
            executor,
            RunnerOptions {
                attempt_timeout: Duration::from_millis(800),
                ..options()
            },
        );
        let (token, handle) = start(runner);

        let slow = submit(&store, "slow.pdf");
        wait_for(&store, slow.id, Duration::from_secs(2), |j| {
            j.status == JobStatus::InProgress
        })
        .await;

        let fast = submit(&store, "fast.pdf");
        let done = wait_terminal(&store, fast.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(store.get(&slow.id).unwrap().status, JobStatus::InProgress);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_jobs_finish() {
        let store = JobStore::open_in_memory().unwrap();
        let executor = Arc::new(MockExecutor::new(Duration::from_millis(200)));
        let runner = JobRunner::new("w1", store.clone(), executor, options());
        let (token, handle) = start(runner);

        let job = submit(&store, "a.pdf");
        wait_for(&store, job.id, Duration::from_secs(2), |j| {
            j.status == JobStatus::InProgress
        })
        .await;

        token.cancel();
        handle.await.unwrap();
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn stopped_runner_claims_nothing_new() {
        let store = JobStore::open_in_memory().unwrap();
        let executor = Arc::new(MockExecutor::new(Duration::ZERO));
        let runner = JobRunner::new("w1", store.clone(), executor, options());
        let (token, handle) = start(runner);
        token.cancel();
        handle.await.unwrap();

        let job = submit(&store, "late.pdf");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn abandoned_claim_is_reclaimed_and_finished() {
        let store = JobStore::open_in_memory().unwrap();
        let job = submit(&store, "a.pdf");
        // A worker that claimed the job and then died.
        store.transition(&job.id, Transition::claim()).unwrap();

        let executor = Arc::new(MockExecutor::new(Duration::ZERO));
        let runner = JobRunner::new(
            "w2",
            store.clone(),
            executor,
            RunnerOptions {
                stale_claim: Duration::from_millis(50),
                ..options()
            },
        );
        let (token, handle) = start(runner);

        let done = wait_terminal(&store, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 2);
        assert_eq!(done.error_history.len(), 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wake_signal_skips_the_idle_wait() {
        let store = JobStore::open_in_memory().unwrap();
        let wake = Arc::new(Notify::new());
        let executor = Arc::new(MockExecutor::new(Duration::ZERO));
        let runner = JobRunner::new(
            "w1",
            store.clone(),
            executor,
            RunnerOptions {
                poll_interval: Duration::from_secs(30),
                ..options()
            },
        )
        .with_wake(Arc::clone(&wake));
        let (token, handle) = start(runner);
        // Let the first (empty) scan finish.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let job = submit(&store, "a.pdf");
        wake.notify_one();
        let done = wait_terminal(&store, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn several_runners_execute_each_job_exactly_once() {
        let store = JobStore::open_in_memory().unwrap();
        let executor = Arc::new(CountingExecutor {
            calls: Mutex::new(HashMap::new()),
            slow: Duration::ZERO,
        });

        let jobs: Vec<Job> = (0..25).map(|i| submit(&store, &format!("{i}.pdf"))).collect();

        let mut running = Vec::new();
        for w in 0..3 {
            let runner = JobRunner::new(
                format!("w{w}"),
                store.clone(),
                executor.clone(),
                RunnerOptions {
                    max_concurrent_jobs: 2,
                    ..options()
                },
            );
            running.push(start(runner));
        }

        for job in &jobs {
            let done = wait_terminal(&store, job.id).await;
            assert_eq!(done.status, JobStatus::Completed);
            assert_eq!(done.attempts, 1);
        }

        let mut claimed = 0;
        for (token, handle) in running {
            token.cancel();
            claimed += handle.await.unwrap().claimed;
        }
        assert_eq!(claimed, 25);

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 25);
        assert!(calls.values().all(|&n| n == 1));
    }

    #[test]
    fn store_error_backoff_grows_and_caps() {
        let poll = Duration::from_millis(100);
        assert_eq!(store_error_backoff(poll, 1), Duration::from_millis(200));
        assert_eq!(store_error_backoff(poll, 2), Duration::from_millis(400));
        assert_eq!(store_error_backoff(poll, 50), Duration::from_millis(6400));
        assert_eq!(
            store_error_backoff(Duration::from_secs(5), 10),
            MAX_STORE_ERROR_BACKOFF
        );
    }
}
