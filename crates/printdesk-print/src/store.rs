// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable print job store backed by SQLite.
//
// The store holds job metadata (but NOT the document bytes, which live in the
// blob store and are referenced by their SHA-256 hash).  Status only changes
// through `transition`, a compare-and-swap: the write succeeds only if the
// job is still in the status the caller expects.  That check is the sole
// synchronization point between runners, whether they share one `JobStore`
// or open the same database file from different processes.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info, instrument, warn};

use printdesk_core::error::{PrintdeskError, Result};
use printdesk_core::types::{Job, JobId, JobStatus, OwnerId, PayloadRef};

/// SQLite schema for the jobs table and its lookup indexes.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        payload_ref TEXT NOT NULL,
        document_name TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        error_detail TEXT,
        error_history TEXT NOT NULL DEFAULT '[]',
        printer_job_id TEXT,
        claimed_at TEXT,
        available_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS jobs_dispatch_idx ON jobs (status, available_at, created_at);
    CREATE INDEX IF NOT EXISTS jobs_owner_idx ON jobs (owner, created_at);
"#;

/// Column list shared by every SELECT; order must match `row_to_job`.
const JOB_COLUMNS: &str = "id, owner, payload_ref, document_name, status, attempts, \
     max_attempts, created_at, updated_at, error_detail, error_history, printer_job_id, \
     claimed_at, available_at";

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempt ceiling used when the caller does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A requested status change, applied atomically by [`JobStore::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: JobStatus,
    pub to: JobStatus,
    /// Added to `attempts` by the same write.
    pub attempt_increment: u32,
    /// Failure reason for retry and failure transitions.
    pub error: Option<String>,
    /// Delay before a job re-released to `pending` becomes claimable.
    pub backoff: Duration,
    pub printer_job_id: Option<String>,
    /// Fencing: when set, the write also requires `attempts` to equal this
    /// value, so a runner whose claim was reclaimed cannot overwrite the
    /// attempt that replaced it.
    pub expected_attempts: Option<u32>,
}

impl Transition {
    pub fn new(from: JobStatus, to: JobStatus) -> Self {
        Self {
            from,
            to,
            attempt_increment: 0,
            error: None,
            backoff: Duration::ZERO,
            printer_job_id: None,
            expected_attempts: None,
        }
    }

    /// `pending -> in_progress`, counting one attempt.
    pub fn claim() -> Self {
        Self::new(JobStatus::Pending, JobStatus::InProgress).increment_attempts()
    }

    /// `in_progress -> completed`.
    pub fn complete() -> Self {
        Self::new(JobStatus::InProgress, JobStatus::Completed)
    }

    /// `in_progress -> pending`, eligible again after `backoff`.
    pub fn retry(reason: impl Into<String>, backoff: Duration) -> Self {
        Self::new(JobStatus::InProgress, JobStatus::Pending)
            .with_error(reason)
            .with_backoff(backoff)
    }

    /// `in_progress -> failed`.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(JobStatus::InProgress, JobStatus::Failed).with_error(reason)
    }

    pub fn increment_attempts(mut self) -> Self {
        self.attempt_increment += 1;
        self
    }

    pub fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.error = Some(reason.into());
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_printer_job_id(mut self, printer_job_id: Option<String>) -> Self {
        self.printer_job_id = printer_job_id;
        self
    }

    pub fn expecting_attempts(mut self, attempts: u32) -> Self {
        self.expected_attempts = Some(attempts);
        self
    }
}

/// Durable job store backed by a SQLite database.
///
/// Cloning is cheap and clones share one connection.  All methods are
/// synchronous because `rusqlite` does not support async natively; async
/// callers go through [`JobStore::run_blocking`].
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
    max_attempts: u32,
}

impl JobStore {
    /// Open (or create) the job database at the given path.
    ///
    /// Applies WAL journal mode so pollers can read while a runner writes,
    /// and a busy timeout so concurrent writers queue instead of failing.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| db_err("open", e))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| db_err("WAL pragma", e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| db_err("busy timeout", e))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| db_err("create table", e))?;

        info!("job store opened");
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open in-memory", e))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| db_err("create table", e))?;

        debug!("in-memory job store opened");
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Attempt ceiling recorded on jobs created from now on.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Run a store operation on Tokio's blocking pool.
    pub async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&JobStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| PrintdeskError::StoreUnavailable(format!("store task failed: {e}")))?
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PrintdeskError::StoreUnavailable("connection lock poisoned".into()))
    }

    /// Insert a new `pending` job with zero attempts.
    #[instrument(skip(self, payload_ref), fields(owner = %owner))]
    pub fn create(
        &self,
        owner: &OwnerId,
        payload_ref: &PayloadRef,
        document_name: &str,
    ) -> Result<Job> {
        let mut job = Job::new(
            owner.clone(),
            payload_ref.clone(),
            document_name.to_string(),
            self.max_attempts,
        );
        let now = now();
        job.created_at = now;
        job.updated_at = now;
        job.available_at = now;

        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                job.id.to_string(),
                job.owner.as_str(),
                job.payload_ref.as_str(),
                job.document_name,
                job.status.as_str(),
                job.attempts,
                job.max_attempts,
                ts(&job.created_at),
                ts(&job.updated_at),
                job.error_detail,
                "[]",
                job.printer_job_id,
                Option::<String>::None,
                ts(&job.available_at),
            ],
        )
        .map_err(|e| db_err("insert job", e))?;

        info!(job_id = %job.id, "job created");
        Ok(job)
    }

    /// Retrieve a single job by its ID.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn get(&self, job_id: &JobId) -> Result<Job> {
        let conn = self.lock()?;
        select_job(&conn, job_id)?.ok_or(PrintdeskError::NotFound(*job_id))
    }

    /// Claimable jobs: `pending` and past their backoff, oldest first.
    ///
    /// Re-querying returns the current frontier, so callers may stop early
    /// and ask again.
    #[instrument(skip(self))]
    pub fn list_pending(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE status = ?1 AND available_at <= ?2
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT ?3"
            ))
            .map_err(|e| db_err("prepare list_pending", e))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let jobs = stmt
            .query_map(
                params![JobStatus::Pending.as_str(), ts(&now()), limit],
                row_to_job,
            )
            .map_err(|e| db_err("query list_pending", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("collect rows", e))?;

        debug!(count = jobs.len(), "retrieved pending jobs");
        Ok(jobs)
    }

    /// All jobs belonging to `owner`, newest first.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE owner = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ))
            .map_err(|e| db_err("prepare list_for_owner", e))?;

        let jobs = stmt
            .query_map(params![owner.as_str()], row_to_job)
            .map_err(|e| db_err("query list_for_owner", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("collect rows", e))?;
        Ok(jobs)
    }

    /// Compare-and-swap status change.
    ///
    /// Succeeds only if the job is currently `transition.from` (and, when
    /// fenced, still on the expected attempt).  On success the new status,
    /// `updated_at`, and attempt count are written in one transaction and the
    /// updated job is returned.  A retry requested with no attempts left is
    /// written as `failed` instead.
    #[instrument(
        skip(self, transition),
        fields(job_id = %job_id, from = %transition.from, to = %transition.to)
    )]
    pub fn transition(&self, job_id: &JobId, transition: Transition) -> Result<Job> {
        if !transition.from.can_transition_to(transition.to) {
            return Err(PrintdeskError::InvalidTransition {
                from: transition.from,
                to: transition.to,
            });
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| db_err("begin transition", e))?;

        let current = select_job(&tx, job_id)?.ok_or(PrintdeskError::NotFound(*job_id))?;
        let fenced_out = transition
            .expected_attempts
            .is_some_and(|expected| expected != current.attempts);
        let now = now();
        // A pending job is not claimable before its backoff expires, even by a
        // caller that listed it earlier.
        let backing_off = transition.from == JobStatus::Pending && current.available_at > now;
        if current.status != transition.from || fenced_out || backing_off {
            debug!(
                actual = %current.status,
                attempts = current.attempts,
                backing_off,
                "transition lost the race"
            );
            return Err(PrintdeskError::Conflict {
                job_id: *job_id,
                expected: transition.from,
                actual: current.status,
            });
        }

        let next = apply_transition(&current, &transition, now);
        let history = serde_json::to_string(&next.error_history)?;

        let rows = tx
            .execute(
                "UPDATE jobs SET status = ?1, attempts = ?2, updated_at = ?3,
                     error_detail = ?4, error_history = ?5, printer_job_id = ?6,
                     claimed_at = ?7, available_at = ?8
                 WHERE id = ?9 AND status = ?10 AND attempts = ?11",
                params![
                    next.status.as_str(),
                    next.attempts,
                    ts(&next.updated_at),
                    next.error_detail,
                    history,
                    next.printer_job_id,
                    next.claimed_at.as_ref().map(ts),
                    ts(&next.available_at),
                    job_id.to_string(),
                    current.status.as_str(),
                    current.attempts,
                ],
            )
            .map_err(|e| db_err("update status", e))?;

        if rows != 1 {
            return Err(PrintdeskError::Conflict {
                job_id: *job_id,
                expected: transition.from,
                actual: current.status,
            });
        }
        tx.commit().map_err(|e| db_err("commit transition", e))?;

        if next.status != transition.to {
            warn!(
                attempts = next.attempts,
                max_attempts = next.max_attempts,
                "retry requested with no attempts left, job failed"
            );
        }
        debug!(status = %next.status, attempts = next.attempts, "job transitioned");
        Ok(next)
    }

    /// Re-release `in_progress` claims older than `older_than`.
    ///
    /// A claim that old belongs to a runner that died or hung.  Each such job
    /// goes back to `pending` (or to `failed` when it has no attempts left)
    /// through the normal compare-and-swap, so a live runner racing the
    /// reclaim simply wins or loses.
    #[instrument(skip(self))]
    pub fn reclaim_stale(&self, older_than: Duration) -> Result<Vec<Job>> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale: Vec<(String, u32)> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, attempts FROM jobs
                     WHERE status = ?1 AND claimed_at IS NOT NULL AND claimed_at < ?2",
                )
                .map_err(|e| db_err("prepare reclaim_stale", e))?;
            stmt.query_map(params![JobStatus::InProgress.as_str(), ts(&cutoff)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| db_err("query reclaim_stale", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("collect rows", e))?
        };

        let mut reclaimed = Vec::new();
        for (id, attempts) in stale {
            let job_id: JobId = id.parse().map_err(|e| {
                PrintdeskError::StoreUnavailable(format!("corrupt job id '{id}': {e}"))
            })?;
            let reason = format!("claim abandoned: no result after {older_than:?}");
            let release = Transition::retry(reason, Duration::ZERO).expecting_attempts(attempts);
            match self.transition(&job_id, release) {
                Ok(job) => {
                    warn!(job_id = %job_id, status = %job.status, "stale claim reclaimed");
                    reclaimed.push(job);
                }
                Err(e) if e.is_conflict() => {
                    debug!(job_id = %job_id, "stale claim resolved concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reclaimed)
    }
}

/// Compute the job record after `transition` has been applied.
fn apply_transition(current: &Job, transition: &Transition, now: DateTime<Utc>) -> Job {
    let mut next = current.clone();
    next.updated_at = now;
    next.attempts = current.attempts.saturating_add(transition.attempt_increment);

    // The ceiling can only be crossed by a claim or a retry; both are forced
    // to a terminal failure instead.
    let exhausted_retry = transition.to == JobStatus::Pending && !current.has_attempts_left();
    let exhausted_claim =
        transition.to == JobStatus::InProgress && next.attempts > next.max_attempts;

    if exhausted_claim {
        next.attempts = current.attempts;
        next.status = JobStatus::Failed;
        next.claimed_at = None;
        next.error_detail = Some(format!(
            "attempt ceiling reached ({} of {})",
            current.attempts, current.max_attempts
        ));
        return next;
    }

    next.status = if exhausted_retry {
        JobStatus::Failed
    } else {
        transition.to
    };

    match next.status {
        JobStatus::InProgress => {
            next.claimed_at = Some(now);
        }
        JobStatus::Pending => {
            next.claimed_at = None;
            next.available_at = chrono::Duration::from_std(transition.backoff)
                .ok()
                .and_then(|delay| now.checked_add_signed(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if let Some(reason) = &transition.error {
                next.error_history.push(reason.clone());
            }
        }
        JobStatus::Completed => {
            next.claimed_at = None;
            next.error_detail = None;
            if transition.printer_job_id.is_some() {
                next.printer_job_id = transition.printer_job_id.clone();
            }
        }
        JobStatus::Failed => {
            next.claimed_at = None;
            let reason = transition
                .error
                .clone()
                .unwrap_or_else(|| "execution failed".to_string());
            next.error_history.push(reason.clone());
            next.error_detail = Some(reason);
        }
    }
    next
}

fn select_job(conn: &Connection, job_id: &JobId) -> Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![job_id.to_string()],
        row_to_job,
    )
    .optional()
    .map_err(|e| db_err("get job", e))
}

fn db_err(context: &str, e: rusqlite::Error) -> PrintdeskError {
    PrintdeskError::StoreUnavailable(format!("{context}: {e}"))
}

/// Current time at the precision stored in the database.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that text order matches time order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_err(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(column, e))
}

/// Map a SQLite row to a `Job`.
///
/// Column indices must match `JOB_COLUMNS`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(4)?;
    let history_json: String = row.get(10)?;
    let claimed_at: Option<String> = row.get(12)?;

    let id = uuid::Uuid::parse_str(&id_str).map_err(|e| conversion_err(0, e))?;
    let status: JobStatus = status_str.parse().map_err(|e: String| {
        conversion_err(4, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let error_history: Vec<String> =
        serde_json::from_str(&history_json).map_err(|e| conversion_err(10, e))?;

    Ok(Job {
        id: JobId(id),
        owner: OwnerId(row.get(1)?),
        payload_ref: PayloadRef(row.get(2)?),
        document_name: row.get(3)?,
        status,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_ts(8, &row.get::<_, String>(8)?)?,
        error_detail: row.get(9)?,
        error_history,
        printer_job_id: row.get(11)?,
        claimed_at: claimed_at.map(|s| parse_ts(12, &s)).transpose()?,
        available_at: parse_ts(13, &row.get::<_, String>(13)?)?,
    })
}
