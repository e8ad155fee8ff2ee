use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use analyst_common::{
    AnalysisJob, AnalysisResult, DEFAULT_MAX_ATTEMPTS, JobStatus, NewJob, QueueStats,
};

/// Longest single retry delay, whatever the attempt number.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Upper bound on how long an idle `dequeue` sleeps before re-checking the
/// store. Covers jobs whose backoff expires without a wake-up signal.
const IDLE_RECHECK: Duration = Duration::from_secs(1);

const JOB_COLUMNS: &str = "job_id, project_id, repo, branch, question, has_credentials, status, attempts, max_attempts, created_at, started_at, finished_at, run_after, progress, remote_status, last_error, result, failure_reason";

/// Retry budget and backoff schedule for failed attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based): `base`, `2 * base`, `4 * base`, … capped at one hour.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

/// How many terminal jobs survive cleanup, and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_completed: u32,
    pub keep_failed: u32,
    pub grace: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: 10,
            keep_failed: 50,
            grace: Duration::from_secs(3600),
        }
    }
}

/// Outcome of submitting a job.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: AnalysisJob,
    /// An in-flight job for the same project already existed and was returned as is.
    pub deduplicated: bool,
}

/// Outcome of reporting a failed attempt.
#[derive(Debug, Clone)]
pub enum NackOutcome {
    /// Back in `queued`, claimable once `delay` has passed.
    Requeued { job: AnalysisJob, delay: Duration },
    /// Retry budget exhausted (or retry refused); the job is terminally failed.
    Failed { job: AnalysisJob },
}

/// Async-safe handle to the job queue.
///
/// Wraps `JobQueueDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. Every mutation of job state goes
/// through this handle, which makes the SQLite file the single source of truth
/// for job existence and status.
#[derive(Clone)]
pub struct QueueHandle {
    inner: Arc<std::sync::Mutex<JobQueueDb>>,
    wakeup: Arc<Notify>,
    retry: RetryPolicy,
}

impl QueueHandle {
    pub fn new(db: JobQueueDb, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
            wakeup: Arc::new(Notify::new()),
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&JobQueueDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("Queue lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Queue task panicked")?
    }

    /// Enqueue a job, or return the in-flight job already registered for the
    /// same project id.
    pub async fn submit(&self, new_job: NewJob) -> Result<Submission> {
        let submission = self
            .call(move |db| db.submit(&new_job, Utc::now()))
            .await?;
        if !submission.deduplicated {
            self.wakeup.notify_one();
        }
        Ok(submission)
    }

    /// Claim the next due job without waiting.
    pub async fn try_dequeue(&self) -> Result<Option<AnalysisJob>> {
        self.call(|db| db.claim_next(Utc::now())).await
    }

    /// Claim the next due job, waiting until one is available. Returns
    /// `Ok(None)` once `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<AnalysisJob>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(job) = self.try_dequeue().await? {
                return Ok(Some(job));
            }

            let next_due = self.call(|db| db.next_due_at()).await?;
            let wait = next_due
                .and_then(|due| (due - Utc::now()).to_std().ok())
                .map(|until_due| until_due.min(IDLE_RECHECK))
                .unwrap_or(IDLE_RECHECK);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Move an in-flight job one step along the state machine.
    pub async fn transition(
        &self,
        job_id: &str,
        to: JobStatus,
        progress: Option<String>,
    ) -> Result<AnalysisJob> {
        let job_id = job_id.to_string();
        self.call(move |db| db.transition(&job_id, to, progress.as_deref()))
            .await
    }

    /// Store the latest remote status and message without changing state.
    pub async fn record_progress(
        &self,
        job_id: &str,
        remote_status: &str,
        message: &str,
    ) -> Result<()> {
        let job_id = job_id.to_string();
        let remote_status = remote_status.to_string();
        let message = message.to_string();
        self.call(move |db| db.record_progress(&job_id, &remote_status, &message))
            .await
    }

    /// Mark a processing job finished with its result.
    pub async fn ack(&self, job_id: &str, result: AnalysisResult) -> Result<AnalysisJob> {
        let job_id = job_id.to_string();
        self.call(move |db| db.ack(&job_id, &result, Utc::now())).await
    }

    /// Record a failed attempt. Requeues with backoff while budget remains
    /// and `retry` is set; otherwise fails the job terminally.
    pub async fn nack(&self, job_id: &str, reason: &str, retry: bool) -> Result<NackOutcome> {
        let job_id = job_id.to_string();
        let reason = reason.to_string();
        let policy = self.retry.clone();
        let outcome = self
            .call(move |db| db.nack(&job_id, &reason, retry, &policy, Utc::now()))
            .await?;
        if matches!(outcome, NackOutcome::Requeued { .. }) {
            self.wakeup.notify_one();
        }
        Ok(outcome)
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<AnalysisJob>> {
        let job_id = job_id.to_string();
        self.call(move |db| db.get(&job_id)).await
    }

    pub async fn get_by_project(&self, project_id: &str) -> Result<Option<AnalysisJob>> {
        let project_id = project_id.to_string();
        self.call(move |db| db.get_by_project(&project_id)).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.call(|db| db.stats()).await
    }

    /// Put every in-flight job back in `queued`, refunding the interrupted
    /// attempt. Returns the affected job ids.
    pub async fn requeue_in_flight(&self) -> Result<Vec<String>> {
        let ids = self.call(|db| db.requeue_in_flight(Utc::now())).await?;
        if !ids.is_empty() {
            self.wakeup.notify_waiters();
        }
        Ok(ids)
    }

    pub async fn cleanup(&self, retention: RetentionPolicy) -> Result<usize> {
        self.call(move |db| db.cleanup(&retention, Utc::now())).await
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp in queue: {}", value))?
        .with_timezone(&Utc))
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Raw row as stored; converted into `AnalysisJob` by `into_job`.
struct JobRow {
    job_id: String,
    project_id: String,
    repo: String,
    branch: String,
    question: String,
    has_credentials: bool,
    status: String,
    attempts: u32,
    max_attempts: u32,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    run_after: String,
    progress: Option<String>,
    remote_status: Option<String>,
    last_error: Option<String>,
    result: Option<String>,
    failure_reason: Option<String>,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            project_id: row.get(1)?,
            repo: row.get(2)?,
            branch: row.get(3)?,
            question: row.get(4)?,
            has_credentials: row.get(5)?,
            status: row.get(6)?,
            attempts: row.get(7)?,
            max_attempts: row.get(8)?,
            created_at: row.get(9)?,
            started_at: row.get(10)?,
            finished_at: row.get(11)?,
            run_after: row.get(12)?,
            progress: row.get(13)?,
            remote_status: row.get(14)?,
            last_error: row.get(15)?,
            result: row.get(16)?,
            failure_reason: row.get(17)?,
        })
    }

    fn into_job(self) -> Result<AnalysisJob> {
        let status = JobStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?;
        let result = match self.result {
            Some(json) => Some(
                serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt result for job {}", self.job_id))?,
            ),
            None => None,
        };
        Ok(AnalysisJob {
            status,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            created_at: parse_timestamp(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
            run_after: parse_timestamp(&self.run_after)?,
            result,
            job_id: self.job_id,
            project_id: self.project_id,
            repo: self.repo,
            branch: self.branch,
            question: self.question,
            has_credentials: self.has_credentials,
            progress: self.progress,
            remote_status: self.remote_status,
            last_error: self.last_error,
            failure_reason: self.failure_reason,
        })
    }
}

pub struct JobQueueDb {
    conn: Connection,
}

impl JobQueueDb {
    /// Open (or create) a SQLite queue at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite queue database")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure SQLite queue database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory queue (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS analysis_jobs (
                    job_id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL UNIQUE,
                    repo TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    question TEXT NOT NULL,
                    has_credentials INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'queued',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    max_attempts INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    finished_at TEXT,
                    run_after TEXT NOT NULL,
                    progress TEXT,
                    last_error TEXT,
                    result TEXT,
                    failure_reason TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_claim ON analysis_jobs(status, run_after);
                CREATE INDEX IF NOT EXISTS idx_jobs_finished ON analysis_jobs(status, finished_at);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migration (nullable column, safe to re-run).
        // Only "duplicate column" errors are ignored.
        match self
            .conn
            .execute("ALTER TABLE analysis_jobs ADD COLUMN remote_status TEXT", [])
        {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add remote_status column: {}", e)),
        }
        Ok(())
    }

    /// Drop the jobs table so every later query fails.
    #[cfg(test)]
    pub(crate) fn break_schema(&self) -> Result<()> {
        self.conn.execute_batch("DROP TABLE analysis_jobs")?;
        Ok(())
    }

    // ── Submission ────────────────────────────────────────────────────

    pub fn submit(&self, new_job: &NewJob, now: DateTime<Utc>) -> Result<Submission> {
        if new_job.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let now_str = timestamp(now);

        match self.get_by_project(&new_job.project_id)? {
            Some(existing) if !existing.status.is_terminal() => {
                return Ok(Submission {
                    job: existing,
                    deduplicated: true,
                });
            }
            Some(_) => {
                // Terminal job for the same project: reuse the row with a fresh identity.
                self.conn
                    .execute(
                        "UPDATE analysis_jobs SET
                            job_id = ?1, repo = ?2, branch = ?3, question = ?4, has_credentials = ?5,
                            status = 'queued', attempts = 0, max_attempts = ?6, created_at = ?7,
                            started_at = NULL, finished_at = NULL, run_after = ?7, progress = NULL,
                            remote_status = NULL, last_error = NULL, result = NULL, failure_reason = NULL
                         WHERE project_id = ?8",
                        params![
                            job_id,
                            new_job.repo,
                            new_job.branch,
                            new_job.question,
                            new_job.has_credentials,
                            new_job.max_attempts,
                            now_str,
                            new_job.project_id,
                        ],
                    )
                    .context("Failed to resubmit job")?;
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO analysis_jobs
                            (job_id, project_id, repo, branch, question, has_credentials,
                             status, attempts, max_attempts, created_at, run_after)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', 0, ?7, ?8, ?8)",
                        params![
                            job_id,
                            new_job.project_id,
                            new_job.repo,
                            new_job.branch,
                            new_job.question,
                            new_job.has_credentials,
                            new_job.max_attempts,
                            now_str,
                        ],
                    )
                    .context("Failed to insert job")?;
            }
        }

        let job = self.get(&job_id)?.context("Job not found after submit")?;
        Ok(Submission {
            job,
            deduplicated: false,
        })
    }

    // ── Claiming ──────────────────────────────────────────────────────

    /// Atomically move the oldest due `queued` job to `parsing` and count the attempt.
    pub fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<AnalysisJob>> {
        let now_str = timestamp(now);
        let job_id: Option<String> = self
            .conn
            .query_row(
                "SELECT job_id FROM analysis_jobs
                 WHERE status = 'queued' AND run_after <= ?1
                 ORDER BY run_after, created_at
                 LIMIT 1",
                params![now_str],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up next job")?;

        let Some(job_id) = job_id else {
            return Ok(None);
        };

        let updated = self
            .conn
            .execute(
                "UPDATE analysis_jobs
                 SET status = 'parsing', attempts = attempts + 1, started_at = ?2,
                     progress = NULL, remote_status = NULL
                 WHERE job_id = ?1 AND status = 'queued'",
                params![job_id, now_str],
            )
            .context("Failed to claim job")?;
        if updated == 0 {
            return Ok(None);
        }
        self.get(&job_id)
    }

    /// Earliest `run_after` among queued jobs.
    pub fn next_due_at(&self) -> Result<Option<DateTime<Utc>>> {
        let next: Option<String> = self
            .conn
            .query_row(
                "SELECT MIN(run_after) FROM analysis_jobs WHERE status = 'queued'",
                [],
                |row| row.get(0),
            )
            .context("Failed to query next due job")?;
        next.as_deref().map(parse_timestamp).transpose()
    }

    // ── State changes ─────────────────────────────────────────────────

    fn require_job(&self, job_id: &str) -> Result<AnalysisJob> {
        self.get(job_id)?
            .with_context(|| format!("Job {} not found", job_id))
    }

    pub fn transition(
        &self,
        job_id: &str,
        to: JobStatus,
        progress: Option<&str>,
    ) -> Result<AnalysisJob> {
        let job = self.require_job(job_id)?;
        if !job.status.can_transition_to(to) {
            bail!(
                "Invalid transition for job {}: {} -> {}",
                job_id,
                job.status,
                to
            );
        }
        self.conn
            .execute(
                "UPDATE analysis_jobs SET status = ?2, progress = COALESCE(?3, progress)
                 WHERE job_id = ?1 AND status = ?4",
                params![job_id, to.as_str(), progress, job.status.as_str()],
            )
            .context("Failed to update job status")?;
        self.require_job(job_id)
    }

    pub fn record_progress(&self, job_id: &str, remote_status: &str, message: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE analysis_jobs SET remote_status = ?2, progress = ?3 WHERE job_id = ?1",
                params![job_id, remote_status, message],
            )
            .context("Failed to record job progress")?;
        Ok(())
    }

    pub fn ack(&self, job_id: &str, result: &AnalysisResult, now: DateTime<Utc>) -> Result<AnalysisJob> {
        let job = self.require_job(job_id)?;
        if !job.status.can_transition_to(JobStatus::Finished) {
            bail!("Cannot finish job {} from status {}", job_id, job.status);
        }
        let result_json = serde_json::to_string(result).context("Failed to serialize result")?;
        self.conn
            .execute(
                "UPDATE analysis_jobs
                 SET status = 'finished', result = ?2, finished_at = ?3,
                     progress = 'Analysis complete', failure_reason = NULL
                 WHERE job_id = ?1",
                params![job_id, result_json, timestamp(now)],
            )
            .context("Failed to mark job finished")?;
        self.require_job(job_id)
    }

    pub fn nack(
        &self,
        job_id: &str,
        reason: &str,
        retry: bool,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<NackOutcome> {
        let job = self.require_job(job_id)?;
        if !job.status.is_in_flight() {
            bail!("Cannot fail job {} from status {}", job_id, job.status);
        }

        if retry && job.attempts < job.max_attempts {
            let delay = policy.delay_for(job.attempts);
            let run_after = now + to_time_delta(delay);
            self.conn
                .execute(
                    "UPDATE analysis_jobs
                     SET status = 'queued', run_after = ?2, last_error = ?3, progress = ?4
                     WHERE job_id = ?1",
                    params![
                        job_id,
                        timestamp(run_after),
                        reason,
                        format!(
                            "Attempt {}/{} failed; retrying in {}s",
                            job.attempts,
                            job.max_attempts,
                            delay.as_secs()
                        ),
                    ],
                )
                .context("Failed to requeue job")?;
            return Ok(NackOutcome::Requeued {
                job: self.require_job(job_id)?,
                delay,
            });
        }

        self.conn
            .execute(
                "UPDATE analysis_jobs
                 SET status = 'failed', failure_reason = ?2, last_error = ?2,
                     finished_at = ?3, progress = 'Analysis failed'
                 WHERE job_id = ?1",
                params![job_id, reason, timestamp(now)],
            )
            .context("Failed to mark job failed")?;
        Ok(NackOutcome::Failed {
            job: self.require_job(job_id)?,
        })
    }

    pub fn requeue_in_flight(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT job_id FROM analysis_jobs
                 WHERE status IN ('parsing', 'ready', 'processing')",
            )
            .context("Failed to prepare requeue_in_flight")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query in-flight jobs")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read in-flight job row")?;

        self.conn
            .execute(
                "UPDATE analysis_jobs
                 SET status = 'queued', attempts = MAX(attempts - 1, 0), run_after = ?1,
                     progress = 'Requeued after interruption'
                 WHERE status IN ('parsing', 'ready', 'processing')",
                params![timestamp(now)],
            )
            .context("Failed to requeue in-flight jobs")?;
        Ok(ids)
    }

    // ── Queries ───────────────────────────────────────────────────────

    fn query_one(&self, where_clause: &str, key: &str) -> Result<Option<AnalysisJob>> {
        let sql = format!("SELECT {} FROM analysis_jobs WHERE {}", JOB_COLUMNS, where_clause);
        let row = self
            .conn
            .query_row(&sql, params![key], JobRow::from_row)
            .optional()
            .context("Failed to query job")?;
        row.map(JobRow::into_job).transpose()
    }

    pub fn get(&self, job_id: &str) -> Result<Option<AnalysisJob>> {
        self.query_one("job_id = ?1", job_id)
    }

    pub fn get_by_project(&self, project_id: &str) -> Result<Option<AnalysisJob>> {
        self.query_one("project_id = ?1", project_id)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM analysis_jobs GROUP BY status")
            .context("Failed to prepare stats")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .context("Failed to query stats")?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row.context("Failed to read stats row")?;
            let count = count.max(0) as u64;
            match JobStatus::from_str(&status).map_err(|e| anyhow::anyhow!(e))? {
                JobStatus::Queued => stats.waiting += count,
                JobStatus::Parsing | JobStatus::Ready | JobStatus::Processing => {
                    stats.active += count
                }
                JobStatus::Finished => stats.completed += count,
                JobStatus::Failed => stats.failed += count,
            }
        }
        Ok(stats)
    }

    // ── Retention ─────────────────────────────────────────────────────

    /// Delete terminal jobs past the grace period, then trim each terminal
    /// bucket to its configured size. Returns the number of rows removed.
    pub fn cleanup(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = timestamp(now - to_time_delta(retention.grace));
        let mut removed = self
            .conn
            .execute(
                "DELETE FROM analysis_jobs
                 WHERE status IN ('finished', 'failed') AND finished_at < ?1",
                params![cutoff],
            )
            .context("Failed to purge expired jobs")?;

        for (status, keep) in [
            (JobStatus::Finished, retention.keep_completed),
            (JobStatus::Failed, retention.keep_failed),
        ] {
            removed += self
                .conn
                .execute(
                    "DELETE FROM analysis_jobs
                     WHERE status = ?1 AND job_id NOT IN (
                         SELECT job_id FROM analysis_jobs WHERE status = ?1
                         ORDER BY finished_at DESC LIMIT ?2
                     )",
                    params![status.as_str(), keep],
                )
                .with_context(|| format!("Failed to trim {} jobs", status))?;
        }
        Ok(removed)
    }
}
