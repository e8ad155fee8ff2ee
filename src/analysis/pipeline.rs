use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use analyst_common::{AnalysisJob, AnalysisResult, JobStatus};

use super::db::{NackOutcome, QueueHandle, RetentionPolicy};
use super::hub::{Notification, NotificationChannel};
use super::metrics::PipelineMetrics;
use super::normalize::{build_agent_prompt, normalize_agent_output};
use super::poller::{PollEvent, PollSettings, poll_until_ready};
use super::provider::AnalysisProvider;
use crate::config::AnalystConfig;
use crate::errors::AnalysisError;

/// Pause after a failed dequeue before trying again.
const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll: PollSettings,
    /// Upper bound on one agent invocation.
    pub agent_timeout: Duration,
    pub shutdown_grace: Duration,
    pub janitor_interval: Duration,
    pub retention: RetentionPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &AnalystConfig) -> Self {
        Self {
            concurrency: config.worker.concurrency,
            poll: PollSettings::from(&config.poller),
            agent_timeout: config.provider.request_timeout(),
            shutdown_grace: Duration::from_secs(config.worker.shutdown_grace_secs),
            janitor_interval: Duration::from_secs(60),
            retention: RetentionPolicy {
                keep_completed: config.queue.keep_completed,
                keep_failed: config.queue.keep_failed,
                grace: config.queue.retention(),
            },
        }
    }
}

/// Runs analysis jobs from the queue with bounded concurrency.
///
/// Each of the `concurrency` workers claims one job at a time and drives it
/// through parse polling, the agent call and normalization, publishing a
/// notification at every step. Claiming moves the single queue row for a
/// project out of `queued`, so two workers never hold the same project.
pub struct WorkerPool {
    queue: QueueHandle,
    provider: Arc<dyn AnalysisProvider>,
    notifier: Arc<dyn NotificationChannel>,
    metrics: Arc<PipelineMetrics>,
    settings: WorkerSettings,
}

/// Running workers plus the janitor. Dropping it without calling
/// [`PoolHandle::shutdown`] leaves the tasks running.
pub struct PoolHandle {
    cancel: CancellationToken,
    workers: JoinSet<()>,
    janitor: JoinHandle<()>,
    queue: QueueHandle,
    grace: Duration,
}

impl PoolHandle {
    /// Stop claiming jobs, give in-flight jobs the grace period, abort the
    /// rest and put their jobs back in the queue. Returns how many jobs were
    /// requeued.
    pub async fn shutdown(mut self) -> Result<usize> {
        self.cancel.cancel();
        self.janitor.abort();

        let drained = tokio::time::timeout(self.grace, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                grace_secs = self.grace.as_secs(),
                "Workers still busy after grace period; aborting"
            );
            self.workers.abort_all();
            while self.workers.join_next().await.is_some() {}
        }

        let requeued = self.queue.requeue_in_flight().await?;
        if !requeued.is_empty() {
            info!(count = requeued.len(), "Requeued interrupted jobs");
        }
        Ok(requeued.len())
    }
}

impl WorkerPool {
    pub fn new(
        queue: QueueHandle,
        provider: Arc<dyn AnalysisProvider>,
        notifier: Arc<dyn NotificationChannel>,
        metrics: Arc<PipelineMetrics>,
        settings: WorkerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            provider,
            notifier,
            metrics,
            settings,
        })
    }

    /// Recover jobs interrupted by a previous run, then spawn the workers and
    /// the retention janitor.
    pub async fn start(self: &Arc<Self>) -> Result<PoolHandle> {
        let recovered = self.queue.requeue_in_flight().await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "Recovered jobs interrupted by a previous run");
        }

        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.concurrency.max(1) {
            let pool = Arc::clone(self);
            let cancel = cancel.clone();
            workers.spawn(async move { pool.worker_loop(worker_id, cancel).await });
        }

        let janitor = {
            let pool = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.janitor_loop(cancel).await })
        };

        info!(concurrency = self.settings.concurrency, "Worker pool started");
        Ok(PoolHandle {
            cancel,
            workers,
            janitor,
            queue: self.queue.clone(),
            grace: self.settings.shutdown_grace,
        })
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "Worker started");
        loop {
            let job = match self.queue.dequeue(&cancel).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    error!(worker_id, error = %format!("{:#}", e), "Failed to claim job");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(DEQUEUE_ERROR_BACKOFF) => continue,
                    }
                }
            };

            let span = info_span!(
                "job",
                worker_id,
                job_id = %job.job_id,
                project_id = %job.project_id,
                attempt = job.attempts
            );
            self.run_job(job).instrument(span).await;
        }
        debug!(worker_id, "Worker stopped");
    }

    async fn janitor_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.janitor_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.queue.cleanup(self.settings.retention.clone()).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Purged expired jobs"),
                        Err(e) => warn!(error = %format!("{:#}", e), "Queue cleanup failed"),
                    }
                }
            }
        }
    }

    /// Drive one claimed attempt to ack or nack.
    pub async fn run_job(&self, job: AnalysisJob) {
        self.metrics.record_attempt();
        info!(max_attempts = job.max_attempts, "Processing analysis job");

        match self.process(&job).await {
            Ok(result) => {
                self.metrics.record_finished();
                info!(snippets = result.snippets_count, "Analysis complete");
                self.notify(Notification::AnalysisComplete {
                    project_id: job.project_id.clone(),
                    result,
                });
            }
            Err(err) => self.fail_attempt(&job, err).await,
        }
    }

    fn notify(&self, event: Notification) {
        let topic = event.project_id().to_string();
        self.notifier.publish(&topic, event);
    }

    fn status(&self, job: &AnalysisJob, status: JobStatus, remote: Option<&str>, message: impl Into<String>) {
        self.notify(Notification::status_update(&job.project_id, status, remote, message));
    }

    async fn advance(&self, job: &AnalysisJob, to: JobStatus, message: &str) -> Result<(), AnalysisError> {
        self.queue
            .transition(&job.job_id, to, Some(message.to_string()))
            .await
            .map_err(AnalysisError::Queue)?;
        self.status(job, to, None, message);
        Ok(())
    }

    /// Steps after the claim: wait for the parse, ask the agent, normalize,
    /// record the result.
    async fn process(&self, job: &AnalysisJob) -> Result<AnalysisResult, AnalysisError> {
        self.status(
            job,
            JobStatus::Parsing,
            None,
            format!(
                "Waiting for repository parsing (attempt {}/{})",
                job.attempts, job.max_attempts
            ),
        );

        let mut events = std::pin::pin!(poll_until_ready(
            Arc::clone(&self.provider),
            job.project_id.clone(),
            self.settings.poll.clone(),
        ));
        let mut ready = false;
        while let Some(event) = events.next().await {
            match event {
                PollEvent::Progress {
                    remote_status,
                    message,
                } => {
                    if let Err(e) = self
                        .queue
                        .record_progress(&job.job_id, &remote_status, &message)
                        .await
                    {
                        warn!(error = %format!("{:#}", e), "Failed to record progress");
                    }
                    self.status(job, JobStatus::Parsing, Some(&remote_status), message);
                }
                PollEvent::Ready => {
                    ready = true;
                    break;
                }
                PollEvent::Failed(err) => return Err(err),
            }
        }
        if !ready {
            return Err(AnalysisError::provider(502, "Status polling ended without a result"));
        }

        self.advance(job, JobStatus::Ready, "Repository ready for analysis")
            .await?;
        self.advance(job, JobStatus::Processing, "Running analysis agent")
            .await?;

        let prompt = build_agent_prompt(&job.question);
        let reply = tokio::time::timeout(
            self.settings.agent_timeout,
            self.provider.invoke_agent(&job.project_id, &prompt),
        )
        .await
        .map_err(|_| {
            AnalysisError::provider(
                504,
                format!(
                    "Agent did not answer within {}s",
                    self.settings.agent_timeout.as_secs()
                ),
            )
        })??;

        let result = normalize_agent_output(job, &reply, Utc::now())?;
        if let Err(violation) = result.check_invariants() {
            return Err(AnalysisError::MalformedAgentOutput(violation.to_string()));
        }

        self.queue
            .ack(&job.job_id, result.clone())
            .await
            .map_err(AnalysisError::Queue)?;
        Ok(result)
    }

    async fn fail_attempt(&self, job: &AnalysisJob, err: AnalysisError) {
        if matches!(err, AnalysisError::Timeout { .. }) {
            self.metrics.record_poll_timeout();
        }
        let reason = err.to_string();

        match self
            .queue
            .nack(&job.job_id, &reason, err.is_retryable())
            .await
        {
            Ok(NackOutcome::Requeued { job: requeued, delay }) => {
                self.metrics.record_retry();
                warn!(
                    error = %reason,
                    retry_in_ms = delay.as_millis() as u64,
                    "Attempt failed; requeued"
                );
                self.status(
                    &requeued,
                    JobStatus::Queued,
                    None,
                    format!(
                        "Attempt {}/{} failed: {}. Retrying in {}s",
                        requeued.attempts,
                        requeued.max_attempts,
                        reason,
                        delay.as_secs()
                    ),
                );
            }
            Ok(NackOutcome::Failed { job: failed }) => {
                self.metrics.record_failed();
                error!(error = %reason, attempts = failed.attempts, "Analysis failed");
                self.notify(Notification::AnalysisError {
                    project_id: failed.project_id.clone(),
                    reason,
                    attempts: failed.attempts,
                });
            }
            Err(e) => {
                // Left in flight; startup recovery requeues it.
                error!(error = %format!("{:#}", e), attempt_error = %reason, "Failed to record failed attempt");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::db::{JobQueueDb, RetryPolicy};
    use crate::analysis::testing::{NO_JSON_REPLY, ScriptedProvider};
    use analyst_common::NewJob;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        events: Mutex<Vec<Notification>>,
    }

    impl NotificationChannel for RecordingChannel {
        fn publish(&self, _topic: &str, event: Notification) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl RecordingChannel {
        fn for_project(&self, project_id: &str) -> Vec<Notification> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.project_id() == project_id)
                .cloned()
                .collect()
        }

        fn errors(&self, project_id: &str) -> usize {
            self.for_project(project_id)
                .iter()
                .filter(|e| matches!(e, Notification::AnalysisError { .. }))
                .count()
        }
    }

    /// Compact label for an event: the status for updates, the kind otherwise.
    fn label(event: &Notification) -> String {
        match event {
            Notification::StatusUpdate { status, .. } => status.to_string(),
            Notification::AnalysisComplete { .. } => "complete".to_string(),
            Notification::AnalysisError { .. } => "error".to_string(),
            Notification::Snapshot { .. } => "snapshot".to_string(),
        }
    }

    struct Harness {
        queue: QueueHandle,
        provider: Arc<ScriptedProvider>,
        channel: Arc<RecordingChannel>,
        metrics: Arc<PipelineMetrics>,
        pool: Arc<WorkerPool>,
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            concurrency: 2,
            poll: PollSettings {
                poll_interval: Duration::from_millis(5),
                max_wait: Duration::from_secs(2),
                error_budget: 3,
            },
            agent_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(2),
            janitor_interval: Duration::from_secs(60),
            retention: RetentionPolicy::default(),
        }
    }

    fn harness(provider: ScriptedProvider, settings: WorkerSettings) -> Harness {
        let queue = QueueHandle::new(
            JobQueueDb::new_in_memory().unwrap(),
            RetryPolicy {
                max_attempts: 3,
                backoff_base: Duration::from_millis(10),
            },
        );
        let provider = Arc::new(provider);
        let channel = Arc::new(RecordingChannel::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let pool = WorkerPool::new(
            queue.clone(),
            provider.clone(),
            channel.clone(),
            metrics.clone(),
            settings,
        );
        Harness {
            queue,
            provider,
            channel,
            metrics,
            pool,
        }
    }

    async fn wait_terminal(queue: &QueueHandle, job_id: &str) -> AnalysisJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = queue.get(job_id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            assert!(tokio::time::Instant::now() < deadline, "job {} never finished", job_id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn submit(h: &Harness, project_id: &str, max_attempts: u32) -> String {
        h.queue
            .submit(
                NewJob::new(project_id, "org/repo")
                    .with_question("Explain X")
                    .with_max_attempts(max_attempts),
            )
            .await
            .unwrap()
            .job
            .job_id
    }

    #[tokio::test]
    async fn test_valid_reply_finishes_with_ordered_events() {
        let h = harness(
            ScriptedProvider::new().with_statuses("p-1", &["parsing", "ready"]),
            settings(),
        );
        let job_id = submit(&h, "p-1", 3).await;
        let handle = h.pool.start().await.unwrap();

        let job = wait_terminal(&h.queue, &job_id).await;
        handle.shutdown().await.unwrap();

        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.attempts, 1);
        let result = job.result.unwrap();
        assert_eq!(result.snippets_count, 1);
        assert_eq!(result.metadata.processed_nodes, 1);
        assert_eq!(result.question, "Explain X");
        assert_eq!(h.provider.status_calls("p-1"), 2);

        let labels: Vec<_> = h.channel.for_project("p-1").iter().map(label).collect();
        assert_eq!(
            labels,
            vec!["parsing", "parsing", "parsing", "ready", "processing", "complete"]
        );
        match &h.channel.for_project("p-1")[1] {
            Notification::StatusUpdate { remote_status, .. } => {
                assert_eq!(remote_status.as_deref(), Some("parsing"))
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(h.metrics.snapshot().jobs_finished, 1);
    }

    #[tokio::test]
    async fn test_reply_without_json_fails_after_max_attempts_with_one_error() {
        let h = harness(
            ScriptedProvider::new().with_fallback_reply(NO_JSON_REPLY),
            settings(),
        );
        let job_id = submit(&h, "p-1", 3).await;
        let handle = h.pool.start().await.unwrap();

        let job = wait_terminal(&h.queue, &job_id).await;
        handle.shutdown().await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.attempts, job.max_attempts);
        assert!(job.failure_reason.unwrap().contains("no usable JSON"));
        assert!(job.result.is_none());
        assert_eq!(h.provider.agent_calls("p-1"), 3);

        let events = h.channel.for_project("p-1");
        assert_eq!(h.channel.errors("p-1"), 1);
        assert!(matches!(events.last().unwrap(), Notification::AnalysisError { attempts: 3, .. }));
        let retries = events.iter().filter(|e| label(e) == "queued").count();
        assert_eq!(retries, 2);

        let snap = h.metrics.snapshot();
        assert_eq!(snap.attempts_started, 3);
        assert_eq!(snap.jobs_retried, 2);
        assert_eq!(snap.jobs_failed, 1);
    }

    #[tokio::test]
    async fn test_never_ready_times_out_with_single_error() {
        let mut s = settings();
        s.poll.max_wait = Duration::from_millis(50);
        let h = harness(ScriptedProvider::new().with_fallback_status("indexing"), s);
        let job_id = submit(&h, "p-1", 1).await;
        let handle = h.pool.start().await.unwrap();

        let job = wait_terminal(&h.queue, &job_id).await;
        handle.shutdown().await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.failure_reason.unwrap().contains("Timed out"));
        assert_eq!(h.channel.errors("p-1"), 1);
        assert_eq!(h.provider.agent_calls("p-1"), 0);
        assert!(
            !h.channel
                .for_project("p-1")
                .iter()
                .any(|e| label(e) == "processing")
        );
        assert_eq!(h.metrics.snapshot().poll_timeouts, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_converge() {
        let h = harness(
            ScriptedProvider::new()
                .with_agent_failure("p-1", 503)
                .with_agent_failure("p-1", 503),
            settings(),
        );
        let job_id = submit(&h, "p-1", 3).await;
        let handle = h.pool.start().await.unwrap();

        let job = wait_terminal(&h.queue, &job_id).await;
        handle.shutdown().await.unwrap();

        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.attempts, 3);
        assert!(job.last_error.unwrap().contains("503"));
        assert!(job.failure_reason.is_none());
        assert_eq!(h.channel.errors("p-1"), 0);
    }

    #[tokio::test]
    async fn test_remote_parse_failure_is_terminal_when_budget_is_one() {
        let h = harness(ScriptedProvider::new().with_statuses("p-1", &["queued", "failed"]), settings());
        let job_id = submit(&h, "p-1", 1).await;
        let handle = h.pool.start().await.unwrap();

        let job = wait_terminal(&h.queue, &job_id).await;
        handle.shutdown().await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.failure_reason.unwrap().contains("'failed'"));
        let labels: Vec<_> = h.channel.for_project("p-1").iter().map(label).collect();
        assert_eq!(labels, vec!["parsing", "parsing", "parsing", "error"]);
    }

    #[tokio::test]
    async fn test_one_project_is_never_processed_concurrently() {
        let mut s = settings();
        s.concurrency = 4;
        let h = harness(
            ScriptedProvider::new().with_step_delay(Duration::from_millis(20)),
            s,
        );
        let first = submit(&h, "p-1", 3).await;
        let second = submit(&h, "p-1", 3).await;
        assert_eq!(first, second);
        let other = submit(&h, "p-2", 3).await;

        let handle = h.pool.start().await.unwrap();
        wait_terminal(&h.queue, &first).await;
        wait_terminal(&h.queue, &other).await;
        handle.shutdown().await.unwrap();

        assert_eq!(h.provider.max_concurrent("p-1"), 1);
        assert_eq!(h.provider.agent_calls("p-1"), 1);
    }

    #[tokio::test]
    async fn test_jobs_run_in_parallel_up_to_concurrency() {
        let mut s = settings();
        s.concurrency = 3;
        let h = harness(
            ScriptedProvider::new().with_step_delay(Duration::from_millis(100)),
            s,
        );
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(submit(&h, &format!("p-{}", i), 3).await);
        }

        let started = std::time::Instant::now();
        let handle = h.pool.start().await.unwrap();
        for id in &ids {
            assert_eq!(wait_terminal(&h.queue, id).await.status, JobStatus::Finished);
        }
        handle.shutdown().await.unwrap();

        // Each job makes two 100ms provider calls; serial execution needs 600ms.
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn test_shutdown_requeues_stragglers() {
        let mut s = settings();
        s.shutdown_grace = Duration::from_millis(50);
        let h = harness(
            ScriptedProvider::new().with_step_delay(Duration::from_secs(10)),
            s,
        );
        let job_id = submit(&h, "p-1", 3).await;
        let handle = h.pool.start().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while h.queue.get(&job_id).await.unwrap().unwrap().status == JobStatus::Queued {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let requeued = handle.shutdown().await.unwrap();
        assert_eq!(requeued, 1);
        let job = h.queue.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(h.channel.errors("p-1"), 0);
    }

    #[tokio::test]
    async fn test_start_recovers_interrupted_jobs() {
        let h = harness(ScriptedProvider::new(), settings());
        let job_id = submit(&h, "p-1", 3).await;
        let claimed = h.queue.try_dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Parsing);

        let handle = h.pool.start().await.unwrap();
        let job = wait_terminal(&h.queue, &job_id).await;
        handle.shutdown().await.unwrap();

        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.attempts, 1);
    }
}
