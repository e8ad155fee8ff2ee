//! Topic-based notification fan-out.
//!
//! One topic per project id. Each topic is a bounded `broadcast` channel, so
//! publishing never waits on a subscriber: a subscriber that falls behind
//! loses the oldest events and keeps receiving from there. Topics are
//! created by the first subscriber and removed when the last one drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use analyst_common::{AnalysisJob, AnalysisResult, JobStatus};

/// Events buffered per topic before a slow subscriber starts losing the oldest.
pub const DEFAULT_TOPIC_CAPACITY: usize = 64;

// ── Events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// Current job state, sent to a subscriber when it joins.
    /// `status` is `None` when the queue has no job for the project.
    Snapshot {
        project_id: String,
        status: Option<JobStatus>,
        progress: Option<String>,
        attempts: u32,
        max_attempts: u32,
        result: Option<AnalysisResult>,
        failure_reason: Option<String>,
    },
    StatusUpdate {
        project_id: String,
        status: JobStatus,
        remote_status: Option<String>,
        message: String,
    },
    AnalysisComplete {
        project_id: String,
        result: AnalysisResult,
    },
    AnalysisError {
        project_id: String,
        reason: String,
        attempts: u32,
    },
}

impl Notification {
    pub fn snapshot(project_id: &str, job: Option<&AnalysisJob>) -> Self {
        match job {
            Some(job) => Self::Snapshot {
                project_id: project_id.to_string(),
                status: Some(job.status),
                progress: job.progress.clone(),
                attempts: job.attempts,
                max_attempts: job.max_attempts,
                result: job.result.clone(),
                failure_reason: job.failure_reason.clone(),
            },
            None => Self::Snapshot {
                project_id: project_id.to_string(),
                status: None,
                progress: None,
                attempts: 0,
                max_attempts: 0,
                result: None,
                failure_reason: None,
            },
        }
    }

    pub fn status_update(
        project_id: &str,
        status: JobStatus,
        remote_status: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::StatusUpdate {
            project_id: project_id.to_string(),
            status,
            remote_status: remote_status.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            Self::Snapshot { project_id, .. }
            | Self::StatusUpdate { project_id, .. }
            | Self::AnalysisComplete { project_id, .. }
            | Self::AnalysisError { project_id, .. } => project_id,
        }
    }

    /// `analysis_complete` and `analysis_error` end a job's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AnalysisComplete { .. } | Self::AnalysisError { .. })
    }
}

// ── Channel seam ─────────────────────────────────────────────────────

/// Where the worker pool sends job events.
pub trait NotificationChannel: Send + Sync {
    /// Fire-and-forget. Publishing to a topic nobody listens to is a no-op.
    fn publish(&self, topic: &str, event: Notification);
}

// ── Hub ──────────────────────────────────────────────────────────────

pub struct NotificationHub {
    topics: Mutex<HashMap<String, broadcast::Sender<Notification>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        })
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Notification>>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join a topic. The subscription leaves the topic when dropped.
    pub fn subscribe(self: &Arc<Self>, topic: &str) -> Subscription {
        let rx = if self.closed.load(Ordering::SeqCst) {
            // Sender dropped at once: the subscription reports closed on first recv.
            broadcast::channel(1).1
        } else {
            self.topics()
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        Subscription {
            topic: topic.to_string(),
            rx: Some(rx),
            hub: Arc::downgrade(self),
        }
    }

    /// Deliver an event to every current subscriber of `topic`. Returns how
    /// many subscribers it reached.
    pub fn send(&self, topic: &str, event: Notification) -> usize {
        let sender = self.topics().get(topic).cloned();
        match sender {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }

    /// Drop every topic. Open subscriptions observe the close and end.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics().clear();
    }

    /// Drop `rx` under the topic lock and remove the topic if it was the
    /// last receiver. Holding the lock keeps a concurrent `subscribe` from
    /// joining a topic that is being removed.
    fn release(&self, topic: &str, rx: broadcast::Receiver<Notification>) {
        let mut topics = self.topics();
        drop(rx);
        if topics
            .get(topic)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            topics.remove(topic);
        }
    }
}

impl NotificationChannel for NotificationHub {
    fn publish(&self, topic: &str, event: Notification) {
        let delivered = self.send(topic, event);
        tracing::trace!(topic, delivered, "Published notification");
    }
}

// ── Subscription ─────────────────────────────────────────────────────

pub struct Subscription {
    topic: String,
    /// Taken on drop.
    rx: Option<broadcast::Receiver<Notification>>,
    hub: Weak<NotificationHub>,
}

impl Subscription {
    /// Next event in publish order, or `None` once the hub is closed.
    /// Events lost to lag are skipped.
    pub async fn recv(&mut self) -> Option<Notification> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(topic = %self.topic, skipped, "Subscriber lagged; dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take()
            && let Some(hub) = self.hub.upgrade()
        {
            hub.release(&self.topic, rx);
        }
    }
}
