//! Remote parse status polling.
//!
//! [`poll_until_ready`] only waits and reports. It yields a lazy stream of
//! [`PollEvent`]s: one `Progress` per status answer, then exactly one
//! terminal event (`Ready` or `Failed`), then ends. Publishing those events
//! is the consumer's job.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, stream};
use tokio::time::Instant;

use super::provider::AnalysisProvider;
use crate::config::PollerConfig;
use crate::errors::AnalysisError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    /// Consecutive status-request errors tolerated before giving up.
    pub error_budget: u32,
}

impl From<&PollerConfig> for PollSettings {
    fn from(config: &PollerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_wait: Duration::from_secs(config.max_wait_secs),
            error_budget: config.status_error_budget,
        }
    }
}

#[derive(Debug)]
pub enum PollEvent {
    Progress { remote_status: String, message: String },
    Ready,
    Failed(AnalysisError),
}

/// Human-readable message for a remote status. Unknown statuses get a
/// generic message rather than an error.
pub fn status_message(status: &str) -> String {
    match status {
        "submitted" | "queued" => "Repository queued for parsing".to_string(),
        "cloned" => "Repository cloned".to_string(),
        "parsing" => "Parsing repository structure".to_string(),
        "processing" => "Building the code graph".to_string(),
        "indexing" | "inferring" => "Indexing code for search".to_string(),
        "ready" => "Repository ready for analysis".to_string(),
        "failed" | "error" => "Repository parsing failed".to_string(),
        other => format!("Repository parsing in progress ({})", other),
    }
}

struct PollState {
    provider: Arc<dyn AnalysisProvider>,
    project_id: String,
    settings: PollSettings,
    started: Instant,
    deadline: Instant,
    polls: u32,
    consecutive_errors: u32,
    pending: VecDeque<PollEvent>,
    finished: bool,
}

impl PollState {
    fn timeout(&self) -> AnalysisError {
        AnalysisError::Timeout {
            project_id: self.project_id.clone(),
            waited_secs: self.started.elapsed().as_secs(),
        }
    }

    fn finish(&mut self, event: PollEvent) {
        self.pending.push_back(event);
        self.finished = true;
    }

    /// One status request (after the interval sleep, except for the first).
    async fn poll_once(&mut self) {
        if self.polls > 0 {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.settings.poll_interval.min(remaining)).await;
        }
        self.polls += 1;

        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            let err = self.timeout();
            self.finish(PollEvent::Failed(err));
            return;
        }

        let answer =
            tokio::time::timeout(remaining, self.provider.get_status(&self.project_id)).await;
        let status = match answer {
            Err(_) => {
                let err = self.timeout();
                self.finish(PollEvent::Failed(err));
                return;
            }
            Ok(Err(err)) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors > self.settings.error_budget {
                    self.finish(PollEvent::Failed(err));
                } else {
                    tracing::warn!(
                        project_id = %self.project_id,
                        errors = self.consecutive_errors,
                        error = %err,
                        "Status check failed; will retry"
                    );
                }
                return;
            }
            Ok(Ok(status)) => status,
        };
        self.consecutive_errors = 0;

        let normalized = status.normalized();
        tracing::debug!(project_id = %self.project_id, status = %normalized, poll = self.polls, "Remote status");
        self.pending.push_back(PollEvent::Progress {
            message: status_message(&normalized),
            remote_status: normalized.clone(),
        });
        match normalized.as_str() {
            "ready" => self.finish(PollEvent::Ready),
            "failed" | "error" => {
                let err = AnalysisError::ParseFailed {
                    project_id: self.project_id.clone(),
                    status: normalized,
                };
                self.finish(PollEvent::Failed(err));
            }
            _ => {}
        }
    }
}

/// Poll `project_id` until it is ready, reported failed, or `max_wait`
/// elapses. The first status request goes out immediately.
pub fn poll_until_ready(
    provider: Arc<dyn AnalysisProvider>,
    project_id: impl Into<String>,
    settings: PollSettings,
) -> impl Stream<Item = PollEvent> + Send {
    let started = Instant::now();
    let state = PollState {
        provider,
        project_id: project_id.into(),
        deadline: started + settings.max_wait,
        settings,
        started,
        polls: 0,
        consecutive_errors: 0,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            state.poll_once().await;
        }
    })
}
