//! Shared domain types for the analysis relay.
//!
//! Everything in here is plain data: the job record stored in the queue,
//! the canonical result shape produced by a finished job, and the small
//! enums that describe where a job is in its lifecycle. Behavior lives in
//! the `analyst` crate.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Branch used when a submission does not name one.
pub const DEFAULT_BRANCH: &str = "main";

/// Question asked of the agent when a submission does not carry one.
pub const DEFAULT_QUESTION: &str =
    "Give an overview of this repository: its main components, how they fit together, and the most important code paths.";

/// Attempts granted to a job when the queue configuration does not say otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ── Job status ───────────────────────────────────────────────────────

/// Lifecycle of an analysis job.
///
/// ```text
/// queued → parsing → ready → processing → finished
///            │         │          │
///            └─────────┴──────────┴──→ failed   (budget exhausted)
///            └─────────┴──────────┴──→ queued   (retry)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Parsing,
    Ready,
    Processing,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Parsing => "parsing",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// No automatic transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Claimed by a worker.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Parsing | Self::Ready | Self::Processing)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Forward steps never skip a state. Any in-flight state may fall back to
    /// `queued` (retry) or forward to `failed` (retry budget exhausted).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (*self, next) {
            (Queued, Parsing) => true,
            (Parsing, Ready) => true,
            (Ready, Processing) => true,
            (Processing, Finished) => true,
            (Parsing | Ready | Processing, Queued) => true,
            (Parsing | Ready | Processing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "parsing" => Ok(Self::Parsing),
            "ready" => Ok(Self::Ready),
            "processing" => Ok(Self::Processing),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────────

/// Access token for a private repository.
///
/// The value is only ever handed to the provider's parse call. `Debug` and
/// `Display` are redacted and there is no `Serialize` impl.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────

/// A submission that has passed validation and has a remote project id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub project_id: String,
    pub repo: String,
    pub branch: String,
    pub question: String,
    pub has_credentials: bool,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(project_id: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            repo: repo.into(),
            branch: DEFAULT_BRANCH.to_string(),
            question: DEFAULT_QUESTION.to_string(),
            has_credentials: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    pub fn with_credentials(mut self, has_credentials: bool) -> Self {
        self.has_credentials = has_credentials;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// A job as recorded in the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisJob {
    pub job_id: String,
    pub project_id: String,
    pub repo: String,
    pub branch: String,
    pub question: String,
    pub has_credentials: bool,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest time the job may be claimed again.
    pub run_after: DateTime<Utc>,
    /// Last human-readable progress message.
    pub progress: Option<String>,
    /// Last raw status reported by the provider.
    pub remote_status: Option<String>,
    /// Error from the most recent failed attempt; survives retries.
    pub last_error: Option<String>,
    pub result: Option<AnalysisResult>,
    pub failure_reason: Option<String>,
}

// ── Results ──────────────────────────────────────────────────────────

/// One code location surfaced by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snippet {
    pub node_id: String,
    pub file_path: String,
    pub code: String,
    pub tags: BTreeSet<String>,
    pub description: String,
    pub line_start: u32,
    pub line_end: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultMetadata {
    pub parsed_at: DateTime<Utc>,
    pub total_nodes_found: u64,
    pub processed_nodes: u64,
    pub has_credentials: bool,
}

/// Canonical output of a finished job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub project_id: String,
    pub repo: String,
    pub branch: String,
    pub question: String,
    pub snippets: Vec<Snippet>,
    pub snippets_count: u64,
    pub analysis_response: Option<serde_json::Value>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("snippets_count {count} does not match {actual} snippets")]
    CountMismatch { count: u64, actual: u64 },

    #[error("processed_nodes {processed} does not match snippets_count {count}")]
    ProcessedMismatch { processed: u64, count: u64 },

    #[error("processed_nodes {processed} exceeds total_nodes_found {total}")]
    ProcessedExceedsTotal { processed: u64, total: u64 },

    #[error("duplicate node_id '{0}'")]
    DuplicateNode(String),

    #[error("analysis_response must be an object or null")]
    ResponseNotObject,
}

impl AnalysisResult {
    /// Check the counting and uniqueness rules every finished result obeys.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let actual = self.snippets.len() as u64;
        if self.snippets_count != actual {
            return Err(InvariantViolation::CountMismatch {
                count: self.snippets_count,
                actual,
            });
        }
        if self.metadata.processed_nodes != self.snippets_count {
            return Err(InvariantViolation::ProcessedMismatch {
                processed: self.metadata.processed_nodes,
                count: self.snippets_count,
            });
        }
        if self.metadata.processed_nodes > self.metadata.total_nodes_found {
            return Err(InvariantViolation::ProcessedExceedsTotal {
                processed: self.metadata.processed_nodes,
                total: self.metadata.total_nodes_found,
            });
        }
        let mut seen = BTreeSet::new();
        for snippet in &self.snippets {
            if !seen.insert(snippet.node_id.as_str()) {
                return Err(InvariantViolation::DuplicateNode(snippet.node_id.clone()));
            }
        }
        if let Some(response) = &self.analysis_response
            && !response.is_object()
        {
            return Err(InvariantViolation::ResponseNotObject);
        }
        Ok(())
    }
}

// ── Queue views ──────────────────────────────────────────────────────

/// Counts per queue bucket. `active` covers parsing, ready and processing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed
    }
}
