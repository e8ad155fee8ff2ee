//! Typed error hierarchy for the analysis relay.
//!
//! `AnalysisError` covers everything that can go wrong between a client
//! submission and a finished result. The worker pool uses
//! [`AnalysisError::is_retryable`] to decide between requeue and terminal
//! failure; the API uses [`AnalysisError::http_status`] to pick a response
//! code.

use thiserror::Error;

/// Errors from submission, polling, agent invocation and normalization.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Missing or malformed client input. Never enters the queue.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The provider answered with a non-2xx status, or could not be reached
    /// (`status` 502 in that case).
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    /// Remote parsing did not become ready within the wait budget.
    #[error("Timed out after {waited_secs}s waiting for project {project_id} to become ready")]
    Timeout { project_id: String, waited_secs: u64 },

    /// The provider reported a failed or errored parse.
    #[error("Remote parsing of project {project_id} ended with status '{status}'")]
    ParseFailed { project_id: String, status: String },

    /// No JSON object could be located in the agent's reply.
    #[error("Agent output contained no usable JSON object: {0}")]
    MalformedAgentOutput(String),

    /// The queue store could not accept a submission.
    #[error("Job queue unavailable: {0}")]
    QueueUnavailable(#[source] anyhow::Error),

    /// A queue operation failed while a worker was driving a job.
    #[error("Queue error: {0}")]
    Queue(#[source] anyhow::Error),
}

impl AnalysisError {
    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }

    /// Whether a failed attempt may be retried at job level.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }

    /// HTTP status that best describes the error to a client.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Provider { status, .. } => *status,
            Self::Timeout { .. } => 408,
            Self::ParseFailed { .. } | Self::MalformedAgentOutput(_) => 502,
            Self::QueueUnavailable(_) => 503,
            Self::Queue(_) => 500,
        }
    }
}
