use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use analyst_common::{AnalysisJob, Credentials, DEFAULT_BRANCH, DEFAULT_QUESTION, NewJob};

use super::db::QueueHandle;
use super::hub::NotificationHub;
use super::metrics::PipelineMetrics;
use super::poller::status_message;
use super::provider::{AnalysisProvider, validate_project_id};
use crate::errors::AnalysisError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub queue: QueueHandle,
    pub provider: Arc<dyn AnalysisProvider>,
    pub hub: Arc<NotificationHub>,
    pub metrics: Arc<PipelineMetrics>,
    pub concurrency: usize,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payloads ───────────────────────────────────────

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub question: Option<String>,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub project_id: String,
    pub job_id: String,
    pub status: String,
    pub deduplicated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub project_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub details: serde_json::Value,
}

impl From<&AnalysisJob> for StatusResponse {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            project_id: job.project_id.clone(),
            status: job.status.to_string(),
            progress: job.progress.clone(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            details: json!({
                "source": "queue",
                "job_id": job.job_id,
                "repo": job.repo,
                "branch": job.branch,
                "remote_status": job.remote_status,
                "last_error": job.last_error,
                "failure_reason": job.failure_reason,
                "created_at": job.created_at,
                "started_at": job.started_at,
                "finished_at": job.finished_at,
                "result": job.result,
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatsResponse {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub concurrency: usize,
    pub max_retries: u32,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Analysis(AnalysisError),
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError::Analysis(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Analysis(err) => {
                let status =
                    StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
                if status.is_server_error() {
                    warn!(error = %err, "Request failed");
                }
                (status, err.to_string())
            }
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

fn queue_unavailable(err: anyhow::Error) -> ApiError {
    ApiError::Analysis(AnalysisError::QueueUnavailable(err))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/analyze", post(submit_analysis))
        .route("/api/analyze/{project_id}", get(get_analysis_status))
        .route("/api/jobs/{job_id}", get(get_job))
        .route("/api/queue/stats", get(queue_stats))
        .route("/api/metrics", get(metrics))
        .route("/health", get(health_check))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn submit_analysis(
    State(state): State<SharedState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = non_blank(req.repo)
        .ok_or_else(|| AnalysisError::Validation("repo is required".into()))?;
    let branch = non_blank(req.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string());
    let question = non_blank(req.question).unwrap_or_else(|| DEFAULT_QUESTION.to_string());
    let credentials = req.credentials.filter(|c| !c.is_empty());

    let project_id = state
        .provider
        .start_parse(&repo, &branch, credentials.as_ref())
        .await?;

    let new_job = NewJob::new(project_id.clone(), repo)
        .with_branch(branch)
        .with_question(question)
        .with_credentials(credentials.is_some())
        .with_max_attempts(state.queue.retry_policy().max_attempts);
    let submission = state
        .queue
        .submit(new_job)
        .await
        .map_err(queue_unavailable)?;
    state.metrics.record_submitted(submission.deduplicated);

    let job = submission.job;
    info!(
        project_id = %job.project_id,
        job_id = %job.job_id,
        deduplicated = submission.deduplicated,
        "Analysis submitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            project_id: job.project_id,
            job_id: job.job_id,
            status: job.status.to_string(),
            deduplicated: submission.deduplicated,
        }),
    ))
}

async fn get_analysis_status(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    validate_project_id(&project_id)?;
    let job = state
        .queue
        .get_by_project(&project_id)
        .await
        .map_err(queue_unavailable)?;
    if let Some(job) = job {
        return Ok(Json(StatusResponse::from(&job)));
    }

    // Not queued here; the provider may still know the project.
    match state.provider.get_status(&project_id).await {
        Ok(remote) => {
            let normalized = remote.normalized();
            Ok(Json(StatusResponse {
                progress: Some(status_message(&normalized)),
                project_id,
                status: normalized,
                attempts: 0,
                max_attempts: 0,
                details: json!({
                    "source": "provider",
                    "remote": remote.details,
                }),
            }))
        }
        Err(AnalysisError::Provider { status: 404, .. }) => Err(ApiError::NotFound(format!(
            "Project {} not found",
            project_id
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn get_job(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Result<Json<AnalysisJob>, ApiError> {
    state
        .queue
        .get(&job_id)
        .await
        .map_err(queue_unavailable)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))
}

async fn queue_stats(
    State(state): State<SharedState>,
) -> Result<Json<QueueStatsResponse>, ApiError> {
    let stats = state.queue.stats().await.map_err(queue_unavailable)?;
    Ok(Json(QueueStatsResponse {
        waiting: stats.waiting,
        active: stats.active,
        completed: stats.completed,
        failed: stats.failed,
        concurrency: state.concurrency,
        max_retries: state.queue.retry_policy().max_attempts,
    }))
}

async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
