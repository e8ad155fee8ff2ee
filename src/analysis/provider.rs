//! Client for the remote repository-analysis service.
//!
//! [`AnalysisProvider`] is the seam the API and the worker pool talk to;
//! [`HttpAnalysisProvider`] is the production implementation. Tests swap in
//! scripted providers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use analyst_common::Credentials;

use crate::config::ProviderConfig;
use crate::errors::AnalysisError;
use crate::util::truncate_chars;

/// Header carrying the provider API key.
const API_KEY_HEADER: &str = "x-api-key";

/// Longest provider error body echoed into an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Status report for one remote parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub status: String,
    /// Any other fields the provider sent along.
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

impl RemoteStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            details: serde_json::Map::new(),
        }
    }

    /// Status lowercased and trimmed, for table lookups.
    pub fn normalized(&self) -> String {
        self.status.trim().to_ascii_lowercase()
    }
}

#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Kick off remote parsing. Returns the provider-assigned project id.
    async fn start_parse(
        &self,
        repo: &str,
        branch: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String, AnalysisError>;

    async fn get_status(&self, project_id: &str) -> Result<RemoteStatus, AnalysisError>;

    /// Ask the agent about a parsed project. Returns the agent's raw reply.
    /// May be called more than once for the same project.
    async fn invoke_agent(&self, project_id: &str, prompt: &str) -> Result<String, AnalysisError>;
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct ParseRequest<'a> {
    repo_name: &'a str,
    branch_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    github_token: Option<&'a str>,
}

#[derive(Deserialize)]
struct ParseResponse {
    project_id: Value,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    content: &'a str,
    agent_id: &'a str,
}

#[derive(Deserialize)]
struct MessageResponse {
    message: String,
}

// ── HTTP implementation ──────────────────────────────────────────────

pub struct HttpAnalysisProvider {
    client: reqwest::Client,
    base_url: reqwest::Url,
    api_key: Option<String>,
    agent_id: String,
}

impl std::fmt::Debug for HttpAnalysisProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAnalysisProvider")
            .field("base_url", &self.base_url.as_str())
            .field("agent_id", &self.agent_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpAnalysisProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        Self::with_timeout(config, config.request_timeout())
    }

    pub fn with_timeout(config: &ProviderConfig, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build provider HTTP client")?;
        let base_url = reqwest::Url::parse(config.base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid provider base URL: {}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Provider base URL is not a hierarchical URL: {}", config.base_url);
        }
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            agent_id: config.agent_id.clone(),
        })
    }

    /// Append `segments` to the base URL. Each segment is percent-encoded,
    /// so a project id can never add path components of its own.
    fn url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    /// Send a request and turn transport failures and non-2xx statuses into
    /// `AnalysisError::Provider`.
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, AnalysisError> {
        let resp = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            format!("{} failed with status {}", what, status)
        } else {
            format!("{} failed: {}", what, truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS))
        };
        Err(AnalysisError::provider(status.as_u16(), message))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        what: &str,
    ) -> Result<T, AnalysisError> {
        resp.json::<T>()
            .await
            .map_err(|e| AnalysisError::provider(502, format!("Invalid {} response: {}", what, e)))
    }
}

fn transport_error(what: &str, err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::provider(504, format!("{} timed out", what))
    } else {
        AnalysisError::provider(502, format!("{} request failed: {}", what, err))
    }
}

/// Reject project ids that are not a single opaque path segment.
pub fn validate_project_id(project_id: &str) -> Result<(), AnalysisError> {
    let id = project_id.trim();
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(AnalysisError::Validation(format!(
            "Invalid project_id: {:?}",
            truncate_chars(project_id, 64)
        )));
    }
    Ok(())
}

/// Providers have been seen returning the id as a string or a number.
fn project_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn start_parse(
        &self,
        repo: &str,
        branch: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String, AnalysisError> {
        let body = ParseRequest {
            repo_name: repo,
            branch_name: branch,
            github_token: credentials.filter(|c| !c.is_empty()).map(Credentials::expose),
        };
        let resp = self
            .send(self.client.post(self.url(&["api", "v2", "parse"])).json(&body), "Parse")
            .await?;
        let parsed: ParseResponse = Self::decode(resp, "parse").await?;
        project_id_string(&parsed.project_id)
            .ok_or_else(|| AnalysisError::provider(502, "Parse response carried no project_id"))
    }

    async fn get_status(&self, project_id: &str) -> Result<RemoteStatus, AnalysisError> {
        validate_project_id(project_id)?;
        let url = self.url(&["api", "v2", "parsing-status", project_id]);
        let resp = self
            .send(self.client.get(url), "Status check")
            .await?;
        Self::decode(resp, "status").await
    }

    async fn invoke_agent(&self, project_id: &str, prompt: &str) -> Result<String, AnalysisError> {
        validate_project_id(project_id)?;
        let url = self.url(&["api", "v2", "project", project_id, "message"]);
        let body = MessageRequest {
            content: prompt,
            agent_id: &self.agent_id,
        };
        let resp = self
            .send(self.client.post(url).json(&body), "Agent message")
            .await?;
        let reply: MessageResponse = Self::decode(resp, "agent").await?;
        Ok(reply.message)
    }
}
