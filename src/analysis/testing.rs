//! Scripted in-process provider shared by the pipeline, poller and API tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use analyst_common::Credentials;

use super::provider::{AnalysisProvider, RemoteStatus};
use crate::errors::AnalysisError;

/// Agent reply in the shape the prompt asks for, wrapped in prose and a fence.
pub const VALID_REPLY: &str = "Here is what I found:\n```json\n{\n  \"snippets\": [\n    {\"node_id\": \"a:1-5\", \"file_path\": \"a.js\", \"code\": \"...\", \"tags\": [\"util\"], \"line_start\": 1, \"line_end\": 5},\n  ],\n  \"analysis_response\": {\"summary\": \"X is a helper\"}\n}\n```";

pub const NO_JSON_REPLY: &str = "I'm sorry, I could not analyze this repository.";

#[derive(Debug, Clone)]
pub enum Step {
    Status(String),
    Fail(u16),
}

#[derive(Default)]
struct Calls {
    status: HashMap<String, usize>,
    agent: HashMap<String, usize>,
    active: HashMap<String, usize>,
    max_active: HashMap<String, usize>,
    parsed: Vec<(String, String, Option<String>)>,
}

pub struct ScriptedProvider {
    statuses: Mutex<HashMap<String, VecDeque<Step>>>,
    replies: Mutex<HashMap<String, VecDeque<Result<String, u16>>>>,
    fallback_status: String,
    fallback_reply: String,
    parse_error: Option<u16>,
    fixed_project_id: Option<String>,
    step_delay: Duration,
    next_id: AtomicUsize,
    calls: Mutex<Calls>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            replies: Mutex::new(HashMap::new()),
            fallback_status: "ready".to_string(),
            fallback_reply: VALID_REPLY.to_string(),
            parse_error: None,
            fixed_project_id: None,
            step_delay: Duration::ZERO,
            next_id: AtomicUsize::new(1),
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn with_statuses(self, project_id: &str, statuses: &[&str]) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .extend(statuses.iter().map(|s| Step::Status(s.to_string())));
        self
    }

    pub fn with_status_failures(self, project_id: &str, status: u16, count: usize) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .extend(std::iter::repeat_n(Step::Fail(status), count));
        self
    }

    pub fn with_agent_failure(self, project_id: &str, status: u16) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .push_back(Err(status));
        self
    }

    pub fn with_fallback_status(mut self, status: &str) -> Self {
        self.fallback_status = status.to_string();
        self
    }

    pub fn with_fallback_reply(mut self, reply: &str) -> Self {
        self.fallback_reply = reply.to_string();
        self
    }

    pub fn with_parse_error(mut self, status: u16) -> Self {
        self.parse_error = Some(status);
        self
    }

    /// Every parse resolves to the same project id.
    pub fn with_fixed_project_id(mut self, project_id: &str) -> Self {
        self.fixed_project_id = Some(project_id.to_string());
        self
    }

    /// Delay applied to every status and agent call.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn status_calls(&self, project_id: &str) -> usize {
        self.calls.lock().unwrap().status.get(project_id).copied().unwrap_or(0)
    }

    pub fn agent_calls(&self, project_id: &str) -> usize {
        self.calls.lock().unwrap().agent.get(project_id).copied().unwrap_or(0)
    }

    /// Highest number of overlapping provider calls seen for one project.
    pub fn max_concurrent(&self, project_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .max_active
            .get(project_id)
            .copied()
            .unwrap_or(0)
    }

    /// `(repo, branch, token)` for every `start_parse` call.
    pub fn parse_calls(&self) -> Vec<(String, String, Option<String>)> {
        self.calls.lock().unwrap().parsed.clone()
    }

    fn enter(&self, project_id: &str) {
        let mut calls = self.calls.lock().unwrap();
        let active = calls.active.entry(project_id.to_string()).or_default();
        *active += 1;
        let now = *active;
        let max = calls.max_active.entry(project_id.to_string()).or_default();
        *max = (*max).max(now);
    }

    fn leave(&self, project_id: &str) {
        let mut calls = self.calls.lock().unwrap();
        if let Some(active) = calls.active.get_mut(project_id) {
            *active -= 1;
        }
    }

    async fn pause(&self, project_id: &str) {
        self.enter(project_id);
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        self.leave(project_id);
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    async fn start_parse(
        &self,
        repo: &str,
        branch: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String, AnalysisError> {
        self.calls.lock().unwrap().parsed.push((
            repo.to_string(),
            branch.to_string(),
            credentials.map(|c| c.expose().to_string()),
        ));
        if let Some(status) = self.parse_error {
            return Err(AnalysisError::provider(status, "Parse rejected"));
        }
        if let Some(id) = &self.fixed_project_id {
            return Ok(id.clone());
        }
        Ok(format!("p-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn get_status(&self, project_id: &str) -> Result<RemoteStatus, AnalysisError> {
        *self
            .calls
            .lock()
            .unwrap()
            .status
            .entry(project_id.to_string())
            .or_default() += 1;
        self.pause(project_id).await;

        if project_id.starts_with("ghost") {
            return Err(AnalysisError::provider(404, "Unknown project"));
        }
        let step = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(project_id)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Status(status)) => Ok(RemoteStatus::new(status)),
            Some(Step::Fail(status)) => Err(AnalysisError::provider(status, "Status unavailable")),
            None => Ok(RemoteStatus::new(self.fallback_status.clone())),
        }
    }

    async fn invoke_agent(&self, project_id: &str, _prompt: &str) -> Result<String, AnalysisError> {
        *self
            .calls
            .lock()
            .unwrap()
            .agent
            .entry(project_id.to_string())
            .or_default() += 1;
        self.pause(project_id).await;

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(project_id)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(status)) => Err(AnalysisError::provider(status, "Agent unavailable")),
            None => Ok(self.fallback_reply.clone()),
        }
    }
}
