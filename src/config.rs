//! Layered configuration for the analysis relay.
//!
//! Values are resolved file → environment → CLI. The file is optional; every
//! field has a default.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev_mode = false
//!
//! [queue]
//! db_path = ".analyst/queue.db"
//! max_attempts = 3
//! backoff_base_secs = 5
//! keep_completed = 10
//! keep_failed = 50
//! retention_secs = 3600
//!
//! [worker]
//! concurrency = 5
//! shutdown_grace_secs = 30
//!
//! [poller]
//! poll_interval_secs = 5
//! max_wait_secs = 600
//! status_error_budget = 3
//!
//! [provider]
//! base_url = "http://localhost:8001"
//! agent_id = "codebase_qna_agent"
//! request_timeout_secs = 60
//!
//! [logging]
//! json = false
//! ```
//!
//! The provider API key is read from `PROVIDER_API_KEY` only and never
//! written back to a file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "analyst.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for local front-end development.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; each further retry doubles it.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Finished jobs kept after cleanup.
    #[serde(default = "default_keep_completed")]
    pub keep_completed: u32,
    /// Failed jobs kept after cleanup.
    #[serde(default = "default_keep_failed")]
    pub keep_failed: u32,
    /// Grace period a terminal job stays visible to status polls.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".analyst/queue.db")
}

fn default_max_attempts() -> u32 {
    analyst_common::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_keep_completed() -> u32 {
    10
}

fn default_keep_failed() -> u32 {
    50
}

fn default_retention_secs() -> u64 {
    3600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl QueueConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_concurrency() -> usize {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    /// Consecutive status-request failures tolerated before giving up.
    #[serde(default = "default_status_error_budget")]
    pub status_error_budget: u32,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_wait_secs() -> u64 {
    600
}

fn default_status_error_budget() -> u32 {
    3
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
            status_error_budget: default_status_error_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_agent_id() -> String {
    "codebase_qna_agent".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            agent_id: default_agent_id(),
            request_timeout_secs: default_request_timeout_secs(),
            api_key: None,
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

/// Effective configuration of the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AnalystConfig {
    /// Load configuration from `path` (or `analyst.toml` in the working
    /// directory when `None`), then apply environment overrides.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Ignore a missing .env; only the variables matter.
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML configuration")
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ANALYST_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("ANALYST_PORT") {
            self.server.port = v.parse().context("ANALYST_PORT must be a port number")?;
        }
        if let Some(v) = lookup("ANALYST_DB_PATH") {
            self.queue.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ANALYST_CONCURRENCY") {
            self.worker.concurrency = v
                .parse()
                .context("ANALYST_CONCURRENCY must be a positive integer")?;
        }
        if let Some(v) = lookup("ANALYST_MAX_ATTEMPTS") {
            self.queue.max_attempts = v
                .parse()
                .context("ANALYST_MAX_ATTEMPTS must be a positive integer")?;
        }
        if let Some(v) = lookup("ANALYST_MAX_WAIT_SECS") {
            self.poller.max_wait_secs = v
                .parse()
                .context("ANALYST_MAX_WAIT_SECS must be a number of seconds")?;
        }
        if let Some(v) = lookup("ANALYST_POLL_INTERVAL_SECS") {
            self.poller.poll_interval_secs = v
                .parse()
                .context("ANALYST_POLL_INTERVAL_SECS must be a number of seconds")?;
        }
        if let Some(v) = lookup("PROVIDER_BASE_URL") {
            self.provider.base_url = v;
        }
        if let Some(v) = lookup("PROVIDER_AGENT_ID") {
            self.provider.agent_id = v;
        }
        if let Some(v) = lookup("PROVIDER_API_KEY")
            && !v.trim().is_empty()
        {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = lookup("ANALYST_LOG_JSON") {
            self.logging.json = v == "1" || v.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            bail!("worker.concurrency must be at least 1");
        }
        if self.queue.max_attempts == 0 {
            bail!("queue.max_attempts must be at least 1");
        }
        if self.poller.poll_interval_secs == 0 {
            bail!("poller.poll_interval_secs must be at least 1");
        }
        if self.poller.poll_interval_secs >= self.poller.max_wait_secs {
            bail!(
                "poller.poll_interval_secs ({}) must be smaller than poller.max_wait_secs ({})",
                self.poller.poll_interval_secs,
                self.poller.max_wait_secs
            );
        }
        if self.provider.base_url.trim().is_empty() {
            bail!("provider.base_url must not be empty");
        }
        Ok(())
    }

    /// Render the configuration as TOML with the API key redacted.
    pub fn to_display_toml(&self) -> Result<String> {
        let mut rendered =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        let key_state = if self.provider.api_key.is_some() {
            "set"
        } else {
            "not set"
        };
        rendered.push_str(&format!("\n# PROVIDER_API_KEY: {}\n", key_state));
        Ok(rendered)
    }
}
