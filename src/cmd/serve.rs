//! API server and worker pool: `analyst serve`.

use std::path::PathBuf;

use anyhow::Result;

use analyst::analysis::server::start_server;
use analyst::config::AnalystConfig;

pub fn apply_serve_overrides(
    config: &mut AnalystConfig,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    concurrency: Option<usize>,
    dev: bool,
) {
    if let Some(port) = port {
        config.server.port = port;
    }
    super::apply_db_path(config, db_path);
    if let Some(concurrency) = concurrency {
        config.worker.concurrency = concurrency;
    }
    if dev {
        config.server.dev_mode = true;
    }
}

pub async fn cmd_serve(config: AnalystConfig) -> Result<()> {
    config.validate()?;
    if config.provider.api_key.is_none() {
        tracing::warn!("PROVIDER_API_KEY is not set; provider requests will be unauthenticated");
    }
    start_server(config).await
}
