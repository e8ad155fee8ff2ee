//! Offline queue inspection: `analyst init-db`, `stats`, `status`, `purge`.

use anyhow::{Result, bail};
use chrono::Utc;

use analyst::analysis::db::{JobQueueDb, RetentionPolicy};
use analyst::analysis::server::open_queue_db;
use analyst::config::AnalystConfig;

/// Open an existing queue database; inspection commands never create one.
fn open_existing(config: &AnalystConfig) -> Result<JobQueueDb> {
    let path = &config.queue.db_path;
    if !path.exists() {
        bail!(
            "Queue database not found at {}. Run 'analyst init-db' first.",
            path.display()
        );
    }
    open_queue_db(config)
}

pub fn cmd_init_db(config: &AnalystConfig) -> Result<()> {
    open_queue_db(config)?;
    println!("Queue database initialized at {}", config.queue.db_path.display());
    Ok(())
}

pub fn cmd_stats(config: &AnalystConfig) -> Result<()> {
    let db = open_existing(config)?;
    let stats = db.stats()?;

    println!("Queue: {}", config.queue.db_path.display());
    println!("  waiting:   {}", stats.waiting);
    println!("  active:    {}", stats.active);
    println!("  completed: {}", stats.completed);
    println!("  failed:    {}", stats.failed);
    Ok(())
}

pub fn cmd_status(config: &AnalystConfig, project_id: &str) -> Result<()> {
    let db = open_existing(config)?;
    match db.get_by_project(project_id)? {
        Some(job) => {
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        None => bail!("No job recorded for project {}", project_id),
    }
}

pub fn cmd_purge(config: &AnalystConfig) -> Result<()> {
    let db = open_existing(config)?;
    let retention = RetentionPolicy {
        keep_completed: config.queue.keep_completed,
        keep_failed: config.queue.keep_failed,
        grace: config.queue.retention(),
    };
    let removed = db.cleanup(&retention, Utc::now())?;
    println!("Purged {} job(s)", removed);
    Ok(())
}
