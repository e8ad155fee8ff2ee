//! CLI command implementations.
//!
//! | Module   | Commands handled                         |
//! |----------|------------------------------------------|
//! | `serve`  | `Serve`                                  |
//! | `queue`  | `InitDb`, `Stats`, `Status`, `Purge`     |
//! | `config` | `Config`                                 |

pub mod config;
pub mod queue;
pub mod serve;

use std::path::PathBuf;

use analyst::config::AnalystConfig;

pub use config::cmd_config;
pub use queue::{cmd_init_db, cmd_purge, cmd_stats, cmd_status};
pub use serve::{apply_serve_overrides, cmd_serve};

/// `--db-path` wins over file and environment.
pub fn apply_db_path(config: &mut AnalystConfig, db_path: Option<PathBuf>) {
    if let Some(path) = db_path {
        config.queue.db_path = path;
    }
}
