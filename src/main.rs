use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use analyst::config::AnalystConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "analyst")]
#[command(version, about = "Asynchronous repository analysis relay")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./analyst.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API, WebSocket feed and worker pool
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        /// Queue database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Number of concurrent workers
        #[arg(long)]
        concurrency: Option<usize>,

        /// Permissive CORS for local front-end development
        #[arg(long)]
        dev: bool,
    },
    /// Create the queue database
    InitDb {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Print queue statistics
    Stats {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Print the job recorded for a project as JSON
    Status {
        project_id: String,

        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Run retention cleanup once
    Purge {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AnalystConfig::load(cli.config.as_deref())?;
    analyst::logging::init(cli.verbose, cli.log_json || config.logging.json)?;

    match cli.command {
        Commands::Serve {
            port,
            db_path,
            concurrency,
            dev,
        } => {
            cmd::apply_serve_overrides(&mut config, port, db_path, concurrency, dev);
            cmd::cmd_serve(config).await?;
        }
        Commands::InitDb { db_path } => {
            cmd::apply_db_path(&mut config, db_path);
            cmd::cmd_init_db(&config)?;
        }
        Commands::Stats { db_path } => {
            cmd::apply_db_path(&mut config, db_path);
            cmd::cmd_stats(&config)?;
        }
        Commands::Status {
            project_id,
            db_path,
        } => {
            cmd::apply_db_path(&mut config, db_path);
            cmd::cmd_status(&config, &project_id)?;
        }
        Commands::Purge { db_path } => {
            cmd::apply_db_path(&mut config, db_path);
            cmd::cmd_purge(&config)?;
        }
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
    }

    Ok(())
}
