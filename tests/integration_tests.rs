//! Integration tests for the analyst CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use chrono::Utc;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use analyst::analysis::db::JobQueueDb;
use analyst_common::NewJob;

/// Helper to create an analyst Command isolated from the caller's environment
fn analyst(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("analyst");
    cmd.current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env_remove("PROVIDER_API_KEY")
        .env_remove("PROVIDER_BASE_URL")
        .env_remove("PROVIDER_AGENT_ID")
        .env_remove("ANALYST_DB_PATH")
        .env_remove("ANALYST_CONCURRENCY");
    cmd
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data/queue.db")
}

fn init_db(dir: &TempDir) {
    analyst(dir)
        .args(["init-db", "--db-path"])
        .arg(db_path(dir))
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        analyst(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init-db"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        analyst(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        analyst(&dir).arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Queue Database Tests
// =============================================================================

mod queue_db {
    use super::*;

    #[test]
    fn test_init_db_creates_database() {
        let dir = TempDir::new().unwrap();
        analyst(&dir)
            .args(["init-db", "--db-path"])
            .arg(db_path(&dir))
            .assert()
            .success()
            .stdout(predicate::str::contains("Queue database initialized"));
        assert!(db_path(&dir).exists());
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        init_db(&dir);
        assert!(db_path(&dir).exists());
    }

    #[test]
    fn test_stats_on_empty_queue() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        analyst(&dir)
            .args(["stats", "--db-path"])
            .arg(db_path(&dir))
            .assert()
            .success()
            .stdout(predicate::str::contains("waiting:   0"))
            .stdout(predicate::str::contains("failed:    0"));
    }

    #[test]
    fn test_stats_without_database_fails() {
        let dir = TempDir::new().unwrap();
        analyst(&dir)
            .args(["stats", "--db-path"])
            .arg(db_path(&dir))
            .assert()
            .failure()
            .stderr(predicate::str::contains("init-db"));
        assert!(!db_path(&dir).exists());
    }

    #[test]
    fn test_status_prints_job_json() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        {
            let db = JobQueueDb::new(&db_path(&dir)).unwrap();
            db.submit(
                &NewJob::new("p-42", "org/repo").with_question("Explain X"),
                Utc::now(),
            )
            .unwrap();
        }

        analyst(&dir)
            .args(["status", "p-42", "--db-path"])
            .arg(db_path(&dir))
            .assert()
            .success()
            .stdout(predicate::str::contains("\"project_id\": \"p-42\""))
            .stdout(predicate::str::contains("\"status\": \"queued\""));

        analyst(&dir)
            .args(["stats", "--db-path"])
            .arg(db_path(&dir))
            .assert()
            .success()
            .stdout(predicate::str::contains("waiting:   1"));
    }

    #[test]
    fn test_status_unknown_project_fails() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        analyst(&dir)
            .args(["status", "nope", "--db-path"])
            .arg(db_path(&dir))
            .assert()
            .failure()
            .stderr(predicate::str::contains("No job recorded for project nope"));
    }

    #[test]
    fn test_purge_keeps_fresh_jobs() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        {
            let db = JobQueueDb::new(&db_path(&dir)).unwrap();
            db.submit(&NewJob::new("p-1", "org/repo"), Utc::now()).unwrap();
        }

        analyst(&dir)
            .args(["purge", "--db-path"])
            .arg(db_path(&dir))
            .assert()
            .success()
            .stdout(predicate::str::contains("Purged 0 job(s)"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        analyst(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[server]"))
            .stdout(predicate::str::contains("port = 3141"))
            .stdout(predicate::str::contains("# PROVIDER_API_KEY: not set"));
    }

    #[test]
    fn test_config_show_reads_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("analyst.toml"),
            "[server]\nport = 9000\n\n[worker]\nconcurrency = 2\n",
        )
        .unwrap();

        analyst(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9000"))
            .stdout(predicate::str::contains("concurrency = 2"));
    }

    #[test]
    fn test_config_show_never_prints_api_key() {
        let dir = TempDir::new().unwrap();
        analyst(&dir)
            .env("PROVIDER_API_KEY", "sk-very-secret")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("# PROVIDER_API_KEY: set"))
            .stdout(predicate::str::contains("sk-very-secret").not());
    }

    #[test]
    fn test_config_validate_rejects_zero_concurrency() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[worker]\nconcurrency = 0\n").unwrap();

        analyst(&dir)
            .arg("--config")
            .arg(&path)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("worker.concurrency"));
    }

    #[test]
    fn test_config_validate_defaults() {
        let dir = TempDir::new().unwrap();
        analyst(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = TempDir::new().unwrap();
        analyst(&dir)
            .args(["--config", "absent.toml", "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("absent.toml"));
    }

    #[test]
    fn test_serve_rejects_invalid_config_before_binding() {
        let dir = TempDir::new().unwrap();
        analyst(&dir)
            .args(["serve", "--concurrency", "0", "--db-path"])
            .arg(db_path(&dir))
            .assert()
            .failure()
            .stderr(predicate::str::contains("worker.concurrency"));
    }
}
