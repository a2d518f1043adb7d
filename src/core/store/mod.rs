mod automations;
mod executions;
mod settings;
mod steps;
mod tokens;
mod tools;
pub mod types;

pub use settings::GLOBAL_SCOPE;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::platform::{NativePlatform, Platform};

pub const DB_FILE: &str = "foreman.db";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS automations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL,
        schedule TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        tags TEXT NOT NULL DEFAULT '[]',
        runtime TEXT NOT NULL,
        version TEXT NOT NULL,
        handler TEXT NOT NULL,
        flow_json TEXT,
        source_dir TEXT NOT NULL,
        discovered_at TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        automation_id TEXT NOT NULL,
        trigger TEXT NOT NULL,
        status TEXT NOT NULL,
        error TEXT,
        metadata_json TEXT,
        started_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        completed_at DATETIME,
        duration_ms INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS execution_steps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id TEXT NOT NULL,
        step_name TEXT NOT NULL,
        status TEXT NOT NULL,
        metadata_json TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS tools (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        website TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        research_status TEXT NOT NULL DEFAULT 'idle',
        analysis_status TEXT NOT NULL DEFAULT 'idle',
        directory_status TEXT NOT NULL DEFAULT 'idle',
        newsletter_status TEXT NOT NULL DEFAULT 'idle',
        research_json TEXT,
        primary_category TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        summary TEXT,
        features_json TEXT,
        pricing_json TEXT,
        sentiment_json TEXT,
        ratings_json TEXT,
        competitors_json TEXT,
        company_json TEXT,
        confidence_json TEXT,
        research_gaps_json TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS tool_drafts (
        tool_id TEXT PRIMARY KEY,
        slug TEXT NOT NULL,
        front_matter TEXT NOT NULL,
        body TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS settings (
        scope TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (scope, key)
    )",
    "CREATE TABLE IF NOT EXISTS api_tokens (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        token_hash TEXT NOT NULL UNIQUE,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_steps_execution_id_id ON execution_steps(execution_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_executions_automation_started ON executions(automation_id, started_at)",
    "CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)",
];

/// SQLite-backed persistence for automations, executions, the step audit
/// trail, pipeline entities, settings and API tokens.
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).await?;
        }
        NativePlatform::restrict_dir_permissions(&data_dir);

        let path = data_dir.join(DB_FILE);
        let db = Connection::open(&path)?;
        NativePlatform::restrict_file_permissions(&path);
        init_schema(&db)?;
        info!("Store opened at {:?}", path);

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Shared handle for components that keep their own tables (the vault).
    pub fn get_db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }
}

fn init_schema(db: &Connection) -> Result<()> {
    for statement in SCHEMA {
        db.execute(statement, [])?;
    }
    Ok(())
}

/// Fresh store in a throwaway directory.
#[cfg(test)]
pub async fn test_store() -> Store {
    let tmpdir = std::env::temp_dir().join(format!("foreman-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&tmpdir).expect("create temp dir");
    Store::open(&tmpdir).await.expect("open test store")
}
