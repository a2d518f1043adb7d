use anyhow::{Result, bail};
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use super::Store;
use super::types::{ExecutionRecord, ExecutionStatus, json_column};

const EXECUTION_COLUMNS: &str = "id, automation_id, trigger, status, error, metadata_json, \
     started_at, completed_at, duration_ms";

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: row.get(0)?,
        automation_id: row.get(1)?,
        trigger: row.get(2)?,
        status: row.get(3)?,
        error: row.get(4)?,
        metadata: json_column(row.get(5)?),
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        duration_ms: row.get(8)?,
    })
}

impl Store {
    /// Open a new execution in `running` and return its id.
    pub async fn create_execution(&self, automation_id: &str, trigger: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO executions (id, automation_id, trigger, status) VALUES (?1, ?2, ?3, ?4)",
            params![id, automation_id, trigger, ExecutionStatus::Running.as_str()],
        )?;
        Ok(id)
    }

    /// Move a running execution to its terminal status. Returns false when the
    /// execution was already sealed (or never existed); the row is untouched.
    pub async fn seal_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        error: Option<&str>,
        metadata: Option<&Value>,
        duration_ms: i64,
    ) -> Result<bool> {
        if !status.is_terminal() {
            bail!("cannot seal execution {} as {}", id, status.as_str());
        }
        let metadata = metadata.map(serde_json::to_string).transpose()?;
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE executions
             SET status = ?2, error = ?3, metadata_json = ?4, duration_ms = ?5,
                 completed_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status = 'running'",
            params![id, status.as_str(), error, metadata, duration_ms],
        )?;
        Ok(rows == 1)
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
                params![id],
                row_to_execution,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent first, optionally narrowed to one automation.
    pub async fn list_executions(
        &self,
        automation_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE (?1 IS NULL OR automation_id = ?1)
             ORDER BY started_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![automation_id, limit as i64], row_to_execution)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Fail every execution left `running` by a previous process.
    pub async fn recover_orphaned_executions(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE executions
             SET status = 'failure', error = 'interrupted by restart',
                 completed_at = CURRENT_TIMESTAMP
             WHERE status = 'running'",
            [],
        )?;
        Ok(rows)
    }
}
