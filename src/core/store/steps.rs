use anyhow::Result;
use rusqlite::params;
use serde_json::Value;

use super::Store;
use super::types::{StepRecord, StepStatus, json_column};

impl Store {
    pub async fn add_step(
        &self,
        execution_id: &str,
        step_name: &str,
        status: StepStatus,
        metadata: Option<&Value>,
    ) -> Result<i64> {
        let metadata = metadata.map(serde_json::to_string).transpose()?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO execution_steps (execution_id, step_name, status, metadata_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![execution_id, step_name, status.as_str(), metadata],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Steps in the order they were recorded.
    pub async fn list_steps(&self, execution_id: &str) -> Result<Vec<StepRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, execution_id, step_name, status, metadata_json, created_at
             FROM execution_steps WHERE execution_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![execution_id], |row| {
            Ok(StepRecord {
                id: row.get(0)?,
                execution_id: row.get(1)?,
                step_name: row.get(2)?,
                status: row.get(3)?,
                metadata: json_column(row.get(4)?),
                created_at: row.get(5)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
