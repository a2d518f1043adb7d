use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use std::collections::HashMap;

use super::Store;
use super::types::{PersistedEdits, json_column, string_list_column};
use crate::core::registry::{AutomationDescriptor, AutomationKind, RuntimeTarget, Schedule};

const DESCRIPTOR_COLUMNS: &str = "id, name, description, kind, schedule, enabled, tags, runtime, \
     version, handler, flow_json, source_dir, discovered_at";

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn row_to_descriptor(row: &Row<'_>) -> rusqlite::Result<AutomationDescriptor> {
    let kind: String = row.get(3)?;
    let runtime: String = row.get(7)?;
    Ok(AutomationDescriptor {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        kind: AutomationKind::parse(&kind)
            .ok_or_else(|| conversion_error(3, format!("unknown kind '{kind}'")))?,
        schedule: Schedule::parse(&row.get::<_, String>(4)?),
        enabled: row.get(5)?,
        tags: string_list_column(row.get(6)?),
        runtime: RuntimeTarget::parse(&runtime)
            .ok_or_else(|| conversion_error(7, format!("unknown runtime '{runtime}'")))?,
        version: row.get(8)?,
        handler: row.get(9)?,
        flow: json_column(row.get(10)?),
        source_dir: row.get(11)?,
        discovered_at: row.get(12)?,
    })
}

impl Store {
    /// Insert or refresh a descriptor. Callers merge persisted edits in first,
    /// so the row always reflects the effective values.
    pub async fn upsert_automation(&self, descriptor: &AutomationDescriptor) -> Result<()> {
        let tags = serde_json::to_string(&descriptor.tags)?;
        let flow = descriptor
            .flow
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO automations (id, name, description, kind, schedule, enabled, tags, runtime,
                                      version, handler, flow_json, source_dir, discovered_at,
                                      active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                kind = excluded.kind,
                schedule = excluded.schedule,
                enabled = excluded.enabled,
                tags = excluded.tags,
                runtime = excluded.runtime,
                version = excluded.version,
                handler = excluded.handler,
                flow_json = excluded.flow_json,
                source_dir = excluded.source_dir,
                discovered_at = excluded.discovered_at,
                active = 1,
                updated_at = CURRENT_TIMESTAMP",
            params![
                descriptor.id,
                descriptor.name,
                descriptor.description,
                descriptor.kind.as_str(),
                descriptor.schedule.as_str(),
                descriptor.enabled,
                tags,
                descriptor.runtime.as_str(),
                descriptor.version,
                descriptor.handler,
                flow,
                descriptor.source_dir,
                descriptor.discovered_at,
            ],
        )?;
        Ok(())
    }

    /// Hide rows whose module was not found by the latest scan. Their edits
    /// are kept and apply again if the module comes back.
    pub async fn deactivate_missing_automations(&self, scanned_ids: &[String]) -> Result<usize> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT id FROM automations WHERE active = 1")?;
        let active: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        let mut hidden = 0;
        for id in active.iter().filter(|id| !scanned_ids.contains(*id)) {
            hidden += db.execute(
                "UPDATE automations SET active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
                params![id],
            )?;
        }
        Ok(hidden)
    }

    /// Persisted operator edits for the given ids. Ids never stored before
    /// are absent from the map.
    pub async fn get_automation_overrides(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, PersistedEdits>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT enabled, schedule, tags FROM automations WHERE id = ?1")?;
        let mut overrides = HashMap::new();
        for id in ids {
            let row = stmt
                .query_row(params![id], |row| {
                    Ok(PersistedEdits {
                        enabled: row.get(0)?,
                        schedule: Schedule::parse(&row.get::<_, String>(1)?),
                        tags: string_list_column(row.get(2)?),
                    })
                })
                .optional()?;
            if let Some(edits) = row {
                overrides.insert(id.clone(), edits);
            }
        }
        Ok(overrides)
    }

    pub async fn list_automations(&self) -> Result<Vec<AutomationDescriptor>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {DESCRIPTOR_COLUMNS} FROM automations WHERE active = 1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([], row_to_descriptor)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn get_automation(&self, id: &str) -> Result<Option<AutomationDescriptor>> {
        let db = self.db.lock().await;
        let descriptor = db
            .query_row(
                &format!(
                    "SELECT {DESCRIPTOR_COLUMNS} FROM automations WHERE id = ?1 AND active = 1"
                ),
                params![id],
                row_to_descriptor,
            )
            .optional()?;
        Ok(descriptor)
    }

    pub async fn update_automation_edits(&self, id: &str, edits: &PersistedEdits) -> Result<bool> {
        let tags = serde_json::to_string(&edits.tags)?;
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE automations SET enabled = ?2, schedule = ?3, tags = ?4,
                    updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND active = 1",
            params![id, edits.enabled, edits.schedule.as_str(), tags],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::*;
    use chrono::Utc;

    fn descriptor(id: &str) -> AutomationDescriptor {
        AutomationDescriptor {
            id: id.to_string(),
            name: "Research".into(),
            description: "Gathers evidence".into(),
            kind: AutomationKind::Worker,
            schedule: Schedule::Cron("*/10 * * * *".into()),
            enabled: true,
            tags: vec!["pipeline".into()],
            runtime: RuntimeTarget::Local,
            version: "0.1.0".into(),
            handler: "research".into(),
            flow: Some(serde_json::json!({"nodes": [{"id": "fetch"}]})),
            source_dir: "/tmp/workers/research".into(),
            discovered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_then_read_back() {
        let store = test_store().await;
        store.upsert_automation(&descriptor("workers/research")).await.unwrap();
        store.upsert_automation(&descriptor("workers/research")).await.unwrap();

        let all = store.list_automations().await.unwrap();
        assert_eq!(all.len(), 1);
        let got = store.get_automation("workers/research").await.unwrap().unwrap();
        assert_eq!(got.kind, AutomationKind::Worker);
        assert_eq!(got.schedule, Schedule::Cron("*/10 * * * *".into()));
        assert_eq!(got.tags, vec!["pipeline"]);
        assert_eq!(got.flow.unwrap()["nodes"][0]["id"], "fetch");
        assert!(store.get_automation("workers/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overrides_only_cover_known_ids() {
        let store = test_store().await;
        store.upsert_automation(&descriptor("workers/research")).await.unwrap();
        let edits = PersistedEdits {
            enabled: false,
            schedule: Schedule::Manual,
            tags: vec!["paused".into()],
        };
        assert!(
            store
                .update_automation_edits("workers/research", &edits)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_automation_edits("workers/nope", &edits)
                .await
                .unwrap()
        );

        let overrides = store
            .get_automation_overrides(&["workers/research".into(), "agents/new".into()])
            .await
            .unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides["workers/research"], edits);
    }

    #[tokio::test]
    async fn missing_rows_are_hidden_until_seen_again() {
        let store = test_store().await;
        store.upsert_automation(&descriptor("workers/research")).await.unwrap();
        store.upsert_automation(&descriptor("agents/writer")).await.unwrap();

        let hidden = store
            .deactivate_missing_automations(&["workers/research".into()])
            .await
            .unwrap();
        assert_eq!(hidden, 1);
        let ids: Vec<String> = store
            .list_automations()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["workers/research"]);
        assert!(store.get_automation("agents/writer").await.unwrap().is_none());

        store.upsert_automation(&descriptor("agents/writer")).await.unwrap();
        assert!(store.get_automation("agents/writer").await.unwrap().is_some());
    }
}
