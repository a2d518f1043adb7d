use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::Store;

pub const GLOBAL_SCOPE: &str = "global";

impl Store {
    /// Look a key up in `scope` first, then in the global scope.
    pub async fn get_setting(&self, key: &str, scope: Option<&str>) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT value FROM settings WHERE scope = ?1 AND key = ?2")?;
        if let Some(scope) = scope.filter(|s| *s != GLOBAL_SCOPE) {
            let scoped = stmt
                .query_row(params![scope, key], |row| row.get::<_, String>(0))
                .optional()?;
            if scoped.is_some() {
                return Ok(scoped);
            }
        }
        let global = stmt
            .query_row(params![GLOBAL_SCOPE, key], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(global)
    }

    pub async fn get_setting_or(
        &self,
        key: &str,
        scope: Option<&str>,
        default: &str,
    ) -> Result<String> {
        Ok(self
            .get_setting(key, scope)
            .await?
            .unwrap_or_else(|| default.to_string()))
    }

    pub async fn set_setting(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO settings (scope, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope, key) DO UPDATE SET value = excluded.value,
                updated_at = CURRENT_TIMESTAMP",
            params![scope, key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::*;

    #[tokio::test]
    async fn scope_then_global_then_default() {
        let store = test_store().await;
        store.set_setting(GLOBAL_SCOPE, "batch_size", "5").await.unwrap();
        store.set_setting("agents/analyst", "batch_size", "2").await.unwrap();

        assert_eq!(
            store
                .get_setting("batch_size", Some("agents/analyst"))
                .await
                .unwrap()
                .as_deref(),
            Some("2")
        );
        assert_eq!(
            store
                .get_setting("batch_size", Some("agents/writer"))
                .await
                .unwrap()
                .as_deref(),
            Some("5")
        );
        assert_eq!(
            store
                .get_setting_or("model", Some("agents/writer"), "fallback")
                .await
                .unwrap(),
            "fallback"
        );
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = test_store().await;
        store.set_setting(GLOBAL_SCOPE, "k", "1").await.unwrap();
        store.set_setting(GLOBAL_SCOPE, "k", "2").await.unwrap();
        assert_eq!(
            store.get_setting("k", None).await.unwrap().as_deref(),
            Some("2")
        );
    }
}
