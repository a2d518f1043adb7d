use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use super::Store;
use super::types::{AnalysisUpdate, DraftRecord, ToolRecord, json_column, string_list_column};
use crate::pipeline::{Stage, StageStatus};

const TOOL_COLUMNS: &str = "id, name, website, description, research_status, analysis_status, \
     directory_status, newsletter_status, research_json, primary_category, tags, summary, \
     features_json, pricing_json, sentiment_json, ratings_json, competitors_json, company_json, \
     confidence_json, research_gaps_json, created_at, updated_at";

fn row_to_tool(row: &Row<'_>) -> rusqlite::Result<ToolRecord> {
    Ok(ToolRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        website: row.get(2)?,
        description: row.get(3)?,
        research_status: row.get(4)?,
        analysis_status: row.get(5)?,
        directory_status: row.get(6)?,
        newsletter_status: row.get(7)?,
        research: json_column(row.get(8)?),
        primary_category: row.get(9)?,
        tags: string_list_column(row.get(10)?),
        summary: row.get(11)?,
        features: json_column(row.get(12)?),
        pricing: json_column(row.get(13)?),
        sentiment: json_column(row.get(14)?),
        ratings: json_column(row.get(15)?),
        competitors: json_column(row.get(16)?),
        company: json_column(row.get(17)?),
        confidence_scores: json_column(row.get(18)?),
        research_gaps: row
            .get::<_, Option<String>>(19)?
            .map(string_list_column)
            .unwrap_or_default(),
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

/// Extra condition a row must meet before a stage may claim it.
fn claim_precondition(stage: Stage) -> &'static str {
    match stage {
        Stage::Analysis => " AND research_status = 'complete' AND research_json IS NOT NULL",
        Stage::Directory => " AND analysis_status = 'complete'",
        Stage::Research | Stage::Newsletter => "",
    }
}

impl Store {
    pub async fn create_tool(
        &self,
        name: &str,
        website: &str,
        description: &str,
    ) -> Result<ToolRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        {
            let db = self.db.lock().await;
            db.execute(
                "INSERT INTO tools (id, name, website, description) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, website, description],
            )?;
        }
        self.get_tool(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("tool {} vanished after insert", id))
    }

    pub async fn get_tool(&self, id: &str) -> Result<Option<ToolRecord>> {
        let db = self.db.lock().await;
        let tool = db
            .query_row(
                &format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = ?1"),
                params![id],
                row_to_tool,
            )
            .optional()?;
        Ok(tool)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map([], row_to_tool)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Queue a stage unless it is currently running.
    pub async fn queue_stage(&self, id: &str, stage: Stage) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            &format!(
                "UPDATE tools SET {col} = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1 AND {col} != ?3",
                col = stage.status_column()
            ),
            params![
                id,
                StageStatus::Queued.as_db(stage),
                StageStatus::InProgress.as_db(stage)
            ],
        )?;
        Ok(rows > 0)
    }

    /// Claim one item for `stage`, moving it to in-progress. The update is
    /// conditional on the status the item was selected with, so concurrent
    /// pollers can never claim the same row twice.
    ///
    /// With `only_id`, that item is claimed whatever its status, unless it is
    /// already in progress.
    pub async fn claim_next(
        &self,
        stage: Stage,
        only_id: Option<&str>,
    ) -> Result<Option<ToolRecord>> {
        let col = stage.status_column();
        let extra = claim_precondition(stage);
        let in_progress = StageStatus::InProgress.as_db(stage);
        let queued = StageStatus::Queued.as_db(stage);

        let claimed_id = {
            let db = self.db.lock().await;
            match only_id {
                Some(id) => {
                    let rows = db.execute(
                        &format!(
                            "UPDATE tools SET {col} = ?2, updated_at = CURRENT_TIMESTAMP
                             WHERE id = ?1 AND {col} != ?2{extra}"
                        ),
                        params![id, in_progress],
                    )?;
                    (rows == 1).then(|| id.to_string())
                }
                None => loop {
                    let candidate: Option<String> = db
                        .query_row(
                            &format!(
                                "SELECT id FROM tools WHERE {col} = ?1{extra}
                                 ORDER BY updated_at ASC, rowid ASC LIMIT 1"
                            ),
                            params![queued],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let Some(candidate) = candidate else {
                        break None;
                    };
                    let rows = db.execute(
                        &format!(
                            "UPDATE tools SET {col} = ?2, updated_at = CURRENT_TIMESTAMP
                             WHERE id = ?1 AND {col} = ?3"
                        ),
                        params![candidate, in_progress, queued],
                    )?;
                    if rows == 1 {
                        break Some(candidate);
                    }
                },
            }
        };

        match claimed_id {
            Some(id) => self.get_tool(&id).await,
            None => Ok(None),
        }
    }

    /// Guarded transition; false when the item was not in `from`.
    pub async fn transition_stage(
        &self,
        id: &str,
        stage: Stage,
        from: StageStatus,
        to: StageStatus,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            &format!(
                "UPDATE tools SET {col} = ?3, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1 AND {col} = ?2",
                col = stage.status_column()
            ),
            params![id, from.as_db(stage), to.as_db(stage)],
        )?;
        Ok(rows == 1)
    }

    pub async fn save_research(
        &self,
        id: &str,
        research: &Value,
        primary_category: Option<&str>,
        tags: &[String],
    ) -> Result<()> {
        let research = serde_json::to_string(research)?;
        let tags = serde_json::to_string(tags)?;
        let db = self.db.lock().await;
        db.execute(
            "UPDATE tools SET research_json = ?2,
                    primary_category = COALESCE(?3, primary_category),
                    tags = ?4, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![id, research, primary_category, tags],
        )?;
        Ok(())
    }

    pub async fn save_analysis(&self, id: &str, update: &AnalysisUpdate) -> Result<()> {
        let gaps = serde_json::to_string(&update.research_gaps)?;
        let db = self.db.lock().await;
        db.execute(
            "UPDATE tools SET
                primary_category = COALESCE(?2, primary_category),
                summary = COALESCE(?3, summary),
                features_json = ?4, pricing_json = ?5, sentiment_json = ?6,
                ratings_json = ?7, competitors_json = ?8, company_json = ?9,
                confidence_json = ?10, research_gaps_json = ?11,
                updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![
                id,
                update.primary_category,
                update.summary,
                serde_json::to_string(&update.features)?,
                serde_json::to_string(&update.pricing)?,
                serde_json::to_string(&update.sentiment)?,
                serde_json::to_string(&update.ratings)?,
                serde_json::to_string(&update.competitors)?,
                serde_json::to_string(&update.company)?,
                serde_json::to_string(&update.confidence_scores)?,
                gaps,
            ],
        )?;
        Ok(())
    }

    pub async fn upsert_draft(
        &self,
        tool_id: &str,
        slug: &str,
        front_matter: &str,
        body: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO tool_drafts (tool_id, slug, front_matter, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tool_id) DO UPDATE SET slug = excluded.slug,
                front_matter = excluded.front_matter, body = excluded.body,
                status = 'draft', updated_at = CURRENT_TIMESTAMP",
            params![tool_id, slug, front_matter, body],
        )?;
        Ok(())
    }

    pub async fn get_draft(&self, tool_id: &str) -> Result<Option<DraftRecord>> {
        let db = self.db.lock().await;
        let draft = db
            .query_row(
                "SELECT tool_id, slug, front_matter, body, status, updated_at
                 FROM tool_drafts WHERE tool_id = ?1",
                params![tool_id],
                |row| {
                    Ok(DraftRecord {
                        tool_id: row.get(0)?,
                        slug: row.get(1)?,
                        front_matter: row.get(2)?,
                        body: row.get(3)?,
                        status: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(draft)
    }
}

/// Fixture shortcut that skips the claim flow.
#[cfg(test)]
impl Store {
    pub(crate) async fn force_stage_status(&self, id: &str, stage: Stage, status: StageStatus) {
        let db = self.db.lock().await;
        db.execute(
            &format!("UPDATE tools SET {} = ?2 WHERE id = ?1", stage.status_column()),
            params![id, status.as_db(stage)],
        )
        .unwrap();
    }
}
