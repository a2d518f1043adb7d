use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::evidence::{Classification, ResearchEvidence, SubQuery, SubQueryResult};
use super::extract::parse_json;
use super::{Stage, StageDeps, StageStatus, StageWorker, run_batch};
use crate::core::executor::ExecutionContext;
use crate::core::llm::ProviderKind;
use crate::core::registry::{Automation, PrecheckReport};
use crate::core::store::types::ToolRecord;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You consolidate research about a software tool. Reply with \
one JSON object: {\"primary_category\": string, \"tags\": [string], \"short_description\": string, \
\"gaps\": [string], \"contradictions\": [string]}. Use only the evidence given.";

#[derive(Debug, Deserialize)]
struct Synthesis {
    #[serde(default)]
    primary_category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    contradictions: Vec<String>,
}

/// Gathers evidence for queued tools: the product page, six grounded
/// searches and one synthesis call. Queues analysis when done.
pub struct ResearchWorker {
    deps: StageDeps,
}

impl ResearchWorker {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }

    async fn gather(&self, tool: &ToolRecord, ctx: &ExecutionContext) -> Result<ResearchEvidence> {
        let (website_fetch, fetch_error) = match self.deps.fetcher.fetch(&tool.website).await {
            Ok(page) => (Some(page), None),
            Err(e) => {
                warn!(tool_id = %tool.id, "Product page fetch failed: {}", e);
                (None, Some(e.to_string()))
            }
        };
        ctx.steps
            .completed(
                "research.fetch",
                Some(json!({
                    "tool_id": tool.id,
                    "ok": website_fetch.is_some(),
                    "error": fetch_error,
                })),
            )
            .await;

        let mut sub_queries = Vec::with_capacity(SubQuery::ALL.len());
        for kind in SubQuery::ALL {
            let query = kind.query(&tool.name, &tool.website);
            let response = self.deps.search.search(&query).await?;
            sub_queries.push(SubQueryResult::new(kind, query, response));
        }
        let insufficient: Vec<&str> = sub_queries
            .iter()
            .filter(|r| r.insufficient)
            .map(|r| r.kind.as_str())
            .collect();
        ctx.steps
            .completed(
                "research.search",
                Some(json!({ "tool_id": tool.id, "insufficient": insufficient })),
            )
            .await;

        let mut evidence = ResearchEvidence {
            website_fetch,
            fetch_error,
            sub_queries,
            classification: Classification::default(),
            quality_gate_passed: false,
            gaps: Vec::new(),
            contradictions: Vec::new(),
            collected_at: Utc::now(),
        };

        let choice = self
            .deps
            .model_choice(&ctx.automation_id, ProviderKind::OpenAi)
            .await?;
        let response = self
            .deps
            .generate(
                &choice,
                SYNTHESIS_SYSTEM_PROMPT,
                evidence.digest(&tool.name, &tool.website),
            )
            .await?;
        let synthesis: Synthesis = parse_json(&response.text, "research synthesis")?;

        evidence.classification = Classification {
            primary_category: synthesis
                .primary_category
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            tags: synthesis.tags,
            short_description: synthesis.short_description,
        };
        evidence.gaps = synthesis.gaps;
        evidence.contradictions = synthesis.contradictions;
        evidence.quality_gate_passed = evidence.passes_quality_gate();
        ctx.steps
            .completed(
                "research.synthesis",
                Some(json!({
                    "tool_id": tool.id,
                    "category": evidence.classification.primary_category,
                    "quality_gate_passed": evidence.quality_gate_passed,
                })),
            )
            .await;
        Ok(evidence)
    }
}

#[async_trait]
impl StageWorker for ResearchWorker {
    fn stage(&self) -> Stage {
        Stage::Research
    }

    async fn process(&self, tool: &ToolRecord, ctx: &ExecutionContext) -> Result<StageStatus> {
        let evidence = self.gather(tool, ctx).await?;
        let value = serde_json::to_value(&evidence)?;
        self.deps
            .store
            .save_research(
                &tool.id,
                &value,
                evidence.classification.primary_category.as_deref(),
                &evidence.classification.tags,
            )
            .await?;
        self.deps.store.queue_stage(&tool.id, Stage::Analysis).await?;
        info!(
            tool_id = %tool.id,
            quality_gate = evidence.quality_gate_passed,
            "Research complete for {}",
            tool.name
        );
        Ok(StageStatus::Complete)
    }
}

#[async_trait]
impl Automation for ResearchWorker {
    async fn precheck(&self) -> Option<PrecheckReport> {
        Some(self.deps.precheck(ProviderKind::OpenAi, true).await)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<Value> {
        let summary = run_batch(self, &self.deps.store, ctx).await?;
        Ok(serde_json::to_value(summary)?)
    }
}
