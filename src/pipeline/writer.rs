use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use super::extract::{slugify, strip_front_matter};
use super::{Stage, StageDeps, StageStatus, StageWorker, run_batch};
use crate::core::error::PipelineError;
use crate::core::executor::ExecutionContext;
use crate::core::llm::ProviderKind;
use crate::core::registry::{Automation, PrecheckReport};
use crate::core::store::types::ToolRecord;

const WRITER_SYSTEM_PROMPT: &str = "You write concise directory entries for software tools in \
Markdown. Start with a one-paragraph overview, then sections for key features, pricing and \
alternatives. Do not include front matter. Do not state facts that are not in the brief.";

/// Directory entry header. Built here rather than by the model so every
/// draft has the same keys.
#[derive(Debug, Serialize)]
struct FrontMatter<'a> {
    title: &'a str,
    slug: String,
    website: &'a str,
    category: &'a str,
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pricing_model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    draft: bool,
    updated: String,
}

fn brief(tool: &ToolRecord, category: &str) -> String {
    let section = |label: &str, value: &Option<Value>| match value {
        Some(v) if !v.is_null() => format!("{}: {}\n", label, v),
        _ => String::new(),
    };
    let mut out = format!(
        "Tool: {}\nWebsite: {}\nCategory: {}\n",
        tool.name, tool.website, category
    );
    if let Some(summary) = &tool.summary {
        out.push_str(&format!("Summary: {}\n", summary));
    }
    out.push_str(&section("Features", &tool.features));
    out.push_str(&section("Pricing", &tool.pricing));
    out.push_str(&section("Sentiment", &tool.sentiment));
    out.push_str(&section("Competitors", &tool.competitors));
    out.push_str(&section("Company", &tool.company));
    if !tool.research_gaps.is_empty() {
        out.push_str(&format!(
            "Unknown (do not guess): {}\n",
            tool.research_gaps.join("; ")
        ));
    }
    out
}

/// Writes a Markdown directory draft for each queued tool.
pub struct WriterWorker {
    deps: StageDeps,
}

impl WriterWorker {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }

    fn front_matter(tool: &ToolRecord, category: &str, slug: String) -> Result<String> {
        let pricing_model = tool
            .pricing
            .as_ref()
            .and_then(|p| p.get("model"))
            .and_then(Value::as_str);
        let confidence = tool
            .confidence_scores
            .as_ref()
            .and_then(|c| c.get("overall"))
            .and_then(Value::as_f64);
        let fm = FrontMatter {
            title: &tool.name,
            slug,
            website: &tool.website,
            category,
            tags: &tool.tags,
            summary: tool.summary.as_deref(),
            pricing_model,
            confidence,
            draft: true,
            updated: Utc::now().to_rfc3339(),
        };
        Ok(serde_yaml::to_string(&fm)?)
    }
}

#[async_trait]
impl StageWorker for WriterWorker {
    fn stage(&self) -> Stage {
        Stage::Directory
    }

    async fn process(&self, tool: &ToolRecord, ctx: &ExecutionContext) -> Result<StageStatus> {
        let category = tool
            .primary_category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                PipelineError::Precondition(format!("tool '{}' has no primary category", tool.name))
            })?;

        let choice = self
            .deps
            .model_choice(&ctx.automation_id, ProviderKind::OpenAi)
            .await?;
        let response = self
            .deps
            .generate(&choice, WRITER_SYSTEM_PROMPT, brief(tool, category))
            .await?;
        let body = strip_front_matter(&response.text).trim();
        if body.is_empty() {
            return Err(
                PipelineError::parse("directory entry", "model returned an empty body").into(),
            );
        }

        let slug = slugify(&tool.name);
        let front_matter = Self::front_matter(tool, category, slug.clone())?;
        self.deps
            .store
            .upsert_draft(&tool.id, &slug, &front_matter, body)
            .await?;
        ctx.steps
            .completed(
                "directory.draft",
                Some(json!({ "tool_id": tool.id, "slug": slug, "chars": body.len() })),
            )
            .await;
        info!(tool_id = %tool.id, slug = %slug, "Draft written for {}", tool.name);
        Ok(StageStatus::Complete)
    }
}

#[async_trait]
impl Automation for WriterWorker {
    async fn precheck(&self) -> Option<PrecheckReport> {
        Some(self.deps.precheck(ProviderKind::OpenAi, false).await)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<Value> {
        let summary = run_batch(self, &self.deps.store, ctx).await?;
        Ok(serde_json::to_value(summary)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::testing::ScriptedGenerator;
    use crate::core::store::test_store;
    use crate::core::store::types::{AnalysisUpdate, StepStatus};
    use crate::pipeline::testing::{StubFetcher, StubSearch, context, deps};
    use std::sync::Arc;

    async fn queued_tool(store: &crate::core::store::Store, category: Option<&str>) -> String {
        let tool = store.create_tool("Acme Boards", "https://acme.dev", "").await.unwrap();
        store
            .save_analysis(
                &tool.id,
                &AnalysisUpdate {
                    primary_category: category.map(str::to_string),
                    summary: Some("Kanban for small teams.".into()),
                    pricing: json!({"model": "freemium", "tiers": []}),
                    confidence_scores: json!({"overall": 0.62}),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .force_stage_status(&tool.id, Stage::Analysis, StageStatus::Complete)
            .await;
        store.queue_stage(&tool.id, Stage::Directory).await.unwrap();
        tool.id
    }

    #[tokio::test]
    async fn draft_gets_generated_body_and_code_built_front_matter() {
        let store = Arc::new(test_store().await);
        let id = queued_tool(&store, Some("project-management")).await;

        let llm = Arc::new(
            ScriptedGenerator::new(ProviderKind::OpenAi)
                .reply("---\ntitle: Wrong\n---\n# Acme Boards\n\nKanban boards for small teams."),
        );
        let worker = WriterWorker::new(deps(
            store.clone(),
            llm.clone(),
            StubSearch::default(),
            StubFetcher::default(),
        ));
        let summary = worker
            .execute(&context(store.clone(), "agents/writer", None))
            .await
            .unwrap();
        assert_eq!(summary["succeeded"], 1);

        let draft = store.get_draft(&id).await.unwrap().unwrap();
        assert_eq!(draft.slug, "acme-boards");
        assert!(draft.body.starts_with("# Acme Boards"));
        assert!(!draft.body.contains("title: Wrong"));

        let fm: serde_yaml::Value = serde_yaml::from_str(&draft.front_matter).unwrap();
        assert_eq!(fm["title"].as_str(), Some("Acme Boards"));
        assert_eq!(fm["category"].as_str(), Some("project-management"));
        assert_eq!(fm["pricing_model"].as_str(), Some("freemium"));
        assert_eq!(fm["confidence"].as_f64(), Some(0.62));
        assert_eq!(fm["draft"].as_bool(), Some(true));

        let tool = store.get_tool(&id).await.unwrap().unwrap();
        assert_eq!(tool.directory_status, "complete");

        let prompt = &llm.requests.lock().unwrap()[0].messages[0].content;
        assert!(prompt.contains("Category: project-management"));
    }

    #[tokio::test]
    async fn missing_category_fails_without_generation() {
        let store = Arc::new(test_store().await);
        let id = queued_tool(&store, None).await;

        let llm = Arc::new(ScriptedGenerator::new(ProviderKind::OpenAi).reply("# Body"));
        let worker = WriterWorker::new(deps(
            store.clone(),
            llm.clone(),
            StubSearch::default(),
            StubFetcher::default(),
        ));
        let summary = worker
            .execute(&context(store.clone(), "agents/writer", None))
            .await
            .unwrap();
        assert_eq!(summary["failed"], 1);
        assert_eq!(llm.request_count(), 0);

        let tool = store.get_tool(&id).await.unwrap().unwrap();
        assert_eq!(tool.directory_status, "failed");
        assert!(store.get_draft(&id).await.unwrap().is_none());
        let steps = store.list_steps("exec-test").await.unwrap();
        let failed = steps.iter().find(|s| s.status == StepStatus::Failed).unwrap();
        assert_eq!(failed.metadata.as_ref().unwrap()["kind"], "precondition");
    }

    #[tokio::test]
    async fn empty_body_is_a_failure() {
        let store = Arc::new(test_store().await);
        let id = queued_tool(&store, Some("devtools")).await;
        let llm = Arc::new(ScriptedGenerator::new(ProviderKind::OpenAi).reply("---\na: b\n---\n"));
        let worker = WriterWorker::new(deps(
            store.clone(),
            llm,
            StubSearch::default(),
            StubFetcher::default(),
        ));
        worker
            .execute(&context(store.clone(), "agents/writer", None))
            .await
            .unwrap();
        let tool = store.get_tool(&id).await.unwrap().unwrap();
        assert_eq!(tool.directory_status, "failed");
    }
}
