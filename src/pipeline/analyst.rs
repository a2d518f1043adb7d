use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use tracing::{debug, info};

use super::evidence::{ResearchEvidence, SubQuery};
use super::extract::parse_json;
use super::{ModelChoice, Stage, StageDeps, StageStatus, StageWorker, run_batch};
use crate::core::error::PipelineError;
use crate::core::executor::ExecutionContext;
use crate::core::llm::ProviderKind;
use crate::core::registry::{Automation, PrecheckReport};
use crate::core::store::types::{AnalysisUpdate, ToolRecord};
use crate::validator::{
    Completeness, ConfidenceReport, ExtractedFields, Field, SourceFlags, ValidationInput, validate,
};

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured facts about a software tool from \
research notes. Reply with one JSON object {\"data\": ..., \"completeness\": \"high\"|\"normal\"|\"low\"}. \
Never invent facts that the notes do not contain; leave them out instead.";

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify a software tool and summarize it in two \
sentences. Reply with one JSON object {\"primary_category\": string, \"summary\": string}.";

/// The independent extraction calls, one per structured field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extraction {
    Features,
    Sentiment,
    Pricing,
    Competitors,
    Company,
}

impl Extraction {
    const ALL: [Extraction; 5] = [
        Extraction::Features,
        Extraction::Sentiment,
        Extraction::Pricing,
        Extraction::Competitors,
        Extraction::Company,
    ];

    fn field(self) -> Field {
        match self {
            Extraction::Features => Field::Features,
            Extraction::Sentiment => Field::Sentiment,
            Extraction::Pricing => Field::Pricing,
            Extraction::Competitors => Field::Competitors,
            Extraction::Company => Field::Company,
        }
    }

    fn instructions(self) -> &'static str {
        match self {
            Extraction::Features => {
                "data: array of {\"name\", \"description\"} for the product's main features."
            }
            Extraction::Sentiment => {
                "data: {\"overall\": \"positive\"|\"mixed\"|\"negative\", \"pros\": [string], \
                 \"cons\": [string], \"ratings\": {platform: number}} using only ratings quoted \
                 from review platforms."
            }
            Extraction::Pricing => {
                "data: {\"model\": \"free\"|\"freemium\"|\"paid\"|\"open_source\", \"tiers\": \
                 [{\"name\", \"price\", \"billing\"}], \"free_trial\": bool}."
            }
            Extraction::Competitors => "data: array of competitor product names.",
            Extraction::Company => {
                "data: {\"name\", \"founded\", \"headquarters\", \"funding\", \"employees\"}."
            }
        }
    }

    /// Value used when the model's answer cannot be parsed.
    fn empty(self) -> Value {
        match self {
            Extraction::Features | Extraction::Competitors => Value::Array(Vec::new()),
            _ => Value::Object(Map::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassifyReply {
    #[serde(default)]
    primary_category: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Split an extraction reply into its payload and completeness hint. Bare
/// payloads without the `data` wrapper are accepted as-is.
fn unwrap_extraction(value: Value) -> (Value, Completeness) {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            let hint = map
                .get("completeness")
                .and_then(Value::as_str)
                .map(str::to_string);
            let data = map.remove("data").unwrap_or(Value::Null);
            (data, Completeness::from_hint(hint.as_deref()))
        }
        other => (other, Completeness::Normal),
    }
}

/// Ratings are extracted together with sentiment and stored separately.
fn split_ratings(sentiment: &mut Value) -> Value {
    match sentiment {
        Value::Object(map) => map
            .remove("ratings")
            .filter(|r| r.is_object())
            .unwrap_or_else(|| Value::Object(Map::new())),
        _ => Value::Object(Map::new()),
    }
}

/// Turns research evidence into structured fields, scores them, and either
/// hands the tool to the writer or parks it for review.
pub struct AnalystWorker {
    deps: StageDeps,
}

impl AnalystWorker {
    pub fn new(deps: StageDeps) -> Self {
        Self { deps }
    }

    async fn extract(
        &self,
        choice: &ModelChoice,
        kind: Extraction,
        digest: &str,
        ctx: &ExecutionContext,
        tool_id: &str,
    ) -> Result<(Value, Completeness)> {
        let prompt = format!("{}\n\nResearch notes:\n{}", kind.instructions(), digest);
        let response = self
            .deps
            .generate(choice, EXTRACTION_SYSTEM_PROMPT, prompt)
            .await?;
        let field = kind.field().name();
        let parsed = match parse_json::<Value>(&response.text, field) {
            Ok(value) => {
                let (data, hint) = unwrap_extraction(value);
                let data = if data.is_null() { kind.empty() } else { data };
                Some((data, hint))
            }
            Err(e) => {
                debug!(tool_id, field, "Extraction fell back to empty: {}", e);
                None
            }
        };
        ctx.steps
            .completed(
                &format!("analysis.extract.{}", field),
                Some(json!({ "tool_id": tool_id, "parsed": parsed.is_some() })),
            )
            .await;
        Ok(parsed.unwrap_or_else(|| (kind.empty(), Completeness::Low)))
    }

    async fn classify(
        &self,
        choice: &ModelChoice,
        digest: &str,
        evidence: &ResearchEvidence,
    ) -> Result<ClassifyReply> {
        let response = self
            .deps
            .generate(choice, CLASSIFY_SYSTEM_PROMPT, digest.to_string())
            .await?;
        let fallback = || ClassifyReply {
            primary_category: evidence.classification.primary_category.clone(),
            summary: evidence.classification.short_description.clone(),
        };
        let reply = parse_json::<ClassifyReply>(&response.text, "classification")
            .unwrap_or_else(|e| {
                debug!("Classification fell back to research output: {}", e);
                fallback()
            });
        Ok(ClassifyReply {
            primary_category: reply
                .primary_category
                .filter(|c| !c.trim().is_empty())
                .or_else(|| fallback().primary_category),
            summary: reply.summary.filter(|s| !s.trim().is_empty()),
        })
    }

    fn validation_input(
        tool: &ToolRecord,
        evidence: &ResearchEvidence,
        completeness: HashMap<Field, Completeness>,
    ) -> ValidationInput {
        let reviews = evidence.sub_query(SubQuery::Reviews);
        let primary_description = evidence
            .website_fetch
            .as_ref()
            .and_then(|p| p.description.clone())
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| tool.description.clone());
        ValidationInput {
            sources: SourceFlags::from_citations(
                !evidence.fetch_failed(),
                &evidence.all_citations(),
            ),
            has_pricing_link: evidence
                .website_fetch
                .as_ref()
                .is_some_and(|p| p.has_pricing_link),
            fetch_failed: evidence.fetch_failed(),
            primary_description,
            reviews_insufficient: reviews.is_none_or(|r| r.insufficient),
            review_citations: reviews.map(|r| r.citations.clone()).unwrap_or_default(),
            insufficient_sub_queries: evidence.insufficient_count(),
            contradictions: evidence.contradictions.clone(),
            consolidation_gaps: evidence.gaps.clone(),
            quality_gate_passed: evidence.quality_gate_passed,
            completeness,
        }
    }

    async fn analyze(&self, tool: &ToolRecord, ctx: &ExecutionContext) -> Result<ConfidenceReport> {
        let research = tool.research.clone().ok_or_else(|| {
            PipelineError::Precondition(format!("tool '{}' has no research evidence", tool.name))
        })?;
        let evidence: ResearchEvidence = serde_json::from_value(research)
            .map_err(|e| PipelineError::parse("research evidence", e.to_string()))?;
        let choice = self
            .deps
            .model_choice(&ctx.automation_id, ProviderKind::OpenAi)
            .await?;
        let digest = evidence.digest(&tool.name, &tool.website);

        let mut fields = ExtractedFields::default();
        let mut completeness = HashMap::new();
        for kind in Extraction::ALL {
            let (data, hint) = self.extract(&choice, kind, &digest, ctx, &tool.id).await?;
            completeness.insert(kind.field(), hint);
            match kind {
                Extraction::Features => fields.features = data,
                Extraction::Sentiment => fields.sentiment = data,
                Extraction::Pricing => fields.pricing = data,
                Extraction::Competitors => fields.competitors = data,
                Extraction::Company => fields.company = data,
            }
        }
        fields.ratings = split_ratings(&mut fields.sentiment);

        let classified = self.classify(&choice, &digest, &evidence).await?;
        fields.classification = json!({
            "primary_category": classified.primary_category,
            "tags": evidence.classification.tags,
        });

        let input = Self::validation_input(tool, &evidence, completeness);
        let report = validate(&input, &mut fields);
        ctx.steps
            .completed(
                "analysis.validate",
                Some(json!({
                    "tool_id": tool.id,
                    "overall": report.overall,
                    "flags": report.flags.len(),
                    "has_critical": report.has_critical,
                })),
            )
            .await;

        let update = AnalysisUpdate {
            primary_category: classified.primary_category,
            summary: classified.summary,
            features: fields.features,
            pricing: fields.pricing,
            sentiment: fields.sentiment,
            ratings: fields.ratings,
            competitors: fields.competitors,
            company: fields.company,
            confidence_scores: serde_json::to_value(&report)?,
            research_gaps: report.gaps.clone(),
        };
        self.deps.store.save_analysis(&tool.id, &update).await?;
        Ok(report)
    }
}

#[async_trait]
impl StageWorker for AnalystWorker {
    fn stage(&self) -> Stage {
        Stage::Analysis
    }

    async fn process(&self, tool: &ToolRecord, ctx: &ExecutionContext) -> Result<StageStatus> {
        let report = self.analyze(tool, ctx).await?;
        if report.needs_review() {
            info!(
                tool_id = %tool.id,
                overall = report.overall,
                "Confidence too low, {} needs review",
                tool.name
            );
            return Ok(StageStatus::NeedsReview);
        }
        self.deps.store.queue_stage(&tool.id, Stage::Directory).await?;
        info!(tool_id = %tool.id, overall = report.overall, "Analysis complete for {}", tool.name);
        Ok(StageStatus::Complete)
    }
}

#[async_trait]
impl Automation for AnalystWorker {
    async fn precheck(&self) -> Option<PrecheckReport> {
        Some(self.deps.precheck(ProviderKind::OpenAi, false).await)
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<Value> {
        let summary = run_batch(self, &self.deps.store, ctx).await?;
        Ok(serde_json::to_value(summary)?)
    }
}
