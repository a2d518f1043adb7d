//! Content pipeline stages.
//!
//! Stages never call each other. Each owns one status column on a tool and
//! hands work on by queueing the next stage's column. A stage run claims up
//! to `batch_size` queued tools, processes them one at a time, and records
//! each as a step on the current execution.

pub mod analyst;
pub mod evidence;
pub mod extract;
pub mod research;
pub mod writer;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::error::PipelineError;
use crate::core::executor::ExecutionContext;
use crate::core::fetch::PageFetcher;
use crate::core::llm::{GenerationRequest, GenerationResponse, LlmManager, ProviderKind};
use crate::core::registry::PrecheckReport;
use crate::core::search::SearchProvider;
use crate::core::store::types::ToolRecord;
use crate::core::store::{GLOBAL_SCOPE, Store};

pub const DEFAULT_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Research,
    Analysis,
    Directory,
    Newsletter,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Analysis => "analysis",
            Stage::Directory => "directory",
            Stage::Newsletter => "newsletter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "research" => Some(Stage::Research),
            "analysis" => Some(Stage::Analysis),
            "directory" => Some(Stage::Directory),
            "newsletter" => Some(Stage::Newsletter),
            _ => None,
        }
    }

    pub fn status_column(self) -> &'static str {
        match self {
            Stage::Research => "research_status",
            Stage::Analysis => "analysis_status",
            Stage::Directory => "directory_status",
            Stage::Newsletter => "newsletter_status",
        }
    }

    /// Current raw status of this stage on a tool.
    pub fn status_of(self, tool: &ToolRecord) -> &str {
        match self {
            Stage::Research => &tool.research_status,
            Stage::Analysis => &tool.analysis_status,
            Stage::Directory => &tool.directory_status,
            Stage::Newsletter => &tool.newsletter_status,
        }
    }
}

/// `idle → queued → in_progress → {complete, failed, needs_review}`, with
/// operators free to re-queue anything not in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Idle,
    Queued,
    InProgress,
    Complete,
    Failed,
    NeedsReview,
}

impl StageStatus {
    /// Column value. In-progress is spelled per stage so the column reads
    /// naturally on its own.
    pub fn as_db(self, stage: Stage) -> &'static str {
        match self {
            StageStatus::Idle => "idle",
            StageStatus::Queued => "queued",
            StageStatus::InProgress => match stage {
                Stage::Research => "researching",
                Stage::Analysis => "analyzing",
                Stage::Directory => "writing",
                Stage::Newsletter => "sending",
            },
            StageStatus::Complete => "complete",
            StageStatus::Failed => "failed",
            StageStatus::NeedsReview => "needs_review",
        }
    }

    pub fn from_db(stage: Stage, value: &str) -> Option<Self> {
        match value {
            "idle" => Some(StageStatus::Idle),
            "queued" => Some(StageStatus::Queued),
            "complete" => Some(StageStatus::Complete),
            "failed" => Some(StageStatus::Failed),
            "needs_review" => Some(StageStatus::NeedsReview),
            other if other == StageStatus::InProgress.as_db(stage) => Some(StageStatus::InProgress),
            _ => None,
        }
    }

    pub fn can_transition(self, to: StageStatus) -> bool {
        use StageStatus::*;
        match (self, to) {
            (InProgress, Complete | Failed | NeedsReview) => true,
            (Queued, InProgress) => true,
            (InProgress, _) => false,
            (_, Queued) => true,
            _ => false,
        }
    }
}

/// One stage's per-tool work. The runner owns claiming and status writes.
#[async_trait]
pub trait StageWorker: Send + Sync {
    fn stage(&self) -> Stage;

    /// Process a claimed tool and return its exit status. Settings are read
    /// in the scope of `ctx.automation_id`.
    async fn process(&self, tool: &ToolRecord, ctx: &ExecutionContext) -> Result<StageStatus>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub needs_review: usize,
}

/// Capabilities shared by every stage.
#[derive(Clone)]
pub struct StageDeps {
    pub store: Arc<Store>,
    pub llm: Arc<LlmManager>,
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelChoice {
    pub provider: ProviderKind,
    /// Empty means the provider's default model.
    pub model: String,
}

impl StageDeps {
    /// Provider and model from the `provider`/`model` settings, scoped to the
    /// automation with a global fallback.
    pub async fn model_choice(&self, scope: &str, default: ProviderKind) -> Result<ModelChoice> {
        let raw = self
            .store
            .get_setting_or("provider", Some(scope), default.as_str())
            .await?;
        let provider = ProviderKind::parse(&raw).ok_or_else(|| {
            PipelineError::Configuration(format!("unknown provider '{}' for {}", raw, scope))
        })?;
        let model = self.store.get_setting_or("model", Some(scope), "").await?;
        Ok(ModelChoice { provider, model })
    }

    pub async fn generate(
        &self,
        choice: &ModelChoice,
        system: &str,
        user: impl Into<String> + Send,
    ) -> Result<GenerationResponse> {
        let request = GenerationRequest::prompt(&choice.model, Some(system), user);
        self.llm.generate(choice.provider, &request).await
    }

    /// Report generation providers a stage cannot run without.
    pub async fn precheck(&self, default: ProviderKind, needs_search: bool) -> PrecheckReport {
        let mut missing = Vec::new();
        match self.model_choice(GLOBAL_SCOPE, default).await {
            Ok(choice) if !self.llm.has_provider(choice.provider) => {
                missing.push(format!("{}_api_key", choice.provider.as_str()));
            }
            Ok(_) => {}
            Err(e) => missing.push(e.to_string()),
        }
        if needs_search && !self.search.is_configured() {
            missing.push(format!("{}_api_key", ProviderKind::Perplexity.as_str()));
        }
        PrecheckReport { missing }
    }
}

pub async fn batch_size(store: &Store, scope: &str) -> Result<usize> {
    let raw = store
        .get_setting_or("batch_size", Some(scope), &DEFAULT_BATCH_SIZE.to_string())
        .await?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => {
            warn!("Ignoring invalid batch_size '{}' for {}", raw, scope);
            Ok(DEFAULT_BATCH_SIZE)
        }
    }
}

/// Operator request to (re)queue one stage of a tool. Refuses an item whose
/// stage is running, and analysis for an item with no research yet.
pub async fn enqueue(store: &Store, tool_id: &str, stage: Stage) -> Result<ToolRecord> {
    let tool = store
        .get_tool(tool_id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("tool '{}'", tool_id)))?;

    let current = StageStatus::from_db(stage, stage.status_of(&tool)).unwrap_or(StageStatus::Idle);
    if !current.can_transition(StageStatus::Queued) {
        return Err(PipelineError::Precondition(format!(
            "{} is already {} for '{}'",
            stage.as_str(),
            stage.status_of(&tool),
            tool.name
        ))
        .into());
    }
    if stage == Stage::Analysis && tool.research.is_none() {
        return Err(PipelineError::Precondition(format!(
            "'{}' has no research yet; queue research first",
            tool.name
        ))
        .into());
    }

    if !store.queue_stage(tool_id, stage).await? {
        return Err(PipelineError::Precondition(format!(
            "{} started for '{}' before it could be queued",
            stage.as_str(),
            tool.name
        ))
        .into());
    }
    info!(tool_id = %tool_id, stage = stage.as_str(), "Queued {}", tool.name);
    store
        .get_tool(tool_id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("tool '{}'", tool_id)).into())
}

/// Claim and process up to one batch for `worker`. A failing item is marked
/// failed and the batch moves on; only store errors abort the run.
pub async fn run_batch(
    worker: &dyn StageWorker,
    store: &Store,
    ctx: &ExecutionContext,
) -> Result<BatchSummary> {
    let stage = worker.stage();
    let target = match &ctx.target {
        Some(id) => Some(id.clone()),
        None => store.get_setting("target", Some(&ctx.automation_id)).await?,
    };
    let limit = if target.is_some() {
        1
    } else {
        batch_size(store, &ctx.automation_id).await?
    };

    let mut summary = BatchSummary::default();
    while summary.processed < limit {
        let Some(tool) = store.claim_next(stage, target.as_deref()).await? else {
            break;
        };
        summary.processed += 1;
        let step = format!("{}:{}", stage.as_str(), tool.id);
        ctx.steps.started(&step).await;

        let outcome = match worker.process(&tool, ctx).await {
            Ok(status) if StageStatus::InProgress.can_transition(status) => Ok(status),
            Ok(status) => Err(anyhow::anyhow!(
                "stage returned {:?}, which cannot end a run",
                status
            )),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(status) => {
                let moved = store
                    .transition_stage(&tool.id, stage, StageStatus::InProgress, status)
                    .await?;
                if !moved {
                    warn!(
                        tool_id = %tool.id,
                        stage = stage.as_str(),
                        "Status changed while {} was running, result dropped",
                        tool.name
                    );
                    let err = anyhow::anyhow!(
                        "{} status changed while running",
                        stage.as_str()
                    );
                    ctx.steps.failed(&step, &err).await;
                    summary.failed += 1;
                    continue;
                }
                if status == StageStatus::NeedsReview {
                    summary.needs_review += 1;
                } else {
                    summary.succeeded += 1;
                }
                ctx.steps
                    .completed(
                        &step,
                        Some(json!({ "tool": tool.name, "status": status.as_db(stage) })),
                    )
                    .await;
            }
            Err(e) => {
                warn!(tool_id = %tool.id, stage = stage.as_str(), "Item failed: {}", e);
                ctx.steps.failed(&step, &e).await;
                let moved = store
                    .transition_stage(&tool.id, stage, StageStatus::InProgress, StageStatus::Failed)
                    .await?;
                if !moved {
                    warn!(
                        tool_id = %tool.id,
                        stage = stage.as_str(),
                        "Status changed while {} was running, failure not recorded",
                        tool.name
                    );
                }
                summary.failed += 1;
            }
        }
    }

    info!(
        stage = stage.as_str(),
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Batch finished"
    );
    Ok(summary)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_store;
    use crate::core::store::types::StepStatus;

    struct Scripted {
        stage: Stage,
        fail_for: &'static str,
        result: StageStatus,
    }

    #[async_trait]
    impl StageWorker for Scripted {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn process(&self, tool: &ToolRecord, _ctx: &ExecutionContext) -> Result<StageStatus> {
            if tool.name == self.fail_for {
                return Err(PipelineError::Precondition("no category".into()).into());
            }
            Ok(self.result)
        }
    }

    #[test]
    fn in_progress_names_are_per_stage() {
        assert_eq!(StageStatus::InProgress.as_db(Stage::Research), "researching");
        assert_eq!(StageStatus::InProgress.as_db(Stage::Directory), "writing");
        assert_eq!(
            StageStatus::from_db(Stage::Analysis, "analyzing"),
            Some(StageStatus::InProgress)
        );
        assert_eq!(StageStatus::from_db(Stage::Research, "analyzing"), None);
        assert_eq!(Stage::parse("Directory"), Some(Stage::Directory));
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        use StageStatus::*;
        assert!(Idle.can_transition(Queued));
        assert!(Queued.can_transition(InProgress));
        assert!(InProgress.can_transition(NeedsReview));
        assert!(Failed.can_transition(Queued));
        assert!(!Idle.can_transition(InProgress));
        assert!(!InProgress.can_transition(Queued));
        assert!(!Complete.can_transition(Failed));
    }

    #[tokio::test]
    async fn enqueue_guards_running_and_unresearched_items() {
        use crate::core::error::error_kind;

        let store = test_store().await;
        let tool = store.create_tool("a", "https://a.dev", "").await.unwrap();

        let queued = enqueue(&store, &tool.id, Stage::Research).await.unwrap();
        assert_eq!(queued.research_status, "queued");

        let err = enqueue(&store, &tool.id, Stage::Analysis).await.unwrap_err();
        assert_eq!(error_kind(&err), "precondition");

        store.claim_next(Stage::Research, None).await.unwrap().unwrap();
        let err = enqueue(&store, &tool.id, Stage::Research).await.unwrap_err();
        assert_eq!(error_kind(&err), "precondition");
        assert!(err.to_string().contains("researching"));

        let err = enqueue(&store, "missing", Stage::Research).await.unwrap_err();
        assert_eq!(error_kind(&err), "not_found");
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_respects_size() {
        let store = Arc::new(test_store().await);
        for name in ["a", "bad", "c", "d"] {
            let tool = store.create_tool(name, "https://example.com", "").await.unwrap();
            store.force_stage_status(&tool.id, Stage::Analysis, StageStatus::Complete).await;
            store.queue_stage(&tool.id, Stage::Directory).await.unwrap();
        }
        store
            .set_setting("agents/writer", "batch_size", "3")
            .await
            .unwrap();

        let worker = Scripted {
            stage: Stage::Directory,
            fail_for: "bad",
            result: StageStatus::Complete,
        };
        let ctx = testing::context(store.clone(), "agents/writer", None);
        let summary = run_batch(&worker, &store, &ctx).await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 2);

        let statuses: Vec<String> = store
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.directory_status)
            .collect();
        assert_eq!(statuses.iter().filter(|s| *s == "failed").count(), 1);
        assert_eq!(statuses.iter().filter(|s| *s == "queued").count(), 1);

        let steps = store.list_steps("exec-test").await.unwrap();
        assert_eq!(steps.len(), 6);
        assert_eq!(
            steps.iter().filter(|s| s.status == StepStatus::Failed).count(),
            1
        );
    }

    #[tokio::test]
    async fn target_limits_the_run_to_one_item() {
        let store = Arc::new(test_store().await);
        let a = store.create_tool("a", "https://a.dev", "").await.unwrap();
        let b = store.create_tool("b", "https://b.dev", "").await.unwrap();
        for id in [&a.id, &b.id] {
            store.force_stage_status(id, Stage::Analysis, StageStatus::Complete).await;
            store.queue_stage(id, Stage::Directory).await.unwrap();
        }

        let worker = Scripted {
            stage: Stage::Directory,
            fail_for: "",
            result: StageStatus::NeedsReview,
        };
        let ctx = testing::context(store.clone(), "agents/writer", Some(&b.id));
        let summary = run_batch(&worker, &store, &ctx).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.needs_review, 1);
        let b = store.get_tool(&b.id).await.unwrap().unwrap();
        assert_eq!(b.directory_status, "needs_review");
        let a = store.get_tool(&a.id).await.unwrap().unwrap();
        assert_eq!(a.directory_status, "queued");
    }

    #[tokio::test]
    async fn non_exit_status_is_treated_as_failure() {
        let store = Arc::new(test_store().await);
        let tool = store.create_tool("a", "https://a.dev", "").await.unwrap();
        store.force_stage_status(&tool.id, Stage::Analysis, StageStatus::Complete).await;
        store.queue_stage(&tool.id, Stage::Directory).await.unwrap();
        let worker = Scripted {
            stage: Stage::Directory,
            fail_for: "",
            result: StageStatus::Queued,
        };
        let ctx = testing::context(store.clone(), "agents/writer", None);
        let summary = run_batch(&worker, &store, &ctx).await.unwrap();
        assert_eq!(summary.failed, 1);
    }

    /// Resets the item's status mid-run, as an operator would.
    struct Resetting {
        store: Arc<Store>,
    }

    #[async_trait]
    impl StageWorker for Resetting {
        fn stage(&self) -> Stage {
            Stage::Research
        }

        async fn process(&self, tool: &ToolRecord, _ctx: &ExecutionContext) -> Result<StageStatus> {
            self.store
                .force_stage_status(&tool.id, Stage::Research, StageStatus::Idle)
                .await;
            Ok(StageStatus::Complete)
        }
    }

    #[tokio::test]
    async fn lost_transition_is_not_counted_as_success() {
        let store = Arc::new(test_store().await);
        let tool = store.create_tool("a", "https://a.dev", "").await.unwrap();
        store.queue_stage(&tool.id, Stage::Research).await.unwrap();

        let worker = Resetting { store: store.clone() };
        let ctx = testing::context(store.clone(), "workers/research", None);
        let summary = run_batch(&worker, &store, &ctx).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 1);

        let tool = store.get_tool(&tool.id).await.unwrap().unwrap();
        assert_eq!(tool.research_status, "idle");
        let steps = store.list_steps("exec-test").await.unwrap();
        assert_eq!(steps.last().unwrap().status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn invalid_batch_size_falls_back() {
        let store = test_store().await;
        assert_eq!(batch_size(&store, "x").await.unwrap(), DEFAULT_BATCH_SIZE);
        store.set_setting(GLOBAL_SCOPE, "batch_size", "zero").await.unwrap();
        assert_eq!(batch_size(&store, "x").await.unwrap(), DEFAULT_BATCH_SIZE);
        store.set_setting("x", "batch_size", "2").await.unwrap();
        assert_eq!(batch_size(&store, "x").await.unwrap(), 2);
    }
}
