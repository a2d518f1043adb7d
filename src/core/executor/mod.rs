//! Runs one automation to completion.
//!
//! Every call creates exactly one execution row and seals it exactly once:
//! - local automations run precheck, then the body on its own task so a
//!   panic is observed through the join handle instead of unwinding here;
//! - external automations are handed to the [`Dispatcher`] and sealed on the
//!   outcome of that call alone. Remote progress arrives later as steps.

mod steps;

pub use steps::StepLogger;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::core::dispatch::Dispatcher;
use crate::core::error::PipelineError;
use crate::core::registry::{AutomationDescriptor, HandlerTable, RuntimeTarget};
use crate::core::store::Store;
use crate::core::store::types::{ExecutionStatus, StepStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Schedule,
    Manual,
    Api,
    Cli,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Schedule => "schedule",
            Trigger::Manual => "manual",
            Trigger::Api => "api",
            Trigger::Cli => "cli",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// What an automation body sees of its own run.
#[derive(Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub automation_id: String,
    pub trigger: Trigger,
    /// Restricts a pipeline stage to one item instead of its queue.
    pub target: Option<String>,
    pub steps: StepLogger,
}

pub struct Executor {
    store: Arc<Store>,
    handlers: HandlerTable,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

struct Outcome {
    status: ExecutionStatus,
    error: Option<String>,
    metadata: Option<Value>,
}

impl Outcome {
    fn success(metadata: Value) -> Self {
        Self {
            status: ExecutionStatus::Success,
            error: None,
            metadata: Some(metadata),
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("automation task aborted: {}", err);
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("automation panicked: {}", detail)
}

impl Executor {
    pub fn new(
        store: Arc<Store>,
        handlers: HandlerTable,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Self {
        Self {
            store,
            handlers,
            dispatcher,
        }
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub async fn execute(
        &self,
        descriptor: &AutomationDescriptor,
        trigger: Trigger,
        target: Option<String>,
    ) -> Result<ExecutionResult> {
        let execution_id = self
            .store
            .create_execution(&descriptor.id, trigger.as_str())
            .await?;
        info!(
            automation = %descriptor.id,
            execution_id = %execution_id,
            trigger = trigger.as_str(),
            "Execution started"
        );
        let started = Instant::now();
        let steps = StepLogger::new(self.store.clone(), execution_id.clone());

        let outcome = match descriptor.runtime {
            RuntimeTarget::Local => {
                let ctx = ExecutionContext {
                    execution_id: execution_id.clone(),
                    automation_id: descriptor.id.clone(),
                    trigger,
                    target,
                    steps,
                };
                self.run_local(descriptor, ctx).await
            }
            RuntimeTarget::External => self.run_external(descriptor, &execution_id).await,
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        let sealed = self
            .store
            .seal_execution(
                &execution_id,
                outcome.status,
                outcome.error.as_deref(),
                outcome.metadata.as_ref(),
                duration_ms,
            )
            .await?;
        if !sealed {
            warn!(execution_id = %execution_id, "Execution was already sealed");
        }

        match &outcome.error {
            Some(e) => error!(
                automation = %descriptor.id,
                execution_id = %execution_id,
                "Execution failed: {}",
                e
            ),
            None => info!(
                automation = %descriptor.id,
                execution_id = %execution_id,
                duration_ms,
                "Execution succeeded"
            ),
        }

        Ok(ExecutionResult {
            success: outcome.status == ExecutionStatus::Success,
            execution_id,
            error: outcome.error,
            metadata: outcome.metadata,
        })
    }

    async fn run_local(&self, descriptor: &AutomationDescriptor, ctx: ExecutionContext) -> Outcome {
        let Some(handler) = self.handlers.get(&descriptor.handler) else {
            return Outcome::failure(
                PipelineError::Configuration(format!(
                    "no handler '{}' compiled into this build",
                    descriptor.handler
                ))
                .to_string(),
            );
        };

        if let Some(report) = handler.precheck().await {
            let metadata = json!({ "missing": report.missing });
            if !report.is_ready() {
                ctx.steps
                    .log_step("precheck", StepStatus::Failed, Some(metadata))
                    .await;
                return Outcome::failure(
                    PipelineError::Configuration(report.missing.join(", ")).to_string(),
                );
            }
            ctx.steps
                .log_step("precheck", StepStatus::Completed, Some(metadata))
                .await;
        }

        let body = tokio::spawn(async move { handler.execute(&ctx).await });
        match body.await {
            Ok(Ok(metadata)) => Outcome::success(metadata),
            Ok(Err(e)) => Outcome::failure(e.to_string()),
            Err(join_err) => Outcome::failure(panic_message(join_err)),
        }
    }

    async fn run_external(&self, descriptor: &AutomationDescriptor, execution_id: &str) -> Outcome {
        let Some(dispatcher) = &self.dispatcher else {
            return Outcome::failure(
                PipelineError::Configuration("no external dispatch endpoint configured".into())
                    .to_string(),
            );
        };
        match dispatcher.dispatch(descriptor, execution_id).await {
            Ok(()) => Outcome::success(json!({ "dispatched": true })),
            Err(e) => Outcome::failure(e.to_string()),
        }
    }
}
