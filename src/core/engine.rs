use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::error::PipelineError;
use crate::core::executor::{ExecutionResult, Executor, Trigger};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::registry::discovery;
use crate::core::registry::{AutomationDescriptor, AutomationEdits, Schedule};
use crate::core::scheduler::{AutomationScheduler, normalize_cron};
use crate::core::store::Store;
use crate::core::store::types::{ExecutionRecord, PersistedEdits, StepRecord, StepStatus};

pub const DEFAULT_EXECUTION_LIMIT: usize = 50;

/// Operations exposed to the HTTP API and the CLI: discovery, edits,
/// triggering and history queries.
pub struct Engine {
    store: Arc<Store>,
    executor: Arc<Executor>,
    scheduler: AutomationScheduler,
    roots: Vec<PathBuf>,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        executor: Arc<Executor>,
        scheduler: AutomationScheduler,
        roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            store,
            executor,
            scheduler,
            roots,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Scan, reconcile with stored edits, and re-arm schedules. Returns the
    /// number of automations discovered.
    pub async fn rediscover(&self) -> Result<usize> {
        let scanned = discovery::scan(&self.roots, self.executor.handlers()).await;
        let descriptors = discovery::reconcile(&self.store, scanned).await?;
        let armed = self
            .scheduler
            .schedule(&descriptors, self.executor.clone())
            .await;
        info!(
            "Rediscovery complete: {} automations, {} scheduled",
            descriptors.len(),
            armed
        );
        Ok(descriptors.len())
    }

    pub async fn list(&self) -> Result<Vec<AutomationDescriptor>> {
        self.store.list_automations().await
    }

    pub async fn get(&self, id: &str) -> Result<AutomationDescriptor> {
        self.store
            .get_automation(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("automation '{}'", id)).into())
    }

    /// Apply an operator edit, persist it and rebuild the schedule.
    pub async fn update(&self, id: &str, edits: AutomationEdits) -> Result<AutomationDescriptor> {
        let current = self.get(id).await?;
        let schedule = match edits.schedule.as_deref() {
            Some(raw) => {
                let schedule = Schedule::parse(raw);
                if let Some(expr) = schedule.cron_expr()
                    && normalize_cron(expr).is_none()
                {
                    return Err(PipelineError::Precondition(format!(
                        "'{}' is not a cron expression, 'manual' or 'triggered'",
                        raw
                    ))
                    .into());
                }
                schedule
            }
            None => current.schedule.clone(),
        };
        let persisted = PersistedEdits {
            enabled: edits.enabled.unwrap_or(current.enabled),
            schedule,
            tags: edits.tags.unwrap_or_else(|| current.tags.clone()),
        };
        self.store.update_automation_edits(id, &persisted).await?;
        self.reschedule().await?;
        self.get(id).await
    }

    async fn reschedule(&self) -> Result<usize> {
        let descriptors = self.store.list_automations().await?;
        Ok(self
            .scheduler
            .schedule(&descriptors, self.executor.clone())
            .await)
    }

    /// Run an automation now. Disabled automations still run when asked.
    pub async fn trigger(
        &self,
        id: &str,
        trigger: Trigger,
        target: Option<String>,
    ) -> Result<ExecutionResult> {
        let descriptor = self.get(id).await?;
        self.executor.execute(&descriptor, trigger, target).await
    }

    pub async fn executions(
        &self,
        automation_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>> {
        self.store
            .list_executions(automation_id, limit.unwrap_or(DEFAULT_EXECUTION_LIMIT))
            .await
    }

    pub async fn execution(&self, id: &str) -> Result<ExecutionRecord> {
        self.store
            .get_execution(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("execution '{}'", id)).into())
    }

    pub async fn steps(&self, execution_id: &str) -> Result<Vec<StepRecord>> {
        self.store.list_steps(execution_id).await
    }

    /// Progress reported by an external runtime. Appended as `remote:<name>`;
    /// the execution's own status is never touched.
    pub async fn record_remote_step(
        &self,
        execution_id: &str,
        step_name: &str,
        status: StepStatus,
        metadata: Option<Value>,
    ) -> Result<i64> {
        self.execution(execution_id).await?;
        self.store
            .add_step(
                execution_id,
                &format!("remote:{}", step_name),
                status,
                metadata.as_ref(),
            )
            .await
    }
}

#[async_trait]
impl LifecycleComponent for Engine {
    async fn on_init(&self) -> Result<()> {
        let recovered = self.store.recover_orphaned_executions().await?;
        if recovered > 0 {
            warn!("Marked {} interrupted executions as failed", recovered);
        }
        self.rediscover().await?;
        Ok(())
    }

    async fn on_shutdown(&self) -> Result<()> {
        info!("Engine shutting down with {} armed schedules", self.scheduler.armed_count().await);
        Ok(())
    }
}
