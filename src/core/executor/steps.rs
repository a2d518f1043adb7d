use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

use crate::core::error::error_kind;
use crate::core::store::Store;
use crate::core::store::types::StepStatus;

/// Append-only step audit for one execution. Write failures are reported and
/// swallowed so logging never aborts the caller.
#[derive(Clone)]
pub struct StepLogger {
    store: Arc<Store>,
    execution_id: String,
}

impl StepLogger {
    pub fn new(store: Arc<Store>, execution_id: impl Into<String>) -> Self {
        Self {
            store,
            execution_id: execution_id.into(),
        }
    }

    pub async fn log_step(&self, step_name: &str, status: StepStatus, metadata: Option<Value>) {
        if let Err(e) = self
            .store
            .add_step(&self.execution_id, step_name, status, metadata.as_ref())
            .await
        {
            warn!(
                execution_id = %self.execution_id,
                step = step_name,
                "Failed to record step: {}",
                e
            );
        }
    }

    pub async fn started(&self, step_name: &str) {
        self.log_step(step_name, StepStatus::Started, None).await;
    }

    pub async fn completed(&self, step_name: &str, metadata: Option<Value>) {
        self.log_step(step_name, StepStatus::Completed, metadata).await;
    }

    pub async fn failed(&self, step_name: &str, err: &anyhow::Error) {
        let metadata = json!({ "error": err.to_string(), "kind": error_kind(err) });
        self.log_step(step_name, StepStatus::Failed, Some(metadata)).await;
    }
}
