pub mod discovery;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use include_dir::{Dir, include_dir};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::executor::ExecutionContext;

static BUILTINS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/automations");

pub const MANIFEST_FILE: &str = "automation.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationKind {
    Worker,
    Agent,
}

impl AutomationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AutomationKind::Worker => "worker",
            AutomationKind::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "worker" => Some(AutomationKind::Worker),
            "agent" => Some(AutomationKind::Agent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeTarget {
    #[default]
    Local,
    External,
}

impl RuntimeTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeTarget::Local => "local",
            RuntimeTarget::External => "external",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(RuntimeTarget::Local),
            "external" => Some(RuntimeTarget::External),
            _ => None,
        }
    }
}

/// When an automation runs on its own. Anything that is not one of the two
/// keywords is treated as a cron expression and validated when armed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Schedule {
    #[default]
    Manual,
    Triggered,
    Cron(String),
}

impl Schedule {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "manual" => Schedule::Manual,
            "triggered" => Schedule::Triggered,
            expr => Schedule::Cron(expr.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Schedule::Manual => "manual",
            Schedule::Triggered => "triggered",
            Schedule::Cron(expr) => expr,
        }
    }

    pub fn cron_expr(&self) -> Option<&str> {
        match self {
            Schedule::Cron(expr) => Some(expr),
            _ => None,
        }
    }
}

impl From<String> for Schedule {
    fn from(value: String) -> Self {
        Schedule::parse(&value)
    }
}

impl From<Schedule> for String {
    fn from(value: Schedule) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomationDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: AutomationKind,
    pub schedule: Schedule,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub runtime: RuntimeTarget,
    pub version: String,
    pub handler: String,
    /// Declared flow graph. Rendered by clients, never executed.
    pub flow: Option<Value>,
    pub source_dir: String,
    pub discovered_at: DateTime<Utc>,
}

/// Partial update accepted from operators. Absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutomationEdits {
    pub enabled: Option<bool>,
    pub schedule: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Outcome of a configuration completeness check run before the body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrecheckReport {
    pub missing: Vec<String>,
}

impl PrecheckReport {
    pub fn is_ready(&self) -> bool {
        self.missing.is_empty()
    }
}

#[async_trait]
pub trait Automation: Send + Sync {
    /// Configuration completeness check. `None` means the automation has
    /// nothing to verify.
    async fn precheck(&self) -> Option<PrecheckReport> {
        None
    }

    /// Run the body. The returned JSON becomes the execution's metadata.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<Value>;
}

/// Handler keys a manifest may name, mapped to their compiled
/// implementations.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn Automation>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &str, handler: Arc<dyn Automation>) {
        info!("Registering automation handler: {}", key);
        self.handlers.insert(key.to_string(), handler);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Automation>> {
        self.handlers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Unpack the bundled manifests under `<data_dir>/automations`. Existing
/// files are overwritten so upgrades ship new manifests; operator edits
/// live in the store, not in these files.
pub async fn seed_builtin_automations(data_dir: &Path) -> Result<()> {
    let target = data_dir.join("automations");
    if !target.exists() {
        tokio::fs::create_dir_all(&target).await?;
    }
    let extract_path = target.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || BUILTINS_DIR.extract(&extract_path)).await?
    {
        warn!("Failed extracting builtin automations: {}", e);
    }
    Ok(())
}
