use anyhow::{Result, bail};
use console::style;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_cron_scheduler::JobScheduler;

use super::RunArgs;
use super::bootstrap::{Storage, build_engine, open_storage};
use crate::core::engine::Engine;
use crate::core::executor::Trigger;
use crate::core::fetch::is_fetchable;
use crate::core::llm::ProviderKind;
use crate::core::llm::registry::ProviderRegistry;
use crate::core::store::GLOBAL_SCOPE;
use crate::core::terminal::{
    print_error, print_info, print_status, print_success, print_table, print_warn,
};
use crate::logging;
use crate::pipeline::{self, Stage};

/// One-shot commands log warnings only, so their own output stays readable.
fn init_quiet_logging() {
    let (tx, _) = broadcast::channel::<String>(16);
    logging::init("warn", tx, false);
}

/// Storage plus a freshly discovered engine. The scheduler is never started,
/// so nothing fires on its own.
async fn engine() -> Result<(Storage, Arc<Engine>)> {
    init_quiet_logging();
    let storage = open_storage().await?;
    let engine = build_engine(&storage, JobScheduler::new().await?).await?;
    engine.rediscover().await?;
    Ok((storage, engine))
}

fn compact(value: &Option<serde_json::Value>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_default()
}

pub async fn list() -> Result<()> {
    let (_, engine) = engine().await?;
    let automations = engine.list().await?;
    if automations.is_empty() {
        print_warn("No automations discovered. Check automation_roots in foreman.toml.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = automations
        .iter()
        .map(|a| {
            vec![
                a.id.clone(),
                a.kind.as_str().to_string(),
                a.schedule.as_str().to_string(),
                if a.enabled { "yes" } else { "no" }.to_string(),
                a.runtime.as_str().to_string(),
                a.tags.join(","),
            ]
        })
        .collect();
    print_table(
        &["ID", "KIND", "SCHEDULE", "ENABLED", "RUNTIME", "TAGS"],
        &rows,
    );
    Ok(())
}

pub async fn rediscover() -> Result<()> {
    let (_, engine) = engine().await?;
    let count = engine.list().await?.len();
    print_success(&format!("Discovered {} automations", count));
    Ok(())
}

pub async fn run(args: RunArgs) -> Result<()> {
    let (_, engine) = engine().await?;
    let result = engine.trigger(&args.id, Trigger::Cli, args.target).await?;
    print_status("Execution", &result.execution_id);
    if let Some(metadata) = &result.metadata {
        println!("{}", serde_json::to_string_pretty(metadata)?);
    }
    if result.success {
        print_success(&format!("{} finished", args.id));
        Ok(())
    } else {
        bail!(
            "{} failed: {}",
            args.id,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

pub async fn history(automation_id: Option<&str>) -> Result<()> {
    init_quiet_logging();
    let storage = open_storage().await?;
    let executions = storage.store.list_executions(automation_id, 20).await?;
    if executions.is_empty() {
        print_info("No executions recorded yet.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = executions
        .iter()
        .map(|e| {
            vec![
                e.id.clone(),
                e.automation_id.clone(),
                e.trigger.clone(),
                e.status.as_str().to_string(),
                e.started_at.clone(),
                e.duration_ms.map(|d| format!("{}ms", d)).unwrap_or_default(),
                e.error.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["ID", "AUTOMATION", "TRIGGER", "STATUS", "STARTED", "DURATION", "ERROR"],
        &rows,
    );
    Ok(())
}

pub async fn steps(execution_id: &str) -> Result<()> {
    init_quiet_logging();
    let storage = open_storage().await?;
    let Some(execution) = storage.store.get_execution(execution_id).await? else {
        bail!("execution '{}' not found", execution_id);
    };
    print_status(
        &execution.automation_id,
        &format!("{} ({})", execution.status.as_str(), execution.trigger),
    );
    let steps = storage.store.list_steps(execution_id).await?;
    let rows: Vec<Vec<String>> = steps
        .iter()
        .map(|s| {
            vec![
                s.created_at.clone(),
                s.step_name.clone(),
                s.status.as_str().to_string(),
                compact(&s.metadata),
            ]
        })
        .collect();
    print_table(&["AT", "STEP", "STATUS", "METADATA"], &rows);
    Ok(())
}

pub async fn queue(name: &str, website: &str, description: &str) -> Result<()> {
    if !is_fetchable(website) {
        bail!("'{}' is not an http(s) URL", website);
    }
    init_quiet_logging();
    let storage = open_storage().await?;
    let tool = storage.store.create_tool(name, website, description).await?;
    pipeline::enqueue(&storage.store, &tool.id, Stage::Research).await?;
    print_success(&format!("Queued {} for research", name));
    print_status("Tool", &tool.id);
    Ok(())
}

pub async fn token_create(name: &str) -> Result<()> {
    init_quiet_logging();
    let storage = open_storage().await?;
    let (raw, record) = storage.store.create_api_token(name).await?;
    print_success(&format!("Token '{}' created ({})", record.name, record.id));
    println!("\n  {}\n", style(&raw).bold().yellow());
    print_warn("Save this value now. It is stored hashed and cannot be shown again.");
    Ok(())
}

pub async fn secret_set(key: &str, value: &str) -> Result<()> {
    init_quiet_logging();
    let storage = open_storage().await?;
    storage.vault.set_secret(key, value).await?;
    print_success(&format!("Stored '{}' in the vault", key));
    Ok(())
}

pub async fn secret_list() -> Result<()> {
    init_quiet_logging();
    let storage = open_storage().await?;
    let keys = storage.vault.list_keys().await?;
    if keys.is_empty() {
        print_info("The vault is empty. Add keys with `foreman secret set <key> <value>`.");
    }
    for key in keys {
        println!("  {}", key);
    }

    let registry = ProviderRegistry::load()?;
    let provider_keys: Vec<&str> = ProviderKind::ALL
        .into_iter()
        .filter_map(|kind| registry.get(kind))
        .map(|def| def.auth.vault_key.as_str())
        .collect();
    for key in storage.vault.missing_keys(&provider_keys).await? {
        print_warn(&format!("Provider key '{}' is not set", key));
    }
    Ok(())
}

/// Scope is an automation id or `global` when omitted.
pub async fn setting_set(key: &str, value: &str, scope: Option<&str>) -> Result<()> {
    init_quiet_logging();
    let storage = open_storage().await?;
    let scope = scope.unwrap_or(GLOBAL_SCOPE);
    storage.store.set_setting(scope, key, value).await?;
    print_success(&format!("{}.{} = {}", scope, key, value));
    Ok(())
}

pub fn unknown(command: &str) -> Result<()> {
    print_error(&format!("Unknown command '{}'", command));
    super::print_help();
    bail!("unknown command '{}'", command)
}
