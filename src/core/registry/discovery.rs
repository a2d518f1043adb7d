use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use super::{
    AutomationDescriptor, AutomationKind, HandlerTable, MANIFEST_FILE, RuntimeTarget, Schedule,
};
use crate::core::store::Store;

const DEFAULT_VERSION: &str = "0.1.0";

/// On-disk shape of `automation.toml`. Required keys are optional here so a
/// missing one produces a readable error instead of a serde message.
#[derive(Debug, Deserialize)]
struct AutomationManifest {
    name: Option<String>,
    kind: Option<String>,
    handler: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    schedule: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    runtime: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    flow: Option<toml::Value>,
}

fn default_enabled() -> bool {
    true
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

/// Build a descriptor from manifest text. `handler` must resolve in the
/// table unless the automation runs externally.
fn parse_manifest(
    content: &str,
    category: &str,
    dir_name: &str,
    source_dir: &Path,
    handlers: &HandlerTable,
) -> Result<AutomationDescriptor> {
    let manifest: AutomationManifest = toml::from_str(content)?;

    let mut missing = Vec::new();
    if manifest.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
        missing.push("name");
    }
    if manifest.kind.is_none() {
        missing.push("kind");
    }
    if manifest.handler.as_deref().is_none_or(|h| h.trim().is_empty()) {
        missing.push("handler");
    }
    if !missing.is_empty() {
        bail!("missing required keys: {}", missing.join(", "));
    }
    let (Some(name), Some(kind), Some(handler)) = (manifest.name, manifest.kind, manifest.handler)
    else {
        bail!("missing required keys");
    };

    let kind = AutomationKind::parse(&kind).ok_or_else(|| anyhow!("unknown kind '{}'", kind))?;
    let runtime = match manifest.runtime.as_deref() {
        None => RuntimeTarget::Local,
        Some(raw) => RuntimeTarget::parse(raw).ok_or_else(|| anyhow!("unknown runtime '{}'", raw))?,
    };
    if runtime == RuntimeTarget::Local && !handlers.contains(&handler) {
        bail!("handler '{}' is not compiled into this build", handler);
    }

    let version = manifest.version.unwrap_or_else(|| DEFAULT_VERSION.to_string());
    semver::Version::parse(&version).map_err(|e| anyhow!("invalid version '{}': {}", version, e))?;

    let flow = manifest.flow.map(serde_json::to_value).transpose()?;

    Ok(AutomationDescriptor {
        id: format!("{}/{}", category, dir_name),
        name,
        description: manifest.description,
        kind,
        schedule: manifest.schedule.map(Schedule::from).unwrap_or_default(),
        enabled: manifest.enabled,
        tags: manifest.tags,
        runtime,
        version,
        handler,
        flow,
        source_dir: source_dir.to_string_lossy().to_string(),
        discovered_at: Utc::now(),
    })
}

async fn scan_root(root: &Path, handlers: &HandlerTable) -> Result<Vec<AutomationDescriptor>> {
    let category = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("root {:?} has no directory name", root))?;

    let mut found = Vec::new();
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let dir = entry.path();
        let dir_name = entry.file_name().to_string_lossy().to_string();
        if !dir.is_dir() || is_hidden(&dir_name) {
            continue;
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&manifest_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping {:?}: cannot read {}: {}", dir, MANIFEST_FILE, e);
                continue;
            }
        };
        match parse_manifest(&content, &category, &dir_name, &dir, handlers) {
            Ok(descriptor) => found.push(descriptor),
            Err(e) => warn!("Skipping {:?}: {}", dir, e),
        }
    }
    Ok(found)
}

/// Scan every root for automation directories. Bad modules and unreadable
/// roots are logged and skipped; the result is sorted by id.
pub async fn scan(roots: &[PathBuf], handlers: &HandlerTable) -> Vec<AutomationDescriptor> {
    let mut descriptors = Vec::new();
    let mut seen = HashSet::new();

    for root in roots {
        if !root.is_dir() {
            warn!("Automation root {:?} not found, skipping", root);
            continue;
        }
        match scan_root(root, handlers).await {
            Ok(found) => {
                for descriptor in found {
                    if seen.insert(descriptor.id.clone()) {
                        descriptors.push(descriptor);
                    } else {
                        warn!(
                            "Duplicate automation id '{}' in {:?}, ignoring",
                            descriptor.id, root
                        );
                    }
                }
            }
            Err(e) => warn!("Failed to scan automation root {:?}: {}", root, e),
        }
    }

    descriptors.sort_by(|a, b| a.id.cmp(&b.id));
    info!("Discovered {} automations", descriptors.len());
    descriptors
}

/// Merge persisted operator edits over freshly scanned values, write every
/// descriptor back and hide stored rows the scan no longer found.
pub async fn reconcile(
    store: &Store,
    mut scanned: Vec<AutomationDescriptor>,
) -> Result<Vec<AutomationDescriptor>> {
    let ids: Vec<String> = scanned.iter().map(|d| d.id.clone()).collect();
    let overrides = store.get_automation_overrides(&ids).await?;

    for descriptor in &mut scanned {
        if let Some(edits) = overrides.get(&descriptor.id) {
            descriptor.enabled = edits.enabled;
            descriptor.schedule = edits.schedule.clone();
            descriptor.tags = edits.tags.clone();
        }
        store.upsert_automation(descriptor).await?;
    }
    let hidden = store.deactivate_missing_automations(&ids).await?;
    if hidden > 0 {
        warn!("{} stored automations no longer load and were deactivated", hidden);
    }
    Ok(scanned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::ExecutionContext;
    use crate::core::registry::Automation;
    use crate::core::store::test_store;
    use crate::core::store::types::PersistedEdits;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl Automation for Noop {
        async fn execute(&self, _ctx: &ExecutionContext) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn handlers() -> HandlerTable {
        let mut table = HandlerTable::new();
        table.register("research", Arc::new(Noop));
        table
    }

    const GOOD: &str = r#"
name = "Research"
kind = "worker"
handler = "research"
description = "Gathers evidence"
schedule = "*/30 * * * *"
tags = ["pipeline"]

[flow]
nodes = [{ id = "fetch" }, { id = "search" }]
"#;

    fn write_module(root: &Path, dir: &str, manifest: &str) {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(MANIFEST_FILE), manifest).unwrap();
    }

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("workers");
        write_module(&root, "research", GOOD);
        write_module(
            &root,
            "broken",
            "name = \"Broken\"\nkind = \"worker\"\ndescription = \"no handler\"\n",
        );
        write_module(&root, "_template", GOOD);
        write_module(&root, ".cache", GOOD);
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("README.md"), "not a module").unwrap();
        (tmp, root)
    }

    #[tokio::test]
    async fn one_good_module_and_one_missing_handler() {
        let (_tmp, root) = fixture();
        let found = scan(&[root], &handlers()).await;
        assert_eq!(found.len(), 1);
        let d = &found[0];
        assert_eq!(d.id, "workers/research");
        assert_eq!(d.kind, AutomationKind::Worker);
        assert_eq!(d.version, "0.1.0");
        assert_eq!(d.runtime, RuntimeTarget::Local);
        assert_eq!(d.flow.as_ref().unwrap()["nodes"][1]["id"], "search");
    }

    #[tokio::test]
    async fn scanning_twice_is_stable() {
        let (_tmp, root) = fixture();
        let roots = vec![root.clone(), root.join("missing-root")];
        let first = scan(&roots, &handlers()).await;
        let second = scan(&roots, &handlers()).await;
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            let mut b = b.clone();
            b.discovered_at = a.discovered_at;
            assert_eq!(
                serde_json::to_value(a).unwrap(),
                serde_json::to_value(&b).unwrap()
            );
        }
    }

    #[test]
    fn unregistered_handler_is_allowed_for_external_runtime() {
        let manifest = "name = \"Newsletter\"\nkind = \"agent\"\nhandler = \"newsletter\"\nruntime = \"external\"\n";
        let d = parse_manifest(manifest, "agents", "newsletter", Path::new("/x"), &handlers())
            .unwrap();
        assert_eq!(d.runtime, RuntimeTarget::External);
        assert_eq!(d.schedule, Schedule::Manual);

        let local = manifest.replace("runtime = \"external\"\n", "");
        assert!(
            parse_manifest(&local, "agents", "newsletter", Path::new("/x"), &handlers()).is_err()
        );
    }

    #[test]
    fn bad_kind_and_version_are_rejected() {
        let bad_kind = "name = \"R\"\nkind = \"robot\"\nhandler = \"research\"\n";
        assert!(parse_manifest(bad_kind, "w", "r", Path::new("/x"), &handlers()).is_err());
        let bad_version = "name = \"R\"\nkind = \"worker\"\nhandler = \"research\"\nversion = \"one\"\n";
        assert!(parse_manifest(bad_version, "w", "r", Path::new("/x"), &handlers()).is_err());
        let err = parse_manifest("description = \"\"", "w", "r", Path::new("/x"), &handlers())
            .unwrap_err()
            .to_string();
        assert!(err.contains("name, kind, handler"));
    }

    #[tokio::test]
    async fn reconcile_keeps_operator_edits() {
        let (_tmp, root) = fixture();
        let store = test_store().await;
        let scanned = scan(std::slice::from_ref(&root), &handlers()).await;
        reconcile(&store, scanned).await.unwrap();

        let edits = PersistedEdits {
            enabled: false,
            schedule: Schedule::Manual,
            tags: vec!["paused".into()],
        };
        store
            .update_automation_edits("workers/research", &edits)
            .await
            .unwrap();

        let rescanned = scan(&[root], &handlers()).await;
        let merged = reconcile(&store, rescanned).await.unwrap();
        assert!(!merged[0].enabled);
        assert_eq!(merged[0].schedule, Schedule::Manual);
        assert_eq!(merged[0].tags, vec!["paused"]);
        let stored = store.get_automation("workers/research").await.unwrap().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.description, "Gathers evidence");
    }
}
