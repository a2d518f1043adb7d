use std::collections::HashSet;
use std::path::PathBuf;

const EXPECTED_AUTOMATIONS: &[&str] = &[
    "workers/research",
    "agents/analyst",
    "agents/writer",
    "agents/newsletter",
];

const LOCAL_HANDLERS: &[&str] = &["research", "analyst", "writer"];

fn automations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("automations")
}

fn manifest(id: &str) -> toml::Value {
    let path = automations_dir().join(id).join("automation.toml");
    let raw = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("{} should be readable: {}", path.display(), e));
    toml::from_str(&raw).unwrap_or_else(|e| panic!("{} should parse: {}", path.display(), e))
}

fn str_field<'a>(value: &'a toml::Value, key: &str) -> &'a str {
    value.get(key).and_then(toml::Value::as_str).unwrap_or_default()
}

#[test]
fn bundled_catalog_contains_expected_automations() {
    let mut actual = HashSet::new();
    for category in ["workers", "agents"] {
        let dir = automations_dir().join(category);
        for entry in std::fs::read_dir(&dir).expect("category dir should be readable") {
            let entry = entry.expect("dir entry");
            if entry.path().join("automation.toml").is_file() {
                actual.insert(format!(
                    "{}/{}",
                    category,
                    entry.file_name().to_string_lossy()
                ));
            }
        }
    }
    let expected: HashSet<String> = EXPECTED_AUTOMATIONS.iter().map(|s| s.to_string()).collect();
    assert_eq!(actual, expected);
}

#[test]
fn every_manifest_has_required_keys_and_a_semver_version() {
    for id in EXPECTED_AUTOMATIONS {
        let value = manifest(id);
        assert!(!str_field(&value, "name").is_empty(), "name missing for {}", id);
        assert!(
            matches!(str_field(&value, "kind"), "worker" | "agent"),
            "bad kind for {}",
            id
        );
        assert!(!str_field(&value, "handler").is_empty(), "handler missing for {}", id);
        assert!(
            !str_field(&value, "description").is_empty(),
            "description missing for {}",
            id
        );
        let version = str_field(&value, "version");
        assert!(
            semver::Version::parse(version).is_ok(),
            "version '{}' of {} is not semver",
            version,
            id
        );
    }
}

#[test]
fn local_manifests_use_compiled_handlers_and_cron_schedules() {
    for id in EXPECTED_AUTOMATIONS {
        let value = manifest(id);
        let runtime = value
            .get("runtime")
            .and_then(toml::Value::as_str)
            .unwrap_or("local");
        if runtime != "local" {
            assert_eq!(runtime, "external", "unknown runtime for {}", id);
            continue;
        }
        let handler = str_field(&value, "handler");
        assert!(
            LOCAL_HANDLERS.contains(&handler),
            "{} names handler '{}' which is not built in",
            id,
            handler
        );
        let fields = str_field(&value, "schedule").split_whitespace().count();
        assert_eq!(fields, 5, "{} should carry a five-field cron schedule", id);
    }
}

#[test]
fn flow_graphs_only_reference_declared_nodes() {
    for id in EXPECTED_AUTOMATIONS {
        let value = manifest(id);
        let Some(flow) = value.get("flow") else {
            continue;
        };
        let nodes: HashSet<&str> = flow
            .get("nodes")
            .and_then(toml::Value::as_array)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| n.get("id").and_then(toml::Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        assert!(!nodes.is_empty(), "{} declares a flow without nodes", id);
        for edge in flow
            .get("edges")
            .and_then(toml::Value::as_array)
            .into_iter()
            .flatten()
        {
            for end in ["from", "to"] {
                let node = edge.get(end).and_then(toml::Value::as_str).unwrap_or_default();
                assert!(nodes.contains(node), "{} edge {} '{}' is undeclared", id, end, node);
            }
        }
    }
}

#[test]
fn example_config_parses() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("foreman.example.toml");
    let raw = std::fs::read_to_string(&path).expect("example config should be readable");
    let value: toml::Value = toml::from_str(&raw).expect("example config should parse");
    assert!(value.get("api").and_then(|a| a.get("port")).is_some());
    assert!(value.get("automation_roots").and_then(toml::Value::as_array).is_some());
}
