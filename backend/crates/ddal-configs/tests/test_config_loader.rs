//! Loader tests for TOML configuration files

use ddal_configs::DdalConfig;
use std::io::Write;

const SAMPLE: &str = r#"
[router]
dialect = "MySQL"
default_schema = "App"
max_between_span = 64

[logging]
level = "debug"
format = "json"

[logging.targets]
ddal_sql = "trace"

[[sharding.rules]]
schema = "app"
table = "orders"
shard_key = "uid"
table_shards = 4

[[sharding.rules]]
table = "regions"

[overrides]
disable_sql_routing = false

[[overrides.routes]]
schema = "app"
table = "audit_log"
physical_schema = "app"
physical_table = "audit_log_2024"

[[sequences]]
schema = "app"
table = "orders"
step = 500
"#;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = DdalConfig::from_file(file.path()).unwrap();

    assert_eq!(config.router.dialect, "mysql");
    assert_eq!(config.router.default_schema.as_deref(), Some("app"));
    assert_eq!(config.router.max_between_span, 64);
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.logging.targets.get("ddal_sql").map(String::as_str), Some("trace"));

    assert_eq!(config.sharding.rules.len(), 2);
    let orders = &config.sharding.rules[0];
    assert_eq!(orders.shard_key.as_deref(), Some("uid"));
    assert_eq!(orders.table_shards, 4);
    assert_eq!(orders.schema_shards, 1);
    assert!(config.sharding.rules[1].shard_key.is_none());

    assert_eq!(config.overrides.routes.len(), 1);
    assert_eq!(
        config.overrides.routes[0].physical_table.as_deref(),
        Some("audit_log_2024")
    );

    assert_eq!(config.sequences.len(), 1);
    assert_eq!(config.sequences[0].step, 500);
    assert_eq!(config.sequences[0].cache_depth, 3);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = DdalConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_invalid_rule_is_rejected_at_load() {
    let toml = r#"
[[sharding.rules]]
table = "orders"
table_shards = 8
"#;
    let err = DdalConfig::from_toml_str(toml).unwrap_err();
    assert!(err.to_string().contains("no shard_key"));
}

#[test]
fn test_empty_document_uses_defaults() {
    let config = DdalConfig::from_toml_str("").unwrap();
    assert_eq!(config.router.dialect, "mysql");
    assert!(config.sharding.rules.is_empty());
    assert!(!config.overrides.disable_sql_routing);
}
