use super::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level DDAL configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DdalConfig {
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub sharding: ShardingSettings,
    /// Static route overrides, consulted when a statement carries no usable shard value
    #[serde(default)]
    pub overrides: OverrideSettings,
    /// ID allocator definitions, one per sequence key
    #[serde(default)]
    pub sequences: Vec<SequenceSettings>,
}

/// SQL routing behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// SQL dialect used to parse statements: "mysql", "postgres", "generic" or "sqlite"
    #[serde(default = "default_sql_dialect")]
    pub dialect: String,

    /// Schema assumed for table references written without a schema.
    /// A rewritten reference stays unqualified when it routes to this schema.
    #[serde(default)]
    pub default_schema: Option<String>,

    /// Widest `BETWEEN lo AND hi` range on a shard key (hi - lo + 1)
    #[serde(default = "default_max_between_span")]
    pub max_between_span: u64,

    /// Parser recursion limit for deeply nested statements
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            dialect: default_sql_dialect(),
            default_schema: None,
            max_between_span: default_max_between_span(),
            recursion_limit: default_recursion_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; console-only when absent
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default = "default_true")]
    pub log_to_console: bool,
    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Optional per-target log level overrides (e.g., ddal_sql="debug")
    /// Configure via a TOML table:
    /// [logging.targets]
    /// ddal_sql = "debug"
    #[serde(default)]
    pub targets: HashMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: None,
            log_to_console: true,
            format: default_log_format(),
            targets: HashMap::new(),
        }
    }
}

/// Rules for the built-in sharding rule engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardingSettings {
    #[serde(default)]
    pub rules: Vec<ShardRuleSettings>,
}

/// One logical table's sharding rule.
///
/// ```toml
/// [[sharding.rules]]
/// schema = "app"
/// table = "orders"
/// shard_key = "uid"
/// table_shards = 4
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRuleSettings {
    /// Logical schema; a rule without schema matches the table in any schema
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    /// Column carrying the shard value. Rules without a shard key are not sharded.
    #[serde(default)]
    pub shard_key: Option<String>,
    #[serde(default = "default_shard_count")]
    pub table_shards: u32,
    #[serde(default = "default_shard_count")]
    pub schema_shards: u32,
    /// Physical table name template, placeholders: {schema}, {table}, {index}
    #[serde(default = "default_table_format")]
    pub table_format: String,
    /// Physical schema name template, placeholders: {schema}, {table}, {index}
    #[serde(default = "default_schema_format")]
    pub schema_format: String,
    /// Zero-pad shard indexes to this width
    #[serde(default = "default_index_width")]
    pub index_width: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideSettings {
    /// Skip SQL-driven routing entirely and rely on the route entries below
    #[serde(default)]
    pub disable_sql_routing: bool,
    #[serde(default)]
    pub routes: Vec<RouteOverrideSettings>,
}

/// A manual route for one logical table: either a physical destination
/// (`physical_table`, optionally `physical_schema`) or a raw shard `value`
/// that is routed through the rule engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOverrideSettings {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    #[serde(default)]
    pub physical_schema: Option<String>,
    #[serde(default)]
    pub physical_table: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Cached ID allocator definition (one sequence key)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSettings {
    pub schema: String,
    pub table: String,
    /// Ids fetched per range
    #[serde(default = "default_sequence_step")]
    pub step: u32,
    /// Ranges prefetched ahead of consumption
    #[serde(default = "default_sequence_cache_depth")]
    pub cache_depth: u32,
    /// Upper bound for `next_value` to wait on an empty cache
    #[serde(default = "default_sequence_timeout_ms")]
    pub timeout_ms: u64,
}
