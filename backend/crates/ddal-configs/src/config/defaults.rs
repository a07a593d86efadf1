// Default value functions

pub fn default_true() -> bool {
    true
}

pub fn default_sql_dialect() -> String {
    "mysql".to_string()
}

pub fn default_max_between_span() -> u64 {
    1024 // widest BETWEEN range routed value by value
}

pub fn default_recursion_limit() -> usize {
    512
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "compact".to_string()
}

pub fn default_shard_count() -> u32 {
    1
}

pub fn default_table_format() -> String {
    "{table}_{index}".to_string()
}

pub fn default_schema_format() -> String {
    "{schema}_{index}".to_string()
}

pub fn default_index_width() -> usize {
    0 // no zero padding
}

pub fn default_sequence_step() -> u32 {
    100
}

pub fn default_sequence_cache_depth() -> u32 {
    3
}

pub fn default_sequence_timeout_ms() -> u64 {
    3000
}
