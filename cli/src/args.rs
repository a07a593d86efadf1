use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use ddal_sharding::ShardValue;
use ddal_sql::ParamKey;

/// One `KEY=VALUE` placeholder binding.
pub type Binding = (ParamKey, ShardValue);

/// Output format of the routing report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "ddal",
    version,
    about = "Route a SQL statement to its physical shard tables",
    long_about = None
)]
pub struct Cli {
    /// SQL statement to route
    pub sql: String,

    /// Configuration file path (built-in defaults when omitted)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Bind a placeholder, e.g. `1=42`, `uid=42` or `:region=eu`
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_binding)]
    pub params: Vec<Binding>,

    /// Re-check the route against another binding set, as a prepared
    /// statement executed with new parameters would be
    #[arg(long = "validate", value_name = "KEY=VALUE", value_parser = parse_binding)]
    pub validate: Vec<Binding>,

    /// Logical schema of unqualified tables (overrides router.default_schema)
    #[arg(short = 's', long = "schema")]
    pub default_schema: Option<String>,

    /// Ignore shard values in the SQL and route from overrides only
    #[arg(long = "disable-sql-routing")]
    pub disable_sql_routing: bool,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Parse `KEY=VALUE`; the value goes through [`ShardValue::parse_literal`].
pub fn parse_binding(raw: &str) -> Result<Binding, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid binding '{}': expected KEY=VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid binding '{}': empty key", raw));
    }
    Ok((ParamKey::parse(key), ShardValue::parse_literal(value.trim())))
}
