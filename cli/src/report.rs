//! Routing one statement from command-line arguments and rendering the outcome.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use ddal_configs::DdalConfig;
use ddal_sharding::{RouteContext, ShardRouteOverrides, SimpleShardRouter};
use ddal_sql::{BoundParams, RoutedTable, RouterOptions, SqlRouter};
use serde::Serialize;

use crate::args::{Binding, Cli, OutputFormat};
use crate::error::Result;

/// What `ddal` prints for one statement.
#[derive(Debug, Clone, Serialize)]
pub struct RouteReport {
    pub sql: String,
    pub schemas: Vec<String>,
    pub tables: Vec<RoutedTable>,
    /// Bindings the route was re-checked against, when `--validate` was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<BTreeMap<String, String>>,
}

fn bound_params(bindings: &[Binding]) -> BoundParams {
    bindings.iter().cloned().collect()
}

/// Build the router and override store from `config` plus command-line
/// overrides, route `cli.sql` and run the optional prepared-statement check.
pub fn execute(cli: &Cli, config: &DdalConfig) -> Result<RouteReport> {
    let mut options = RouterOptions::from_settings(&config.router)?;
    if let Some(schema) = &cli.default_schema {
        options = options.with_default_schema(schema.clone());
    }

    let rules = SimpleShardRouter::from_settings(&config.sharding)?;
    let mut overrides =
        ShardRouteOverrides::from_settings(&config.overrides, options.default_schema.as_deref())?;
    if cli.disable_sql_routing {
        overrides.set_disable_sql_routing(true);
    }
    log::debug!(
        "Routing with {} override(s), sql routing disabled: {}",
        overrides.len(),
        cli.disable_sql_routing || config.overrides.disable_sql_routing
    );

    let router = SqlRouter::with_options(Arc::new(rules), options);
    let params = bound_params(&cli.params);
    let routed = router.route_with(&cli.sql, Some(&params), &RouteContext::new(), &overrides)?;

    let validated = if cli.validate.is_empty() {
        None
    } else {
        let rebound = bound_params(&cli.validate);
        routed.validate(&rebound)?;
        Some(
            rebound
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    };

    Ok(RouteReport {
        sql: routed.sql().to_string(),
        schemas: routed.schemas().iter().cloned().collect(),
        tables: routed.routed_tables().to_vec(),
        validated,
    })
}

pub fn render(report: &RouteReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Text => Ok(render_text(report)),
    }
}

fn render_text(report: &RouteReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", report.sql);

    if !report.schemas.is_empty() {
        let schemas: Vec<&str> = report.schemas.iter().map(String::as_str).collect();
        let _ = writeln!(out, "schemas: {}", schemas.join(", "));
    }

    for table in &report.tables {
        let logical = match &table.schema {
            Some(schema) => format!("{}.{}", schema, table.table),
            None => table.table.clone(),
        };
        let _ = writeln!(out, "  {} -> {}", logical, table.route);
    }

    if let Some(validated) = &report.validated {
        let bindings: Vec<String> = validated.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let _ = writeln!(out, "validated: {}", bindings.join(", "));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const CONFIG: &str = r#"
[router]
default_schema = "app"

[[sharding.rules]]
table = "orders"
shard_key = "uid"
table_shards = 4

[[overrides.routes]]
table = "audit"
physical_table = "audit_2024"
"#;

    fn config() -> DdalConfig {
        DdalConfig::from_toml_str(CONFIG).unwrap()
    }

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["ddal"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_execute_routes_statement() {
        let report = execute(&cli(&["SELECT * FROM orders WHERE uid = 42"]), &config()).unwrap();
        assert_eq!(report.sql, "SELECT * FROM orders_2 WHERE uid = 42");
        assert_eq!(report.schemas, vec!["app".to_string()]);
        assert_eq!(report.tables.len(), 1);
        assert!(report.validated.is_none());
    }

    #[test]
    fn test_execute_unsharded_and_disabled_routing() {
        let report = execute(&cli(&["SELECT * FROM audit"]), &config());
        // audit has no rule, so it is passed through untouched
        assert_eq!(report.unwrap().sql, "SELECT * FROM audit");

        let report = execute(
            &cli(&["--disable-sql-routing", "SELECT * FROM orders WHERE uid = 42"]),
            &config(),
        );
        assert!(report.is_err());
    }

    #[test]
    fn test_execute_validates_bindings() {
        let args = ["-p", "1=42", "--validate", "1=46", "SELECT * FROM orders WHERE uid = ?"];
        let report = execute(&cli(&args), &config()).unwrap();
        assert_eq!(report.sql, "SELECT * FROM orders_2 WHERE uid = ?");
        assert_eq!(report.validated.unwrap().get("1").map(String::as_str), Some("46"));

        let args = ["-p", "1=42", "--validate", "1=43", "SELECT * FROM orders WHERE uid = ?"];
        assert!(execute(&cli(&args), &config()).is_err());
    }

    #[test]
    fn test_render_text_and_json() {
        let report = execute(&cli(&["--schema", "shop", "DELETE FROM orders WHERE uid = 5"]), &config())
            .unwrap();

        let text = render(&report, OutputFormat::Text).unwrap();
        assert!(text.starts_with("DELETE FROM orders_1 WHERE uid = 5\n"));
        assert!(text.contains("schemas: shop"));
        assert!(text.contains("  shop.orders -> shop.orders_1"));

        let json: serde_json::Value =
            serde_json::from_str(&render(&report, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["schemas"][0], "shop");
        assert_eq!(json["tables"][0]["route"]["table"], "orders_1");
    }
}
