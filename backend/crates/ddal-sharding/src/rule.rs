//! Reference rule engine driven by `[[sharding.rules]]` entries.

use crate::error::{Result, ShardingError};
use crate::route::{RouteConfig, RouteContext, RouteInfo, ShardValue};
use crate::ShardRouter;
use ddal_configs::{ShardRuleSettings, ShardingSettings};
use std::collections::HashMap;

/// One logical table's modulo sharding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRule {
    schema: Option<String>,
    table: String,
    shard_key: Option<String>,
    table_shards: u32,
    schema_shards: u32,
    table_format: String,
    schema_format: String,
    index_width: usize,
}

impl ShardRule {
    pub fn new(schema: Option<&str>, table: &str, shard_key: Option<&str>, table_shards: u32) -> Self {
        Self {
            schema: schema.map(str::to_lowercase),
            table: table.to_lowercase(),
            shard_key: shard_key.map(str::to_lowercase),
            table_shards: table_shards.max(1),
            schema_shards: 1,
            table_format: ddal_configs::defaults::default_table_format(),
            schema_format: ddal_configs::defaults::default_schema_format(),
            index_width: 0,
        }
    }

    pub fn with_schema_shards(mut self, schema_shards: u32) -> Self {
        self.schema_shards = schema_shards.max(1);
        self
    }

    pub fn with_formats(mut self, table_format: &str, schema_format: &str) -> Self {
        self.table_format = table_format.to_string();
        self.schema_format = schema_format.to_string();
        self
    }

    pub fn with_index_width(mut self, index_width: usize) -> Self {
        self.index_width = index_width;
        self
    }

    pub fn from_settings(settings: &ShardRuleSettings) -> Result<Self> {
        if settings.table.trim().is_empty() {
            return Err(ShardingError::InvalidRule("table name cannot be empty".to_string()));
        }
        if settings.table_shards == 0 || settings.schema_shards == 0 {
            return Err(ShardingError::InvalidRule(format!(
                "rule '{}' must have at least one table and schema shard",
                settings.qualified_name()
            )));
        }
        if settings.shard_key.is_none() && (settings.table_shards > 1 || settings.schema_shards > 1) {
            return Err(ShardingError::InvalidRule(format!(
                "rule '{}' has more than one shard but no shard_key",
                settings.qualified_name()
            )));
        }

        Ok(Self::new(
            settings.schema.as_deref(),
            &settings.table,
            settings.shard_key.as_deref(),
            settings.table_shards,
        )
        .with_schema_shards(settings.schema_shards)
        .with_formats(&settings.table_format, &settings.schema_format)
        .with_index_width(settings.index_width))
    }

    pub fn shard_key(&self) -> Option<&str> {
        self.shard_key.as_deref()
    }

    /// True when every value lands on the same physical table.
    pub fn is_single_destination(&self) -> bool {
        self.table_shards == 1 && self.schema_shards == 1
    }

    fn route_config(&self) -> RouteConfig {
        match &self.shard_key {
            Some(key) => RouteConfig::sharded(key.clone()),
            None => RouteConfig::unsharded(),
        }
    }

    fn resolve(&self, schema: Option<&str>, table: &str, value: Option<&ShardValue>) -> Result<RouteInfo> {
        let logical_schema = schema
            .map(str::to_string)
            .or_else(|| self.schema.clone())
            .ok_or_else(|| {
                ShardingError::RouteFailed(format!(
                    "no schema available to route table '{}'",
                    table
                ))
            })?;

        let table_index = value.map(|v| v.shard_index(self.table_shards)).unwrap_or(0);
        let schema_index = table_index % self.schema_shards;

        let physical_table = if self.table_shards == 1 {
            table.to_string()
        } else {
            self.render(&self.table_format, &logical_schema, table, table_index)
        };
        let physical_schema = if self.schema_shards == 1 {
            logical_schema
        } else {
            self.render(&self.schema_format, &logical_schema, table, schema_index)
        };

        Ok(RouteInfo::new(physical_schema, physical_table))
    }

    fn render(&self, format: &str, schema: &str, table: &str, index: u32) -> String {
        let index = format!("{:0width$}", index, width = self.index_width);
        format
            .replace("{schema}", schema)
            .replace("{table}", table)
            .replace("{index}", &index)
    }
}

/// Modulo rule engine keyed by (schema, table), with schema-less rules as a
/// fallback for any schema.
#[derive(Debug, Clone, Default)]
pub struct SimpleShardRouter {
    rules: HashMap<(Option<String>, String), ShardRule>,
}

impl SimpleShardRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &ShardingSettings) -> Result<Self> {
        let mut router = Self::new();
        for rule in &settings.rules {
            router.add_rule(ShardRule::from_settings(rule)?)?;
        }
        log::debug!("Loaded {} sharding rules", router.rules.len());
        Ok(router)
    }

    pub fn add_rule(&mut self, rule: ShardRule) -> Result<()> {
        let key = (rule.schema.clone(), rule.table.clone());
        if self.rules.contains_key(&key) {
            return Err(ShardingError::InvalidRule(format!(
                "duplicate rule for table '{}'",
                rule.table
            )));
        }
        self.rules.insert(key, rule);
        Ok(())
    }

    pub fn with_rule(mut self, rule: ShardRule) -> Result<Self> {
        self.add_rule(rule)?;
        Ok(self)
    }

    pub fn rule(&self, schema: Option<&str>, table: &str) -> Option<&ShardRule> {
        let table = table.to_lowercase();
        let schema = schema.map(str::to_lowercase);
        if schema.is_some() {
            if let Some(rule) = self.rules.get(&(schema, table.clone())) {
                return Some(rule);
            }
        }
        self.rules.get(&(None, table))
    }
}

impl ShardRouter for SimpleShardRouter {
    fn route_config(
        &self,
        _context: &RouteContext,
        schema: Option<&str>,
        table: &str,
    ) -> Option<RouteConfig> {
        self.rule(schema, table).map(ShardRule::route_config)
    }

    fn route(
        &self,
        _context: &RouteContext,
        schema: Option<&str>,
        table: &str,
        value: Option<&ShardValue>,
    ) -> Result<Option<RouteInfo>> {
        let Some(rule) = self.rule(schema, table) else {
            return Ok(None);
        };

        match value {
            None if !rule.is_single_destination() => Ok(None),
            _ => rule.resolve(schema, table, value).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_router() -> SimpleShardRouter {
        SimpleShardRouter::new()
            .with_rule(ShardRule::new(Some("app"), "orders", Some("uid"), 4))
            .unwrap()
            .with_rule(ShardRule::new(None, "regions", None, 1))
            .unwrap()
    }

    #[test]
    fn test_route_config() {
        let router = orders_router();
        let ctx = RouteContext::new();

        let config = router.route_config(&ctx, Some("app"), "orders").unwrap();
        assert!(config.is_sharded());
        assert_eq!(config.shard_key(), "uid");

        let config = router.route_config(&ctx, Some("app"), "regions").unwrap();
        assert!(!config.is_sharded());

        assert!(router.route_config(&ctx, Some("app"), "users").is_none());
        assert!(router.route_config(&ctx, Some("other"), "orders").is_none());
    }

    #[test]
    fn test_route_modulo() {
        let router = orders_router();
        let ctx = RouteContext::new();

        let info = router
            .route(&ctx, Some("app"), "orders", Some(&ShardValue::Int(42)))
            .unwrap()
            .unwrap();
        assert_eq!(info, RouteInfo::new("app", "orders_2"));

        let info = router
            .route(&ctx, Some("APP"), "ORDERS", Some(&ShardValue::Int(5)))
            .unwrap()
            .unwrap();
        assert_eq!(info.table(), "ORDERS_1");
    }

    #[test]
    fn test_route_without_value() {
        let router = orders_router();
        let ctx = RouteContext::new();

        assert!(router.route(&ctx, Some("app"), "orders", None).unwrap().is_none());

        let info = router.route(&ctx, Some("app"), "regions", None).unwrap().unwrap();
        assert_eq!(info, RouteInfo::new("app", "regions"));
    }

    #[test]
    fn test_route_requires_schema() {
        let router = orders_router();
        let err = router
            .route(&RouteContext::new(), None, "regions", None)
            .unwrap_err();
        assert!(matches!(err, ShardingError::RouteFailed(_)));
    }

    #[test]
    fn test_schema_shards_and_padding() {
        let router = SimpleShardRouter::new()
            .with_rule(
                ShardRule::new(Some("app"), "events", Some("tenant"), 8)
                    .with_schema_shards(2)
                    .with_index_width(2),
            )
            .unwrap();

        let info = router
            .route(&RouteContext::new(), Some("app"), "events", Some(&ShardValue::Int(13)))
            .unwrap()
            .unwrap();
        assert_eq!(info, RouteInfo::new("app_01", "events_05"));
    }

    #[test]
    fn test_duplicate_rule() {
        let err = orders_router()
            .with_rule(ShardRule::new(Some("App"), "Orders", Some("uid"), 2))
            .unwrap_err();
        assert!(matches!(err, ShardingError::InvalidRule(_)));
    }

    #[test]
    fn test_from_settings() {
        let settings = ShardingSettings {
            rules: vec![ShardRuleSettings {
                schema: Some("app".to_string()),
                table: "orders".to_string(),
                shard_key: Some("uid".to_string()),
                table_shards: 4,
                schema_shards: 1,
                table_format: "t_{table}_{index}".to_string(),
                schema_format: "{schema}_{index}".to_string(),
                index_width: 0,
            }],
        };
        let router = SimpleShardRouter::from_settings(&settings).unwrap();
        let info = router
            .route(&RouteContext::new(), Some("app"), "orders", Some(&ShardValue::Int(3)))
            .unwrap()
            .unwrap();
        assert_eq!(info.table(), "t_orders_3");
    }
}
