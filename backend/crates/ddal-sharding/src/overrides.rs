//! Manual route overrides, consulted when a statement carries no usable shard
//! value or SQL-driven routing is switched off.

use crate::error::{Result, ShardingError};
use crate::route::{RouteInfo, ShardValue};
use ddal_configs::OverrideSettings;
use std::collections::HashMap;

/// What an override store returns for a logical table.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOverride {
    /// Fully resolved physical destination, applied as-is
    Route(RouteInfo),
    /// Raw shard value, routed through the rule engine
    Value(ShardValue),
}

/// Out-of-band routing decisions.
pub trait RouteOverrides: Send + Sync {
    fn route_override(&self, schema: Option<&str>, table: &str) -> Option<RouteOverride>;

    /// When true, shard values found in SQL text are recorded but never routed.
    fn is_sql_routing_disabled(&self) -> bool {
        false
    }
}

/// Store without any override.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRouteOverrides;

impl RouteOverrides for NoRouteOverrides {
    fn route_override(&self, _schema: Option<&str>, _table: &str) -> Option<RouteOverride> {
        None
    }
}

type OverrideKey = (Option<String>, String);

/// In-memory override store keyed by lower-cased (schema, table).
#[derive(Debug, Clone, Default)]
pub struct ShardRouteOverrides {
    routes: HashMap<OverrideKey, RouteOverride>,
    disable_sql_routing: bool,
}

impl ShardRouteOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the store from `[overrides]`. A physical table without
    /// `physical_schema` lands in the entry's schema, then in `default_schema`.
    pub fn from_settings(settings: &OverrideSettings, default_schema: Option<&str>) -> Result<Self> {
        let mut overrides = Self::new();
        overrides.set_disable_sql_routing(settings.disable_sql_routing);

        for entry in &settings.routes {
            let schema = entry.schema.as_deref();
            match (&entry.physical_table, &entry.value) {
                (Some(physical_table), None) => {
                    let physical_schema = entry
                        .physical_schema
                        .as_deref()
                        .or(schema)
                        .or(default_schema)
                        .ok_or_else(|| {
                            ShardingError::InvalidRule(format!(
                                "route override for '{}' has no physical schema",
                                entry.table
                            ))
                        })?;
                    overrides.set_route(schema, &entry.table, RouteInfo::new(physical_schema, physical_table.as_str()));
                }
                (None, Some(value)) => {
                    overrides.set_value(schema, &entry.table, ShardValue::parse_literal(value));
                }
                _ => {
                    return Err(ShardingError::InvalidRule(format!(
                        "route override for '{}' needs exactly one of physical_table or value",
                        entry.table
                    )));
                }
            }
        }

        Ok(overrides)
    }

    pub fn set_route(&mut self, schema: Option<&str>, table: &str, route: RouteInfo) {
        self.routes.insert(Self::key(schema, table), RouteOverride::Route(route));
    }

    pub fn set_value(&mut self, schema: Option<&str>, table: &str, value: ShardValue) {
        self.routes.insert(Self::key(schema, table), RouteOverride::Value(value));
    }

    pub fn remove(&mut self, schema: Option<&str>, table: &str) -> Option<RouteOverride> {
        self.routes.remove(&Self::key(schema, table))
    }

    pub fn set_disable_sql_routing(&mut self, disabled: bool) {
        self.disable_sql_routing = disabled;
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn key(schema: Option<&str>, table: &str) -> OverrideKey {
        (schema.map(str::to_lowercase), table.to_lowercase())
    }
}

impl RouteOverrides for ShardRouteOverrides {
    fn route_override(&self, schema: Option<&str>, table: &str) -> Option<RouteOverride> {
        if schema.is_some() {
            if let Some(found) = self.routes.get(&Self::key(schema, table)) {
                return Some(found.clone());
            }
        }
        self.routes.get(&Self::key(None, table)).cloned()
    }

    fn is_sql_routing_disabled(&self) -> bool {
        self.disable_sql_routing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddal_configs::RouteOverrideSettings;

    #[test]
    fn test_lookup_falls_back_to_schemaless_entry() {
        let mut overrides = ShardRouteOverrides::new();
        overrides.set_route(None, "Orders", RouteInfo::new("app", "orders_3"));
        overrides.set_value(Some("billing"), "orders", ShardValue::Int(7));

        assert_eq!(
            overrides.route_override(Some("APP"), "orders"),
            Some(RouteOverride::Route(RouteInfo::new("app", "orders_3")))
        );
        assert_eq!(
            overrides.route_override(Some("billing"), "ORDERS"),
            Some(RouteOverride::Value(ShardValue::Int(7)))
        );
        assert!(overrides.route_override(Some("app"), "users").is_none());
    }

    #[test]
    fn test_disable_sql_routing() {
        let mut overrides = ShardRouteOverrides::new();
        assert!(!overrides.is_sql_routing_disabled());
        overrides.set_disable_sql_routing(true);
        assert!(overrides.is_sql_routing_disabled());
        assert!(!NoRouteOverrides.is_sql_routing_disabled());
    }

    #[test]
    fn test_from_settings() {
        let settings = OverrideSettings {
            disable_sql_routing: true,
            routes: vec![
                RouteOverrideSettings {
                    schema: None,
                    table: "audit".to_string(),
                    physical_schema: None,
                    physical_table: Some("audit_2024".to_string()),
                    value: None,
                },
                RouteOverrideSettings {
                    schema: Some("app".to_string()),
                    table: "orders".to_string(),
                    physical_schema: None,
                    physical_table: None,
                    value: Some("42".to_string()),
                },
            ],
        };

        let overrides = ShardRouteOverrides::from_settings(&settings, Some("main")).unwrap();
        assert!(overrides.is_sql_routing_disabled());
        assert_eq!(overrides.len(), 2);
        assert_eq!(
            overrides.route_override(Some("x"), "audit"),
            Some(RouteOverride::Route(RouteInfo::new("main", "audit_2024")))
        );
        assert_eq!(
            overrides.route_override(Some("app"), "orders"),
            Some(RouteOverride::Value(ShardValue::Int(42)))
        );
    }

    #[test]
    fn test_from_settings_without_any_schema() {
        let settings = OverrideSettings {
            disable_sql_routing: false,
            routes: vec![RouteOverrideSettings {
                schema: None,
                table: "audit".to_string(),
                physical_schema: None,
                physical_table: Some("audit_2024".to_string()),
                value: None,
            }],
        };
        let err = ShardRouteOverrides::from_settings(&settings, None).unwrap_err();
        assert!(matches!(err, ShardingError::InvalidRule(_)));
    }
}
