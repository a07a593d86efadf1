//! Prepared-statement consistency check.
//!
//! A statement routed once from its text may run many times with different
//! parameter values. The validator re-routes every table that a predicate
//! routed, using the values the caller is about to bind, and fails if any of
//! them would land somewhere other than the rewritten SQL.

use super::values::{RouteSource, ValueSource};
use crate::error::{Result, RoutingError};
use crate::params::{params_to_json, BoundParams};
use ddal_sharding::{RouteContext, RouteInfo, ShardRouter, ShardValue};
use serde::Serialize;
use std::sync::Arc;

/// A logical table and the physical destination it was rewritten to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedTable {
    /// Logical schema used for routing
    pub schema: Option<String>,
    pub table: String,
    pub route: RouteInfo,
    /// Predicate values that routed the table; empty when a default route or
    /// an override resolved it
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<RouteSource>,
}

/// Deferred check returned with every routed statement.
#[derive(Clone)]
pub struct RouteValidator {
    sql: String,
    routed: Vec<RoutedTable>,
    rules: Arc<dyn ShardRouter>,
    context: RouteContext,
    max_between_span: u64,
}

impl std::fmt::Debug for RouteValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteValidator")
            .field("sql", &self.sql)
            .field("routed", &self.routed)
            .finish_non_exhaustive()
    }
}

impl RouteValidator {
    pub(crate) fn new(
        sql: String,
        routed: Vec<RoutedTable>,
        rules: Arc<dyn ShardRouter>,
        context: RouteContext,
        max_between_span: u64,
    ) -> Self {
        Self {
            sql,
            routed,
            rules,
            context,
            max_between_span,
        }
    }

    pub fn routed_tables(&self) -> &[RoutedTable] {
        &self.routed
    }

    /// Check that `params` route every table where the rewritten SQL sends it.
    /// An empty map trusts the structural decision.
    pub fn validate(&self, params: &BoundParams) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }

        for table in &self.routed {
            for source in &table.sources {
                match source {
                    RouteSource::Value(value) => {
                        let value = self.resolve(value, params)?;
                        self.check(table, value, params)?;
                    }
                    RouteSource::Range { low, high } => {
                        let low = self.resolve_int(low, params)?;
                        let high = self.resolve_int(high, params)?;
                        let span = high as i128 - low as i128 + 1;
                        if span < 1 || span > self.max_between_span as i128 {
                            return Err(self.crossing(
                                &format!("range [{}, {}] cannot be routed", low, high),
                                params,
                            ));
                        }
                        for value in low..=high {
                            self.check(table, &ShardValue::Int(value), params)?;
                        }
                    }
                }
            }
        }

        log::debug!("Validated {} routed tables for sql [{}]", self.routed.len(), self.sql);
        Ok(())
    }

    fn resolve<'a>(&self, source: &'a ValueSource, params: &'a BoundParams) -> Result<&'a ShardValue> {
        source.resolve(params).ok_or_else(|| {
            let key = match source {
                ValueSource::Param(key) => key.to_string(),
                ValueSource::Literal(value) => value.to_string(),
            };
            self.crossing(&format!("parameter {} is not bound", key), params)
        })
    }

    fn resolve_int(&self, source: &ValueSource, params: &BoundParams) -> Result<i64> {
        let value = self.resolve(source, params)?;
        value
            .as_i64()
            .ok_or_else(|| self.crossing(&format!("range bound {} is not an integer", value), params))
    }

    fn check(&self, table: &RoutedTable, value: &ShardValue, params: &BoundParams) -> Result<()> {
        let route = self
            .rules
            .route(&self.context, table.schema.as_deref(), &table.table, Some(value))?;
        match route {
            Some(route) if route.same_destination(&table.route) => Ok(()),
            Some(route) => Err(self.crossing(
                &format!(
                    "value {} routes table '{}' to '{}' instead of '{}'",
                    value, table.table, route, table.route
                ),
                params,
            )),
            None => Err(self.crossing(
                &format!("value {} does not route table '{}'", value, table.table),
                params,
            )),
        }
    }

    fn crossing(&self, reason: &str, params: &BoundParams) -> RoutingError {
        let routed = serde_json::to_string(&self.routed).unwrap_or_else(|_| format!("{:?}", self.routed));
        RoutingError::CrossingPreparedStatement(format!(
            "{}; source sql is [{}], routed tables {}, parameters {}",
            reason,
            self.sql,
            routed,
            params_to_json(params)
        ))
    }
}
