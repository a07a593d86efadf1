//! SQL shard router.
//!
//! [`SqlRouter::route`] parses one statement, binds every sharded table to
//! the scope of the statement or subquery that references it, routes it from
//! its shard-key predicates (or the default route / override store when the
//! statement has none) and returns the rewritten SQL with a
//! [`RouteValidator`] for later parameter bindings.

mod scope;
mod validator;
mod values;
mod walker;

pub use validator::{RouteValidator, RoutedTable};
pub use values::{RouteSource, ValueSource};

use crate::error::{Result, RoutingError};
use crate::params::BoundParams;
use crate::parser::{parse_statement, SqlDialect};
use ddal_configs::{DdalConfig, RouterSettings};
use ddal_sharding::{NoRouteOverrides, RouteContext, RouteOverrides, ShardRouter, SimpleShardRouter};
use std::collections::BTreeSet;
use std::sync::Arc;
use walker::RouteWalker;

/// Parsing and routing limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterOptions {
    pub dialect: SqlDialect,
    /// Logical schema of unqualified table references
    pub default_schema: Option<String>,
    pub max_between_span: u64,
    pub recursion_limit: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::from_settings(&RouterSettings::default()).unwrap_or(Self {
            dialect: SqlDialect::MySql,
            default_schema: None,
            max_between_span: ddal_configs::defaults::default_max_between_span(),
            recursion_limit: ddal_configs::defaults::default_recursion_limit(),
        })
    }
}

impl RouterOptions {
    pub fn from_settings(settings: &RouterSettings) -> Result<Self> {
        let dialect = SqlDialect::from_name(&settings.dialect)
            .ok_or_else(|| RoutingError::Config(format!("unknown SQL dialect '{}'", settings.dialect)))?;
        Ok(Self {
            dialect,
            default_schema: settings.default_schema.clone(),
            max_between_span: settings.max_between_span,
            recursion_limit: settings.recursion_limit,
        })
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_max_between_span(mut self, span: u64) -> Self {
        self.max_between_span = span;
        self
    }
}

/// Result of routing one statement.
#[derive(Debug, Clone)]
pub struct RoutedSql {
    sql: String,
    schemas: BTreeSet<String>,
    validator: RouteValidator,
}

impl RoutedSql {
    /// Rewritten statement text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Physical schemas the statement touches
    pub fn schemas(&self) -> &BTreeSet<String> {
        &self.schemas
    }

    pub fn routed_tables(&self) -> &[RoutedTable] {
        self.validator.routed_tables()
    }

    pub fn validator(&self) -> &RouteValidator {
        &self.validator
    }

    /// See [`RouteValidator::validate`].
    pub fn validate(&self, params: &BoundParams) -> Result<()> {
        self.validator.validate(params)
    }

    pub fn into_parts(self) -> (String, BTreeSet<String>, RouteValidator) {
        (self.sql, self.schemas, self.validator)
    }
}

/// Routes SQL statements against a rule engine. Immutable and shareable
/// across threads; every call keeps its state to itself.
#[derive(Clone)]
pub struct SqlRouter {
    rules: Arc<dyn ShardRouter>,
    options: RouterOptions,
}

impl std::fmt::Debug for SqlRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlRouter")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SqlRouter {
    pub fn new(rules: Arc<dyn ShardRouter>) -> Self {
        Self::with_options(rules, RouterOptions::default())
    }

    pub fn with_options(rules: Arc<dyn ShardRouter>, options: RouterOptions) -> Self {
        Self { rules, options }
    }

    /// Router over the reference rule engine built from `[[sharding.rules]]`.
    pub fn from_config(config: &DdalConfig) -> Result<Self> {
        let options = RouterOptions::from_settings(&config.router)?;
        let rules = SimpleShardRouter::from_settings(&config.sharding)?;
        Ok(Self::with_options(Arc::new(rules), options))
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn rules(&self) -> &Arc<dyn ShardRouter> {
        &self.rules
    }

    /// Route `sql` with an empty context and no overrides.
    pub fn route(&self, sql: &str, params: Option<&BoundParams>) -> Result<RoutedSql> {
        self.route_with(sql, params, &RouteContext::default(), &NoRouteOverrides)
    }

    pub fn route_with(
        &self,
        sql: &str,
        params: Option<&BoundParams>,
        context: &RouteContext,
        overrides: &dyn RouteOverrides,
    ) -> Result<RoutedSql> {
        let (mut statement, scan) =
            parse_statement(sql, self.options.dialect, self.options.recursion_limit)?;

        let walker = RouteWalker::new(
            sql,
            self.rules.as_ref(),
            overrides,
            context,
            &self.options,
            &scan,
            params,
        );
        let (schemas, routed) = walker.walk(&mut statement)?;

        let rewritten = statement.to_string();
        log::debug!(
            "Routed sql [{}] to [{}] across schemas {:?}",
            sql,
            rewritten,
            schemas
        );

        let validator = RouteValidator::new(
            sql.to_string(),
            routed,
            Arc::clone(&self.rules),
            context.clone(),
            self.options.max_between_span,
        );

        Ok(RoutedSql {
            sql: rewritten,
            schemas,
            validator,
        })
    }
}
