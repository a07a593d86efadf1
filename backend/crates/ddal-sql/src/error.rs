//! Error types for ddal-sql

use ddal_sharding::ShardingError;
use thiserror::Error;

/// Errors raised while routing a statement or validating a prepared one.
///
/// Messages carry the source SQL and the offending column/table so a failure
/// can be diagnosed without replaying the walk.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("Failed to parse sql [{sql}]: {message}")]
    Parse { sql: String, message: String },

    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Unsupported value type: {0}")]
    UnsupportedValueType(String),

    #[error("Ambiguous shard key: {0}")]
    AmbiguousShardKey(String),

    #[error("Conflicting route: {0}")]
    ConflictingRoute(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Crossing prepared statement: {0}")]
    CrossingPreparedStatement(String),

    #[error("Invalid router configuration: {0}")]
    Config(String),

    #[error("Internal routing error: {0}")]
    Internal(String),

    #[error("Rule engine error: {0}")]
    Rule(#[from] ShardingError),
}

impl RoutingError {
    pub(crate) fn parse(sql: &str, message: impl Into<String>) -> Self {
        RoutingError::Parse {
            sql: sql.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;
