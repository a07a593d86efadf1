//! Error types for ddal-sharding

use thiserror::Error;

/// Errors raised by rule engines, override stores and sequences
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShardingError {
    #[error("Invalid sharding rule: {0}")]
    InvalidRule(String),

    #[error("Route failed: {0}")]
    RouteFailed(String),

    #[error("No available id range: {0}")]
    NoAvailableIdRange(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Result type for sharding operations
pub type Result<T> = std::result::Result<T, ShardingError>;
