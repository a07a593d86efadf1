//! Error types for the ddal command-line tool

use ddal_sharding::ShardingError;
use ddal_sql::RoutingError;
use thiserror::Error;

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid binding '{0}': expected KEY=VALUE")]
    InvalidBinding(String),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Sharding(#[from] ShardingError),

    #[error("Output error: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Output(err.to_string())
    }
}
