//! ddal-sql - SQL shard router
//!
//! Rewrites SELECT, INSERT, UPDATE and DELETE statements from logical to
//! physical tables.
//!
//! ```no_run
//! use ddal_sharding::{ShardRule, SimpleShardRouter};
//! use ddal_sql::{RouterOptions, SqlRouter};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let rules = SimpleShardRouter::new()
//!     .with_rule(ShardRule::new(Some("app"), "orders", Some("uid"), 4))?;
//! let router = SqlRouter::with_options(
//!     Arc::new(rules),
//!     RouterOptions::default().with_default_schema("app"),
//! );
//!
//! let routed = router.route("SELECT * FROM orders WHERE uid = 42", None)?;
//! assert_eq!(routed.sql(), "SELECT * FROM orders_2 WHERE uid = 42");
//! # Ok(())
//! # }
//! ```

mod error;
mod params;
pub mod parser;
pub mod router;

pub use error::{Result, RoutingError};
pub use params::{BoundParams, ParamKey};
pub use parser::{SqlDialect, StatementScan};
pub use router::{
    RouteSource, RouteValidator, RoutedSql, RoutedTable, RouterOptions, SqlRouter, ValueSource,
};
