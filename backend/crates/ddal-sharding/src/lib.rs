//! Routing entities and collaborator contracts for the DDAL SQL router:
//! the rule-engine trait, the override store and the ID allocator contract,
//! plus a reference modulo rule engine.

mod error;
mod overrides;
mod route;
mod rule;
pub mod sequence;

pub use error::{Result, ShardingError};
pub use overrides::{NoRouteOverrides, RouteOverride, RouteOverrides, ShardRouteOverrides};
pub use route::{RouteConfig, RouteContext, RouteInfo, ShardValue};
pub use rule::{ShardRule, SimpleShardRouter};
pub use sequence::{Sequence, SequenceKey, SequenceOptions};

/// Sharding rule engine.
///
/// Implementations are shared across concurrent routing calls.
pub trait ShardRouter: Send + Sync {
    /// Routing configuration of a logical table, `None` when the table is unknown.
    fn route_config(
        &self,
        context: &RouteContext,
        schema: Option<&str>,
        table: &str,
    ) -> Option<RouteConfig>;

    /// Physical destination for a shard value.
    ///
    /// With `value == None` only a table that needs no shard value (a single
    /// destination) resolves; everything else returns `Ok(None)`.
    fn route(
        &self,
        context: &RouteContext,
        schema: Option<&str>,
        table: &str,
        value: Option<&ShardValue>,
    ) -> Result<Option<RouteInfo>>;
}
