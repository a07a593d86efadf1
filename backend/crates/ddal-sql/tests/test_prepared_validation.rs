//! Prepared-statement validation tests
//!
//! A statement routed once from its placeholders is re-checked against the
//! values bound for each execution.

use ddal_sharding::{RouteContext, ShardRule, ShardValue, SimpleShardRouter};
use ddal_sql::{BoundParams, ParamKey, RouteSource, RouterOptions, RoutingError, SqlRouter, ValueSource};
use std::sync::Arc;

fn router() -> SqlRouter {
    let rules = SimpleShardRouter::new()
        .with_rule(ShardRule::new(Some("app"), "orders", Some("uid"), 4))
        .unwrap()
        .with_rule(ShardRule::new(Some("app"), "logs", Some("uid"), 1))
        .unwrap();
    SqlRouter::with_options(
        Arc::new(rules),
        RouterOptions::default().with_default_schema("app"),
    )
}

fn params(values: &[(usize, i64)]) -> BoundParams {
    values
        .iter()
        .map(|(index, value)| (ParamKey::Index(*index), ShardValue::Int(*value)))
        .collect()
}

#[test]
fn test_validate_accepts_values_routing_to_same_table() {
    let routed = router()
        .route("SELECT * FROM orders WHERE uid = ?", Some(&params(&[(1, 42)])))
        .unwrap();
    assert_eq!(routed.sql(), "SELECT * FROM orders_2 WHERE uid = ?");

    assert!(routed.validate(&params(&[(1, 42)])).is_ok());
    assert!(routed.validate(&params(&[(1, 46)])).is_ok());
}

#[test]
fn test_validate_rejects_values_routing_elsewhere() {
    let routed = router()
        .route("SELECT * FROM orders WHERE uid = ?", Some(&params(&[(1, 42)])))
        .unwrap();

    assert!(routed.validate(&params(&[(1, 2)])).is_ok());
    let err = routed.validate(&params(&[(1, 43)])).unwrap_err();
    match err {
        RoutingError::CrossingPreparedStatement(msg) => {
            assert!(msg.contains("SELECT * FROM orders WHERE uid = ?"), "{}", msg);
            assert!(msg.contains("orders_2"), "{}", msg);
            assert!(msg.contains(r#"{"1":43}"#), "{}", msg);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_validate_with_empty_params_is_skipped() {
    let routed = router()
        .route("SELECT * FROM orders WHERE uid = ?", Some(&params(&[(1, 42)])))
        .unwrap();
    assert!(routed.validate(&BoundParams::new()).is_ok());
}

#[test]
fn test_validate_requires_every_routing_parameter() {
    let routed = router()
        .route(
            "SELECT * FROM orders WHERE status = ? AND uid = ?",
            Some(&params(&[(1, 0), (2, 42)])),
        )
        .unwrap();

    let err = routed.validate(&params(&[(1, 0)])).unwrap_err();
    assert!(matches!(err, RoutingError::CrossingPreparedStatement(ref msg) if msg.contains("not bound")));
}

#[test]
fn test_literal_sources_always_agree() {
    let routed = router()
        .route("SELECT * FROM orders WHERE uid = 42 AND status = ?", None)
        .unwrap();
    assert_eq!(
        routed.routed_tables()[0].sources,
        vec![RouteSource::Value(ValueSource::Literal(ShardValue::Int(42)))]
    );
    assert!(routed.validate(&params(&[(1, 7)])).is_ok());
}

#[test]
fn test_validate_in_list_parameters() {
    let routed = router()
        .route(
            "SELECT * FROM orders WHERE uid IN (?, ?)",
            Some(&params(&[(1, 1), (2, 5)])),
        )
        .unwrap();
    assert_eq!(routed.sql(), "SELECT * FROM orders_1 WHERE uid IN (?, ?)");

    assert!(routed.validate(&params(&[(1, 9), (2, 13)])).is_ok());
    let err = routed.validate(&params(&[(1, 9), (2, 14)])).unwrap_err();
    assert!(matches!(err, RoutingError::CrossingPreparedStatement(_)));
}

#[test]
fn test_unbound_in_list_parameter_is_validated() {
    let routed = router()
        .route("SELECT * FROM orders WHERE uid IN (?, ?)", Some(&params(&[(1, 1)])))
        .unwrap();
    assert_eq!(routed.sql(), "SELECT * FROM orders_1 WHERE uid IN (?, ?)");
    assert_eq!(
        routed.routed_tables()[0].sources[1],
        RouteSource::Value(ValueSource::Param(ParamKey::Index(2)))
    );

    assert!(routed.validate(&params(&[(1, 1), (2, 5)])).is_ok());
    let err = routed.validate(&params(&[(1, 1), (2, 2)])).unwrap_err();
    assert!(matches!(err, RoutingError::CrossingPreparedStatement(_)));
    let err = routed.validate(&params(&[(1, 1)])).unwrap_err();
    assert!(matches!(err, RoutingError::CrossingPreparedStatement(ref msg) if msg.contains("not bound")));
}

#[test]
fn test_unbound_between_parameters_are_validated() {
    let routed = router()
        .route("SELECT * FROM orders WHERE uid = 1 AND uid BETWEEN ? AND ?", None)
        .unwrap();
    assert_eq!(routed.sql(), "SELECT * FROM orders_1 WHERE uid = 1 AND uid BETWEEN ? AND ?");
    assert!(matches!(
        routed.routed_tables()[0].sources[1],
        RouteSource::Range { .. }
    ));

    assert!(routed.validate(&params(&[(1, 5), (2, 5)])).is_ok());
    let err = routed.validate(&params(&[(1, 5), (2, 6)])).unwrap_err();
    assert!(matches!(err, RoutingError::CrossingPreparedStatement(_)));
}

#[test]
fn test_validate_between_parameters() {
    let routed = router()
        .route(
            "SELECT * FROM logs WHERE uid BETWEEN ? AND ?",
            Some(&params(&[(1, 1), (2, 3)])),
        )
        .unwrap();
    assert!(matches!(
        routed.routed_tables()[0].sources[0],
        RouteSource::Range { .. }
    ));

    assert!(routed.validate(&params(&[(1, 10), (2, 20)])).is_ok());
    let err = routed.validate(&params(&[(1, 20), (2, 10)])).unwrap_err();
    assert!(matches!(err, RoutingError::CrossingPreparedStatement(_)));
}

#[test]
fn test_fallback_routes_are_not_revalidated() {
    let routed = router()
        .route("SELECT * FROM logs WHERE level = ?", None)
        .unwrap();
    assert!(routed.routed_tables()[0].sources.is_empty());
    assert!(routed.validate(&params(&[(1, 99)])).is_ok());
}

#[test]
fn test_validator_outlives_routed_sql() {
    let mut first = BoundParams::new();
    first.insert(ParamKey::name("uid"), ShardValue::Int(3));
    let routed = router()
        .route_with(
            "UPDATE orders SET status = 2 WHERE uid = :uid",
            Some(&first),
            &RouteContext::new().with_attribute("tenant", "t1"),
            &ddal_sharding::NoRouteOverrides,
        )
        .unwrap();
    let (sql, schemas, validator) = routed.into_parts();
    assert_eq!(sql, "UPDATE orders_3 SET status = 2 WHERE uid = :uid");
    assert!(schemas.contains("app"));

    let mut next = BoundParams::new();
    next.insert(ParamKey::name("uid"), ShardValue::Int(4));
    assert!(matches!(
        validator.validate(&next),
        Err(RoutingError::CrossingPreparedStatement(_))
    ));
}
