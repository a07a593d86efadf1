//! Routing value types shared by the rule engine, the override store and the
//! SQL router.

use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

/// A shard value extracted from SQL text or supplied as a bound parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ShardValue {
    Int(i64),
    Float(f64),
    Text(String),
    /// DATE / TIME / TIMESTAMP literal, kept in its SQL text form
    Temporal(String),
}

impl ShardValue {
    /// Interpret free-form text (CLI arguments, config entries): integers
    /// first, then floats, otherwise text.
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return ShardValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return ShardValue::Float(f);
            }
        }
        ShardValue::Text(raw.to_string())
    }

    /// Integer view of the value, used for BETWEEN expansion and modulo routing.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ShardValue::Int(i) => Some(*i),
            ShardValue::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                if *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            ShardValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Bucket of this value among `shards` buckets.
    ///
    /// Integer-like values use `value mod shards` (non-negative); anything else
    /// uses the CRC32 of its text form, which is the same on every build and
    /// platform.
    pub fn shard_index(&self, shards: u32) -> u32 {
        let shards = shards.max(1);
        match self.as_i64() {
            Some(i) => i.rem_euclid(shards as i64) as u32,
            None => crc32fast::hash(self.to_string().as_bytes()) % shards,
        }
    }
}

impl fmt::Display for ShardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardValue::Int(i) => write!(f, "{}", i),
            ShardValue::Float(v) => write!(f, "{}", v),
            ShardValue::Text(s) | ShardValue::Temporal(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ShardValue {
    fn from(value: i64) -> Self {
        ShardValue::Int(value)
    }
}

impl From<&str> for ShardValue {
    fn from(value: &str) -> Self {
        ShardValue::Text(value.to_string())
    }
}

impl From<String> for ShardValue {
    fn from(value: String) -> Self {
        ShardValue::Text(value)
    }
}

/// Routing configuration of one logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RouteConfig {
    shard_key: String,
    sharded: bool,
}

impl RouteConfig {
    pub fn sharded(shard_key: impl Into<String>) -> Self {
        Self {
            shard_key: shard_key.into(),
            sharded: true,
        }
    }

    pub fn unsharded() -> Self {
        Self {
            shard_key: String::new(),
            sharded: false,
        }
    }

    pub fn shard_key(&self) -> &str {
        &self.shard_key
    }

    pub fn is_sharded(&self) -> bool {
        self.sharded
    }
}

/// Resolved physical destination of a logical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RouteInfo {
    schema: String,
    table: String,
}

impl RouteInfo {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Physical names compare case-insensitively.
    pub fn same_destination(&self, other: &RouteInfo) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema)
            && self.table.eq_ignore_ascii_case(&other.table)
    }
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Caller-supplied attributes handed to every rule-engine call of one
/// routing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteContext {
    attributes: HashMap<String, String>,
}

impl RouteContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal() {
        assert_eq!(ShardValue::parse_literal("42"), ShardValue::Int(42));
        assert_eq!(ShardValue::parse_literal("-7"), ShardValue::Int(-7));
        assert_eq!(ShardValue::parse_literal("2.5"), ShardValue::Float(2.5));
        assert_eq!(
            ShardValue::parse_literal("alice"),
            ShardValue::Text("alice".to_string())
        );
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(ShardValue::Int(5).as_i64(), Some(5));
        assert_eq!(ShardValue::Float(6.0).as_i64(), Some(6));
        assert_eq!(ShardValue::Float(6.5).as_i64(), None);
        assert_eq!(ShardValue::Text(" 12 ".to_string()).as_i64(), Some(12));
        assert_eq!(ShardValue::Temporal("2024-01-01".to_string()).as_i64(), None);
    }

    #[test]
    fn test_shard_index_integers() {
        assert_eq!(ShardValue::Int(42).shard_index(4), 2);
        assert_eq!(ShardValue::Int(-1).shard_index(4), 3);
        assert_eq!(ShardValue::Text("9".to_string()).shard_index(4), 1);
        assert_eq!(ShardValue::Int(9).shard_index(0), 0);
    }

    #[test]
    fn test_shard_index_text_is_stable() {
        // crc32("alice") = 663665735, crc32("abc") = 891568578
        assert_eq!(ShardValue::Text("alice".to_string()).shard_index(4), 3);
        assert_eq!(ShardValue::Text("alice".to_string()).shard_index(8), 7);
        assert_eq!(ShardValue::Text("abc".to_string()).shard_index(4), 2);
        assert_eq!(ShardValue::Temporal("2024-01-01".to_string()).shard_index(4), 0);
    }

    #[test]
    fn test_route_info_case_insensitive() {
        let a = RouteInfo::new("App", "Orders_1");
        let b = RouteInfo::new("app", "orders_1");
        assert!(a.same_destination(&b));
        assert!(!a.same_destination(&RouteInfo::new("app", "orders_2")));
        assert_eq!(a.to_string(), "App.Orders_1");
    }

    #[test]
    fn test_route_context_attributes() {
        let ctx = RouteContext::new().with_attribute("tenant", "t1");
        assert_eq!(ctx.attribute("tenant"), Some("t1"));
        assert_eq!(ctx.attribute("missing"), None);
    }
}
