//! Bound parameter values keyed the way the SQL text names its placeholders.

use ddal_sharding::ShardValue;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Placeholder key: 1-based position (`?`, `?3`, `$3`) or name (`:id`, `@id`, `$id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum ParamKey {
    Index(usize),
    Name(String),
}

impl ParamKey {
    pub fn name(name: impl Into<String>) -> Self {
        ParamKey::Name(name.into())
    }

    /// Parse `1`, `?1` and `$1` as positions and anything else as a name,
    /// dropping a leading `:`, `@` or `$`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(index) = trimmed.parse::<usize>() {
            return ParamKey::Index(index);
        }
        let name = trimmed.trim_start_matches([':', '@', '$', '?']);
        match name.parse::<usize>() {
            Ok(index) if trimmed.starts_with(['$', '?']) => ParamKey::Index(index),
            _ => ParamKey::Name(name.to_string()),
        }
    }
}

impl From<usize> for ParamKey {
    fn from(index: usize) -> Self {
        ParamKey::Index(index)
    }
}

impl From<&str> for ParamKey {
    fn from(name: &str) -> Self {
        ParamKey::Name(name.to_string())
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Index(index) => write!(f, "{}", index),
            ParamKey::Name(name) => write!(f, ":{}", name),
        }
    }
}

/// Caller-supplied placeholder values.
pub type BoundParams = HashMap<ParamKey, ShardValue>;

/// Stable JSON rendering of a parameter map for error messages.
pub(crate) fn params_to_json(params: &BoundParams) -> String {
    let ordered: BTreeMap<String, &ShardValue> = params
        .iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    serde_json::to_string(&ordered).unwrap_or_else(|_| format!("{:?}", ordered))
}
