//! Contract of the distributed ID allocator.
//!
//! Allocators hand out ids from ranges of `step` ids fetched ahead of use,
//! keeping up to `cache_depth` ranges cached. A single refill may be in
//! flight per sequence key at any time.

use crate::error::{Result, ShardingError};
use ddal_configs::SequenceSettings;
use std::fmt;
use std::time::Duration;

/// Identifies one sequence: the logical table whose ids it allocates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    schema: String,
    table: String,
}

impl SequenceKey {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.to_lowercase(),
            table: table.to_lowercase(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Validated allocator parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOptions {
    pub key: SequenceKey,
    pub step: u32,
    pub cache_depth: u32,
    pub timeout: Duration,
}

impl SequenceOptions {
    pub fn from_settings(settings: &SequenceSettings) -> Result<Self> {
        if settings.step == 0 || settings.cache_depth == 0 || settings.timeout_ms == 0 {
            return Err(ShardingError::InvalidRule(format!(
                "sequence '{}.{}' needs positive step, cache_depth and timeout_ms",
                settings.schema, settings.table
            )));
        }
        Ok(Self {
            key: SequenceKey::new(&settings.schema, &settings.table),
            step: settings.step,
            cache_depth: settings.cache_depth,
            timeout: Duration::from_millis(settings.timeout_ms),
        })
    }
}

/// Source of unique ids for one sequence key.
pub trait Sequence: Send + Sync {
    /// Returns the next id.
    ///
    /// Blocks for at most the configured timeout while the cache is empty and
    /// a refill is running. Fails with [`ShardingError::Timeout`] when the wait
    /// expires and with [`ShardingError::NoAvailableIdRange`] when no further
    /// range can be obtained.
    fn next_value(&self) -> Result<i64>;

    fn key(&self) -> &SequenceKey;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Single-range allocator used to exercise the contract.
    struct FixedRange {
        key: SequenceKey,
        next: Mutex<i64>,
        end: i64,
    }

    impl Sequence for FixedRange {
        fn next_value(&self) -> Result<i64> {
            let mut next = self.next.lock().map_err(|e| ShardingError::Timeout(e.to_string()))?;
            if *next >= self.end {
                return Err(ShardingError::NoAvailableIdRange(self.key.to_string()));
            }
            let value = *next;
            *next += 1;
            Ok(value)
        }

        fn key(&self) -> &SequenceKey {
            &self.key
        }
    }

    #[test]
    fn test_options_from_settings() {
        let settings = SequenceSettings {
            schema: "App".to_string(),
            table: "Orders".to_string(),
            step: 100,
            cache_depth: 3,
            timeout_ms: 250,
        };
        let options = SequenceOptions::from_settings(&settings).unwrap();
        assert_eq!(options.key.to_string(), "app.orders");
        assert_eq!(options.timeout, Duration::from_millis(250));

        let bad = SequenceSettings { step: 0, ..settings };
        assert!(SequenceOptions::from_settings(&bad).is_err());
    }

    #[test]
    fn test_exhausted_range_fails() {
        let seq = FixedRange {
            key: SequenceKey::new("app", "orders"),
            next: Mutex::new(10),
            end: 12,
        };
        assert_eq!(seq.next_value().unwrap(), 10);
        assert_eq!(seq.next_value().unwrap(), 11);
        assert!(matches!(seq.next_value(), Err(ShardingError::NoAvailableIdRange(_))));
        assert_eq!(seq.key().table(), "orders");
    }
}
