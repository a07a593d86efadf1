use super::types::{DdalConfig, RouteOverrideSettings, SequenceSettings, ShardRuleSettings};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const VALID_DIALECTS: [&str; 4] = ["mysql", "postgres", "generic", "sqlite"];
const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
const VALID_FORMATS: [&str; 2] = ["compact", "json"];

impl DdalConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::from_toml_str(&content)
    }

    /// Parse and finalize configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: DdalConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

        config.finalize()?;

        Ok(config)
    }

    /// Normalize names to the lower-cased form used for lookups, then validate.
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        self.router.dialect = self.router.dialect.to_lowercase();
        self.logging.level = self.logging.level.to_lowercase();
        self.logging.format = self.logging.format.to_lowercase();
        if let Some(schema) = self.router.default_schema.as_mut() {
            *schema = schema.to_lowercase();
        }

        self.validate()?;

        Ok(())
    }

    /// Validate configuration settings
    pub fn validate(&self) -> anyhow::Result<()> {
        if !VALID_DIALECTS.contains(&self.router.dialect.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid SQL dialect '{}'. Must be one of: {}",
                self.router.dialect,
                VALID_DIALECTS.join(", ")
            ));
        }

        if self.router.max_between_span == 0 {
            return Err(anyhow::anyhow!("max_between_span cannot be 0"));
        }

        if self.router.recursion_limit == 0 {
            return Err(anyhow::anyhow!("recursion_limit cannot be 0"));
        }

        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            ));
        }

        if !VALID_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_FORMATS.join(", ")
            ));
        }

        for (target, level) in &self.logging.targets {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(anyhow::anyhow!(
                    "Invalid log level '{}' for target '{}'. Must be one of: {}",
                    level,
                    target,
                    VALID_LEVELS.join(", ")
                ));
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.sharding.rules {
            rule.validate()?;
            let key = (
                rule.schema.as_deref().map(str::to_lowercase),
                rule.table.to_lowercase(),
            );
            if !seen.insert(key) {
                return Err(anyhow::anyhow!(
                    "Duplicate sharding rule for table '{}'",
                    rule.qualified_name()
                ));
            }
        }

        for route in &self.overrides.routes {
            route.validate()?;
        }

        for sequence in &self.sequences {
            sequence.validate()?;
        }

        Ok(())
    }
}

impl ShardRuleSettings {
    /// `schema.table`, or just `table` for schema-less rules
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.table.trim().is_empty() {
            return Err(anyhow::anyhow!("Sharding rule table name cannot be empty"));
        }

        if self.table_shards == 0 || self.schema_shards == 0 {
            return Err(anyhow::anyhow!(
                "Sharding rule '{}': table_shards and schema_shards must be greater than 0",
                self.qualified_name()
            ));
        }

        let sharded = self.table_shards > 1 || self.schema_shards > 1;
        match &self.shard_key {
            Some(key) if key.trim().is_empty() => {
                return Err(anyhow::anyhow!(
                    "Sharding rule '{}': shard_key cannot be empty",
                    self.qualified_name()
                ));
            }
            None if sharded => {
                return Err(anyhow::anyhow!(
                    "Sharding rule '{}' has more than one shard but no shard_key",
                    self.qualified_name()
                ));
            }
            _ => {}
        }

        if self.schema_shards > 1 && self.schema.is_none() && self.schema_format.contains("{schema}") {
            return Err(anyhow::anyhow!(
                "Sharding rule '{}': schema_format uses {{schema}} but the rule has no schema",
                self.qualified_name()
            ));
        }

        Ok(())
    }
}

impl RouteOverrideSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.physical_table, &self.value) {
            (Some(_), Some(_)) => Err(anyhow::anyhow!(
                "Route override for '{}' sets both physical_table and value",
                self.table
            )),
            (None, None) => Err(anyhow::anyhow!(
                "Route override for '{}' needs either physical_table or value",
                self.table
            )),
            (None, Some(_)) if self.physical_schema.is_some() => Err(anyhow::anyhow!(
                "Route override for '{}' sets physical_schema without physical_table",
                self.table
            )),
            _ => Ok(()),
        }
    }
}

impl SequenceSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schema.trim().is_empty() || self.table.trim().is_empty() {
            return Err(anyhow::anyhow!("Sequence schema and table cannot be empty"));
        }
        if self.step == 0 {
            return Err(anyhow::anyhow!(
                "Sequence '{}.{}': step must be greater than 0",
                self.schema,
                self.table
            ));
        }
        if self.cache_depth == 0 {
            return Err(anyhow::anyhow!(
                "Sequence '{}.{}': cache_depth must be greater than 0",
                self.schema,
                self.table
            ));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow::anyhow!(
                "Sequence '{}.{}': timeout_ms must be greater than 0",
                self.schema,
                self.table
            ));
        }
        Ok(())
    }
}
