//! Connection and migration settings.

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{QuarryError, QuarryResult};
use crate::migrator::MigrationOptions;

/// Used when neither the caller nor the environment names a database.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:quarry.db?mode=rwc";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Settings for [`crate::Quarry`].
///
/// Built in code, deserialized, or read from the environment with
/// [`QuarryConfig::from_env`]:
///
/// | variable | field |
/// |---|---|
/// | `DATABASE_URL` | `database_url` |
/// | `QUARRY_MAX_CONNECTIONS` | `max_connections` |
/// | `QUARRY_TIMESTAMPS` | `timestamps` |
/// | `QUARRY_BACKFILL_DEFAULTS` | `backfill_defaults` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub timestamps: bool,
    pub backfill_defaults: bool,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        let options = MigrationOptions::default();
        Self {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            timestamps: options.timestamps,
            backfill_defaults: options.backfill_defaults,
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> QuarryResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(QuarryError::Config(format!("{key}: expected a boolean, got `{other}`"))),
    }
}

impl QuarryConfig {
    /// Creates a config for `database_url` with default settings.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Reads the config from the process environment, loading `.env` first.
    pub fn from_env() -> QuarryResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the config through `lookup`; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QuarryResult<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(raw) = lookup("QUARRY_MAX_CONNECTIONS") {
            config.max_connections = raw.trim().parse().map_err(|_| {
                QuarryError::Config(format!(
                    "QUARRY_MAX_CONNECTIONS: expected a positive integer, got `{raw}`"
                ))
            })?;
        }
        if let Some(raw) = lookup("QUARRY_TIMESTAMPS") {
            config.timestamps = parse_bool("QUARRY_TIMESTAMPS", &raw)?;
        }
        if let Some(raw) = lookup("QUARRY_BACKFILL_DEFAULTS") {
            config.backfill_defaults = parse_bool("QUARRY_BACKFILL_DEFAULTS", &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings for values no pool can be built from.
    pub fn validate(&self) -> QuarryResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(QuarryError::Config("database_url is empty".to_owned()));
        }
        if self.max_connections == 0 {
            return Err(QuarryError::Config(
                "max_connections must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// The dialect implied by the URL scheme.
    pub fn dialect(&self) -> Dialect {
        Dialect::from_url(&self.database_url)
    }

    /// The migration switches carried by this config.
    pub fn migration_options(&self) -> MigrationOptions {
        MigrationOptions {
            timestamps: self.timestamps,
            backfill_defaults: self.backfill_defaults,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_keys_keep_defaults() {
        let config = QuarryConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QuarryConfig::default());
        assert_eq!(config.dialect(), Dialect::Sqlite);
    }

    #[test]
    fn reads_every_key() {
        let config = QuarryConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("QUARRY_MAX_CONNECTIONS", "12"),
            ("QUARRY_TIMESTAMPS", "false"),
            ("QUARRY_BACKFILL_DEFAULTS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "postgres://localhost/app");
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.dialect(), Dialect::Postgres);
        assert_eq!(
            config.migration_options(),
            MigrationOptions {
                timestamps: false,
                backfill_defaults: false,
            }
        );
    }

    #[test]
    fn rejects_bad_values() {
        let err = QuarryConfig::from_lookup(lookup(&[("QUARRY_MAX_CONNECTIONS", "many")]))
            .unwrap_err();
        assert!(matches!(err, QuarryError::Config(_)));
        let err = QuarryConfig::from_lookup(lookup(&[("QUARRY_MAX_CONNECTIONS", "0")])).unwrap_err();
        assert!(err.to_string().contains("max_connections"));
        let err = QuarryConfig::from_lookup(lookup(&[("QUARRY_TIMESTAMPS", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("QUARRY_TIMESTAMPS"));
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: QuarryConfig =
            serde_json::from_str(r#"{ "database_url": "sqlite::memory:" }"#).unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_connections, 5);
    }
}
