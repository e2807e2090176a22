//! Engine configuration and declared content specs.
//!
//! Specs are declarative and never persisted; the reconciliation driver
//! re-reads them from the config file on every pass. Key bundles are flat
//! JSON maps referenced by path and passed opaquely to collaborators.

use crate::core::error::DripError;
use crate::core::fingerprint;
use crate::registry::KeyBundle;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TICK_SECONDS: u64 = 600;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default, rename = "content")]
    pub content: Vec<ContentSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite database of record.
    pub database: PathBuf,
    /// Cadence of the reconcile + job-sync core tick.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

fn default_tick_seconds() -> u64 {
    DEFAULT_TICK_SECONDS
}

/// One declared content item: behavior identifiers, schedule, initial
/// authorization flag and credential reference.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentSpec {
    /// Content variant; names the store table and the declared schema.
    pub variant: String,
    pub generator: String,
    pub publisher: String,
    #[serde(default)]
    pub authorizer: Option<String>,
    /// Cron expression (seconds field first). Absent means "run
    /// immediately, do not recur".
    #[serde(default)]
    pub schedule: Option<String>,
    /// Pre-authorized specs skip the authorization gate entirely.
    #[serde(default)]
    pub authorized: bool,
    /// Path to a flat JSON key bundle.
    #[serde(default)]
    pub keys: Option<PathBuf>,
}

impl ContentSpec {
    pub fn fingerprint(&self) -> String {
        fingerprint::fingerprint(
            &self.variant,
            &self.generator,
            &self.publisher,
            self.authorizer.as_deref(),
            self.schedule.as_deref(),
        )
    }
}

pub fn load(path: &Path) -> Result<Config, DripError> {
    let raw = fs::read_to_string(path).map_err(DripError::IoError)?;
    toml::from_str(&raw).map_err(|e| DripError::ConfigError(format!("{}: {}", path.display(), e)))
}

pub fn load_key_bundle(path: Option<&Path>) -> Result<KeyBundle, DripError> {
    match path {
        None => Ok(KeyBundle::new()),
        Some(p) => {
            let raw = fs::read_to_string(p).map_err(DripError::IoError)?;
            serde_json::from_str(&raw).map_err(|e| {
                DripError::ConfigError(format!("key bundle {}: {}", p.display(), e))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            database = "drip.db"

            [[content]]
            variant = "social_post"
            generator = "static_text"
            publisher = "console"
            schedule = "0 0 9 * * *"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.tick_seconds, DEFAULT_TICK_SECONDS);
        assert_eq!(config.content.len(), 1);
        let spec = &config.content[0];
        assert!(spec.authorizer.is_none());
        assert!(!spec.authorized);
        assert!(spec.keys.is_none());
    }

    #[test]
    fn test_missing_key_bundle_path_yields_empty_bundle() {
        assert!(load_key_bundle(None).unwrap().is_empty());
    }
}
