//! Persistence configuration
//!
//! Tunables for retry, prefetch and the on-disk cache. Loaded from defaults,
//! a JSON file, and `STORYKEEP_*` environment variables, in that order.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default total invocations for a remote call (first try included)
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between remote attempts (milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Default number of prefetch tasks allowed to run at once
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 3;

/// Cache directory under the home directory when none is configured
pub const DEFAULT_CACHE_DIR: &str = ".storykeep/cache";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Total invocations for a remote call, at least 1 (default: 3)
    pub remote_retry_attempts: u32,
    /// Delay before each retry (default: 200ms)
    pub remote_retry_delay_ms: u64,
    /// Concurrent prefetch tasks, at least 1 (default: 3)
    pub prefetch_concurrency: usize,
    /// Root of the file-backed local store (default: `~/.storykeep/cache`)
    pub cache_root: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            remote_retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            remote_retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            prefetch_concurrency: DEFAULT_PREFETCH_CONCURRENCY,
            cache_root: None,
        }
    }
}

impl PersistenceConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Apply `STORYKEEP_*` environment variables on top of `self`
    pub fn with_env_overrides(self) -> Result<Self, String> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
            value
                .trim()
                .parse()
                .map_err(|_| format!("{} has an invalid value: {:?}", key, value))
        }

        if let Some(value) = lookup("STORYKEEP_RETRY_ATTEMPTS") {
            self.remote_retry_attempts = parse("STORYKEEP_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("STORYKEEP_RETRY_DELAY_MS") {
            self.remote_retry_delay_ms = parse("STORYKEEP_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("STORYKEEP_PREFETCH_CONCURRENCY") {
            self.prefetch_concurrency = parse("STORYKEEP_PREFETCH_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("STORYKEEP_CACHE_ROOT") {
            if !value.is_empty() {
                self.cache_root = Some(PathBuf::from(value));
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.remote_retry_attempts == 0 {
            return Err("remote_retry_attempts must be at least 1".to_string());
        }
        if self.prefetch_concurrency == 0 {
            return Err("prefetch_concurrency must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.remote_retry_delay_ms)
    }

    /// The configured cache root, or `~/.storykeep/cache`
    ///
    /// `None` only when nothing is configured and there is no home directory.
    pub fn resolve_cache_root(&self) -> Option<PathBuf> {
        self.cache_root
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(DEFAULT_CACHE_DIR)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PersistenceConfig::default();
        assert_eq!(config.remote_retry_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(200));
        assert_eq!(config.prefetch_concurrency, 3);
        assert!(config.cache_root.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = PersistenceConfig {
            prefetch_concurrency: 0,
            ..PersistenceConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("prefetch_concurrency"));
    }

    #[test]
    fn test_env_overrides() {
        let config = PersistenceConfig::default()
            .apply_overrides(env(&[
                ("STORYKEEP_RETRY_ATTEMPTS", "5"),
                ("STORYKEEP_RETRY_DELAY_MS", " 10 "),
                ("STORYKEEP_CACHE_ROOT", "/tmp/storykeep"),
            ]))
            .unwrap();
        assert_eq!(config.remote_retry_attempts, 5);
        assert_eq!(config.remote_retry_delay_ms, 10);
        assert_eq!(config.prefetch_concurrency, 3);
        assert_eq!(config.cache_root, Some(PathBuf::from("/tmp/storykeep")));

        let err = PersistenceConfig::default()
            .apply_overrides(env(&[("STORYKEEP_PREFETCH_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(err.contains("STORYKEEP_PREFETCH_CONCURRENCY"));
    }

    #[test]
    fn test_resolve_cache_root_prefers_configured() {
        let config = PersistenceConfig {
            cache_root: Some(PathBuf::from("/data/cache")),
            ..PersistenceConfig::default()
        };
        assert_eq!(config.resolve_cache_root(), Some(PathBuf::from("/data/cache")));
    }

    #[test]
    fn test_partial_json_file() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("storykeep.json");
        std::fs::write(&path, r#"{ "prefetch_concurrency": 8 }"#)?;

        let config = PersistenceConfig::from_json_file(&path)?;
        assert_eq!(config.prefetch_concurrency, 8);
        assert_eq!(config.remote_retry_attempts, 3);

        std::fs::write(&path, r#"{ "remote_retry_attempts": 0 }"#)?;
        assert!(PersistenceConfig::from_json_file(&path).is_err());
        Ok(())
    }
}
