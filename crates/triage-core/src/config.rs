//! Service configuration, loaded from TOML.
//!
//! Every section defaults to the reference values, so an empty document is
//! a valid configuration.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use triage_error::{Result, TriageError};
use triage_store::StoreOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriageConfig {
    pub store: StoreConfig,
    pub blame_cache: BlameCacheConfig,
    pub lifecycle: LifecycleConfig,
    pub ingest: IngestConfig,
    pub filters: FilterConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub busy_timeout_ms: u64,
    pub pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_size: 8,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            pool_size: self.pool_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlameCacheConfig {
    pub max_entries: u64,
    /// Longest a single VCS blame may run before the frame is treated as
    /// unblamed.
    pub timeout_ms: u64,
}

impl Default for BlameCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: triage_blame::DEFAULT_MAX_ENTRIES,
            timeout_ms: 2_000,
        }
    }
}

impl BlameCacheConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    /// Age after which an undeployed fix is presumed superseded.
    pub stale_fix_days: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { stale_fix_days: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Attempts per report, counting the first.
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` sleeps `n * retry_backoff_ms` before retrying.
    pub retry_backoff_ms: u64,
    /// Per-report budget. `None` means no deadline.
    pub deadline_ms: Option<u64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff_ms: 10,
            deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub redact_emails: bool,
    /// Additional regexes whose matches are replaced before persistence.
    pub extra_patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            redact_emails: true,
            extra_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            json: false,
        }
    }
}

impl TriageConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|err| TriageError::InvalidConfig {
            detail: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: String| Err(TriageError::InvalidConfig { detail });
        if self.store.pool_size == 0 {
            return invalid("store.pool_size must be > 0".to_owned());
        }
        if self.blame_cache.max_entries == 0 {
            return invalid("blame_cache.max_entries must be > 0".to_owned());
        }
        if self.blame_cache.timeout_ms == 0 {
            return invalid("blame_cache.timeout_ms must be > 0".to_owned());
        }
        if self.ingest.max_attempts == 0 {
            return invalid("ingest.max_attempts must be > 0".to_owned());
        }
        if self.ingest.deadline_ms == Some(0) {
            return invalid("ingest.deadline_ms must be > 0 when set".to_owned());
        }
        for pattern in &self.filters.extra_patterns {
            if let Err(err) = Regex::new(pattern) {
                return invalid(format!("filters.extra_patterns: {err}"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.ingest.deadline_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_reference_values() {
        let config = TriageConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(config, TriageConfig::default());
        assert_eq!(config.blame_cache.max_entries, 500_000);
        assert_eq!(config.blame_cache.timeout(), Duration::from_secs(2));
        assert_eq!(config.lifecycle.stale_fix_days, 10);
        assert_eq!(config.ingest.max_attempts, 5);
        assert_eq!(config.store.options(), StoreOptions::default());
        assert!(config.deadline().is_none());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = TriageConfig::from_toml_str(
            r#"
            [blame_cache]
            max_entries = 100
            timeout_ms = 750

            [ingest]
            max_attempts = 3
            deadline_ms = 250

            [filters]
            redact_emails = false
            extra_patterns = ['\bcard=\d+']

            [logging]
            filter = "triage_core=debug"
            json = true
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.blame_cache.max_entries, 100);
        assert_eq!(config.blame_cache.timeout_ms, 750);
        assert_eq!(config.ingest.max_attempts, 3);
        assert_eq!(config.ingest.retry_backoff_ms, 10);
        assert_eq!(config.deadline(), Some(Duration::from_millis(250)));
        assert!(!config.filters.redact_emails);
        assert!(config.logging.json);
        assert_eq!(config.store.pool_size, 8);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = TriageConfig::from_toml_str("[blame_cache]\nmax_entries = 0\n")
            .expect_err("zero capacity must be rejected");
        assert!(matches!(err, TriageError::InvalidConfig { .. }));
    }

    #[test]
    fn test_zero_blame_timeout_rejected() {
        let err = TriageConfig::from_toml_str("[blame_cache]\ntimeout_ms = 0\n")
            .expect_err("zero timeout must be rejected");
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let err = TriageConfig::from_toml_str("[filters]\nextra_patterns = ['(unclosed']\n")
            .expect_err("bad regex must be rejected");
        assert!(err.to_string().contains("extra_patterns"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = TriageConfig::from_toml_str("[ingest]\nmax_attemps = 3\n")
            .expect_err("typo should be caught");
        assert!(matches!(err, TriageError::InvalidConfig { .. }));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("triage.toml");
        std::fs::write(&path, "[lifecycle]\nstale_fix_days = 3\n").expect("write config");
        let config = TriageConfig::load(&path).expect("config should load");
        assert_eq!(config.lifecycle.stale_fix_days, 3);
    }
}
