//! Runtime configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`task-cache.toml` in the working directory)
//! 2. Environment variables
//!
//! Environment variables override TOML configuration. Malformed values in
//! the environment are ignored and the previous value is kept.
//!
//! `ttl_secs` and `reclaim_interval_secs` must lie in `1..=86400`.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [cache]
//! path = "/var/lib/task-cache"
//! ttl_secs = 300
//! reclaim_interval_secs = 120
//!
//! [logging]
//! level = "debug"
//!
//! [diagnostics]
//! dsn = "https://diagnostics.internal/api/reports"
//! release = "1.4.2"
//! module = "result-worker"
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `LOG_LEVEL` | `logging.level` |
//! | `KUBERNETES_SERVICE_HOST` | `logging.managed_runtime` (set when present) |
//! | `TASK_CACHE_DIAGNOSTICS_DSN` | `diagnostics.dsn` |
//! | `TASK_CACHE_DIAGNOSTICS_DEBUG` | `diagnostics.debug` |
//! | `TASK_CACHE_PATH` | `cache.path` |
//! | `TASK_CACHE_TTL_SECS` | `cache.ttl_secs` |
//! | `TASK_CACHE_RECLAIM_INTERVAL_SECS` | `cache.reclaim_interval_secs` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheLimits;
use crate::constants::{
    DEFAULT_TTL, MAX_DURATION, MAX_PAYLOAD_BYTES, NOTIFY_MAX_PAYLOAD_BYTES,
    RECLAIM_DISCARD_RATIO, RECLAIM_INTERVAL,
};

/// File read by [`Settings::load`] when present.
pub const DEFAULT_CONFIG_FILE: &str = "task-cache.toml";

/// Log level used when none (or an invalid one) is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {error}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying error message.
        error: String,
    },

    /// The configuration file is not valid TOML for [`Settings`].
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending setting.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The diagnostics endpoint could not be used.
    #[error("invalid diagnostics DSN {dsn}: {reason}")]
    InvalidDsn {
        /// The configured DSN.
        dsn: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A global log subscriber was already installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Storage location and limits.
    pub cache: CacheSettings,
    /// Local log output.
    pub logging: LoggingSettings,
    /// Remote failure reporting.
    pub diagnostics: DiagnosticsSettings,
}

/// Storage location and cache limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory of the on-disk engine.
    pub path: PathBuf,
    /// Record time-to-live in seconds.
    pub ttl_secs: u64,
    /// Hard ceiling on a single payload.
    pub max_payload_bytes: usize,
    /// Payloads above this size skip the post-write hook.
    pub notify_max_payload_bytes: usize,
    /// Reclamation worker period in seconds.
    pub reclaim_interval_secs: u64,
    /// Minimum stale fraction of a segment before it is rewritten.
    pub reclaim_discard_ratio: f32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/task-cache"),
            ttl_secs: DEFAULT_TTL.as_secs(),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            notify_max_payload_bytes: NOTIFY_MAX_PAYLOAD_BYTES,
            reclaim_interval_secs: RECLAIM_INTERVAL.as_secs(),
            reclaim_discard_ratio: RECLAIM_DISCARD_RATIO,
        }
    }
}

impl CacheSettings {
    /// Converts these settings into per-handle limits.
    pub fn limits(&self) -> CacheLimits {
        CacheLimits {
            ttl: Duration::from_secs(self.ttl_secs),
            max_payload_bytes: self.max_payload_bytes,
            notify_max_payload_bytes: self.notify_max_payload_bytes,
            reclaim_interval: Duration::from_secs(self.reclaim_interval_secs),
            reclaim_discard_ratio: self.reclaim_discard_ratio,
        }
    }
}

/// Local log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Verbosity: `trace`, `debug`, `info`, `warn`, `error` or `off`.
    pub level: String,
    /// Running under an orchestrator: plain stdout output with RFC 3339
    /// timestamps instead of coloured local output.
    pub managed_runtime: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            managed_runtime: false,
        }
    }
}

/// Remote failure reporting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Endpoint receiving failure reports. `None` disables remote
    /// reporting; local operation is unaffected.
    pub dsn: Option<String>,
    /// Release tag attached to every report.
    pub release: Option<String>,
    /// Module tag attached to every report.
    pub module: String,
    /// Log delivery of every report, not just failures.
    pub debug: bool,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            dsn: None,
            release: None,
            module: env!("CARGO_PKG_NAME").to_string(),
            debug: false,
        }
    }
}

impl Settings {
    /// Loads configuration from [`DEFAULT_CONFIG_FILE`] (if present) and
    /// the environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        let mut settings = if path.exists() {
            Self::from_toml(&read_file(path)?)?
        } else {
            Self::default()
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Loads configuration from a specific file, then the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut settings = Self::from_toml(&read_file(path.as_ref())?)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Parses configuration from TOML content without consulting the
    /// environment.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(level) = non_empty("LOG_LEVEL") {
            self.logging.level = level.trim().to_lowercase();
        }
        if non_empty("KUBERNETES_SERVICE_HOST").is_some() {
            self.logging.managed_runtime = true;
        }

        if let Some(dsn) = non_empty("TASK_CACHE_DIAGNOSTICS_DSN") {
            self.diagnostics.dsn = Some(dsn);
        }
        if let Some(Ok(debug)) = non_empty("TASK_CACHE_DIAGNOSTICS_DEBUG").map(|v| v.parse()) {
            self.diagnostics.debug = debug;
        }

        if let Some(path) = non_empty("TASK_CACHE_PATH") {
            self.cache.path = PathBuf::from(path);
        }
        if let Some(ttl) = duration_secs(non_empty("TASK_CACHE_TTL_SECS")) {
            self.cache.ttl_secs = ttl;
        }
        if let Some(interval) = duration_secs(non_empty("TASK_CACHE_RECLAIM_INTERVAL_SECS")) {
            self.cache.reclaim_interval_secs = interval;
        }
    }

    /// Rejects settings the cache cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cache = &self.cache;
        check_duration("cache.ttl_secs", cache.ttl_secs)?;
        check_duration("cache.reclaim_interval_secs", cache.reclaim_interval_secs)?;
        if !(cache.reclaim_discard_ratio > 0.0 && cache.reclaim_discard_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "cache.reclaim_discard_ratio",
                reason: format!("{} is outside (0, 1]", cache.reclaim_discard_ratio),
            });
        }
        if cache.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.max_payload_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        error: e.to_string(),
    })
}

fn check_duration(field: &'static str, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 || secs > MAX_DURATION.as_secs() {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{secs} is outside 1..={}", MAX_DURATION.as_secs()),
        });
    }
    Ok(())
}

fn duration_secs(value: Option<String>) -> Option<u64> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| (1..=MAX_DURATION.as_secs()).contains(v))
}
