//! Engine configuration.
//!
//! Built once and passed into the engine at construction; collaborators
//! receive the pieces they need. Values come from defaults, an optional
//! YAML file, then `REPORTGEN_*` environment overrides.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReportError, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for a single fetch attempt.
    pub fetch_timeout_ms: u64,
    /// Overall budget for one report up to the stored artifact. Delivery
    /// runs after it and is bounded by `delivery_retry` instead.
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub delivery_retry: RetryPolicy,
    /// Total render attempts for backend failures (2 = one retry).
    pub render_attempts: u32,
    pub cache_ttl_secs: u64,
    pub templates_file: Option<PathBuf>,
    pub template_dir: Option<PathBuf>,
    pub database_max_connections: u32,
    /// Root for the filesystem object store and mail pickup directory.
    pub output_dir: Option<PathBuf>,
    /// Finished runs older than this are evicted together with their
    /// artifacts. `None` keeps them until forgotten explicitly.
    pub retention_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 30_000,
            request_timeout_ms: 300_000,
            retry: RetryPolicy::default(),
            delivery_retry: RetryPolicy {
                base_delay_ms: 500,
                ..RetryPolicy::default()
            },
            render_attempts: 2,
            cache_ttl_secs: 300,
            templates_file: None,
            template_dir: None,
            database_max_connections: 5,
            output_dir: None,
            retention_secs: Some(3_600),
        }
    }
}

impl EngineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ReportError::config(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReportError::config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overridden by `REPORTGEN_*` variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Separated from `from_env` so
    /// tests do not have to mutate the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| ReportError::config(format!("invalid {}: {}", key, e)))
        }

        if let Some(v) = lookup("REPORTGEN_FETCH_TIMEOUT_MS") {
            self.fetch_timeout_ms = parse("REPORTGEN_FETCH_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("REPORTGEN_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse("REPORTGEN_REQUEST_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("REPORTGEN_RETRY_ATTEMPTS") {
            self.retry.max_attempts = parse("REPORTGEN_RETRY_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("REPORTGEN_RETRY_BASE_MS") {
            self.retry.base_delay_ms = parse("REPORTGEN_RETRY_BASE_MS", v)?;
        }
        if let Some(v) = lookup("REPORTGEN_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse("REPORTGEN_CACHE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("REPORTGEN_TEMPLATES_FILE") {
            self.templates_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("REPORTGEN_TEMPLATE_DIR") {
            self.template_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("REPORTGEN_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("REPORTGEN_RETENTION_SECS") {
            self.retention_secs = Some(parse("REPORTGEN_RETENTION_SECS", v)?);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ReportError::config("timeouts must be greater than zero"));
        }
        if self.render_attempts == 0 {
            return Err(ReportError::config("render_attempts must be at least 1"));
        }
        if self.database_max_connections == 0 {
            return Err(ReportError::config("database_max_connections must be at least 1"));
        }
        self.retry.validate()?;
        self.delivery_retry.validate()
    }
}
