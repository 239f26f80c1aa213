//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Caller wait applied when `execute` is given no timeout.
    pub default_timeout: Duration,
    /// Upper bound callers may apply via [`EngineConfig::effective_timeout`].
    pub max_timeout: Duration,
    /// How long a cancelled operation may take to settle before it is recorded as cancelled anyway.
    pub cancel_grace: Duration,
    /// Operation records older than this are evicted by the retention sweep.
    pub retention: Duration,
    /// Retention sweep interval.
    pub sweep_interval: Duration,
    /// Entries returned by a log read when the caller passes a limit of 0.
    pub default_log_limit: usize,
    /// Database file used by the binary.
    pub db_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300), // 5 minutes
            cancel_grace: Duration::from_secs(5),
            retention: Duration::from_secs(86_400), // 24 hours
            sweep_interval: Duration::from_secs(3600),
            default_log_limit: 100,
            db_path: PathBuf::from("./data/async-ops.db"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `ASYNC_OPS_*` environment variables.
    ///
    /// Unset variables fall back to the defaults; set but unparsable ones are rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            default_timeout: env_millis("ASYNC_OPS_DEFAULT_TIMEOUT_MS")?
                .unwrap_or(defaults.default_timeout),
            max_timeout: env_millis("ASYNC_OPS_MAX_TIMEOUT_MS")?.unwrap_or(defaults.max_timeout),
            cancel_grace: env_millis("ASYNC_OPS_CANCEL_GRACE_MS")?
                .unwrap_or(defaults.cancel_grace),
            retention: env_u64("ASYNC_OPS_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            sweep_interval: env_u64("ASYNC_OPS_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            default_log_limit: env_u64("ASYNC_OPS_LOG_LIMIT")?
                .map(|n| n as usize)
                .unwrap_or(defaults.default_log_limit),
            db_path: std::env::var("ASYNC_OPS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        })
    }

    /// Caller-side timeout resolution: default when absent, capped at `max_timeout`.
    pub fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) => Duration::from_millis(ms).min(self.max_timeout),
            None => self.default_timeout.min(self.max_timeout),
        }
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_u64(key)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_timeout_defaults_when_absent() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_timeout(None), Duration::from_secs(30));
    }

    #[test]
    fn effective_timeout_caps_at_max() {
        let config = EngineConfig {
            max_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(config.effective_timeout(Some(60_000)), Duration::from_secs(10));
        assert_eq!(config.effective_timeout(Some(500)), Duration::from_millis(500));
    }

    #[test]
    fn env_u64_rejects_garbage() {
        // Unique key so parallel tests never race on it.
        let key = "ASYNC_OPS_TEST_GARBAGE_VALUE";
        unsafe { std::env::set_var(key, "soon") };
        let err = env_u64(key).unwrap_err();
        unsafe { std::env::remove_var(key) };
        assert!(err.to_string().contains(key));
    }

    #[test]
    fn env_u64_unset_is_none() {
        assert!(env_u64("ASYNC_OPS_TEST_NEVER_SET").unwrap().is_none());
    }
}
