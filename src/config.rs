//! Configuration for teamsrelay.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

/// Main configuration for the bot.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            backend: BackendConfig::from_env()?,
            retry: RetryConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            server: ServerConfig::from_env()?,
        })
    }
}

/// Primary/fallback pipeline endpoints.
///
/// Both URLs are required: the bot is a thin front-end and has nothing to do
/// without a reachable pipeline, so a missing URL is a fatal startup error.
/// The two services implement the same path-based API; only the base differs.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL tried first for every pipeline call.
    pub primary_url: Url,
    /// Base URL tried when the primary fails.
    pub fallback_url: Url,
    /// Default per-request timeout; call sites may override per call.
    pub request_timeout: Duration,
}

impl BackendConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let primary_url = required_url("PRIMARY_PIPELINE_URL")?;
        let fallback_url = required_url("FALLBACK_PIPELINE_URL")?;
        let timeout_secs: u64 = parse_optional_env("BACKEND_TIMEOUT_SECS", 30)?;

        Ok(Self {
            primary_url,
            fallback_url,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Retry policy for critical-state saves.
///
/// One parameterized policy shared by every save call site. Defaults match
/// the persistence protocol: 5 total attempts, 200ms base delay doubling per
/// attempt, plus 0-100ms of uniform jitter. Worst case across all retries is
/// roughly 3s before the save is given up.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total save attempts, including the first (not a retry count).
    pub max_attempts: u32,
    /// Backoff base; attempt i sleeps `base_delay * 2^i` plus jitter.
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to every backoff sleep.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_attempts: u32 = parse_optional_env("SAVE_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SAVE_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let base_ms: u64 =
            parse_optional_env("SAVE_BASE_DELAY_MS", defaults.base_delay.as_millis() as u64)?;
        let jitter_ms: u64 =
            parse_optional_env("SAVE_MAX_JITTER_MS", defaults.max_jitter.as_millis() as u64)?;

        Ok(Self {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_jitter: Duration::from_millis(jitter_ms),
        })
    }
}

/// Ephemeral conversation-cache sizing.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum number of conversations with a live working-data bag.
    /// Least-recently-used bags are evicted past this; safe because cached
    /// data is re-askable by contract.
    pub capacity: NonZeroUsize,
}

impl CacheConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let capacity: usize = parse_optional_env("CACHE_CAPACITY", 1024)?;
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| ConfigError::InvalidValue {
            key: "CACHE_CAPACITY".to_string(),
            message: "must be at least 1".to_string(),
        })?;
        Ok(Self { capacity })
    }
}

/// HTTP ingress settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw = optional_env("BIND_ADDR")?.unwrap_or_else(|| "0.0.0.0:3978".to_string());
        let bind_addr = raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: "BIND_ADDR".to_string(),
            message: format!("{e}"),
        })?;
        Ok(Self { bind_addr })
    }
}

// Helper functions

fn required_url(key: &str) -> Result<Url, ConfigError> {
    let raw = optional_env(key)?.ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{e}"),
    })
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global, so serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn optional_env_returns_none_for_missing_var() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::remove_var("_TEST_RELAY_MISSING") };
        let result = optional_env("_TEST_RELAY_MISSING").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn optional_env_treats_empty_as_none() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::set_var("_TEST_RELAY_EMPTY", "") };
        let result = optional_env("_TEST_RELAY_EMPTY").unwrap();
        assert!(result.is_none());
        unsafe { std::env::remove_var("_TEST_RELAY_EMPTY") };
    }

    #[test]
    fn parse_optional_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::remove_var("_TEST_RELAY_NUM") };
        let val: u32 = parse_optional_env("_TEST_RELAY_NUM", 7).unwrap();
        assert_eq!(val, 7);
    }

    #[test]
    fn parse_optional_env_rejects_garbage() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::set_var("_TEST_RELAY_BAD", "not-a-number") };
        let result: Result<u32, _> = parse_optional_env("_TEST_RELAY_BAD", 7);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        unsafe { std::env::remove_var("_TEST_RELAY_BAD") };
    }

    #[test]
    fn backend_config_requires_both_urls() {
        let _lock = ENV_LOCK.lock();
        unsafe {
            std::env::set_var("PRIMARY_PIPELINE_URL", "http://primary.local:8443");
            std::env::remove_var("FALLBACK_PIPELINE_URL");
        }
        let result = BackendConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvVar(ref key)) if key == "FALLBACK_PIPELINE_URL"
        ));

        unsafe {
            std::env::set_var("FALLBACK_PIPELINE_URL", "http://fallback.local:8443");
        }
        let config = BackendConfig::from_env().unwrap();
        assert_eq!(config.primary_url.as_str(), "http://primary.local:8443/");
        unsafe {
            std::env::remove_var("PRIMARY_PIPELINE_URL");
            std::env::remove_var("FALLBACK_PIPELINE_URL");
        }
    }

    #[test]
    fn retry_config_defaults_match_protocol() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(200));
        assert_eq!(config.max_jitter, Duration::from_millis(100));
    }

    #[test]
    fn retry_config_rejects_zero_attempts() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::set_var("SAVE_MAX_ATTEMPTS", "0") };
        let result = RetryConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        unsafe { std::env::remove_var("SAVE_MAX_ATTEMPTS") };
    }
}
