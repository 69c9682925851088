//! Engine configuration.

use thiserror::Error;

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Maximum number of concurrent workers.
pub const MAX_CONCURRENCY: usize = 100;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

/// Project URL used in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/fierce/fetchq";

/// Default User-Agent identifying the tool and version.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("fetchq/{version} (+{PROJECT_UA_URL})")
}

/// Invalid configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Concurrency outside `1..=MAX_CONCURRENCY`.
    #[error("concurrency must be between 1 and {MAX_CONCURRENCY}, got {0}")]
    Concurrency(usize),

    /// A timeout of zero seconds.
    #[error("{0} timeout must be at least 1 second")]
    ZeroTimeout(&'static str),
}

/// Settings shared by the engine and the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of workers executing tasks concurrently.
    pub concurrency: usize,
    /// TCP/TLS connect timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// Idle read timeout, in seconds.
    pub read_timeout_secs: u64,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            user_agent: default_user_agent(),
        }
    }
}

impl EngineConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::Concurrency(self.concurrency));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("connect"));
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("read"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.validate(), Ok(()));
        assert!(config.user_agent.starts_with("fetchq/"));
    }

    #[test]
    fn test_concurrency_bounds() {
        let mut config = EngineConfig::default();
        config.concurrency = 0;
        assert_eq!(config.validate(), Err(ConfigError::Concurrency(0)));
        config.concurrency = 101;
        assert_eq!(config.validate(), Err(ConfigError::Concurrency(101)));
        config.concurrency = 100;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let config = EngineConfig {
            read_timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout("read")));
    }
}
