//! Service configuration

use descwallet_sync_electrum::RetryConfig;
use std::time::Duration;

/// Environment variable overriding [`ServiceConfig::sync_timeout`], in seconds
pub const SYNC_TIMEOUT_ENV: &str = "DESCWALLET_SYNC_TIMEOUT_SECS";

/// Default limit for one sync run
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Limit for one sync run; on expiry nothing is applied
    pub sync_timeout: Duration,
    /// Limit for each Electrum request
    pub request_timeout: Duration,
    /// Electrum connection retry policy
    pub retry: RetryConfig,
}

impl ServiceConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(SYNC_TIMEOUT_ENV) {
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.sync_timeout = Duration::from_secs(secs),
                _ => tracing::warn!("Ignoring {}={:?}", SYNC_TIMEOUT_ENV, value),
            }
        }
        config
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.sync_timeout, DEFAULT_SYNC_TIMEOUT);
        assert!(config.request_timeout < config.sync_timeout);
    }
}
