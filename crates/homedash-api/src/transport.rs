// Shared transport configuration for building reqwest::Client instances.
//
// Every probe goes through one client so connection pooling and the
// user agent stay consistent across services.

use std::time::Duration;

use crate::error::Error;

/// Default deadline for a single health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Hard deadline for one request, connect through body.
    pub timeout: Duration,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: Duration::from_secs(3),
            user_agent: concat!("homedash/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportConfig {
    /// Config with a custom request timeout and defaults elsewhere.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            connect_timeout: timeout.min(Duration::from_secs(3)),
            ..Self::default()
        }
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| Error::Client(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_five_second_probe_timeout() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.user_agent.starts_with("homedash/"));
    }

    #[test]
    fn short_timeout_caps_connect_timeout() {
        let config = TransportConfig::with_timeout(Duration::from_millis(200));
        assert_eq!(config.timeout, Duration::from_millis(200));
        assert_eq!(config.connect_timeout, Duration::from_millis(200));
    }
}
