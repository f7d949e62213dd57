//! Server configuration.

use crate::error::{ServerError, ServerResult};
use catalog_sync_protocol::{Origin, SharedSecret};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Secret shared with the peer.
    pub secret: SharedSecret,
    /// Accepted distance between a request timestamp and the server clock.
    pub skew_window: Duration,
    /// Maximum changes accepted in one push.
    pub max_push_batch: usize,
    /// Maximum changes returned by one pull.
    pub max_pull_page: u32,
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
    /// Entity kind served.
    pub entity_kind: String,
    /// Which replica this server runs on.
    pub origin: Origin,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr, secret: SharedSecret) -> Self {
        Self {
            bind_addr,
            secret,
            skew_window: Duration::from_secs(300),
            max_push_batch: 500,
            max_pull_page: 1000,
            max_body_bytes: 8 * 1024 * 1024,
            entity_kind: "product".into(),
            origin: Origin::Cloud,
        }
    }

    /// Sets the timestamp skew window.
    pub fn with_skew_window(mut self, window: Duration) -> Self {
        self.skew_window = window;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the maximum pull page size.
    pub fn with_max_pull_page(mut self, size: u32) -> Self {
        self.max_pull_page = size;
        self
    }

    /// Sets the maximum request body size.
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Sets the served entity kind.
    pub fn with_entity_kind(mut self, kind: impl Into<String>) -> Self {
        self.entity_kind = kind.into();
        self
    }

    /// Sets the replica origin.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Returns the skew window in milliseconds.
    pub fn skew_window_ms(&self) -> i64 {
        i64::try_from(self.skew_window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Checks that the configuration can serve requests.
    pub fn validate(&self) -> ServerResult<()> {
        if self.secret.is_empty() {
            return Err(ServerError::InvalidConfig("shared secret is empty".into()));
        }
        if self.max_push_batch == 0 || self.max_pull_page == 0 {
            return Err(ServerError::InvalidConfig(
                "batch and page limits must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(
            SocketAddr::from(([127, 0, 0, 1], 8080)),
            SharedSecret::new(Vec::new()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.skew_window, Duration::from_secs(300));
        assert_eq!(config.skew_window_ms(), 300_000);
        assert_eq!(config.origin, Origin::Cloud);
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap(), "secret".into())
            .with_max_push_batch(50)
            .with_max_pull_page(20)
            .with_origin(Origin::Local)
            .with_skew_window(Duration::from_secs(60));

        assert_eq!(config.max_push_batch, 50);
        assert_eq!(config.max_pull_page, 20);
        assert_eq!(config.origin, Origin::Local);
        assert_eq!(config.skew_window_ms(), 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limits_are_invalid() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap(), "secret".into())
            .with_max_pull_page(0);
        assert!(matches!(
            config.validate(),
            Err(ServerError::InvalidConfig(_))
        ));
    }
}
