//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::session::SessionConfig;

/// Relay server configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Route serving the WebSocket endpoint
    pub ws_path: String,

    /// Maximum concurrent sessions (0 = unlimited)
    pub max_connections: usize,

    /// Options applied to every client session
    pub session: SessionConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8083)),
            ws_path: "/ws".to_string(),
            max_connections: 0, // Unlimited
            session: SessionConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the WebSocket route; a leading `/` is added if missing
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.ws_path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Replace the session options
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set the initialization write deadline
    pub fn init_write_timeout(mut self, timeout: Duration) -> Self {
        self.session = self.session.init_write_timeout(timeout);
        self
    }

    /// Set the fragment write deadline
    pub fn fragment_write_timeout(mut self, timeout: Duration) -> Self {
        self.session = self.session.fragment_write_timeout(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeliveryMode;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.bind_addr.port(), 8083);
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.session.delivery_mode, DeliveryMode::Mse);
    }

    #[test]
    fn test_config_builder() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = RelayConfig::with_addr(addr)
            .ws_path("live")
            .max_connections(64)
            .fragment_write_timeout(Duration::from_secs(2));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.ws_path, "/live");
        assert_eq!(config.max_connections, 64);
        // Clamped up to the init deadline
        assert_eq!(config.session.fragment_write_timeout, Duration::from_secs(5));
    }
}
