//! Relay configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::pacer::PacerConfig;
use crate::server::ServerConfig;

/// Port remote consumers connect to by default
pub const DEFAULT_PORT: u16 = 4001;

/// Top-level relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// TCP address of the network transport
    pub network_addr: SocketAddr,

    /// Unix socket path of the local transport (None = disabled)
    pub local_path: Option<PathBuf>,

    /// Settings shared by both broadcast servers
    pub server: ServerConfig,

    /// Settings for every pacer
    pub pacer: PacerConfig,

    /// Status events buffered before new ones are dropped
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            network_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            local_path: Some(PathBuf::from("/tmp/mocap_relay.sock")),
            server: ServerConfig::default(),
            pacer: PacerConfig::default(),
            event_capacity: 256,
        }
    }
}

impl RelayConfig {
    /// Set the network transport address
    pub fn network_addr(mut self, addr: SocketAddr) -> Self {
        self.network_addr = addr;
        self
    }

    /// Set the local socket path
    pub fn local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Run without the local transport
    pub fn disable_local(mut self) -> Self {
        self.local_path = None;
        self
    }

    /// Set broadcast server options
    pub fn server(mut self, config: ServerConfig) -> Self {
        self.server = config;
        self
    }

    /// Set the pacer target interval
    pub fn target_interval(mut self, interval: Duration) -> Self {
        self.pacer = self.pacer.target_interval(interval);
        self
    }

    /// Set pacer options
    pub fn pacer(mut self, config: PacerConfig) -> Self {
        self.pacer = config;
        self
    }

    /// Set the status event buffer size
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.network_addr.port(), DEFAULT_PORT);
        assert!(config.network_addr.ip().is_unspecified());
        assert_eq!(config.local_path, Some(PathBuf::from("/tmp/mocap_relay.sock")));
        assert_eq!(config.pacer.target_interval, Duration::from_millis(5));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let config = RelayConfig::default()
            .network_addr(addr)
            .disable_local()
            .target_interval(Duration::from_micros(100))
            .event_capacity(8);

        assert_eq!(config.network_addr, addr);
        assert!(config.local_path.is_none());
        // Clamped to the pacer minimum
        assert_eq!(config.pacer.target_interval, Duration::from_millis(1));
        assert_eq!(config.event_capacity, 8);
    }
}
