//! Server configuration

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Broadcast server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// A client that cannot take a whole frame within this time is dropped
    pub write_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Frames with a larger payload are not sent
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 0, // Unlimited
            write_timeout: Duration::from_millis(100),
            tcp_nodelay: true, // Important for low latency
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set per-client write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Keep Nagle's algorithm enabled
    pub fn disable_nodelay(mut self) -> Self {
        self.tcp_nodelay = false;
        self
    }

    /// Set the largest payload the server will send
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.max_connections, 0);
        assert_eq!(config.write_timeout, Duration::from_millis(100));
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_builder_chaining() {
        let config = ServerConfig::default()
            .max_connections(50)
            .write_timeout(Duration::from_millis(20))
            .max_frame_size(4096)
            .disable_nodelay();

        assert_eq!(config.max_connections, 50);
        assert_eq!(config.write_timeout, Duration::from_millis(20));
        assert_eq!(config.max_frame_size, 4096);
        assert!(!config.tcp_nodelay);
    }
}
