//! Throughput statistics for pacers and broadcast servers

use std::time::{Duration, Instant};

use crate::adapter::AdapterState;
use crate::event::TransportKind;

/// Convert a count observed over `window` into a per-second rate
pub fn rate_per_second(count: u64, window: Duration) -> u64 {
    let millis = window.as_millis();
    if millis == 0 {
        return 0;
    }
    ((count as u128 * 1000) / millis) as u64
}

/// Pacer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    /// Broadcast cycles run to completion
    pub completed: u64,
    /// Ticks skipped because a cycle was still in flight
    pub dropped: u64,
    /// Cycles per second over the last reporting window
    pub achieved_rate: u64,
}

impl PacerStats {
    /// Fraction of ticks that were skipped
    pub fn drop_ratio(&self) -> f64 {
        let total = self.completed + self.dropped;
        if total == 0 {
            0.0
        } else {
            self.dropped as f64 / total as f64
        }
    }
}

/// Broadcast server statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Connections accepted since start
    pub total_connections: u64,
    /// Currently connected clients
    pub active_connections: u64,
    /// Broadcast cycles delivered
    pub cycles_delivered: u64,
    /// Payload bytes written across all clients
    pub bytes_sent: u64,
    /// Clients disconnected because a write failed or timed out
    pub clients_dropped: u64,
    /// Time since the server started listening
    pub uptime: Duration,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Average outgoing throughput in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

/// Per-adapter status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterStats {
    pub tag: String,
    pub state: AdapterState,
    pub frames_produced: u64,
}

/// One broadcast server and the pacer driving it
#[derive(Debug, Clone)]
pub struct BroadcastStats {
    pub transport: TransportKind,
    /// Bound endpoint while listening
    pub endpoint: Option<String>,
    pub server: ServerStats,
    pub pacer: PacerStats,
}

/// Whole-relay status report
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub subjects: usize,
    pub adapters: Vec<AdapterStats>,
    pub broadcasts: Vec<BroadcastStats>,
}

impl RelayStats {
    /// Stats of one transport, if it is configured
    pub fn broadcast(&self, transport: TransportKind) -> Option<&BroadcastStats> {
        self.broadcasts.iter().find(|b| b.transport == transport)
    }
}

/// Start time helper for uptime accounting
#[derive(Debug, Clone, Copy)]
pub(crate) struct Uptime {
    started_at: Option<Instant>,
}

impl Uptime {
    pub(crate) const fn stopped() -> Self {
        Self { started_at: None }
    }

    pub(crate) fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub(crate) fn stop(&mut self) {
        self.started_at = None;
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_per_second() {
        assert_eq!(rate_per_second(200, Duration::from_secs(1)), 200);
        assert_eq!(rate_per_second(100, Duration::from_millis(500)), 200);
        assert_eq!(rate_per_second(3, Duration::from_secs(2)), 1);
        assert_eq!(rate_per_second(10, Duration::ZERO), 0);
    }

    #[test]
    fn test_pacer_drop_ratio() {
        let stats = PacerStats {
            completed: 75,
            dropped: 25,
            achieved_rate: 0,
        };
        assert!((stats.drop_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(PacerStats::default().drop_ratio(), 0.0);
    }

    #[test]
    fn test_server_stats_new() {
        let stats = ServerStats::new();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.cycles_delivered, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.clients_dropped, 0);
    }

    #[test]
    fn test_server_stats_bitrate() {
        let mut stats = ServerStats::new();
        stats.bytes_sent = 1_000_000;
        stats.uptime = Duration::from_secs(10);

        // 1,000,000 bytes * 8 bits / 10 seconds
        assert_eq!(stats.bitrate(), 800_000);
    }

    #[test]
    fn test_server_stats_bitrate_zero_uptime() {
        let mut stats = ServerStats::new();
        stats.bytes_sent = 1_000_000;
        assert_eq!(stats.bitrate(), 0);
    }

    #[test]
    fn test_relay_stats_lookup() {
        let stats = RelayStats {
            subjects: 0,
            adapters: vec![],
            broadcasts: vec![BroadcastStats {
                transport: TransportKind::Network,
                endpoint: Some("127.0.0.1:4001".into()),
                server: ServerStats::new(),
                pacer: PacerStats::default(),
            }],
        };

        assert!(stats.broadcast(TransportKind::Network).is_some());
        assert!(stats.broadcast(TransportKind::Local).is_none());
    }

    #[test]
    fn test_uptime() {
        let mut uptime = Uptime::stopped();
        assert_eq!(uptime.elapsed(), Duration::ZERO);

        uptime.start();
        assert!(uptime.elapsed() < Duration::from_secs(5));

        uptime.stop();
        assert_eq!(uptime.elapsed(), Duration::ZERO);
    }
}
