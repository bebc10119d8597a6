//! Status events
//!
//! Components never reach into a UI. They emit [`StatusEvent`]s into an
//! [`EventSink`]; whoever owns the receiving end (the orchestrator's caller)
//! decides what to display.
//!
//! Two classes share one bounded queue. Telemetry (`FrameProduced`,
//! `AchievedRate`) arrives at frame rate and is only queued while more than
//! a quarter of the queue is free. That last quarter is held for lifecycle
//! events, so a reader that falls behind loses counters before it loses a
//! connection change, state change or log line.

use std::fmt;

use tokio::sync::mpsc;

use crate::adapter::AdapterState;

/// Broadcast transport kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// TCP socket for remote consumers
    Network,
    /// Unix domain socket for same-host consumers
    Local,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Network => write!(f, "tcp"),
            TransportKind::Local => write!(f, "local"),
        }
    }
}

/// Severity of a [`StatusEvent::Log`] message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Events emitted to the orchestrator / UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Client set of one broadcast server changed
    ConnectionsChanged {
        transport: TransportKind,
        clients: Vec<String>,
    },

    /// An adapter decoded a frame. `frame` increases monotonically per adapter.
    FrameProduced { source: String, frame: u64 },

    /// Broadcast cycles completed during the last reporting window
    AchievedRate {
        transport: TransportKind,
        frames_per_sec: u64,
    },

    /// An adapter changed connection state
    AdapterState { source: String, state: AdapterState },

    /// Free-form message for the log panel
    Log { level: LogLevel, message: String },
}

impl StatusEvent {
    /// High-rate counters that are superseded by the next one of their kind
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            StatusEvent::FrameProduced { .. } | StatusEvent::AchievedRate { .. }
        )
    }
}

/// Non-blocking event emitter
///
/// Cloned into every component. A full channel drops the event instead of
/// stalling the producer; a sink without a channel discards everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<StatusEvent>>,
    /// Slots telemetry may not take
    reserved: usize,
}

impl EventSink {
    /// Create a sink and the receiver that observes it
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let sink = Self {
            tx: Some(tx),
            reserved: capacity / 4,
        };
        (sink, rx)
    }

    /// A sink that discards all events
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Emit an event without waiting
    pub fn emit(&self, event: StatusEvent) {
        let Some(ref tx) = self.tx else {
            return;
        };

        if event.is_telemetry() && tx.capacity() <= self.reserved {
            tracing::trace!("Status queue near full, telemetry event dropped");
            return;
        }

        if let Err(e) = tx.try_send(event) {
            tracing::trace!(error = %e, "Status event dropped");
        }
    }

    /// Emit a log line
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(StatusEvent::Log {
            level,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Network.to_string(), "tcp");
        assert_eq!(TransportKind::Local.to_string(), "local");
    }

    #[tokio::test]
    async fn test_emit_delivers() {
        let (sink, mut rx) = EventSink::channel(4);
        sink.log(LogLevel::Info, "hello");

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            StatusEvent::Log {
                level: LogLevel::Info,
                message: "hello".into()
            }
        );
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = EventSink::channel(1);
        sink.log(LogLevel::Info, "first");
        sink.log(LogLevel::Info, "second");

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, StatusEvent::Log { ref message, .. } if message == "first"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_telemetry_flood_leaves_room_for_lifecycle_events() {
        let (sink, mut rx) = EventSink::channel(8);

        for frame in 0..100 {
            sink.emit(StatusEvent::FrameProduced {
                source: "synthetic".into(),
                frame,
            });
        }
        sink.emit(StatusEvent::AdapterState {
            source: "synthetic".into(),
            state: AdapterState::Error,
        });
        sink.emit(StatusEvent::ConnectionsChanged {
            transport: TransportKind::Network,
            clients: vec![],
        });

        let mut telemetry = 0;
        let mut lifecycle = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.is_telemetry() {
                telemetry += 1;
            } else {
                lifecycle.push(event);
            }
        }

        // 8 slots, 2 held back from telemetry
        assert_eq!(telemetry, 6);
        assert_eq!(lifecycle.len(), 2);
        assert!(matches!(lifecycle[0], StatusEvent::AdapterState { state: AdapterState::Error, .. }));
        assert!(matches!(lifecycle[1], StatusEvent::ConnectionsChanged { .. }));
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        let sink = EventSink::disabled();
        sink.log(LogLevel::Error, "nobody listens");
    }
}
