//! Source adapters
//!
//! An adapter turns one tracking source into registry updates. The work is
//! split in two:
//!
//! - [`FrameSource`] is the source-specific part: connect, decode the next
//!   frame, disconnect. Implement it to add a new source.
//! - [`Adapter`] drives any `FrameSource` on its own task, walks the
//!   [`AdapterState`] machine, writes into the registry and emits
//!   frame-produced events. The orchestrator holds adapters as
//!   `Box<dyn SourceAdapter>`.
//!
//! Failure policy: a [`SourceError::Decode`](crate::error::SourceError) drops
//! the frame and the adapter stays connected; any other error moves the
//! adapter to `Error` until a reconnect.

pub mod driver;
pub mod state;
pub mod synthetic;
pub mod upstream;

use std::fmt;
use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::SourceError;
use crate::registry::{Marker, Segment, Subject};

pub use driver::Adapter;
pub use state::AdapterState;
pub use synthetic::{PointerInput, SyntheticSource};
pub use upstream::{UpstreamConfig, UpstreamSource};

/// Network endpoint of a source that connects somewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoint {
    pub host: String,
    pub port: u16,
}

impl SourceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for SourceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// New state for one subject, as decoded from a source
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectUpdate {
    pub name: String,
    pub markers: Vec<Marker>,
    pub segments: Vec<Segment>,
}

impl From<Subject> for SubjectUpdate {
    fn from(subject: Subject) -> Self {
        Self {
            name: subject.name,
            markers: subject.markers,
            segments: subject.segments,
        }
    }
}

/// One decoded input frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFrame {
    pub subjects: Vec<SubjectUpdate>,
}

impl SourceFrame {
    pub fn new(subjects: Vec<SubjectUpdate>) -> Self {
        Self { subjects }
    }
}

/// Source-specific decoding
///
/// Methods are only ever called from the adapter's own task, one at a time.
/// `next_frame` must be cancel-safe: the adapter drops it when stopped.
pub trait FrameSource: Send + 'static {
    /// Tag written into every subject this source produces
    fn tag(&self) -> &str;

    /// Apply a new endpoint before the next connect. Sources without an
    /// endpoint ignore it.
    fn configure(&mut self, endpoint: &SourceEndpoint) {
        tracing::debug!(source = self.tag(), endpoint = %endpoint, "Endpoint ignored");
    }

    /// Establish the connection
    fn connect(&mut self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Wait for and decode the next frame
    fn next_frame(&mut self) -> impl Future<Output = Result<SourceFrame, SourceError>> + Send;

    /// Release the connection
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// Control handle for a running adapter
///
/// All methods must be called from within a Tokio runtime.
pub trait SourceAdapter: Send + Sync {
    /// Source tag
    fn tag(&self) -> &str;

    /// Current connection state
    fn state(&self) -> AdapterState;

    /// Frames decoded so far (monotonic across reconnects)
    fn frames_produced(&self) -> u64;

    /// Start producing. No-op if already running; refused in `Error`.
    fn start(&self);

    /// Request termination. Awaiting the returned handle guarantees the
    /// adapter performs no further registry writes.
    fn stop(&self) -> Option<JoinHandle<()>>;

    /// Restart from any state, optionally with a new endpoint
    fn reconnect(&self, endpoint: Option<SourceEndpoint>);
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(SourceEndpoint::new("10.0.0.5", 801).to_string(), "10.0.0.5:801");
    }

    #[test]
    fn test_update_from_subject() {
        let subject = Subject {
            name: "Bob".into(),
            markers: vec![Marker::new("m", 1.0, 2.0, 3.0)],
            segments: vec![],
            updated_at: SystemTime::now(),
            source: "upstream".into(),
        };

        let update = SubjectUpdate::from(subject);
        assert_eq!(update.name, "Bob");
        assert_eq!(update.markers.len(), 1);
    }
}
