//! Motion-capture relay
//!
//! Ingests live subject state from any number of tracking sources and pushes
//! full snapshots to downstream consumers over TCP and a local socket, at a
//! fixed, bounded rate.
//!
//! ```text
//!   [Source adapters] ──apply_update──► [SubjectRegistry]
//!                                            │ snapshot
//!   [FramePacer] ──tick──► [BroadcastServer] ─┘
//!                                │ encode once, fan out
//!                                ▼
//!                         client, client, ...
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mocap_relay::adapter::SyntheticSource;
//! use mocap_relay::{Relay, RelayConfig};
//!
//! # async fn run() -> mocap_relay::Result<()> {
//! let (mut relay, mut events) = Relay::new(RelayConfig::default());
//!
//! let (source, pointer) = SyntheticSource::new();
//! relay.attach(source);
//! relay.start().await?;
//!
//! pointer.set(0.5, 0.25);
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod pacer;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use adapter::{AdapterState, FrameSource, SourceAdapter, SyntheticSource, UpstreamSource};
pub use error::{DecodeError, EncodeError, Error, Result, SourceError};
pub use event::{EventSink, LogLevel, StatusEvent, TransportKind};
pub use orchestrator::{Relay, RelayConfig};
pub use pacer::{FramePacer, PacerConfig};
pub use registry::{Marker, Segment, Snapshot, Subject, SubjectRegistry};
pub use server::{BroadcastServer, ServerConfig};
pub use stats::RelayStats;
