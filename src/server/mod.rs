//! Broadcast servers
//!
//! One [`BroadcastServer`] per transport kind. Each one owns its client list
//! and in-flight indicator; the only state it shares with the rest of the
//! relay is the subject registry it reads snapshots from.
//!
//! ```text
//!   accept loop ──► clients: [c1, c2, ...]  ◄── watcher per client (hangup)
//!                          │
//!   pacer tick ──► run_cycle: snapshot ─► encode once ─► offer to c1, c2, ...
//!
//!   writer per client: timeout(write latest frame) ─► on failure drop client
//! ```

pub mod client;
pub mod config;
pub mod listener;
pub mod transport;

pub use config::ServerConfig;
pub use listener::BroadcastServer;
pub use transport::{TcpTransport, Transport};

#[cfg(unix)]
pub use transport::{LocalEndpoint, LocalTransport};
