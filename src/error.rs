//! Error types
//!
//! Three layers, matching how failures are contained:
//!
//! - [`DecodeError`]: a single wire frame could not be decoded. Recoverable.
//! - [`EncodeError`]: a snapshot does not fit the wire format; that cycle is
//!   skipped.
//! - [`SourceError`]: what a source adapter reports per frame. `Decode` drops
//!   the frame, everything else moves the adapter to `Error`.
//! - [`Error`]: crate-level failures surfaced to the orchestrator (bind
//!   failures, lifecycle misuse).

use std::io;

use thiserror::Error;

use crate::event::TransportKind;

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Already running")]
    AlreadyRunning,

    #[error("Not running")]
    NotRunning,

    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error("{0} transport is not configured")]
    ServerDisabled(TransportKind),
}

/// Wire decode failure for a single frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected end of payload")]
    UnexpectedEof,

    #[error("Bad frame magic: {0:#06x}")]
    BadMagic(u16),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

impl DecodeError {
    /// Framing errors leave the byte stream unsynchronized; the connection
    /// cannot be used any further.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            DecodeError::BadMagic(_)
                | DecodeError::UnsupportedVersion(_)
                | DecodeError::FrameTooLarge { .. }
        )
    }
}

/// A snapshot that cannot be represented on the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Too many {field}: {count} (max {max})", max = u16::MAX)]
    TooMany { field: &'static str, count: usize },

    #[error("{field} name is {len} bytes (max {max})", max = u16::MAX)]
    NameTooLong { field: &'static str, len: usize },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Error reported by a [`FrameSource`](crate::adapter::FrameSource)
#[derive(Error, Debug)]
pub enum SourceError {
    /// One input frame was malformed; the adapter stays connected
    #[error("Decode error: {0}")]
    Decode(String),

    /// The underlying transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Connect or read did not complete in time
    #[error("Timed out: {0}")]
    Timeout(&'static str),
}

impl SourceError {
    /// Whether this error ends the adapter's current run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SourceError::Decode(_))
    }
}

impl From<DecodeError> for SourceError {
    fn from(e: DecodeError) -> Self {
        if e.is_framing() {
            SourceError::Transport(io::Error::new(io::ErrorKind::InvalidData, e))
        } else {
            SourceError::Decode(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_errors_become_transport_errors() {
        let err: SourceError = DecodeError::BadMagic(0x1234).into();
        assert!(err.is_fatal());

        let err: SourceError = DecodeError::FrameTooLarge { size: 10, max: 5 }.into();
        assert!(matches!(err, SourceError::Transport(_)));
    }

    #[test]
    fn test_payload_errors_stay_recoverable() {
        let err: SourceError = DecodeError::UnexpectedEof.into();
        assert!(!err.is_fatal());
        assert!(matches!(err, SourceError::Decode(_)));

        let err: SourceError = DecodeError::TrailingBytes(3).into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_bind_error_display() {
        let err = Error::Bind {
            endpoint: "0.0.0.0:4001".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "Failed to bind 0.0.0.0:4001: in use");
    }
}
