//! Adapter connection state machine
//!
//! ```text
//!  Disconnected ──start──► Connecting ──► Connected
//!       ▲                     │  │            │
//!       └────────stop─────────┘  │            │ stop
//!       ▲                        ▼            ▼
//!       └──────────────────── (error) ──► Error ──reconnect──► Connecting
//! ```
//!
//! `Error` is terminal until an explicit reconnect.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::{EventSink, StatusEvent};

/// Connection state of a source adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Not running
    Disconnected,
    /// Run started, source connecting
    Connecting,
    /// Source connected, producing frames
    Connected,
    /// Transport failed; needs a reconnect request
    Error,
}

impl AdapterState {
    /// Whether a run is in progress
    pub fn is_active(self) -> bool {
        matches!(self, AdapterState::Connecting | AdapterState::Connected)
    }

    /// Whether `next` is a legal transition from this state
    pub fn can_transition_to(self, next: AdapterState) -> bool {
        use AdapterState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Connecting)
        )
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::Disconnected => "disconnected",
            AdapterState::Connecting => "connecting",
            AdapterState::Connected => "connected",
            AdapterState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct StatusInner {
    state: AdapterState,
    /// Bumped on every start/stop so a finished run cannot overwrite the
    /// state set by its successor
    generation: u64,
}

/// State cell shared between an adapter handle and its running task
#[derive(Debug)]
pub(crate) struct AdapterStatus {
    source: String,
    inner: Mutex<StatusInner>,
    events: EventSink,
}

impl AdapterStatus {
    pub(crate) fn new(source: impl Into<String>, events: EventSink) -> Self {
        Self {
            source: source.into(),
            inner: Mutex::new(StatusInner {
                state: AdapterState::Disconnected,
                generation: 0,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> AdapterState {
        self.lock().state
    }

    /// Disconnected -> Connecting. Returns the new run generation, or `None`
    /// if the adapter is not in `Disconnected`.
    pub(crate) fn begin_run(&self) -> Option<u64> {
        let generation = {
            let mut inner = self.lock();
            if inner.state != AdapterState::Disconnected {
                return None;
            }
            inner.state = AdapterState::Connecting;
            inner.generation += 1;
            inner.generation
        };

        self.announce(AdapterState::Connecting);
        Some(generation)
    }

    /// Disconnected | Error -> Connecting, for an explicit reconnect
    pub(crate) fn begin_reconnect(&self) -> u64 {
        let (generation, changed) = {
            let mut inner = self.lock();
            let changed = inner.state != AdapterState::Connecting;
            inner.state = AdapterState::Connecting;
            inner.generation += 1;
            (inner.generation, changed)
        };

        if changed {
            self.announce(AdapterState::Connecting);
        }
        generation
    }

    /// Invalidate the current run. An active adapter becomes Disconnected;
    /// Error stays Error.
    pub(crate) fn end_run(&self) {
        let changed = {
            let mut inner = self.lock();
            inner.generation += 1;
            if inner.state.is_active() {
                inner.state = AdapterState::Disconnected;
                true
            } else {
                false
            }
        };

        if changed {
            self.announce(AdapterState::Disconnected);
        }
    }

    /// Transition on behalf of run `generation`. Ignored when the run is
    /// stale or the transition is illegal.
    pub(crate) fn update(&self, generation: u64, next: AdapterState) -> bool {
        {
            let mut inner = self.lock();
            if inner.generation != generation || !inner.state.can_transition_to(next) {
                return false;
            }
            inner.state = next;
        }

        self.announce(next);
        true
    }

    fn announce(&self, state: AdapterState) {
        tracing::info!(source = %self.source, state = %state, "Adapter state changed");
        self.events.emit(StatusEvent::AdapterState {
            source: self.source.clone(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use AdapterState::*;

        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Error));
        assert!(Error.can_transition_to(Connecting));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Disconnected));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn test_run_lifecycle() {
        let status = AdapterStatus::new("test", EventSink::disabled());
        assert_eq!(status.state(), AdapterState::Disconnected);

        let generation = status.begin_run().unwrap();
        assert_eq!(status.state(), AdapterState::Connecting);

        // Already running
        assert!(status.begin_run().is_none());

        assert!(status.update(generation, AdapterState::Connected));
        status.end_run();
        assert_eq!(status.state(), AdapterState::Disconnected);
    }

    #[test]
    fn test_stale_run_cannot_change_state() {
        let status = AdapterStatus::new("test", EventSink::disabled());
        let first = status.begin_run().unwrap();
        status.end_run();
        let second = status.begin_run().unwrap();

        assert!(!status.update(first, AdapterState::Error));
        assert_eq!(status.state(), AdapterState::Connecting);
        assert!(status.update(second, AdapterState::Connected));
    }

    #[test]
    fn test_error_requires_reconnect() {
        let status = AdapterStatus::new("test", EventSink::disabled());
        let generation = status.begin_run().unwrap();
        status.update(generation, AdapterState::Error);

        assert!(status.begin_run().is_none());
        status.end_run();
        assert_eq!(status.state(), AdapterState::Error);

        status.begin_reconnect();
        assert_eq!(status.state(), AdapterState::Connecting);
    }

    #[tokio::test]
    async fn test_transitions_are_announced() {
        let (sink, mut rx) = EventSink::channel(8);
        let status = AdapterStatus::new("vicon", sink);

        let generation = status.begin_run().unwrap();
        status.update(generation, AdapterState::Connected);

        for expected in [AdapterState::Connecting, AdapterState::Connected] {
            assert_eq!(
                rx.recv().await.unwrap(),
                StatusEvent::AdapterState {
                    source: "vicon".into(),
                    state: expected
                }
            );
        }
    }
}
