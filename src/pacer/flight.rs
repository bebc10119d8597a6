//! In-flight indicator
//!
//! One per broadcast target. A tick may only start a cycle if it wins the
//! flag; the guard clears it when the cycle finishes (or panics).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Atomic "cycle in progress" flag
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the flag, or `None` if a cycle is already running
    pub fn try_acquire(self: &Arc<Self>) -> Option<InFlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: Arc::clone(self),
            })
    }

    /// Whether a cycle is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears the in-flight flag on drop
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder() {
        let flight = InFlight::new();

        let guard = flight.try_acquire().unwrap();
        assert!(flight.is_busy());
        assert!(flight.try_acquire().is_none());

        drop(guard);
        assert!(!flight.is_busy());
        assert!(flight.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_released_when_task_panics() {
        let flight = InFlight::new();
        let guard = flight.try_acquire().unwrap();

        let result = tokio::spawn(async move {
            let _guard = guard;
            panic!("cycle failed");
        })
        .await;

        assert!(result.is_err());
        assert!(!flight.is_busy());
    }
}
