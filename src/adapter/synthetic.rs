//! Synthetic test source
//!
//! Produces a single subject whose one marker follows an externally driven
//! pointer, so the whole pipeline can be exercised without capture hardware.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

use super::{FrameSource, SourceFrame, SubjectUpdate};
use crate::error::SourceError;
use crate::registry::Marker;

/// Name of the generated subject
pub const SYNTHETIC_SUBJECT: &str = "Test";

/// Name of the generated marker
pub const SYNTHETIC_MARKER: &str = "pointer";

/// Pointer coordinates are multiplied by this before becoming a position
pub const POINTER_SCALE: f64 = 4.0;

/// Default time between synthetic frames
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(10);

/// Handle used to move the synthetic marker
#[derive(Debug, Clone)]
pub struct PointerInput {
    tx: Arc<watch::Sender<[f64; 2]>>,
}

impl PointerInput {
    /// Set the pointer position (unscaled)
    pub fn set(&self, x: f64, y: f64) {
        self.tx.send_replace([x, y]);
    }

    /// Current pointer position (unscaled)
    pub fn get(&self) -> [f64; 2] {
        *self.tx.borrow()
    }
}

/// Deterministic source driven by a [`PointerInput`]
pub struct SyntheticSource {
    tag: String,
    subject: String,
    frame_interval: Duration,
    pointer: watch::Receiver<[f64; 2]>,
    ticker: Option<Interval>,
}

impl SyntheticSource {
    /// Create a source with the default frame interval
    pub fn new() -> (Self, PointerInput) {
        Self::with_interval(DEFAULT_FRAME_INTERVAL)
    }

    /// Create a source producing one frame per `frame_interval`
    pub fn with_interval(frame_interval: Duration) -> (Self, PointerInput) {
        let (tx, rx) = watch::channel([0.0, 0.0]);

        let source = Self {
            tag: "synthetic".to_string(),
            subject: SYNTHETIC_SUBJECT.to_string(),
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            pointer: rx,
            ticker: None,
        };

        (source, PointerInput { tx: Arc::new(tx) })
    }

    /// Override the source tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Override the generated subject's name
    pub fn with_subject(mut self, name: impl Into<String>) -> Self {
        self.subject = name.into();
        self
    }

    fn current_frame(&self) -> SourceFrame {
        let [x, y] = *self.pointer.borrow();

        SourceFrame::new(vec![SubjectUpdate {
            name: self.subject.clone(),
            markers: vec![Marker::new(
                SYNTHETIC_MARKER,
                x * POINTER_SCALE,
                y * POINTER_SCALE,
                0.0,
            )],
            segments: vec![],
        }])
    }
}

impl FrameSource for SyntheticSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<SourceFrame, SourceError> {
        let ticker = self
            .ticker
            .as_mut()
            .ok_or_else(|| SourceError::Transport(std::io::ErrorKind::NotConnected.into()))?;

        ticker.tick().await;
        Ok(self.current_frame())
    }

    async fn disconnect(&mut self) {
        self.ticker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, AdapterState, SourceAdapter};
    use crate::event::EventSink;
    use crate::registry::SubjectRegistry;

    #[tokio::test]
    async fn test_frame_follows_scaled_pointer() {
        let (mut source, pointer) = SyntheticSource::new();
        source.connect().await.unwrap();

        pointer.set(10.0, 25.0);
        let frame = source.next_frame().await.unwrap();

        assert_eq!(frame.subjects.len(), 1);
        let subject = &frame.subjects[0];
        assert_eq!(subject.name, SYNTHETIC_SUBJECT);
        assert_eq!(subject.markers.len(), 1);
        assert_eq!(subject.markers[0].position, [40.0, 100.0, 0.0]);
        assert!(subject.segments.is_empty());
    }

    #[tokio::test]
    async fn test_next_frame_requires_connect() {
        let (mut source, _pointer) = SyntheticSource::new();
        let err = source.next_frame().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_paced() {
        let (mut source, _pointer) = SyntheticSource::with_interval(Duration::from_millis(10));
        source.connect().await.unwrap();

        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            source.next_frame().await.unwrap();
        }

        // First tick is immediate, then one per interval
        assert_eq!(start.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_adapter_writes_synthetic_subject() {
        let registry = Arc::new(SubjectRegistry::new());
        let (source, pointer) = SyntheticSource::with_interval(Duration::from_millis(2));
        pointer.set(1.0, 2.0);

        let adapter = Adapter::new(source, Arc::clone(&registry), EventSink::disabled());
        adapter.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while adapter.frames_produced() < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(adapter.state(), AdapterState::Connected);
        let test = registry.get(SYNTHETIC_SUBJECT).await.unwrap();
        assert_eq!(test.source, "synthetic");
        assert_eq!(test.markers[0].position, [4.0, 8.0, 0.0]);

        adapter.stop().unwrap().await.unwrap();
    }
}
