//! Generic adapter driver
//!
//! Runs a [`FrameSource`] on a dedicated task and feeds its frames into the
//! registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::state::{AdapterState, AdapterStatus};
use super::{FrameSource, SourceAdapter, SourceEndpoint, SourceFrame};
use crate::error::SourceError;
use crate::event::{EventSink, LogLevel, StatusEvent};
use crate::registry::SubjectRegistry;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the handle and the running task
struct Shared {
    tag: String,
    status: AdapterStatus,
    frames: AtomicU64,
    registry: Arc<SubjectRegistry>,
    events: EventSink,
    pending_endpoint: Mutex<Option<SourceEndpoint>>,
}

impl Shared {
    /// Apply every subject of a frame, then announce the frame
    async fn publish(&self, frame: SourceFrame) {
        for update in frame.subjects {
            self.registry
                .apply_update(&update.name, update.markers, update.segments, &self.tag)
                .await;
        }

        let frame = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        self.events.emit(StatusEvent::FrameProduced {
            source: self.tag.clone(),
            frame,
        });
    }

    fn fail(&self, generation: u64, error: &SourceError) {
        tracing::error!(source = %self.tag, error = %error, "Adapter transport failure");
        if self.status.update(generation, AdapterState::Error) {
            self.events
                .log(LogLevel::Error, format!("{}: {}", self.tag, error));
        }
    }
}

struct Run {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Drives a [`FrameSource`] on its own task
pub struct Adapter<S: FrameSource> {
    source: Arc<tokio::sync::Mutex<S>>,
    shared: Arc<Shared>,
    run: Mutex<Option<Run>>,
}

impl<S: FrameSource> Adapter<S> {
    /// Wrap a source. Nothing runs until [`SourceAdapter::start`].
    pub fn new(source: S, registry: Arc<SubjectRegistry>, events: EventSink) -> Self {
        let tag = source.tag().to_string();

        Self {
            source: Arc::new(tokio::sync::Mutex::new(source)),
            shared: Arc::new(Shared {
                status: AdapterStatus::new(tag.clone(), events.clone()),
                tag,
                frames: AtomicU64::new(0),
                registry,
                events,
                pending_endpoint: Mutex::new(None),
            }),
            run: Mutex::new(None),
        }
    }

    fn spawn(&self, generation: u64, previous: Option<JoinHandle<()>>) -> Run {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.shared);

        let task = tokio::spawn(async move {
            // The previous run must release the source first
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            drive(source, shared, generation, shutdown_rx).await;
        });

        Run { shutdown, task }
    }
}

impl<S: FrameSource> SourceAdapter for Adapter<S> {
    fn tag(&self) -> &str {
        &self.shared.tag
    }

    fn state(&self) -> AdapterState {
        self.shared.status.state()
    }

    fn frames_produced(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    fn start(&self) {
        let mut run = lock(&self.run);

        if self.shared.status.state().is_active() {
            tracing::debug!(source = %self.shared.tag, "Adapter already running");
            return;
        }

        let Some(generation) = self.shared.status.begin_run() else {
            tracing::warn!(source = %self.shared.tag, "Adapter in error state, reconnect required");
            return;
        };

        let previous = run.take().map(|r| r.task);
        *run = Some(self.spawn(generation, previous));
    }

    fn stop(&self) -> Option<JoinHandle<()>> {
        let run = lock(&self.run).take()?;
        let _ = run.shutdown.send(true);
        self.shared.status.end_run();

        tracing::debug!(source = %self.shared.tag, "Adapter stop requested");
        Some(run.task)
    }

    fn reconnect(&self, endpoint: Option<SourceEndpoint>) {
        let mut run = lock(&self.run);

        let previous = run.take().map(|r| {
            let _ = r.shutdown.send(true);
            r.task
        });

        if let Some(endpoint) = endpoint {
            tracing::info!(source = %self.shared.tag, endpoint = %endpoint, "Adapter endpoint changed");
            *lock(&self.shared.pending_endpoint) = Some(endpoint);
        }

        self.shared.status.end_run();
        let generation = self.shared.status.begin_reconnect();
        *run = Some(self.spawn(generation, previous));
    }
}

/// Resolves once shutdown is requested or the handle is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn drive<S: FrameSource>(
    source: Arc<tokio::sync::Mutex<S>>,
    shared: Arc<Shared>,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut source = source.lock().await;

    let pending = lock(&shared.pending_endpoint).take();
    if let Some(endpoint) = pending {
        source.configure(&endpoint);
    }

    let connected = tokio::select! {
        biased;
        _ = shutdown_requested(&mut shutdown) => {
            source.disconnect().await;
            return;
        }
        result = source.connect() => result,
    };

    if let Err(e) = connected {
        shared.fail(generation, &e);
        source.disconnect().await;
        return;
    }

    shared.status.update(generation, AdapterState::Connected);

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            next = source.next_frame() => next,
        };

        match next {
            Ok(frame) => shared.publish(frame).await,
            Err(e) if !e.is_fatal() => {
                tracing::warn!(source = %shared.tag, error = %e, "Frame dropped");
                shared
                    .events
                    .log(LogLevel::Warn, format!("{}: {}", shared.tag, e));
            }
            Err(e) => {
                shared.fail(generation, &e);
                source.disconnect().await;
                return;
            }
        }
    }

    source.disconnect().await;
    shared.status.update(generation, AdapterState::Disconnected);
    tracing::debug!(source = %shared.tag, "Adapter task finished");
}
