//! Relay orchestrator
//!
//! Wires adapters into the registry, the registry into one broadcast server
//! per transport, and one pacer into each server. It owns the lifecycle and
//! is the control surface a UI talks to; everything it observes comes back
//! through the status event receiver returned by [`Relay::new`].
//!
//! # Lifecycle
//!
//! ```text
//! start():  servers listen ─► pacers tick ─► adapters produce
//! stop():   adapters stop  ─► pacers stop ─► servers close
//! ```
//!
//! A server that fails to bind is reported and left down; the rest of the
//! relay keeps running.

pub mod config;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::adapter::{Adapter, AdapterState, FrameSource, SourceAdapter, SourceEndpoint};
use crate::error::{Error, Result};
use crate::event::{EventSink, LogLevel, StatusEvent, TransportKind};
use crate::pacer::FramePacer;
use crate::registry::SubjectRegistry;
use crate::server::{BroadcastServer, TcpTransport, Transport};
use crate::stats::{AdapterStats, BroadcastStats, RelayStats};

#[cfg(unix)]
use crate::server::{LocalEndpoint, LocalTransport};

pub use config::{RelayConfig, DEFAULT_PORT};

/// A broadcast server and the pacer that drives it
struct Broadcast<T: Transport> {
    endpoint: T::Endpoint,
    server: Arc<BroadcastServer<T>>,
    pacer: FramePacer<BroadcastServer<T>>,
}

impl<T: Transport> Broadcast<T> {
    fn new(
        transport: T,
        endpoint: T::Endpoint,
        config: &RelayConfig,
        registry: &Arc<SubjectRegistry>,
        events: &EventSink,
    ) -> Self {
        let server = Arc::new(BroadcastServer::new(
            transport,
            config.server.clone(),
            Arc::clone(registry),
            events.clone(),
        ));
        let pacer = FramePacer::new(config.pacer.clone(), Arc::clone(&server), events.clone());

        Self {
            endpoint,
            server,
            pacer,
        }
    }

    async fn listen(&self) -> Result<()> {
        if self.server.is_listening() {
            return Ok(());
        }
        self.server.listen(self.endpoint.clone()).await.map(|_| ())
    }

    /// Pacing only makes sense once clients can connect
    fn start_pacer(&self) -> Result<()> {
        if !self.server.is_listening() || self.pacer.is_running() {
            return Ok(());
        }
        self.pacer.start()
    }

    async fn start(&self) -> Result<()> {
        self.listen().await?;
        self.start_pacer()
    }

    async fn stop(&self) {
        self.pacer.stop().await;
        self.server.stop().await;
    }

    async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            transport: self.server.kind(),
            endpoint: self.server.local_endpoint().map(|e| e.to_string()),
            server: self.server.stats().await,
            pacer: self.pacer.stats(),
        }
    }
}

/// Run `$body` with `$b` bound to the broadcast for `$kind`
///
/// Evaluates to `Err(ServerDisabled)` when that transport is not configured.
macro_rules! with_broadcast {
    ($relay:expr, $kind:expr, |$b:ident| $body:expr) => {{
        let kind: TransportKind = $kind;
        match kind {
            TransportKind::Network => {
                let $b = &$relay.network;
                Ok($body)
            }
            TransportKind::Local => {
                #[cfg(unix)]
                let result = match $relay.local {
                    Some(ref $b) => Ok($body),
                    None => Err(Error::ServerDisabled(kind)),
                };
                #[cfg(not(unix))]
                let result = Err(Error::ServerDisabled(kind));
                result
            }
        }
    }};
}

/// Motion-capture relay
pub struct Relay {
    registry: Arc<SubjectRegistry>,
    events: EventSink,
    adapters: Vec<Box<dyn SourceAdapter>>,
    network: Broadcast<TcpTransport>,
    #[cfg(unix)]
    local: Option<Broadcast<LocalTransport>>,
    running: AtomicBool,
}

impl Relay {
    /// Build an idle relay and the receiver for its status events
    pub fn new(config: RelayConfig) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (events, rx) = EventSink::channel(config.event_capacity);
        let registry = Arc::new(SubjectRegistry::new());

        let network = Broadcast::new(
            TcpTransport,
            config.network_addr,
            &config,
            &registry,
            &events,
        );

        #[cfg(unix)]
        let local = config.local_path.clone().map(|path| {
            Broadcast::new(LocalTransport, LocalEndpoint::new(path), &config, &registry, &events)
        });

        #[cfg(not(unix))]
        if config.local_path.is_some() {
            tracing::warn!("Local transport is only available on Unix, ignoring local_path");
        }

        let relay = Self {
            registry,
            events,
            adapters: Vec::new(),
            network,
            #[cfg(unix)]
            local,
            running: AtomicBool::new(false),
        };

        (relay, rx)
    }

    pub fn registry(&self) -> &Arc<SubjectRegistry> {
        &self.registry
    }

    /// Event sink for adapters built outside the relay
    pub fn events(&self) -> EventSink {
        self.events.clone()
    }

    /// Add a source. It starts with the relay, or immediately if the relay
    /// is already running.
    pub fn attach<S: FrameSource>(&mut self, source: S) {
        let adapter = Adapter::new(source, Arc::clone(&self.registry), self.events.clone());
        self.attach_adapter(Box::new(adapter));
    }

    /// Add a custom adapter implementation
    pub fn attach_adapter(&mut self, adapter: Box<dyn SourceAdapter>) {
        tracing::info!(source = adapter.tag(), "Adapter attached");
        if self.is_running() {
            adapter.start();
        }
        self.adapters.push(adapter);
    }

    /// Tags of all attached adapters, in attach order
    pub fn adapter_tags(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.tag().to_string()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start servers, then pacers, then adapters
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        // Bind failures are already reported by the server
        if let Err(e) = self.network.listen().await {
            tracing::warn!(transport = %TransportKind::Network, error = %e, "Continuing without server");
        }
        #[cfg(unix)]
        if let Some(ref local) = self.local {
            if let Err(e) = local.listen().await {
                tracing::warn!(transport = %TransportKind::Local, error = %e, "Continuing without server");
            }
        }

        self.network.start_pacer()?;
        #[cfg(unix)]
        if let Some(ref local) = self.local {
            local.start_pacer()?;
        }

        for adapter in &self.adapters {
            adapter.start();
        }

        tracing::info!(adapters = self.adapters.len(), "Relay started");
        self.events.log(LogLevel::Info, "Relay started");
        Ok(())
    }

    /// Stop adapters, then pacers, then servers
    ///
    /// Also takes down anything brought up individually through
    /// [`start_server`](Self::start_server) or
    /// [`start_adapter`](Self::start_adapter), even if [`start`](Self::start)
    /// was never called.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);

        let handles: Vec<_> = self.adapters.iter().filter_map(|a| a.stop()).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.network.pacer.stop().await;
        #[cfg(unix)]
        if let Some(ref local) = self.local {
            local.pacer.stop().await;
        }

        self.network.server.stop().await;
        #[cfg(unix)]
        if let Some(ref local) = self.local {
            local.server.stop().await;
        }

        if was_running {
            tracing::info!("Relay stopped");
            self.events.log(LogLevel::Info, "Relay stopped");
        }
    }

    fn adapter(&self, tag: &str) -> Result<&dyn SourceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.tag() == tag)
            .map(|a| a.as_ref())
            .ok_or_else(|| Error::UnknownAdapter(tag.to_string()))
    }

    pub fn start_adapter(&self, tag: &str) -> Result<()> {
        self.adapter(tag)?.start();
        Ok(())
    }

    /// Stop one adapter and wait until it no longer writes
    pub async fn stop_adapter(&self, tag: &str) -> Result<()> {
        if let Some(handle) = self.adapter(tag)?.stop() {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Restart an adapter against a new host and port
    pub fn reconnect_adapter(&self, tag: &str, host: impl Into<String>, port: u16) -> Result<()> {
        self.adapter(tag)?
            .reconnect(Some(SourceEndpoint::new(host, port)));
        Ok(())
    }

    pub fn adapter_state(&self, tag: &str) -> Result<AdapterState> {
        Ok(self.adapter(tag)?.state())
    }

    /// Bring up one transport's server and pacer
    pub async fn start_server(&self, kind: TransportKind) -> Result<()> {
        with_broadcast!(self, kind, |b| b.start().await)?
    }

    /// Take down one transport's pacer and server
    pub async fn stop_server(&self, kind: TransportKind) -> Result<()> {
        with_broadcast!(self, kind, |b| b.stop().await)
    }

    /// Retarget every pacer; running pacers restart on the new interval
    pub async fn set_target_interval(&self, interval: Duration) {
        self.network.pacer.set_target_interval(interval).await;
        #[cfg(unix)]
        if let Some(ref local) = self.local {
            local.pacer.set_target_interval(interval).await;
        }

        tracing::info!(interval_us = interval.as_micros() as u64, "Target interval changed");
    }

    pub fn target_interval(&self) -> Duration {
        self.network.pacer.target_interval()
    }

    /// Connected clients of one transport
    pub async fn connection_list(&self, kind: TransportKind) -> Result<Vec<String>> {
        with_broadcast!(self, kind, |b| b.server.connection_list().await)
    }

    /// Bound TCP address while the network server is listening
    pub fn network_addr(&self) -> Option<SocketAddr> {
        self.network.server.local_endpoint()
    }

    pub async fn stats(&self) -> RelayStats {
        let mut broadcasts = vec![self.network.stats().await];
        #[cfg(unix)]
        if let Some(ref local) = self.local {
            broadcasts.push(local.stats().await);
        }

        RelayStats {
            subjects: self.registry.len().await,
            adapters: self
                .adapters
                .iter()
                .map(|a| AdapterStats {
                    tag: a.tag().to_string(),
                    state: a.state(),
                    frames_produced: a.frames_produced(),
                })
                .collect(),
            broadcasts,
        }
    }
}
