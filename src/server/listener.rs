//! Broadcast server
//!
//! Accept loop plus per-cycle fan-out, written once for every [`Transport`].
//!
//! A cycle encodes the snapshot once and offers the same bytes to every
//! client's writer task, then returns. Writes happen on those tasks, each
//! under its own timeout, so the pacer's in-flight window never includes a
//! client's socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::event::{EventSink, LogLevel, StatusEvent, TransportKind};
use crate::pacer::{BroadcastCycle, InFlight};
use crate::protocol::{encode_snapshot, HEADER_SIZE};
use crate::registry::SubjectRegistry;
use crate::server::client::{drain, pump, Client};
use crate::server::config::ServerConfig;
use crate::server::transport::Transport;
use crate::stats::metrics::Uptime;
use crate::stats::ServerStats;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Counters {
    total_connections: AtomicU64,
    cycles_delivered: AtomicU64,
    bytes_sent: AtomicU64,
    clients_dropped: AtomicU64,
}

/// State shared with the accept loop and client watchers
struct Shared<T: Transport> {
    transport: T,
    config: ServerConfig,
    registry: Arc<SubjectRegistry>,
    events: EventSink,
    clients: tokio::sync::Mutex<Vec<Arc<Client>>>,
    connection_limit: Option<Arc<Semaphore>>,
    next_client_id: AtomicU64,
    counters: Counters,
    uptime: Mutex<Uptime>,
}

impl<T: Transport> Shared<T> {
    fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    fn connections_changed(&self, clients: &[Arc<Client>]) {
        self.events.emit(StatusEvent::ConnectionsChanged {
            transport: self.kind(),
            clients: clients.iter().map(|c| c.label.clone()).collect(),
        });
    }

    async fn admit(self: &Arc<Self>, stream: T::Stream, label: String) {
        // Check connection limit
        let permit = match self.connection_limit {
            Some(ref sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(transport = %self.kind(), peer = %label, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        if let Err(e) = self.transport.configure(&stream, &self.config) {
            tracing::error!(transport = %self.kind(), peer = %label, error = %e, "Failed to configure socket");
            return;
        }

        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (reader, write_half) = tokio::io::split(stream);
        let (client, outbox) = Client::new(id, label, permit);
        let client = Arc::new(client);

        let mut clients = self.clients.lock().await;
        clients.push(Arc::clone(&client));
        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            transport = %self.kind(),
            client = %client.label,
            clients = clients.len(),
            "Client connected"
        );
        self.connections_changed(&clients);

        // Spawned under the lock so a fast failure cannot be removed before it is added
        let shared = Arc::clone(self);
        let watcher = tokio::spawn(async move {
            drain(reader).await;
            shared.remove(id, "closed by peer").await;
        });

        let shared = Arc::clone(self);
        let writer = tokio::spawn(async move {
            let write_timeout = shared.config.write_timeout;
            if let Err(e) = pump(write_half, outbox, write_timeout, &shared.counters.bytes_sent).await {
                if shared.remove(id, &e.to_string()).await {
                    shared.counters.clients_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        client.set_tasks(watcher, writer);
    }

    /// Drop one client; false if it was already gone
    async fn remove(&self, id: u64, reason: &str) -> bool {
        let mut clients = self.clients.lock().await;
        let Some(pos) = clients.iter().position(|c| c.id == id) else {
            return false;
        };
        let client = clients.remove(pos);

        tracing::info!(
            transport = %self.kind(),
            client = %client.label,
            reason = reason,
            clients = clients.len(),
            "Client disconnected"
        );
        self.connections_changed(&clients);
        drop(clients);

        // May abort the calling task; nothing awaits after this
        client.close();
        true
    }
}

struct Listening<E> {
    endpoint: E,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Pushes the registry snapshot to every client of one transport
///
/// Created idle; [`listen`](Self::listen) starts accepting and the pacer
/// drives [`BroadcastCycle::run_cycle`]. The server owns its in-flight
/// indicator so at most one cycle per server is ever running.
pub struct BroadcastServer<T: Transport> {
    shared: Arc<Shared<T>>,
    in_flight: Arc<InFlight>,
    listening: Mutex<Option<Listening<T::Endpoint>>>,
}

impl<T: Transport> BroadcastServer<T> {
    pub fn new(
        transport: T,
        config: ServerConfig,
        registry: Arc<SubjectRegistry>,
        events: EventSink,
    ) -> Self {
        let connection_limit = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                registry,
                events,
                clients: tokio::sync::Mutex::new(Vec::new()),
                connection_limit,
                next_client_id: AtomicU64::new(1),
                counters: Counters::default(),
                uptime: Mutex::new(Uptime::stopped()),
            }),
            in_flight: InFlight::new(),
            listening: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.shared.kind()
    }

    /// Bind and start accepting in the background
    ///
    /// Returns the bound endpoint (with any ephemeral port resolved). A bind
    /// failure is logged, emitted as a status event and returned; it never
    /// affects other components.
    pub async fn listen(&self, endpoint: T::Endpoint) -> Result<T::Endpoint> {
        if self.is_listening() {
            return Err(Error::AlreadyRunning);
        }

        let listener = match self.shared.transport.bind(&endpoint).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(transport = %self.kind(), endpoint = %endpoint, error = %e, "Failed to bind");
                self.shared.events.log(
                    LogLevel::Error,
                    format!("{} server failed to bind {}: {}", self.kind(), endpoint, e),
                );
                return Err(Error::Bind {
                    endpoint: endpoint.to_string(),
                    source: e,
                });
            }
        };

        let bound = self.shared.transport.local_endpoint(&listener, &endpoint);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut slot = lock(&self.listening);
        if slot.is_some() {
            // Lost a race with a concurrent listen(); ours is dropped unused
            return Err(Error::AlreadyRunning);
        }

        let task = tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            bound.clone(),
            shutdown_rx,
        ));
        *slot = Some(Listening {
            endpoint: bound.clone(),
            shutdown,
            task,
        });
        drop(slot);

        lock(&self.shared.uptime).start();

        tracing::info!(transport = %self.kind(), endpoint = %bound, "Broadcast server listening");
        self.shared
            .events
            .log(LogLevel::Info, format!("{} server listening on {}", self.kind(), bound));

        Ok(bound)
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.listening).is_some()
    }

    /// Bound endpoint while listening
    pub fn local_endpoint(&self) -> Option<T::Endpoint> {
        lock(&self.listening).as_ref().map(|l| l.endpoint.clone())
    }

    /// Identifier of every connected client, in connection order
    pub async fn connection_list(&self) -> Vec<String> {
        self.shared
            .clients
            .lock()
            .await
            .iter()
            .map(|c| c.label.clone())
            .collect()
    }

    pub async fn stats(&self) -> ServerStats {
        let active = self.shared.clients.lock().await.len() as u64;
        let counters = &self.shared.counters;
        ServerStats {
            total_connections: counters.total_connections.load(Ordering::Relaxed),
            active_connections: active,
            cycles_delivered: counters.cycles_delivered.load(Ordering::Relaxed),
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            clients_dropped: counters.clients_dropped.load(Ordering::Relaxed),
            uptime: lock(&self.shared.uptime).elapsed(),
        }
    }

    /// Stop accepting, close every client and release the endpoint
    pub async fn stop(&self) {
        let Some(listening) = lock(&self.listening).take() else {
            return;
        };

        let _ = listening.shutdown.send(true);
        let _ = listening.task.await;
        self.shared.transport.release(&listening.endpoint);

        let clients = std::mem::take(&mut *self.shared.clients.lock().await);
        for client in &clients {
            client.shutdown(self.shared.config.write_timeout).await;
        }
        if !clients.is_empty() {
            self.shared.connections_changed(&[]);
        }

        lock(&self.shared.uptime).stop();

        tracing::info!(
            transport = %self.kind(),
            endpoint = %listening.endpoint,
            closed = clients.len(),
            "Broadcast server stopped"
        );
        self.shared
            .events
            .log(LogLevel::Info, format!("{} server stopped", self.kind()));
    }
}

impl<T: Transport> BroadcastCycle for BroadcastServer<T> {
    fn transport(&self) -> TransportKind {
        self.kind()
    }

    fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    async fn run_cycle(&self) {
        let shared = &self.shared;

        let clients = shared.clients.lock().await.clone();
        if clients.is_empty() {
            return;
        }

        // Serialized once; every client gets the same bytes
        let frame = match encode_snapshot(&shared.registry.snapshot().await) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(transport = %self.kind(), error = %e, "Snapshot not encodable, cycle skipped");
                return;
            }
        };
        let payload_len = frame.len() - HEADER_SIZE;
        if payload_len > shared.config.max_frame_size {
            tracing::warn!(
                transport = %self.kind(),
                size = payload_len,
                max = shared.config.max_frame_size,
                "Snapshot exceeds max frame size, cycle skipped"
            );
            return;
        }

        let mut offered = 0u64;
        for client in &clients {
            if client.offer(frame.clone()) {
                offered += 1;
            }
        }

        if offered > 0 {
            shared.counters.cycles_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Resolves once shutdown is requested or the handle is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn accept_loop<T: Transport>(
    shared: Arc<Shared<T>>,
    listener: T::Listener,
    endpoint: T::Endpoint,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut unnamed = 0u64;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            accepted = shared.transport.accept(&listener) => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let label = peer.unwrap_or_else(|| {
                    unnamed += 1;
                    format!("{}#{}", endpoint, unnamed)
                });
                shared.admit(stream, label).await;
            }
            Err(e) => {
                tracing::error!(transport = %shared.kind(), error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    tracing::debug!(transport = %shared.kind(), "Accept loop stopped");
}
