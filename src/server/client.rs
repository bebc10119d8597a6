//! Connected clients
//!
//! Each client's stream is split and served by two tasks:
//!
//! ```text
//!  run_cycle ──offer(frame)──► outbox (watch, latest frame only)
//!                                  │
//!                                  ▼
//!                  writer task: write_all + flush under write_timeout
//!
//!  read half ──► watcher task: drain until the peer hangs up
//! ```
//!
//! A cycle only replaces the frame in the outbox, so a slow client never
//! holds up the cycle or any other client. A client that falls behind
//! skips straight to the newest frame; one that cannot take a whole frame
//! within the write timeout is dropped.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Tasks {
    watcher: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// One connected consumer
pub(crate) struct Client {
    pub(crate) id: u64,
    pub(crate) label: String,
    outbox: Mutex<Option<watch::Sender<Bytes>>>,
    tasks: Mutex<Tasks>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Client {
    /// Create a client and the receiving end of its outbox
    pub(crate) fn new(
        id: u64,
        label: String,
        permit: Option<OwnedSemaphorePermit>,
    ) -> (Self, watch::Receiver<Bytes>) {
        let (outbox, rx) = watch::channel(Bytes::new());
        let client = Self {
            id,
            label,
            outbox: Mutex::new(Some(outbox)),
            tasks: Mutex::new(Tasks::default()),
            _permit: permit,
        };
        (client, rx)
    }

    pub(crate) fn set_tasks(&self, watcher: JoinHandle<()>, writer: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.watcher = Some(watcher);
        tasks.writer = Some(writer);
    }

    /// Hand the writer a new frame, replacing any it has not started on
    ///
    /// False once the client is closed or its writer has exited.
    pub(crate) fn offer(&self, frame: Bytes) -> bool {
        match lock(&self.outbox).as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Stop both tasks. The socket closes once they are gone.
    pub(crate) fn close(&self) {
        lock(&self.outbox).take();
        let mut tasks = lock(&self.tasks);
        for task in [tasks.watcher.take(), tasks.writer.take()].into_iter().flatten() {
            task.abort();
        }
    }

    /// Close, letting the writer finish its current frame and shut down the
    /// write side within `limit`
    pub(crate) async fn shutdown(&self, limit: Duration) {
        lock(&self.outbox).take();
        let (watcher, writer) = {
            let mut tasks = lock(&self.tasks);
            (tasks.watcher.take(), tasks.writer.take())
        };
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        if let Some(mut writer) = writer {
            if timeout(limit, &mut writer).await.is_err() {
                writer.abort();
            }
        }
    }
}

/// Write every frame offered through `outbox` until it closes
///
/// Each frame is written whole under `write_timeout`; the first failure or
/// timeout ends the pump with that error. `bytes_sent` grows by each frame
/// delivered.
pub(crate) async fn pump<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outbox: watch::Receiver<Bytes>,
    write_timeout: Duration,
    bytes_sent: &AtomicU64,
) -> io::Result<()> {
    while outbox.changed().await.is_ok() {
        let frame = outbox.borrow_and_update().clone();
        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match timeout(write_timeout, write).await {
            Ok(Ok(())) => {
                bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        }
    }

    // Outbox closed by the server
    let _ = timeout(write_timeout, writer.shutdown()).await;
    Ok(())
}

/// Drain and discard anything the peer sends; returns when it hangs up
pub(crate) async fn drain<S: AsyncRead>(mut reader: ReadHalf<S>) {
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
