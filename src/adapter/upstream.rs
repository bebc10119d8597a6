//! Upstream relay source
//!
//! Connects to another relay's network transport and re-publishes every
//! subject it receives under this source's tag. Useful for chaining relays
//! across machines, and the reference for socket-backed sources.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{FrameSource, SourceEndpoint, SourceFrame, SubjectUpdate};
use crate::error::SourceError;
use crate::protocol::{decode_payload, FrameReader, DEFAULT_MAX_FRAME_SIZE};

/// Upstream source configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Relay to connect to
    pub endpoint: SourceEndpoint,

    /// Connection must be established within this time
    pub connect_timeout: Duration,

    /// Transport error if no data arrives for this long
    pub read_timeout: Duration,

    /// Largest accepted frame payload
    pub max_frame_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: SourceEndpoint::new("127.0.0.1", 4001),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl UpstreamConfig {
    /// Create a config for the given endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: SourceEndpoint::new(host, port),
            ..Default::default()
        }
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Source reading snapshot frames from an upstream relay over TCP
pub struct UpstreamSource {
    tag: String,
    config: UpstreamConfig,
    reader: FrameReader,
    stream: Option<TcpStream>,
    buf: BytesMut,
}

impl UpstreamSource {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            tag: "upstream".to_string(),
            reader: FrameReader::with_max_frame_size(config.max_frame_size),
            config,
            stream: None,
            buf: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Override the source tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Current endpoint
    pub fn endpoint(&self) -> &SourceEndpoint {
        &self.config.endpoint
    }
}

impl FrameSource for UpstreamSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn configure(&mut self, endpoint: &SourceEndpoint) {
        self.config.endpoint = endpoint.clone();
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        let endpoint = &self.config.endpoint;
        tracing::info!(source = %self.tag, endpoint = %endpoint, "Connecting to upstream relay");

        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| SourceError::Timeout("connect"))??;

        stream.set_nodelay(true)?;
        self.buf.clear();
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<SourceFrame, SourceError> {
        loop {
            if let Some(payload) = self.reader.next_frame(&mut self.buf)? {
                let subjects = decode_payload(payload)?;
                return Ok(SourceFrame::new(
                    subjects.into_iter().map(SubjectUpdate::from).collect(),
                ));
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

            let n = timeout(self.config.read_timeout, stream.read_buf(&mut self.buf))
                .await
                .map_err(|_| SourceError::Timeout("read"))??;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "upstream closed the connection",
                )
                .into());
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(source = %self.tag, "Disconnected from upstream relay");
        }
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::BufMut;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::{encode_snapshot, MAGIC, VERSION};
    use crate::registry::{Marker, SubjectRegistry};

    async fn upstream_with(subjects: &[(&str, f64)]) -> bytes::Bytes {
        let registry = SubjectRegistry::new();
        for (name, x) in subjects {
            registry
                .apply_update(name, vec![Marker::new("m", *x, 0.0, 0.0)], vec![], "vicon")
                .await;
        }
        encode_snapshot(&registry.snapshot().await).unwrap()
    }

    async fn listener() -> (TcpListener, UpstreamConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = UpstreamConfig::new("127.0.0.1", port).read_timeout(Duration::from_millis(500));
        (listener, config)
    }

    #[tokio::test]
    async fn test_reads_subjects_from_upstream() {
        let (listener, config) = listener().await;
        let frame = upstream_with(&[("Bob", 1.0), ("Wand", 2.0)]).await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Split the frame to exercise partial reads
            socket.write_all(&frame[..5]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            socket.write_all(&frame[5..]).await.unwrap();
            socket
        });

        let mut source = UpstreamSource::new(config);
        source.connect().await.unwrap();
        let frame = source.next_frame().await.unwrap();

        assert_eq!(frame.subjects.len(), 2);
        assert_eq!(frame.subjects[0].name, "Bob");
        assert_eq!(frame.subjects[1].markers[0].position[0], 2.0);

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_recoverable() {
        let (listener, config) = listener().await;
        let good = upstream_with(&[("Bob", 3.0)]).await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Well framed, but claims one subject and carries none
            let mut bad = BytesMut::new();
            bad.put_u16(MAGIC);
            bad.put_u8(VERSION);
            bad.put_u32(2);
            bad.put_u16(1);

            socket.write_all(&bad).await.unwrap();
            socket.write_all(&good).await.unwrap();
            socket
        });

        let mut source = UpstreamSource::new(config);
        source.connect().await.unwrap();

        let err = source.next_frame().await.unwrap_err();
        assert!(!err.is_fatal());

        let frame = source.next_frame().await.unwrap();
        assert_eq!(frame.subjects[0].name, "Bob");

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_header_is_transport_error() {
        let (listener, config) = listener().await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
            socket
        });

        let mut source = UpstreamSource::new(config);
        source.connect().await.unwrap();

        let err = source.next_frame().await.unwrap_err();
        assert!(err.is_fatal());

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_connection_is_transport_error() {
        let (listener, config) = listener().await;

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut source = UpstreamSource::new(config);
        source.connect().await.unwrap();
        server.await.unwrap();

        let err = source.next_frame().await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let (listener, config) = listener().await;
        let config = config.read_timeout(Duration::from_millis(50));

        let server = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let mut source = UpstreamSource::new(config);
        source.connect().await.unwrap();

        let err = source.next_frame().await.unwrap_err();
        assert!(matches!(err, SourceError::Timeout("read")));

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let mut source = UpstreamSource::new(UpstreamConfig::new("127.0.0.1", port));
        assert!(source.connect().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_adapter_relays_with_own_tag() {
        use crate::adapter::{Adapter, SourceAdapter};
        use crate::event::EventSink;

        let (listener, config) = listener().await;
        let frame = upstream_with(&[("Bob", 5.0)]).await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&frame).await.unwrap();
            socket
        });

        let registry = Arc::new(SubjectRegistry::new());
        let adapter = Adapter::new(
            UpstreamSource::new(config).with_tag("studio-b"),
            Arc::clone(&registry),
            EventSink::disabled(),
        );
        adapter.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while adapter.frames_produced() < 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let bob = registry.get("Bob").await.unwrap();
        assert_eq!(bob.source, "studio-b");

        adapter.stop().unwrap().await.unwrap();
        drop(server.await.unwrap());
    }
}
