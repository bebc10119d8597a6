//! Listening transports
//!
//! A broadcast server is written once against [`Transport`]; the network and
//! local flavours only differ in how they bind, accept and clean up.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::event::TransportKind;
use crate::server::config::ServerConfig;

/// Bind/accept capability of one transport kind
pub trait Transport: Send + Sync + 'static {
    /// Address or path the server listens on
    type Endpoint: Clone + fmt::Display + Send + Sync + 'static;

    type Listener: Send + Sync + 'static;

    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn kind(&self) -> TransportKind;

    /// Acquire the listening resource
    fn bind(
        &self,
        endpoint: &Self::Endpoint,
    ) -> impl Future<Output = io::Result<Self::Listener>> + Send;

    /// Wait for the next client. The label is the peer's address when the
    /// transport has a meaningful one. Must be cancel-safe.
    fn accept(
        &self,
        listener: &Self::Listener,
    ) -> impl Future<Output = io::Result<(Self::Stream, Option<String>)>> + Send;

    /// Endpoint actually bound (resolves port 0)
    fn local_endpoint(&self, listener: &Self::Listener, requested: &Self::Endpoint)
        -> Self::Endpoint;

    /// Apply socket options to a freshly accepted stream
    fn configure(&self, _stream: &Self::Stream, _config: &ServerConfig) -> io::Result<()> {
        Ok(())
    }

    /// Clean up after the listener has been dropped
    fn release(&self, _endpoint: &Self::Endpoint) {}
}

/// TCP transport for remote consumers
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Endpoint = SocketAddr;
    type Listener = TcpListener;
    type Stream = TcpStream;

    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    async fn bind(&self, endpoint: &SocketAddr) -> io::Result<TcpListener> {
        TcpListener::bind(endpoint).await
    }

    async fn accept(&self, listener: &TcpListener) -> io::Result<(TcpStream, Option<String>)> {
        let (stream, peer) = listener.accept().await?;
        Ok((stream, Some(peer.to_string())))
    }

    fn local_endpoint(&self, listener: &TcpListener, requested: &SocketAddr) -> SocketAddr {
        listener.local_addr().unwrap_or(*requested)
    }

    fn configure(&self, stream: &TcpStream, config: &ServerConfig) -> io::Result<()> {
        if config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
pub use local::{LocalEndpoint, LocalTransport};

#[cfg(unix)]
mod local {
    use std::fmt;
    use std::io;
    use std::path::{Path, PathBuf};

    use tokio::net::{UnixListener, UnixStream};

    use super::Transport;
    use crate::event::TransportKind;

    /// Filesystem path of a Unix domain socket
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LocalEndpoint(pub PathBuf);

    impl LocalEndpoint {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self(path.into())
        }

        pub fn path(&self) -> &Path {
            &self.0
        }
    }

    impl fmt::Display for LocalEndpoint {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0.display())
        }
    }

    /// Unix domain socket transport for same-host consumers
    #[derive(Debug, Clone, Copy, Default)]
    pub struct LocalTransport;

    impl Transport for LocalTransport {
        type Endpoint = LocalEndpoint;
        type Listener = UnixListener;
        type Stream = UnixStream;

        fn kind(&self) -> TransportKind {
            TransportKind::Local
        }

        async fn bind(&self, endpoint: &LocalEndpoint) -> io::Result<UnixListener> {
            // A socket file left behind by a previous run blocks the bind;
            // one a live server still answers on is not ours to take
            if endpoint.path().exists() {
                match UnixStream::connect(endpoint.path()).await {
                    Ok(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::AddrInUse,
                            format!("{} is served by another process", endpoint),
                        ))
                    }
                    Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                        tracing::debug!(path = %endpoint, "Removing stale socket file");
                        std::fs::remove_file(endpoint.path())?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
            UnixListener::bind(endpoint.path())
        }

        async fn accept(&self, listener: &UnixListener) -> io::Result<(UnixStream, Option<String>)> {
            // Clients connect from unnamed sockets; the server numbers them
            let (stream, _) = listener.accept().await?;
            Ok((stream, None))
        }

        fn local_endpoint(&self, _listener: &UnixListener, requested: &LocalEndpoint) -> LocalEndpoint {
            requested.clone()
        }

        fn release(&self, endpoint: &LocalEndpoint) {
            if let Err(e) = std::fs::remove_file(endpoint.path()) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %endpoint, error = %e, "Failed to remove socket file");
                }
            }
        }
    }
}
