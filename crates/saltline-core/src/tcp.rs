//! TCP transport and the top-level dial/listen conveniences.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::info;

use crate::config::Config;
use crate::connection::Connection;
use crate::env::SystemEnv;
use crate::error::{transport_error, ConnectionError};
use crate::transport::{Listener, Transport};

/// [`Transport`] over the operating system's TCP stack.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a listening socket.
    ///
    /// # Errors
    ///
    /// Returns the underlying bind failure (address in use, permission).
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// The locally bound address; useful after binding port 0.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<Self::Stream> {
        let (stream, peer) = self.listener.accept().await?;
        info!(%peer, "accepted tcp stream");
        Ok(stream)
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream> {
        TcpStream::connect(addr).await
    }
}

/// Bind a TCP listener and wrap it with per-accept options.
///
/// # Errors
///
/// Surfaces bind failures as transport errors.
pub async fn listen(
    addr: impl ToSocketAddrs,
    config: Config,
) -> Result<Listener<TcpTransport, SystemEnv>, ConnectionError> {
    let transport = TcpTransport::bind(addr).await.map_err(|e| transport_error(&e))?;
    Ok(Listener::new(transport, SystemEnv::new(), config))
}

/// Dial a TCP endpoint and run the client handshake.
///
/// # Errors
///
/// Surfaces connect failures as transport errors plus every fatal
/// handshake outcome, including the configured handshake timeout.
pub async fn connect(
    addr: impl ToSocketAddrs,
    config: Config,
) -> Result<Connection, ConnectionError> {
    let stream = TcpStream::connect(addr).await.map_err(|e| transport_error(&e))?;
    Connection::start(SystemEnv::new(), stream, config).await
}
