//! Byte-stream transport abstraction.
//!
//! The connection actor works over any `AsyncRead + AsyncWrite` stream;
//! this trait is the seam that produces such streams. Production uses the
//! TCP implementation in [`crate::tcp`]; the simulation harness provides a
//! deterministic one over virtual networking. Protocol correctness is
//! tested against the simulated transport, production code differs only in
//! where the bytes come from.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Config;
use crate::connection::Connection;
use crate::env::Environment;
use crate::error::{transport_error, ConnectionError};

/// Produces connected byte-streams.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The stream type produced by this transport.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Wait for one inbound stream.
    async fn accept(&self) -> io::Result<Self::Stream>;

    /// Open a stream to a remote endpoint.
    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream>;
}

/// A listening endpoint producing handshaken connections.
///
/// Wraps a bound [`Transport`] together with default per-accept options;
/// [`Listener::accept_with`] overrides them for a single accept.
pub struct Listener<T, E> {
    transport: T,
    env: E,
    defaults: Config,
}

impl<T: Transport, E: Environment> Listener<T, E> {
    /// Wrap a bound transport. `defaults` applies to every accept that
    /// does not bring its own config.
    pub fn new(transport: T, env: E, defaults: Config) -> Self {
        Self { transport, env, defaults }
    }

    /// Accept one stream and run the server handshake with the default
    /// options.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures and every fatal handshake outcome.
    pub async fn accept(&self) -> Result<Connection, ConnectionError> {
        self.accept_with(self.defaults.clone()).await
    }

    /// Accept one stream with options for this connection only.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Listener::accept`].
    pub async fn accept_with(&self, config: Config) -> Result<Connection, ConnectionError> {
        let stream = self.transport.accept().await.map_err(|e| transport_error(&e))?;
        Connection::start(self.env.clone(), stream, config).await
    }

    /// Accept with a bound on the whole operation, stream arrival and
    /// handshake included.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Timeout`] if nothing completed in time, plus the
    /// conditions of [`Listener::accept`].
    pub async fn accept_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Connection, ConnectionError> {
        tokio::select! {
            result = self.accept() => result,
            () = self.env.sleep(timeout) => Err(ConnectionError::Timeout),
        }
    }

    /// The wrapped transport, for address queries and the like.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
