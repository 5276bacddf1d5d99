//! Turmoil-based Transport implementation using simulated TCP streams.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use saltline_core::transport::Transport;
use turmoil::net::{TcpListener, TcpStream};

/// Simulation transport over turmoil's deterministic TCP.
///
/// Turmoil controls delivery order and timing and can inject partitions
/// and delays, while the streams keep real TCP semantics, which is all
/// the connection core asks of its byte-stream. Handshake and data-plane
/// correctness is exercised here; the production TCP transport differs
/// only in where the bytes come from.
pub struct SimTransport {
    listener: TcpListener,
}

impl SimTransport {
    /// Bind inside the simulation, e.g. `"0.0.0.0:4433"`.
    ///
    /// # Errors
    ///
    /// Returns the simulated bind failure.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Dial a simulated host, e.g. `"server:4433"`.
    ///
    /// # Errors
    ///
    /// Returns the simulated connect failure.
    pub async fn connect_to(addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<Self::Stream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream> {
        TcpStream::connect(addr).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn sim_transport_echo() {
        let mut sim = turmoil::Builder::new().build();

        sim.host("server", || async {
            let transport = SimTransport::bind("0.0.0.0:4433").await?;
            let mut stream = transport.accept().await?;

            let mut buf = [0u8; 128];
            let n = stream.read(&mut buf).await?;
            stream.write_all(&buf[..n]).await?;

            Ok(())
        });

        sim.client("client", async {
            let mut stream = SimTransport::connect_to("server:4433").await?;

            let message = b"over the simulated wire";
            stream.write_all(message).await?;

            let mut buf = vec![0u8; message.len()];
            stream.read_exact(&mut buf).await?;
            assert_eq!(&buf, message);

            Ok(())
        });

        sim.run().expect("simulation failed");
    }
}
