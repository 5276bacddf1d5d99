//! Saltline connection core.
//!
//! A secure, connection-oriented transport tunneling arbitrary messages
//! over a reliable byte-stream. Two endpoints run a mutually authenticated
//! key exchange built from long-term and ephemeral Curve25519 keys, then
//! trade authenticated, encrypted, length-prefixed messages until either
//! side closes.
//!
//! # Architecture
//!
//! Protocol logic is strictly separated from I/O:
//!
//! - [`handshake`] and [`cipher`] are pure: they consume decoded packets
//!   and produce actions and ciphertext, never touching a socket or clock.
//! - [`connection`] drives them from a single actor task per connection;
//!   every side effect flows through the [`env::Environment`] capability,
//!   so the whole protocol runs deterministically under simulation.
//! - Long-term keys live behind [`vault::Vault`], cookie minute keys
//!   behind [`keyring::CookieKeys`], and client admission behind
//!   [`registry::PeerVerifier`]: capabilities handed to each connection,
//!   not globals.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use saltline_core::{
//!     config::Config, controller::Controller, env::SystemEnv, tcp,
//!     vault::SoftwareVault,
//! };
//!
//! # async fn run() -> Result<(), saltline_core::error::ConnectionError> {
//! let env = SystemEnv::new();
//! let vault = Arc::new(SoftwareVault::generate(&env));
//! let controller = Controller::new();
//!
//! let server_key = [0u8; 32]; // the server's published long-term key
//! let config = Config::client(vault, controller.handle(), server_key);
//! let conn = tcp::connect("example.net:4433", config).await?;
//!
//! conn.send(&b"hello"[..]).await?;
//! let reply = conn.recv().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;
pub mod config;
pub mod connection;
pub mod controller;
pub mod env;
pub mod error;
mod frame_io;
pub mod handshake;
pub mod keyring;
mod recv_queue;
pub mod registry;
pub mod tcp;
pub mod transport;
pub mod vault;

pub use config::Config;
pub use connection::Connection;
pub use controller::{Controller, ControllerHandle, Event};
pub use error::{ConnectionError, HandshakeError};
pub use frame_io::{MAX_FRAME_LEN, MAX_MESSAGE_LEN};
