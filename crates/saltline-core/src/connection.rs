//! The per-connection actor and its public handle.
//!
//! One tokio task owns everything a connection is: the byte-stream halves,
//! the handshake machine, the data-plane cipher, the receive queue, and the
//! controller relation. Every state mutation happens inside the task's
//! event loop in response to exactly one event (a command from a handle, a
//! decoded inbound frame, a deadline, or the controller going away), so
//! the protocol logic needs no locks and no internal parallelism.
//!
//! The inbound branch of the loop is guarded by the arming predicate: the
//! stream is polled for a frame only during the handshake, or while the
//! receive buffer is empty and a receiver is waiting. One frame is decoded
//! per arming; backpressure is the absence of the poll.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use saltline_proto::{Metadata, Packet, Side};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cipher::TransportCipher;
use crate::config::Config;
use crate::controller::{ControllerHandle, Event};
use crate::env::Environment;
use crate::error::{transport_error, ConnectionError};
use crate::frame_io::{write_frame, FrameReader, MAX_MESSAGE_LEN};
use crate::handshake::{Handshake, HandshakeAction};
use crate::recv_queue::{Delivery, Expired, RecvQueue};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a live connection.
///
/// Cheap to clone; all clones address the same actor. Once the actor is
/// gone every operation reports [`ConnectionError::Closed`], except the
/// idempotent ones (`close`, `unsubscribe`) which simply succeed.
#[derive(Clone, Debug)]
pub struct Connection {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
}

enum Command {
    Send { payload: Vec<u8>, reply: oneshot::Sender<Result<(), ConnectionError>> },
    Recv { timeout: Option<Duration>, reply: oneshot::Sender<Result<Vec<u8>, ConnectionError>> },
    Subscribe { timeout: Option<Duration>, reply: oneshot::Sender<Result<u64, ConnectionError>> },
    Unsubscribe { id: u64, reply: oneshot::Sender<()> },
    PeerMetadata { reply: oneshot::Sender<Result<Metadata, ConnectionError>> },
    SetController { from: u64, to: ControllerHandle, reply: oneshot::Sender<Result<(), ConnectionError>> },
    Close { reply: oneshot::Sender<()> },
}

impl Connection {
    /// Run the handshake over an already-obtained byte-stream and return a
    /// handle once the connection is established.
    ///
    /// The stream is owned by the spawned actor from this point on and is
    /// released exactly once, when the actor terminates.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any I/O if the config does not
    /// fit its mode, a handshake error if the peer misbehaves, and
    /// [`ConnectionError::Timeout`] if the configured handshake deadline
    /// expires first.
    pub async fn start<E, S>(env: E, stream: S, config: Config) -> Result<Self, ConnectionError>
    where
        E: Environment,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);

        let (fsm, first_packet) = match config.mode {
            Side::Client => {
                let peer = config
                    .peer_public_key
                    .ok_or(ConnectionError::Config("client mode requires the server's public key"))?;
                let (fsm, hello) =
                    Handshake::client(&env, config.vault.clone(), peer, config.metadata.clone())?;
                (fsm, Some(hello))
            }
            Side::Server => {
                let cookie_keys = config
                    .cookie_keys
                    .clone()
                    .ok_or(ConnectionError::Config("server mode requires cookie keys"))?;
                let fsm = Handshake::server(
                    config.vault.clone(),
                    cookie_keys,
                    config.verifier.clone(),
                    id,
                    config.metadata.clone(),
                );
                (fsm, None)
            }
        };

        let deadline = config.handshake_timeout.map(|timeout| env.now() + timeout);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (starter_tx, starter_rx) = oneshot::channel();
        let (read_half, write_half) = tokio::io::split(stream);

        let actor = Actor {
            env,
            id,
            reader: FrameReader::new(read_half),
            writer: write_half,
            commands: command_rx,
            _keepalive: command_tx.clone(),
            controller: config.controller,
            queue: RecvQueue::new(),
            peer_metadata: Metadata::new(),
            phase: Phase::Handshaking { fsm, starter: starter_tx, deadline },
        };
        tokio::spawn(actor.run(first_packet));

        match starter_rx.await {
            Ok(Ok(())) => Ok(Self { id, commands: command_tx }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ConnectionError::Closed),
        }
    }

    /// Id of this connection, as used in controller events.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Encrypt and transmit one application message.
    ///
    /// # Errors
    ///
    /// Rejects empty and over-long payloads without touching the wire;
    /// otherwise fails only when the connection is dead or dying.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<(), ConnectionError> {
        let payload = payload.into();
        self.call(|reply| Command::Send { payload, reply }).await?
    }

    /// Wait for the next inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] (or the transport reason) if the
    /// connection dies while waiting.
    pub async fn recv(&self) -> Result<Vec<u8>, ConnectionError> {
        self.recv_inner(None).await
    }

    /// Wait for the next inbound message, up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Timeout`] leaves the connection usable; other
    /// receivers keep their place in line.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, ConnectionError> {
        self.recv_inner(Some(timeout)).await
    }

    async fn recv_inner(&self, timeout: Option<Duration>) -> Result<Vec<u8>, ConnectionError> {
        self.call(|reply| Command::Recv { timeout, reply }).await?
    }

    /// Register an asynchronous receiver and return its ref immediately.
    /// The matching message arrives at the controller as
    /// [`Event::Message`]; expiry as [`Event::ReceiveTimeout`].
    ///
    /// # Errors
    ///
    /// Fails only if the connection is already gone.
    pub async fn subscribe(&self, timeout: Option<Duration>) -> Result<u64, ConnectionError> {
        self.call(|reply| Command::Subscribe { timeout, reply }).await?
    }

    /// Cancel a subscription. Idempotent: unknown refs and dead
    /// connections succeed silently.
    pub async fn unsubscribe(&self, subscription: u64) {
        let _ = self.call(|reply| Command::Unsubscribe { id: subscription, reply }).await;
    }

    /// The metadata the peer offered during the handshake.
    ///
    /// # Errors
    ///
    /// Fails only if the connection is already gone.
    pub async fn peer_metadata(&self) -> Result<Metadata, ConnectionError> {
        self.call(|reply| Command::PeerMetadata { reply }).await?
    }

    /// Transfer controller ownership. `current` must be the handle of the
    /// present controller; `new` receives all future deliveries.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotOwner`] if `current` is not the controlling
    /// principal.
    pub async fn set_controller(
        &self,
        current: &ControllerHandle,
        new: ControllerHandle,
    ) -> Result<(), ConnectionError> {
        self.call(|reply| Command::SetController { from: current.id(), to: new, reply }).await?
    }

    /// Close the connection. Idempotent: closing a closed connection is a
    /// no-op.
    pub async fn close(&self) {
        let _ = self.call(|reply| Command::Close { reply }).await;
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ConnectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(make(reply_tx)).map_err(|_| ConnectionError::Closed)?;
        reply_rx.await.map_err(|_| ConnectionError::Closed)
    }
}

enum Phase<E: Environment> {
    Handshaking {
        fsm: Handshake,
        starter: oneshot::Sender<Result<(), ConnectionError>>,
        deadline: Option<E::Instant>,
    },
    Connected {
        cipher: TransportCipher,
    },
    Terminated,
}

enum CloseReason {
    /// `close()` was called.
    Local,
    /// Orderly end of stream from the peer.
    PeerClosed,
    /// The controller's receiver was dropped.
    ControllerGone,
    /// The byte-stream failed.
    Transport(ConnectionError),
    /// Protocol, crypto, or counter violation.
    Fatal(ConnectionError),
}

struct Actor<E: Environment, S> {
    env: E,
    id: u64,
    reader: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    commands: mpsc::UnboundedReceiver<Command>,
    // Held so the command channel outlives dropped handles; the actor's
    // lifetime is governed by the transport and the controller, not by
    // handle count.
    _keepalive: mpsc::UnboundedSender<Command>,
    controller: ControllerHandle,
    queue: RecvQueue<E::Instant>,
    peer_metadata: Metadata,
    phase: Phase<E>,
}

impl<E, S> Actor<E, S>
where
    E: Environment,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(mut self, first_packet: Option<Packet>) {
        if let Some(packet) = first_packet {
            if let Err(err) = write_packet(&mut self.writer, &packet).await {
                self.shutdown(CloseReason::Transport(err));
                return;
            }
        }

        let reason = self.event_loop().await;
        self.shutdown(reason);
    }

    async fn event_loop(&mut self) -> CloseReason {
        loop {
            let armed = match &self.phase {
                Phase::Handshaking { .. } => true,
                Phase::Connected { .. } => self.queue.should_arm(),
                Phase::Terminated => false,
            };
            let deadline = match &self.phase {
                Phase::Handshaking { deadline, .. } => *deadline,
                Phase::Connected { .. } => self.queue.next_deadline(),
                Phase::Terminated => None,
            };
            let now = self.env.now();
            let sleep_for =
                deadline.map(|at| if at <= now { Duration::ZERO } else { at - now });

            tokio::select! {
                command = self.commands.recv() => {
                    // recv never yields None: the actor keeps a sender.
                    if let Some(command) = command {
                        if let Some(reason) = self.on_command(command).await {
                            return reason;
                        }
                    }
                }
                frame = self.reader.next(), if armed => match frame {
                    Ok(frame) => {
                        if let Some(reason) = self.on_frame(&frame).await {
                            return reason;
                        }
                    }
                    Err(err) => {
                        return match transport_error(&err) {
                            ConnectionError::Closed => CloseReason::PeerClosed,
                            other => CloseReason::Transport(other),
                        };
                    }
                },
                () = self.env.sleep(sleep_for.unwrap_or(Duration::ZERO)), if sleep_for.is_some() => {
                    if let Some(reason) = self.on_deadline() {
                        return reason;
                    }
                }
                () = self.controller.gone() => return CloseReason::ControllerGone,
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Option<CloseReason> {
        match command {
            Command::Send { payload, reply } => {
                let Phase::Connected { cipher } = &mut self.phase else {
                    let _ = reply.send(Err(ConnectionError::NotConnected));
                    return None;
                };
                if payload.is_empty() {
                    let _ = reply.send(Err(ConnectionError::SendZeroSize));
                    return None;
                }
                if payload.len() > MAX_MESSAGE_LEN {
                    let _ = reply.send(Err(ConnectionError::SendTooLarge(payload.len())));
                    return None;
                }

                match cipher.seal(&payload) {
                    Ok((counter, payload_box)) => {
                        let packet = Packet::Message { counter, payload_box };
                        match write_packet(&mut self.writer, &packet).await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                                None
                            }
                            Err(err) => {
                                let _ = reply.send(Err(err.clone()));
                                Some(CloseReason::Transport(err))
                            }
                        }
                    }
                    // Counter exhaustion is fatal to the whole connection.
                    Err(err) => {
                        let _ = reply.send(Err(err.clone()));
                        Some(CloseReason::Fatal(err))
                    }
                }
            }
            Command::Recv { timeout, reply } => {
                if !matches!(self.phase, Phase::Connected { .. }) {
                    let _ = reply.send(Err(ConnectionError::NotConnected));
                    return None;
                }
                let deadline = timeout.map(|t| self.env.now() + t);
                self.queue.push_sync(reply, deadline);
                self.pump();
                None
            }
            Command::Subscribe { timeout, reply } => {
                if !matches!(self.phase, Phase::Connected { .. }) {
                    let _ = reply.send(Err(ConnectionError::NotConnected));
                    return None;
                }
                let deadline = timeout.map(|t| self.env.now() + t);
                let id = self.queue.subscribe(deadline);
                let _ = reply.send(Ok(id));
                self.pump();
                None
            }
            Command::Unsubscribe { id, reply } => {
                self.queue.cancel(id);
                let _ = reply.send(());
                None
            }
            Command::PeerMetadata { reply } => {
                let _ = reply.send(Ok(self.peer_metadata.clone()));
                None
            }
            Command::SetController { from, to, reply } => {
                if from == self.controller.id() {
                    debug!(connection = self.id, from, to = to.id(), "controller transferred");
                    self.controller = to;
                    let _ = reply.send(Ok(()));
                } else {
                    let _ = reply.send(Err(ConnectionError::NotOwner));
                }
                None
            }
            Command::Close { reply } => {
                let _ = reply.send(());
                Some(CloseReason::Local)
            }
        }
    }

    async fn on_frame(&mut self, frame: &[u8]) -> Option<CloseReason> {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(err) => return Some(CloseReason::Fatal(err.into())),
        };

        match mem::replace(&mut self.phase, Phase::Terminated) {
            Phase::Handshaking { mut fsm, starter, deadline } => {
                let actions = match fsm.handle(&self.env, packet) {
                    Ok(actions) => actions,
                    Err(err) => {
                        let err = ConnectionError::from(err);
                        let _ = starter.send(Err(err.clone()));
                        return Some(CloseReason::Fatal(err));
                    }
                };

                let mut session = None;
                for action in actions {
                    match action {
                        HandshakeAction::Send(packet) => {
                            if let Err(err) = write_packet(&mut self.writer, &packet).await {
                                let _ = starter.send(Err(err.clone()));
                                return Some(CloseReason::Transport(err));
                            }
                        }
                        HandshakeAction::Established(s) => session = Some(s),
                    }
                }

                match session {
                    Some(session) => {
                        debug!(
                            connection = self.id,
                            side = ?session.side,
                            "handshake complete"
                        );
                        self.peer_metadata = session.peer_metadata.clone();
                        let cipher = TransportCipher::new(
                            session.side,
                            &session.peer_ephemeral,
                            session.secret,
                            session.send_counter,
                            session.recv_counter,
                        );
                        self.phase = Phase::Connected { cipher };
                        let _ = starter.send(Ok(()));
                    }
                    None => {
                        self.phase = Phase::Handshaking { fsm, starter, deadline };
                    }
                }
                None
            }
            Phase::Connected { mut cipher } => {
                // A frame is only read while the buffer slot is free.
                debug_assert!(!self.queue.is_buffered(), "frame read with a parked payload");
                let opened = match packet {
                    Packet::Message { counter, payload_box } => cipher.open(counter, &payload_box),
                    other => Err(ConnectionError::Handshake(
                        crate::error::HandshakeError::UnexpectedPacket {
                            packet: other.kind(),
                            state: "connected",
                        },
                    )),
                };
                self.phase = Phase::Connected { cipher };

                match opened {
                    Ok(payload) => {
                        self.queue.fill(payload);
                        self.pump();
                        None
                    }
                    Err(err) => Some(CloseReason::Fatal(err)),
                }
            }
            Phase::Terminated => None,
        }
    }

    fn on_deadline(&mut self) -> Option<CloseReason> {
        let now = self.env.now();

        if let Phase::Handshaking { deadline: Some(at), .. } = &self.phase {
            if *at <= now {
                return Some(CloseReason::Fatal(ConnectionError::Timeout));
            }
        }

        for expired in self.queue.expire(now) {
            match expired {
                Expired::Sync { reply } => {
                    let _ = reply.send(Err(ConnectionError::Timeout));
                }
                Expired::Subscription { id } => {
                    self.controller
                        .post(Event::ReceiveTimeout { connection: self.id, subscription: id });
                }
            }
        }
        None
    }

    fn pump(&mut self) {
        for delivery in self.queue.pump() {
            match delivery {
                Delivery::Sync { reply, payload } => {
                    let _ = reply.send(Ok(payload));
                }
                Delivery::Subscription { payload } => {
                    self.controller.post(Event::Message { connection: self.id, payload });
                }
            }
        }
    }

    fn shutdown(mut self, reason: CloseReason) {
        let err = match &reason {
            CloseReason::Local | CloseReason::PeerClosed | CloseReason::ControllerGone => {
                ConnectionError::Closed
            }
            CloseReason::Transport(err) | CloseReason::Fatal(err) => err.clone(),
        };

        match &reason {
            CloseReason::Fatal(e) => warn!(connection = self.id, error = %e, "connection failed"),
            CloseReason::Transport(e) => {
                warn!(connection = self.id, error = %e, "transport failed");
            }
            _ => debug!(connection = self.id, "connection closed"),
        }

        if let Phase::Handshaking { starter, .. } =
            mem::replace(&mut self.phase, Phase::Terminated)
        {
            let _ = starter.send(Err(err.clone()));
        }

        let (replies, had_subscription) = self.queue.drain();
        for reply in replies {
            let _ = reply.send(Err(err.clone()));
        }
        if had_subscription && !matches!(reason, CloseReason::ControllerGone) {
            self.controller.post(Event::Closed { connection: self.id });
        }

        // Dropping self releases both stream halves: the one and only
        // disposal of the socket.
    }
}

async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), ConnectionError> {
    let bytes = packet.to_bytes()?;
    write_frame(writer, &bytes).await.map_err(|err| transport_error(&err))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::controller::Controller;
    use crate::env::testing::TestEnv;
    use crate::error::HandshakeError;
    use crate::keyring::MinuteKeys;
    use crate::vault::{SoftwareVault, Vault};

    struct Rig {
        env: TestEnv,
        client_vault: Arc<SoftwareVault>,
        server_vault: Arc<SoftwareVault>,
        minute_keys: Arc<MinuteKeys>,
    }

    impl Rig {
        fn new() -> Self {
            let env = TestEnv::new();
            Self {
                client_vault: Arc::new(SoftwareVault::generate(&env)),
                server_vault: Arc::new(SoftwareVault::generate(&env)),
                minute_keys: Arc::new(MinuteKeys::new(&env, 2)),
                env,
            }
        }

        fn client_config(&self, controller: &Controller) -> Config {
            Config::client(
                self.client_vault.clone(),
                controller.handle(),
                self.server_vault.public_key(),
            )
        }

        fn server_config(&self, controller: &Controller) -> Config {
            Config::server(self.server_vault.clone(), controller.handle(), self.minute_keys.clone())
        }

        /// Handshake two connections over an in-memory duplex stream.
        async fn pair(
            &self,
            client_config: Config,
            server_config: Config,
        ) -> (Connection, Connection) {
            let (client_stream, server_stream) = tokio::io::duplex(1 << 17);

            let server = tokio::spawn(Connection::start(
                self.env.clone(),
                server_stream,
                server_config,
            ));
            let client = Connection::start(self.env.clone(), client_stream, client_config)
                .await
                .expect("client handshake");
            let server = server.await.expect("join").expect("server handshake");
            (client, server)
        }
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let rig = Rig::new();
        let client_controller = Controller::new();
        let server_controller = Controller::new();

        let (client, server) = rig
            .pair(rig.client_config(&client_controller), rig.server_config(&server_controller))
            .await;

        client.send(&b"hello"[..]).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), b"hello");

        server.send(&b"hi back"[..]).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), b"hi back");
    }

    #[tokio::test]
    async fn metadata_is_exchanged() {
        let rig = Rig::new();
        let client_controller = Controller::new();
        let server_controller = Controller::new();

        let mut client_md = Metadata::new();
        client_md.push(&b"user"[..], &b"alice"[..]).unwrap();
        let mut server_md = Metadata::new();
        server_md.push(&b"role"[..], &b"svr"[..]).unwrap();

        let (client, server) = rig
            .pair(
                rig.client_config(&client_controller).metadata(client_md),
                rig.server_config(&server_controller).metadata(server_md),
            )
            .await;

        assert_eq!(server.peer_metadata().await.unwrap().get(b"user"), Some(&b"alice"[..]));
        assert_eq!(client.peer_metadata().await.unwrap().get(b"role"), Some(&b"svr"[..]));
    }

    #[tokio::test]
    async fn recv_timeout_leaves_connection_usable() {
        let rig = Rig::new();
        let client_controller = Controller::new();
        let server_controller = Controller::new();

        let (client, server) = rig
            .pair(rig.client_config(&client_controller), rig.server_config(&server_controller))
            .await;

        let result = client.recv_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, Err(ConnectionError::Timeout));

        server.send(&b"late"[..]).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), b"late");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_pending_receivers() {
        let rig = Rig::new();
        let client_controller = Controller::new();
        let server_controller = Controller::new();

        let (client, server) = rig
            .pair(rig.client_config(&client_controller), rig.server_config(&server_controller))
            .await;

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.recv().await })
        };
        tokio::task::yield_now().await;

        client.close().await;
        client.close().await; // second close is a no-op

        assert_eq!(waiting.await.unwrap(), Err(ConnectionError::Closed));
        assert_eq!(client.send(&b"x"[..]).await, Err(ConnectionError::Closed));
        drop(server);
    }

    #[tokio::test]
    async fn subscription_delivers_to_controller() {
        let rig = Rig::new();
        let mut client_controller = Controller::new();
        let server_controller = Controller::new();

        let (client, server) = rig
            .pair(rig.client_config(&client_controller), rig.server_config(&server_controller))
            .await;

        let subscription = client.subscribe(None).await.unwrap();
        server.send(&b"async"[..]).await.unwrap();

        assert_eq!(
            client_controller.recv().await,
            Some(Event::Message { connection: client.id(), payload: b"async".to_vec() })
        );

        // Unknown refs cancel fine.
        client.unsubscribe(subscription).await;
        client.unsubscribe(9999).await;
    }

    #[tokio::test]
    async fn subscription_timeout_posts_event() {
        let rig = Rig::new();
        let mut client_controller = Controller::new();
        let server_controller = Controller::new();

        let (client, _server) = rig
            .pair(rig.client_config(&client_controller), rig.server_config(&server_controller))
            .await;

        let subscription = client.subscribe(Some(Duration::from_millis(10))).await.unwrap();

        assert_eq!(
            client_controller.recv().await,
            Some(Event::ReceiveTimeout { connection: client.id(), subscription })
        );
    }

    #[tokio::test]
    async fn peer_disconnect_notifies_pending_subscription_once() {
        let rig = Rig::new();
        let mut client_controller = Controller::new();
        let server_controller = Controller::new();

        let (client, server) = rig
            .pair(rig.client_config(&client_controller), rig.server_config(&server_controller))
            .await;

        client.subscribe(None).await.unwrap();
        client.subscribe(None).await.unwrap();

        server.close().await;

        assert_eq!(
            client_controller.recv().await,
            Some(Event::Closed { connection: client.id() })
        );
        // Exactly one closed event despite two pending subscriptions.
        assert_eq!(client_controller.try_recv(), None);
    }

    #[tokio::test]
    async fn controller_transfer_redirects_delivery() {
        let rig = Rig::new();
        let controller_a = Controller::new();
        let mut controller_b = Controller::new();
        let server_controller = Controller::new();

        let (client, server) = rig
            .pair(rig.client_config(&controller_a), rig.server_config(&server_controller))
            .await;

        client.subscribe(None).await.unwrap();

        // Only the current controller may hand the connection over.
        let imposter = Controller::new();
        assert_eq!(
            client.set_controller(&imposter.handle(), controller_b.handle()).await,
            Err(ConnectionError::NotOwner)
        );
        client.set_controller(&controller_a.handle(), controller_b.handle()).await.unwrap();

        server.send(&b"for b"[..]).await.unwrap();
        assert_eq!(
            controller_b.recv().await,
            Some(Event::Message { connection: client.id(), payload: b"for b".to_vec() })
        );

        // A is out of the loop entirely, including for the closed notice.
        let mut controller_a = controller_a;
        client.subscribe(None).await.unwrap();
        server.close().await;
        assert_eq!(controller_b.recv().await, Some(Event::Closed { connection: client.id() }));
        assert_eq!(controller_a.try_recv(), None);
    }

    #[tokio::test]
    async fn controller_death_closes_the_connection() {
        let rig = Rig::new();
        let client_controller = Controller::new();
        let server_controller = Controller::new();

        let (client, server) = rig
            .pair(rig.client_config(&client_controller), rig.server_config(&server_controller))
            .await;

        drop(client_controller);

        // The actor notices and tears down; subsequent calls see Closed.
        let mut closed = false;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if client.send(&b"x"[..]).await == Err(ConnectionError::Closed) {
                closed = true;
                break;
            }
        }
        assert!(closed, "connection must close when its controller dies");
        drop(server);
    }

    #[tokio::test]
    async fn handshake_timeout_reports_and_releases() {
        let rig = Rig::new();
        let controller = Controller::new();

        // A stream whose peer never answers: keep the far end alive so the
        // failure is the deadline, not an EOF.
        let (client_stream, server_stream) = tokio::io::duplex(1 << 16);

        let config =
            rig.client_config(&controller).handshake_timeout(Some(Duration::from_millis(50)));
        let result = Connection::start(rig.env.clone(), client_stream, config).await;

        assert_eq!(result.unwrap_err(), ConnectionError::Timeout);
        drop(server_stream);
    }

    #[tokio::test]
    async fn send_rejects_empty_and_oversized_payloads() {
        let rig = Rig::new();
        let client_controller = Controller::new();
        let server_controller = Controller::new();

        let (client, _server) = rig
            .pair(rig.client_config(&client_controller), rig.server_config(&server_controller))
            .await;

        assert_eq!(client.send(Vec::new()).await, Err(ConnectionError::SendZeroSize));
        assert_eq!(
            client.send(vec![0u8; MAX_MESSAGE_LEN + 1]).await,
            Err(ConnectionError::SendTooLarge(MAX_MESSAGE_LEN + 1))
        );
        // The limit itself is fine.
        client.send(vec![0u8; MAX_MESSAGE_LEN]).await.unwrap();
    }

    #[tokio::test]
    async fn skipped_counter_kills_the_connection() {
        let rig = Rig::new();
        let server_controller = Controller::new();

        let (client_stream, server_stream) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(Connection::start(
            rig.env.clone(),
            server_stream,
            rig.server_config(&server_controller),
        ));

        // Hand-rolled peer: real handshake, then a forged message counter.
        let (read_half, mut write_half) = tokio::io::split(client_stream);
        let mut reader = FrameReader::new(read_half);

        let (mut fsm, hello) = Handshake::client(
            &rig.env,
            rig.client_vault.clone(),
            rig.server_vault.public_key(),
            Metadata::new(),
        )
        .unwrap();
        write_frame(&mut write_half, &hello.to_bytes().unwrap()).await.unwrap();

        let cookie = Packet::decode(&reader.next().await.unwrap()).unwrap();
        let mut session = None;
        for action in fsm.handle(&rig.env, cookie).unwrap() {
            match action {
                HandshakeAction::Send(packet) => {
                    write_frame(&mut write_half, &packet.to_bytes().unwrap()).await.unwrap();
                }
                HandshakeAction::Established(s) => session = Some(s),
            }
        }
        let session = session.expect("empty metadata establishes after initiate");
        let server = server.await.unwrap().unwrap();

        let mut cipher = TransportCipher::new(
            session.side,
            &session.peer_ephemeral,
            session.secret,
            session.send_counter,
            session.recv_counter,
        );

        // An in-order message goes through.
        let (counter, payload_box) = cipher.seal(b"in order").unwrap();
        let frame = Packet::Message { counter, payload_box }.to_bytes().unwrap();
        write_frame(&mut write_half, &frame).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), b"in order");

        // Counter 4 while the server expects 3: fatal before decryption.
        let (_, payload_box) = cipher.seal(b"skipped").unwrap();
        let frame = Packet::Message { counter: 4, payload_box }.to_bytes().unwrap();
        write_frame(&mut write_half, &frame).await.unwrap();

        assert_eq!(
            server.recv().await,
            Err(ConnectionError::OutOfOrder { expected: 3, actual: 4 })
        );
        // The connection is gone for good.
        assert_eq!(server.send(&b"x"[..]).await, Err(ConnectionError::Closed));
    }

    #[tokio::test]
    async fn garbage_frame_is_fatal() {
        let rig = Rig::new();
        let server_controller = Controller::new();

        let (client_stream, server_stream) = tokio::io::duplex(1 << 16);

        let server = tokio::spawn(Connection::start(
            rig.env.clone(),
            server_stream,
            rig.server_config(&server_controller),
        ));

        // Raw writer pretending to be a client: ship a framed blob with an
        // unknown magic.
        let (_read, mut write) = tokio::io::split(client_stream);
        let garbage = [0xAAu8; 64];
        write_frame(&mut write, &garbage).await.unwrap();

        let result = server.await.unwrap();
        assert!(matches!(
            result,
            Err(ConnectionError::Handshake(HandshakeError::Protocol(_)))
                | Err(ConnectionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn config_must_match_mode() {
        let rig = Rig::new();
        let controller = Controller::new();
        let (stream, _other) = tokio::io::duplex(64);

        let mut config = rig.client_config(&controller);
        config.peer_public_key = None;

        let result = Connection::start(rig.env.clone(), stream, config).await;
        assert!(matches!(result, Err(ConnectionError::Config(_))));
    }
}
