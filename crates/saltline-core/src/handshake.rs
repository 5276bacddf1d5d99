//! The handshake state machine.
//!
//! Pure protocol logic in the action style: no I/O, no timers. The driver
//! feeds in decoded packets via [`Handshake::handle`] and executes the
//! returned [`HandshakeAction`]s: transmit a packet, or hand the finished
//! [`Session`] to the data plane. Timeouts live entirely in the driver.
//!
//! # Choreography
//!
//! ```text
//! Client                                Server
//!   │ Hello(EC, 0, box₀[zeros])          │  awaiting hello
//!   │───────────────────────────────────>│
//!   │            Cookie(tail, boxₛ[ES‖K])│  awaiting vouch
//!   │<───────────────────────────────────│  (keeps nothing; ESs is in K)
//!   │ Initiate(K, 1, box₁[C‖tail‖vouch‖md])
//!   │───────────────────────────────────>│
//!   │                 Ready(2, box₂[md'])│  only if md was non-empty
//!   │<───────────────────────────────────│
//! ```
//!
//! Counters after the handshake: the client sends from 2 and expects 3, the
//! server sends from 3 and expects 2. Counter 2 on the server side is the
//! Ready slot; it is reserved whether or not a Ready is transmitted, so a
//! client that sent no metadata skips straight past it.
//!
//! Any packet whose type does not match the state's expectation is fatal,
//! as is every verification failure. There is no retry and no renegotiation.

use std::sync::Arc;

use crypto_box::SecretKey;
use saltline_proto::{
    nonce::{self, Side, TAIL_LEN},
    packet::{COOKIE_LEN, KEY_LEN},
    Metadata, Packet,
};

use crate::cipher::{generate_keypair, open_with, seal_with, secretbox_open, secretbox_seal};
use crate::env::Environment;
use crate::error::HandshakeError;
use crate::keyring::CookieKeys;
use crate::registry::PeerVerifier;
use crate::vault::Vault;

/// Counter value of the first client data message.
const CLIENT_FIRST_MESSAGE: u64 = 2;

/// Counter value of the Ready slot and the first server data message.
const SERVER_FIRST_MESSAGE: u64 = 3;

/// Effect requested by the state machine; the driver executes it.
pub enum HandshakeAction {
    /// Transmit this packet to the peer.
    Send(Packet),
    /// The handshake is complete; switch to the data plane.
    Established(Session),
}

/// Everything the data plane needs, fixed by the handshake transcript.
pub struct Session {
    /// Which end we are; equal to the configured mode.
    pub side: Side,
    /// The peer's ephemeral public key.
    pub peer_ephemeral: [u8; KEY_LEN],
    /// Our ephemeral secret. On the server this was recovered from the
    /// cookie, not from memory.
    pub secret: SecretKey,
    /// First outbound message counter.
    pub send_counter: u64,
    /// First expected inbound message counter.
    pub recv_counter: u64,
    /// Metadata the peer supplied, empty if it supplied none.
    pub peer_metadata: Metadata,
}

enum State {
    AwaitingCookie {
        server_key: [u8; KEY_LEN],
        ephemeral: [u8; KEY_LEN],
        secret: SecretKey,
    },
    AwaitingReady {
        server_ephemeral: [u8; KEY_LEN],
        secret: SecretKey,
    },
    AwaitingHello {
        cookie_keys: Arc<dyn CookieKeys>,
        verifier: Arc<dyn PeerVerifier>,
        connection: u64,
    },
    AwaitingVouch {
        cookie_keys: Arc<dyn CookieKeys>,
        verifier: Arc<dyn PeerVerifier>,
        connection: u64,
    },
    Done,
}

impl State {
    const fn name(&self) -> &'static str {
        match self {
            Self::AwaitingCookie { .. } => "awaiting-cookie",
            Self::AwaitingReady { .. } => "awaiting-ready",
            Self::AwaitingHello { .. } => "awaiting-hello",
            Self::AwaitingVouch { .. } => "awaiting-vouch",
            Self::Done => "done",
        }
    }
}

/// One side of an in-flight handshake.
pub struct Handshake {
    vault: Arc<dyn Vault>,
    metadata: Metadata,
    state: State,
}

impl Handshake {
    /// Begin a client handshake towards the server whose long-term public
    /// key is `server_key`. Returns the machine together with the Hello
    /// packet the driver must transmit.
    ///
    /// # Errors
    ///
    /// Returns an error if the Hello box cannot be sealed.
    pub fn client<E: Environment>(
        env: &E,
        vault: Arc<dyn Vault>,
        server_key: [u8; KEY_LEN],
        metadata: Metadata,
    ) -> Result<(Self, Packet), HandshakeError> {
        let (ephemeral, secret) = generate_keypair(env);

        let zeros_box = seal_with(&[0u8; 64], &nonce::hello(Side::Client, 0), &server_key, &secret)
            .map_err(|source| HandshakeError::Crypto { stage: "hello", source })?;

        let hello = Packet::Hello { ephemeral, counter: 0, zeros_box };
        let machine = Self {
            vault,
            metadata,
            state: State::AwaitingCookie { server_key, ephemeral, secret },
        };
        Ok((machine, hello))
    }

    /// Begin a server handshake on connection `connection`.
    pub fn server(
        vault: Arc<dyn Vault>,
        cookie_keys: Arc<dyn CookieKeys>,
        verifier: Arc<dyn PeerVerifier>,
        connection: u64,
        metadata: Metadata,
    ) -> Self {
        Self { vault, metadata, state: State::AwaitingHello { cookie_keys, verifier, connection } }
    }

    /// Name of the current state, for errors and logs.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Advance the machine with one decoded packet.
    ///
    /// # Errors
    ///
    /// Every error is fatal to the connection; afterwards the machine
    /// refuses further packets.
    pub fn handle<E: Environment>(
        &mut self,
        env: &E,
        packet: Packet,
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let state = std::mem::replace(&mut self.state, State::Done);
        match (state, packet) {
            (State::AwaitingCookie { server_key, ephemeral, secret }, Packet::Cookie { tail, cookie_box }) => {
                self.on_cookie(server_key, ephemeral, secret, tail, &cookie_box)
            }
            (State::AwaitingReady { server_ephemeral, secret }, Packet::Ready { counter, metadata_box }) => {
                self.on_ready(server_ephemeral, secret, counter, &metadata_box)
            }
            (State::AwaitingHello { cookie_keys, verifier, connection }, Packet::Hello { ephemeral, counter, zeros_box }) => {
                self.on_hello(env, cookie_keys, verifier, connection, ephemeral, counter, &zeros_box)
            }
            (State::AwaitingVouch { cookie_keys, verifier, connection }, Packet::Initiate { cookie, counter, initiate_box }) => {
                self.on_initiate(cookie_keys, verifier, connection, &cookie, counter, &initiate_box)
            }
            (state, packet) => {
                Err(HandshakeError::UnexpectedPacket { packet: packet.kind(), state: state.name() })
            }
        }
    }

    /// Client: open the cookie box, transmit the Initiate, and decide
    /// whether a Ready will follow.
    fn on_cookie(
        &mut self,
        server_key: [u8; KEY_LEN],
        ephemeral: [u8; KEY_LEN],
        secret: SecretKey,
        tail: [u8; TAIL_LEN],
        cookie_box: &[u8],
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let plain = open_with(cookie_box, &nonce::cookie(&tail), &server_key, &secret)
            .map_err(|source| HandshakeError::Crypto { stage: "cookie", source })?;
        if plain.len() != KEY_LEN + COOKIE_LEN {
            return Err(HandshakeError::Malformed("cookie"));
        }
        let server_ephemeral = take_key(&plain[..KEY_LEN]);
        let cookie = plain[KEY_LEN..].to_vec();

        // Vouch for the ephemeral with the long-term identity.
        let vouch_tail = self.vault.safe_nonce();
        let vouch = self
            .vault
            .seal(&ephemeral, &nonce::vouch(&vouch_tail), &server_key)
            .map_err(|source| HandshakeError::Crypto { stage: "vouch", source })?;

        let mut initiate_plain =
            Vec::with_capacity(KEY_LEN + TAIL_LEN + vouch.len() + 64);
        initiate_plain.extend_from_slice(&self.vault.public_key());
        initiate_plain.extend_from_slice(&vouch_tail);
        initiate_plain.extend_from_slice(&vouch);
        self.metadata.encode(&mut initiate_plain);

        let initiate_box = seal_with(
            &initiate_plain,
            &nonce::initiate(Side::Client, 1),
            &server_ephemeral,
            &secret,
        )
        .map_err(|source| HandshakeError::Crypto { stage: "initiate", source })?;

        let initiate = Packet::Initiate { cookie, counter: 1, initiate_box };

        // The server answers with Ready only when our metadata segment is
        // non-empty, so the branch is decidable right here. Either way
        // counter 2 stays reserved for the Ready slot.
        if self.metadata.is_empty() {
            Ok(vec![
                HandshakeAction::Send(initiate),
                HandshakeAction::Established(Session {
                    side: Side::Client,
                    peer_ephemeral: server_ephemeral,
                    secret,
                    send_counter: CLIENT_FIRST_MESSAGE,
                    recv_counter: SERVER_FIRST_MESSAGE,
                    peer_metadata: Metadata::new(),
                }),
            ])
        } else {
            self.state = State::AwaitingReady { server_ephemeral, secret };
            Ok(vec![HandshakeAction::Send(initiate)])
        }
    }

    /// Client: take the server's metadata and go live.
    fn on_ready(
        &mut self,
        server_ephemeral: [u8; KEY_LEN],
        secret: SecretKey,
        counter: u64,
        metadata_box: &[u8],
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if counter != 2 {
            return Err(HandshakeError::BadCounter { packet: "ready", expected: 2, actual: counter });
        }

        let plain = open_with(metadata_box, &nonce::ready(2), &server_ephemeral, &secret)
            .map_err(|source| HandshakeError::Crypto { stage: "ready", source })?;
        let peer_metadata = Metadata::decode(&plain)?;

        Ok(vec![HandshakeAction::Established(Session {
            side: Side::Client,
            peer_ephemeral: server_ephemeral,
            secret,
            send_counter: CLIENT_FIRST_MESSAGE,
            recv_counter: SERVER_FIRST_MESSAGE,
            peer_metadata,
        })])
    }

    /// Server: validate the Hello and answer with a Cookie.
    #[allow(clippy::too_many_arguments)]
    fn on_hello<E: Environment>(
        &mut self,
        env: &E,
        cookie_keys: Arc<dyn CookieKeys>,
        verifier: Arc<dyn PeerVerifier>,
        connection: u64,
        client_ephemeral: [u8; KEY_LEN],
        counter: u64,
        zeros_box: &[u8],
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if counter != 0 {
            return Err(HandshakeError::BadCounter { packet: "hello", expected: 0, actual: counter });
        }

        let plain = self
            .vault
            .open(zeros_box, &nonce::hello(Side::Client, 0), &client_ephemeral)
            .map_err(|source| HandshakeError::Crypto { stage: "hello", source })?;
        if plain != [0u8; 64] {
            return Err(HandshakeError::Malformed("hello"));
        }

        let (server_ephemeral, server_secret) = generate_keypair(env);

        // Seal both ephemerals into the cookie under the current minute
        // key. The pair is not retained: it rides back inside the cookie,
        // so a half-open connection costs the server no memory.
        let minute_tail = self.vault.safe_nonce();
        let mut pair = [0u8; 64];
        pair[..KEY_LEN].copy_from_slice(&client_ephemeral);
        pair[KEY_LEN..].copy_from_slice(&server_secret.to_bytes());
        let interior = secretbox_seal(&pair, &nonce::minute(&minute_tail), &cookie_keys.current())
            .map_err(|source| HandshakeError::Crypto { stage: "cookie seal", source })?;

        let mut cookie = Vec::with_capacity(COOKIE_LEN);
        cookie.extend_from_slice(&minute_tail);
        cookie.extend_from_slice(&interior);

        let box_tail = self.vault.safe_nonce();
        let mut cookie_plain = Vec::with_capacity(KEY_LEN + COOKIE_LEN);
        cookie_plain.extend_from_slice(&server_ephemeral);
        cookie_plain.extend_from_slice(&cookie);
        let cookie_box = self
            .vault
            .seal(&cookie_plain, &nonce::cookie(&box_tail), &client_ephemeral)
            .map_err(|source| HandshakeError::Crypto { stage: "cookie seal", source })?;

        self.state = State::AwaitingVouch { cookie_keys, verifier, connection };
        Ok(vec![HandshakeAction::Send(Packet::Cookie { tail: box_tail, cookie_box })])
    }

    /// Server: recover the ephemerals from the cookie, verify the vouch,
    /// admit the client, and go live.
    fn on_initiate(
        &mut self,
        cookie_keys: Arc<dyn CookieKeys>,
        verifier: Arc<dyn PeerVerifier>,
        connection: u64,
        cookie: &[u8],
        counter: u64,
        initiate_box: &[u8],
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if counter != 1 {
            return Err(HandshakeError::BadCounter {
                packet: "initiate",
                expected: 1,
                actual: counter,
            });
        }

        if cookie.len() != COOKIE_LEN {
            return Err(HandshakeError::Malformed("cookie"));
        }

        // Recover the ephemeral pair; any minute key still in the window
        // may have sealed it.
        let minute_tail = take_tail(&cookie[..TAIL_LEN]);
        let interior = &cookie[TAIL_LEN..];
        let mut pair = None;
        for key in cookie_keys.recent() {
            if let Ok(plain) = secretbox_open(interior, &nonce::minute(&minute_tail), &key) {
                pair = Some(plain);
                break;
            }
        }
        let pair = pair.ok_or(HandshakeError::BadCookie)?;
        if pair.len() != 64 {
            return Err(HandshakeError::Malformed("cookie interior"));
        }
        let client_ephemeral = take_key(&pair[..KEY_LEN]);
        let server_secret = SecretKey::from(take_key(&pair[KEY_LEN..]));

        let plain = open_with(
            initiate_box,
            &nonce::initiate(Side::Client, 1),
            &client_ephemeral,
            &server_secret,
        )
        .map_err(|source| HandshakeError::Crypto { stage: "initiate", source })?;
        if plain.len() < KEY_LEN + TAIL_LEN + 48 {
            return Err(HandshakeError::Malformed("initiate"));
        }
        let client_key = take_key(&plain[..KEY_LEN]);
        let vouch_tail = take_tail(&plain[KEY_LEN..KEY_LEN + TAIL_LEN]);
        let vouch = &plain[KEY_LEN + TAIL_LEN..KEY_LEN + TAIL_LEN + 48];
        let metadata_bytes = &plain[KEY_LEN + TAIL_LEN + 48..];

        if !verifier.verify(connection, &client_key) {
            return Err(HandshakeError::PeerRejected);
        }

        // The vouch binds the ephemeral to the long-term identity: the
        // client's vault must have boxed exactly the ephemeral that sealed
        // this cookie.
        let vouched = self
            .vault
            .open(vouch, &nonce::vouch(&vouch_tail), &client_key)
            .map_err(|source| HandshakeError::Crypto { stage: "vouch", source })?;
        if vouched != client_ephemeral {
            return Err(HandshakeError::VouchMismatch);
        }

        let session = Session {
            side: Side::Server,
            peer_ephemeral: client_ephemeral,
            secret: server_secret,
            send_counter: SERVER_FIRST_MESSAGE,
            recv_counter: CLIENT_FIRST_MESSAGE,
            peer_metadata: Metadata::decode(metadata_bytes)?,
        };

        if metadata_bytes.is_empty() {
            // The client supplied no metadata; it is not waiting for Ready.
            return Ok(vec![HandshakeAction::Established(session)]);
        }

        let metadata_box = seal_with(
            &self.metadata.to_bytes(),
            &nonce::ready(2),
            &session.peer_ephemeral,
            &session.secret,
        )
        .map_err(|source| HandshakeError::Crypto { stage: "ready", source })?;

        Ok(vec![
            HandshakeAction::Send(Packet::Ready { counter: 2, metadata_box }),
            HandshakeAction::Established(session),
        ])
    }
}

fn take_key(slice: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(slice);
    key
}

fn take_tail(slice: &[u8]) -> [u8; TAIL_LEN] {
    let mut tail = [0u8; TAIL_LEN];
    tail.copy_from_slice(slice);
    tail
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::TransportCipher;
    use crate::env::testing::TestEnv;
    use crate::error::CryptoError;
    use crate::keyring::MinuteKeys;
    use crate::registry::{AllowAll, AllowList};
    use crate::vault::SoftwareVault;

    struct World {
        env: TestEnv,
        client_vault: Arc<SoftwareVault>,
        server_vault: Arc<SoftwareVault>,
        minute_keys: Arc<MinuteKeys>,
    }

    impl World {
        fn new() -> Self {
            let env = TestEnv::new();
            let client_vault = Arc::new(SoftwareVault::generate(&env));
            let server_vault = Arc::new(SoftwareVault::generate(&env));
            let minute_keys = Arc::new(MinuteKeys::new(&env, 2));
            Self { env, client_vault, server_vault, minute_keys }
        }

        fn client(&self, metadata: Metadata) -> (Handshake, Packet) {
            Handshake::client(
                &self.env,
                self.client_vault.clone(),
                self.server_vault.public_key(),
                metadata,
            )
            .expect("client handshake should start")
        }

        fn server(&self, metadata: Metadata) -> Handshake {
            Handshake::server(
                self.server_vault.clone(),
                self.minute_keys.clone(),
                Arc::new(AllowAll),
                1,
                metadata,
            )
        }
    }

    fn md(entries: &[(&[u8], &[u8])]) -> Metadata {
        let mut md = Metadata::new();
        for (k, v) in entries {
            md.push(*k, *v).unwrap();
        }
        md
    }

    /// Drive both machines to completion, returning the sessions and every
    /// packet the server transmitted.
    fn run_handshake(
        world: &World,
        client_md: Metadata,
        server_md: Metadata,
    ) -> (Session, Session, Vec<&'static str>) {
        let (mut client, hello) = world.client(client_md);
        let mut server = world.server(server_md);

        let mut server_sent = Vec::new();
        let mut client_session = None;
        let mut server_session = None;

        // Hello -> server.
        let mut to_client = Vec::new();
        for action in server.handle(&world.env, hello).unwrap() {
            match action {
                HandshakeAction::Send(p) => {
                    server_sent.push(p.kind());
                    to_client.push(p);
                }
                HandshakeAction::Established(s) => server_session = Some(s),
            }
        }

        // Bounce packets until both sides are done.
        while client_session.is_none() || server_session.is_none() {
            let mut to_server = Vec::new();
            for packet in to_client.drain(..) {
                for action in client.handle(&world.env, packet).unwrap() {
                    match action {
                        HandshakeAction::Send(p) => to_server.push(p),
                        HandshakeAction::Established(s) => client_session = Some(s),
                    }
                }
            }
            for packet in to_server.drain(..) {
                for action in server.handle(&world.env, packet).unwrap() {
                    match action {
                        HandshakeAction::Send(p) => {
                            server_sent.push(p.kind());
                            to_client.push(p);
                        }
                        HandshakeAction::Established(s) => server_session = Some(s),
                    }
                }
            }
        }

        (client_session.unwrap(), server_session.unwrap(), server_sent)
    }

    #[test]
    fn clean_handshake_without_metadata_skips_ready() {
        let world = World::new();
        let (client, server, server_sent) =
            run_handshake(&world, Metadata::new(), Metadata::new());

        assert_eq!(server_sent, vec!["cookie"], "server must not transmit ready");
        assert_eq!(client.side, Side::Client);
        assert_eq!(server.side, Side::Server);
        assert_eq!((client.send_counter, client.recv_counter), (2, 3));
        assert_eq!((server.send_counter, server.recv_counter), (3, 2));
        assert!(client.peer_metadata.is_empty());
        assert!(server.peer_metadata.is_empty());
    }

    #[test]
    fn metadata_flows_both_ways_via_ready() {
        let world = World::new();
        let (client, server, server_sent) = run_handshake(
            &world,
            md(&[(b"user", b"alice")]),
            md(&[(b"role", b"svr")]),
        );

        assert_eq!(server_sent, vec!["cookie", "ready"]);
        assert_eq!(server.peer_metadata.get(b"user"), Some(&b"alice"[..]));
        assert_eq!(client.peer_metadata.get(b"role"), Some(&b"svr"[..]));
        assert_eq!((client.send_counter, client.recv_counter), (2, 3));
        assert_eq!((server.send_counter, server.recv_counter), (3, 2));
    }

    #[test]
    fn sessions_agree_on_the_data_plane() {
        let world = World::new();
        let (client, server, _) = run_handshake(&world, Metadata::new(), Metadata::new());

        let mut client_cipher = TransportCipher::new(
            client.side,
            &client.peer_ephemeral,
            client.secret,
            client.send_counter,
            client.recv_counter,
        );
        let mut server_cipher = TransportCipher::new(
            server.side,
            &server.peer_ephemeral,
            server.secret,
            server.send_counter,
            server.recv_counter,
        );

        let (counter, sealed) = client_cipher.seal(b"first contact").unwrap();
        assert_eq!(server_cipher.open(counter, &sealed).unwrap(), b"first contact");

        let (counter, sealed) = server_cipher.seal(b"ack").unwrap();
        assert_eq!(client_cipher.open(counter, &sealed).unwrap(), b"ack");
    }

    #[test]
    fn same_seed_same_transcript() {
        // The transcript fixes the counters and the ephemerals; two worlds
        // built from the same seed must agree on both.
        let run = || {
            let world = World::new();
            let (client, server, _) = run_handshake(&world, Metadata::new(), Metadata::new());
            (
                client.peer_ephemeral,
                server.peer_ephemeral,
                client.send_counter,
                server.send_counter,
            )
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn cookie_survives_one_rotation() {
        let world = World::new();
        let (mut client, hello) = world.client(Metadata::new());
        let mut server = world.server(Metadata::new());

        let cookie_packet = match server.handle(&world.env, hello).unwrap().remove(0) {
            HandshakeAction::Send(p) => p,
            HandshakeAction::Established(_) => panic!("expected cookie"),
        };

        // Rotate once between Cookie and Initiate: the sealing key is now
        // second in the window and must still open the cookie.
        world.minute_keys.rotate(&world.env);

        let initiate = match client.handle(&world.env, cookie_packet).unwrap().remove(0) {
            HandshakeAction::Send(p) => p,
            HandshakeAction::Established(_) => panic!("expected initiate"),
        };

        let actions = server.handle(&world.env, initiate).unwrap();
        assert!(matches!(actions.last(), Some(HandshakeAction::Established(_))));
    }

    #[test]
    fn cookie_older_than_the_window_is_rejected() {
        let world = World::new();
        let (mut client, hello) = world.client(Metadata::new());
        let mut server = world.server(Metadata::new());

        let cookie_packet = match server.handle(&world.env, hello).unwrap().remove(0) {
            HandshakeAction::Send(p) => p,
            HandshakeAction::Established(_) => panic!("expected cookie"),
        };

        // Rotate past the window depth (2): the sealing key is gone.
        world.minute_keys.rotate(&world.env);
        world.minute_keys.rotate(&world.env);

        let initiate = match client.handle(&world.env, cookie_packet).unwrap().remove(0) {
            HandshakeAction::Send(p) => p,
            HandshakeAction::Established(_) => panic!("expected initiate"),
        };

        let result = server.handle(&world.env, initiate);
        assert!(matches!(result, Err(HandshakeError::BadCookie)));
    }

    #[test]
    fn unregistered_client_is_rejected() {
        let world = World::new();
        let (mut client, hello) = world.client(Metadata::new());
        let mut server = Handshake::server(
            world.server_vault.clone(),
            world.minute_keys.clone(),
            Arc::new(AllowList::new([[0xEE; 32]])),
            1,
            Metadata::new(),
        );

        let cookie_packet = match server.handle(&world.env, hello).unwrap().remove(0) {
            HandshakeAction::Send(p) => p,
            HandshakeAction::Established(_) => panic!("expected cookie"),
        };
        let initiate = match client.handle(&world.env, cookie_packet).unwrap().remove(0) {
            HandshakeAction::Send(p) => p,
            HandshakeAction::Established(_) => panic!("expected initiate"),
        };

        let result = server.handle(&world.env, initiate);
        assert!(matches!(result, Err(HandshakeError::PeerRejected)));
    }

    #[test]
    fn tampered_hello_is_rejected() {
        let world = World::new();
        let (_, hello) = world.client(Metadata::new());
        let mut server = world.server(Metadata::new());

        let tampered = match hello {
            Packet::Hello { ephemeral, counter, mut zeros_box } => {
                zeros_box[0] ^= 0x01;
                Packet::Hello { ephemeral, counter, zeros_box }
            }
            _ => unreachable!("client always starts with hello"),
        };

        let result = server.handle(&world.env, tampered);
        assert!(matches!(
            result,
            Err(HandshakeError::Crypto { stage: "hello", source: CryptoError::Verify })
        ));
    }

    #[test]
    fn hello_with_nonzero_counter_is_rejected() {
        let world = World::new();
        let (_, hello) = world.client(Metadata::new());
        let mut server = world.server(Metadata::new());

        let forged = match hello {
            Packet::Hello { ephemeral, zeros_box, .. } => {
                Packet::Hello { ephemeral, counter: 9, zeros_box }
            }
            _ => unreachable!(),
        };

        let result = server.handle(&world.env, forged);
        assert!(matches!(result, Err(HandshakeError::BadCounter { packet: "hello", .. })));
    }

    #[test]
    fn packet_type_must_match_state() {
        let world = World::new();
        let mut server = world.server(Metadata::new());

        // A message frame during awaiting-hello is fatal.
        let stray = Packet::Message { counter: 3, payload_box: vec![0u8; 32] };
        let result = server.handle(&world.env, stray);
        assert!(matches!(
            result,
            Err(HandshakeError::UnexpectedPacket { packet: "message", state: "awaiting-hello" })
        ));
    }

    #[test]
    fn client_refuses_cookie_from_wrong_server() {
        let world = World::new();
        let (mut client, hello) = world.client(Metadata::new());

        // A different identity answers: its cookie box cannot verify
        // against the long-term key the client dialed.
        let mut imposter = Handshake::server(
            Arc::new(SoftwareVault::generate(&world.env)),
            world.minute_keys.clone(),
            Arc::new(AllowAll),
            1,
            Metadata::new(),
        );
        let cookie_packet = match imposter.handle(&world.env, hello) {
            // The imposter cannot even open the hello box, which is sealed
            // to the real server's key.
            Err(HandshakeError::Crypto { stage: "hello", .. }) => return,
            Ok(mut actions) => match actions.remove(0) {
                HandshakeAction::Send(p) => p,
                HandshakeAction::Established(_) => panic!("expected cookie"),
            },
            Err(e) => panic!("unexpected error: {e}"),
        };

        let result = client.handle(&world.env, cookie_packet);
        assert!(matches!(result, Err(HandshakeError::Crypto { stage: "cookie", .. })));
    }
}
