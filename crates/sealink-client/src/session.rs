//! Client session state machine.
//!
//! Drives the initiator handshake, owns per-peer ratchets, and applies the
//! retry and reconnect policies. Pure logic: every method takes events and
//! returns [`SessionAction`]s for the runtime to execute.

use std::collections::HashMap;

use bytes::Bytes;

use sealink_core::{
    open_message, seal_message, Environment, HandshakeOutcome, InitiatorHandshake, SessionError,
    HANDSHAKE_DEADLINE_MS,
};
use sealink_crypto::{IdentityKeyPair, Ratchet};
use sealink_proto::{ack::ACK_LEN, close_code, Ack, MessageFrame, ResponderReply};

use crate::queue::{AckResolution, OutboundQueue, SealedCopy, ACK_TIMEOUT_MS};

/// Peer id under which the handshake-derived ratchet is installed.
pub const SERVER_PEER_ID: &str = "server";

/// Initial reconnect delay; doubles per failed attempt up to the cap.
const RECONNECT_BASE_MS: u64 = 1_000;

/// Reconnect delay ceiling.
const RECONNECT_CAP_MS: u64 = 60_000;

/// Events fed to the session driver by its runtime.
#[derive(Debug)]
pub enum SessionEvent {
    /// The transport connected; start the handshake.
    ChannelOpened,
    /// A binary frame arrived.
    FrameReceived(Bytes),
    /// The channel closed.
    ChannelClosed {
        /// Close code from the peer or transport.
        code: u16,
        /// Close reason (logged, never parsed).
        reason: String,
    },
    /// The owner wants to send `plaintext` to `peer_id`.
    SendRequested {
        /// Destination peer.
        peer_id: String,
        /// Payload to encrypt and queue.
        plaintext: Vec<u8>,
    },
    /// Periodic timer for retries and deadlines.
    Tick,
}

/// Actions the runtime executes on behalf of the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send bytes on the duplex channel.
    SendBytes(Bytes),
    /// Close the channel.
    CloseChannel {
        /// Close code to emit.
        code: u16,
        /// Coarse reason string.
        reason: String,
    },
    /// Re-dial the transport after `delay_ms`.
    Reconnect {
        /// Backoff delay before dialing.
        delay_ms: u64,
    },
    /// Invoke `SessionObserver::on_message`.
    NotifyMessage {
        /// Peer the message decrypted under.
        peer_id: String,
        /// Decrypted payload.
        plaintext: Vec<u8>,
    },
    /// Invoke `SessionObserver::on_error`.
    NotifyError(SessionError),
    /// Invoke `SessionObserver::on_connected`.
    NotifyConnected,
    /// Invoke `SessionObserver::on_disconnected`.
    NotifyDisconnected,
}

/// Connection phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No live channel.
    Idle,
    /// `InitiatorInit` sent, awaiting the 116-byte reply.
    Handshaking,
    /// Handshake complete; traffic flows.
    Active,
}

/// Sans-IO client session driver.
pub struct SessionDriver<E: Environment> {
    env: E,
    identity: IdentityKeyPair,
    phase: Phase,
    pending_handshake: Option<InitiatorHandshake>,
    ratchets: HashMap<String, Ratchet>,
    queue: OutboundQueue,
    /// Channel sequence for the next outbound frame; resets per connection.
    next_sequence: u32,
    reconnect_delay_ms: u64,
}

impl<E: Environment> SessionDriver<E> {
    /// Create a driver for `identity`.
    pub fn new(env: E, identity: IdentityKeyPair) -> Self {
        Self {
            env,
            identity,
            phase: Phase::Idle,
            pending_handshake: None,
            ratchets: HashMap::new(),
            queue: OutboundQueue::new(),
            next_sequence: 0,
            reconnect_delay_ms: RECONNECT_BASE_MS,
        }
    }

    /// Whether the handshake has completed on the live channel.
    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// Queued outbound messages (unsent or awaiting ack).
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Install a ratchet for a peer.
    ///
    /// The handshake installs the [`SERVER_PEER_ID`] ratchet automatically;
    /// this is how additional peer sessions (established out of band) are
    /// wired in.
    pub fn install_peer(&mut self, peer_id: impl Into<String>, ratchet: Ratchet) {
        self.ratchets.insert(peer_id.into(), ratchet);
    }

    /// Peers with live ratchet state.
    pub fn peer_ids(&self) -> impl Iterator<Item = &str> {
        self.ratchets.keys().map(String::as_str)
    }

    /// Process one event.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        match event {
            SessionEvent::ChannelOpened => self.handle_opened(),
            SessionEvent::FrameReceived(bytes) => self.handle_frame(&bytes),
            SessionEvent::ChannelClosed { code, reason } => self.handle_closed(code, &reason),
            SessionEvent::SendRequested { peer_id, plaintext } => {
                self.handle_send(peer_id, plaintext)
            },
            SessionEvent::Tick => self.handle_tick(),
        }
    }

    fn handle_opened(&mut self) -> Vec<SessionAction> {
        let (pending, init) = InitiatorHandshake::initiate(&self.env, &self.identity);
        self.pending_handshake = Some(pending);
        self.phase = Phase::Handshaking;
        self.next_sequence = 0;

        vec![SessionAction::SendBytes(Bytes::from(init.encode()))]
    }

    fn handle_frame(&mut self, bytes: &[u8]) -> Vec<SessionAction> {
        match self.phase {
            Phase::Idle => Vec::new(),
            Phase::Handshaking => self.handle_handshake_reply(bytes),
            Phase::Active => {
                if bytes.len() == ACK_LEN {
                    self.handle_ack(bytes)
                } else {
                    self.handle_message(bytes)
                }
            },
        }
    }

    fn handle_handshake_reply(&mut self, bytes: &[u8]) -> Vec<SessionAction> {
        let Some(pending) = self.pending_handshake.take() else {
            return vec![self.fail(SessionError::Internal("no pending handshake".to_string()))];
        };

        let reply = match ResponderReply::decode(bytes) {
            Ok(reply) => reply,
            Err(err) => return vec![self.fail(SessionError::Protocol(err))],
        };

        match pending.complete(&self.env, &reply) {
            Ok(HandshakeOutcome { ratchet, .. }) => {
                self.ratchets.insert(SERVER_PEER_ID.to_string(), ratchet);
                self.phase = Phase::Active;
                self.reconnect_delay_ms = RECONNECT_BASE_MS;

                let mut actions = vec![SessionAction::NotifyConnected];
                actions.extend(self.transmit_due());
                actions
            },
            Err(err) => vec![self.fail(err)],
        }
    }

    fn handle_ack(&mut self, bytes: &[u8]) -> Vec<SessionAction> {
        let ack = match Ack::decode(bytes) {
            Ok(ack) => ack,
            Err(err) => return vec![SessionAction::NotifyError(SessionError::Protocol(err))],
        };

        let now_ms = self.env.now_unix_ms();
        match self.queue.resolve_ack(&ack.message_id, ack.success, now_ms) {
            AckResolution::Delivered | AckResolution::Retrying => Vec::new(),
            AckResolution::Dropped { .. } => vec![SessionAction::NotifyError(
                SessionError::Internal("message dropped after retry budget".to_string()),
            )],
            // A late or duplicate ack; the waiter already resolved.
            AckResolution::UnknownId => Vec::new(),
        }
    }

    fn handle_message(&mut self, bytes: &[u8]) -> Vec<SessionAction> {
        let frame = match MessageFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => return vec![SessionAction::NotifyError(SessionError::Protocol(err))],
        };

        // Try the server ratchet first (the common case), then any other
        // installed peer. Header-key trial decryption makes a miss cheap.
        let mut order: Vec<String> = self.ratchets.keys().cloned().collect();
        order.sort_by_key(|id| (id != SERVER_PEER_ID, id.clone()));

        let mut last_error = SessionError::AuthFailure;
        for peer_id in order {
            let Some(ratchet) = self.ratchets.get_mut(&peer_id) else { continue };
            match open_message(ratchet, &frame) {
                Ok((_, plaintext)) => {
                    return vec![SessionAction::NotifyMessage { peer_id, plaintext }];
                },
                Err(SessionError::AuthFailure) => continue,
                Err(err) => {
                    last_error = err;
                    break;
                },
            }
        }

        vec![SessionAction::NotifyError(last_error)]
    }

    fn handle_send(&mut self, peer_id: String, plaintext: Vec<u8>) -> Vec<SessionAction> {
        if !self.ratchets.contains_key(&peer_id) && peer_id != SERVER_PEER_ID {
            return vec![SessionAction::NotifyError(SessionError::UnknownPeer(peer_id))];
        }

        self.queue.push(peer_id, plaintext, self.env.now_unix_ms());

        if self.phase == Phase::Active {
            self.transmit_due()
        } else {
            Vec::new()
        }
    }

    fn handle_tick(&mut self) -> Vec<SessionAction> {
        let now_ms = self.env.now_unix_ms();

        match self.phase {
            Phase::Handshaking => {
                let started = self
                    .pending_handshake
                    .as_ref()
                    .map_or(now_ms, InitiatorHandshake::started_at_ms);
                let elapsed_ms = now_ms.saturating_sub(started);
                if elapsed_ms > HANDSHAKE_DEADLINE_MS {
                    self.pending_handshake = None;
                    self.phase = Phase::Idle;
                    let err = SessionError::HandshakeTimeout { elapsed_ms };
                    let delay_ms = self.next_reconnect_delay();
                    return vec![
                        SessionAction::NotifyError(err.clone()),
                        SessionAction::CloseChannel {
                            code: err.close_code(),
                            reason: err.close_reason().to_string(),
                        },
                        SessionAction::Reconnect { delay_ms },
                    ];
                }
                Vec::new()
            },
            Phase::Active => {
                let mut actions = Vec::new();
                for _dropped in self.queue.expire_acks(now_ms) {
                    actions.push(SessionAction::NotifyError(SessionError::Internal(
                        "message dropped after retry budget".to_string(),
                    )));
                }
                actions.extend(self.transmit_due());
                actions
            },
            Phase::Idle => Vec::new(),
        }
    }

    fn handle_closed(&mut self, code: u16, _reason: &str) -> Vec<SessionAction> {
        self.phase = Phase::Idle;
        self.pending_handshake = None;
        // The handshake ratchet dies with the connection; other peers'
        // ratchets are transport-independent and survive.
        if let Some(mut ratchet) = self.ratchets.remove(SERVER_PEER_ID) {
            ratchet.destroy();
        }
        self.queue.reset_for_reconnect(self.env.now_unix_ms());

        let mut actions = vec![SessionAction::NotifyDisconnected];
        if !close_code::is_fatal(code) {
            let delay_ms = self.next_reconnect_delay();
            actions.push(SessionAction::Reconnect { delay_ms });
        }
        actions
    }

    /// Seal and emit every queue entry that is due for transmission.
    fn transmit_due(&mut self) -> Vec<SessionAction> {
        let now_ms = self.env.now_unix_ms();
        let mut actions = Vec::new();
        let mut failed: Vec<(String, SessionError)> = Vec::new();
        let mut sequence = self.next_sequence;

        for entry in self.queue.due(now_ms) {
            let Some(ratchet) = self.ratchets.get_mut(&entry.peer_id) else {
                failed.push((entry.peer_id.clone(), SessionError::UnknownPeer(entry.peer_id.clone())));
                continue;
            };

            if entry.sealed.is_none() {
                match seal_message(&self.env, ratchet, sequence, &entry.plaintext) {
                    Ok(frame) => {
                        sequence = sequence.wrapping_add(1);
                        entry.sealed = Some(SealedCopy {
                            message_id: frame.message_id,
                            bytes: Bytes::from(frame.encode()),
                        });
                    },
                    Err(err) => {
                        failed.push((entry.peer_id.clone(), err));
                        continue;
                    },
                }
            }

            if let Some(sealed) = &entry.sealed {
                entry.ack_deadline_ms = Some(now_ms + ACK_TIMEOUT_MS);
                actions.push(SessionAction::SendBytes(sealed.bytes.clone()));
            }
        }

        self.next_sequence = sequence;

        for (_, err) in failed {
            actions.push(SessionAction::NotifyError(err));
        }

        actions
    }

    fn next_reconnect_delay(&mut self) -> u64 {
        let delay = self.reconnect_delay_ms;
        self.reconnect_delay_ms = (self.reconnect_delay_ms * 2).min(RECONNECT_CAP_MS);
        delay
    }

    fn fail(&mut self, err: SessionError) -> SessionAction {
        self.phase = Phase::Idle;
        SessionAction::CloseChannel {
            code: err.close_code(),
            reason: err.close_reason().to_string(),
        }
    }
}

impl<E: Environment> std::fmt::Debug for SessionDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("phase", &self.phase)
            .field("peers", &self.ratchets.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealink_core::env::testing::TestEnv;
    use sealink_core::respond;
    use sealink_proto::InitiatorInit;

    const T0: u64 = 1_700_000_000_000;

    fn driver() -> (TestEnv, SessionDriver<TestEnv>) {
        let env = TestEnv::at(T0);
        let driver = SessionDriver::new(env.clone(), IdentityKeyPair::from_seed([42u8; 32]));
        (env, driver)
    }

    /// Run the responder side for a driver's emitted InitiatorInit and
    /// return (reply bytes, responder ratchet).
    fn respond_to(env: &TestEnv, actions: &[SessionAction]) -> (Bytes, Ratchet) {
        let SessionAction::SendBytes(init_bytes) = &actions[0] else {
            panic!("expected SendBytes, got {actions:?}");
        };
        let init = InitiatorInit::decode(init_bytes).unwrap();
        let outcome = respond(env, &init).unwrap();
        (Bytes::from(outcome.reply.encode()), outcome.ratchet)
    }

    fn connect(env: &TestEnv, driver: &mut SessionDriver<TestEnv>) -> Ratchet {
        let actions = driver.handle(SessionEvent::ChannelOpened);
        let (reply, server_ratchet) = respond_to(env, &actions);

        let actions = driver.handle(SessionEvent::FrameReceived(reply));
        assert!(actions.contains(&SessionAction::NotifyConnected));
        assert!(driver.is_active());

        server_ratchet
    }

    #[test]
    fn connect_sends_152_byte_init_and_activates() {
        let (env, mut driver) = driver();

        let actions = driver.handle(SessionEvent::ChannelOpened);
        assert_eq!(actions.len(), 1);
        let SessionAction::SendBytes(bytes) = &actions[0] else { panic!() };
        assert_eq!(bytes.len(), 152);

        let (reply, _) = respond_to(&env, &actions);
        let actions = driver.handle(SessionEvent::FrameReceived(reply));
        assert_eq!(actions, vec![SessionAction::NotifyConnected]);
    }

    #[test]
    fn send_seals_with_contiguous_sequences() {
        let (env, mut driver) = driver();
        let mut server_ratchet = connect(&env, &mut driver);

        for expected_seq in 0..3u32 {
            let actions = driver.handle(SessionEvent::SendRequested {
                peer_id: SERVER_PEER_ID.to_string(),
                plaintext: format!("m{expected_seq}").into_bytes(),
            });

            let SessionAction::SendBytes(bytes) = &actions[0] else {
                panic!("expected SendBytes, got {actions:?}");
            };
            let frame = MessageFrame::decode(bytes).unwrap();
            assert_eq!(frame.sequence, expected_seq);

            let (_, plaintext) = open_message(&mut server_ratchet, &frame).unwrap();
            assert_eq!(plaintext, format!("m{expected_seq}").into_bytes());
        }
    }

    #[test]
    fn send_before_connect_is_queued_and_flushed_on_activation() {
        let (env, mut driver) = driver();

        let actions = driver.handle(SessionEvent::SendRequested {
            peer_id: SERVER_PEER_ID.to_string(),
            plaintext: b"early".to_vec(),
        });
        assert!(actions.is_empty());
        assert_eq!(driver.queued_len(), 1);

        let actions = driver.handle(SessionEvent::ChannelOpened);
        let (reply, mut server_ratchet) = respond_to(&env, &actions);
        let actions = driver.handle(SessionEvent::FrameReceived(reply));

        // NotifyConnected plus the flushed frame.
        assert_eq!(actions.len(), 2);
        let SessionAction::SendBytes(bytes) = &actions[1] else { panic!() };
        let frame = MessageFrame::decode(bytes).unwrap();
        let (_, plaintext) = open_message(&mut server_ratchet, &frame).unwrap();
        assert_eq!(plaintext, b"early");
    }

    #[test]
    fn successful_ack_clears_the_queue() {
        let (env, mut driver) = driver();
        connect(&env, &mut driver);

        let actions = driver.handle(SessionEvent::SendRequested {
            peer_id: SERVER_PEER_ID.to_string(),
            plaintext: b"payload".to_vec(),
        });
        let SessionAction::SendBytes(bytes) = &actions[0] else { panic!() };
        let frame = MessageFrame::decode(bytes).unwrap();
        assert_eq!(driver.queued_len(), 1);

        let ack = Ack {
            message_id: frame.message_id,
            received_at_ms: env.now_unix_ms(),
            success: true,
        };
        driver.handle(SessionEvent::FrameReceived(Bytes::from(ack.encode())));
        assert_eq!(driver.queued_len(), 0);
    }

    #[test]
    fn duplicate_ack_is_harmless() {
        let (env, mut driver) = driver();
        connect(&env, &mut driver);

        let actions = driver.handle(SessionEvent::SendRequested {
            peer_id: SERVER_PEER_ID.to_string(),
            plaintext: b"payload".to_vec(),
        });
        let SessionAction::SendBytes(bytes) = &actions[0] else { panic!() };
        let frame = MessageFrame::decode(bytes).unwrap();

        let ack = Ack {
            message_id: frame.message_id,
            received_at_ms: env.now_unix_ms(),
            success: true,
        };
        driver.handle(SessionEvent::FrameReceived(Bytes::from(ack.encode())));
        let again = driver.handle(SessionEvent::FrameReceived(Bytes::from(ack.encode())));
        assert!(again.is_empty());
    }

    #[test]
    fn unacked_message_retransmits_after_timeout() {
        let (env, mut driver) = driver();
        connect(&env, &mut driver);

        let actions = driver.handle(SessionEvent::SendRequested {
            peer_id: SERVER_PEER_ID.to_string(),
            plaintext: b"payload".to_vec(),
        });
        let SessionAction::SendBytes(first) = &actions[0] else { panic!() };
        let first = first.clone();

        // Within the ack window nothing happens.
        env.advance_ms(ACK_TIMEOUT_MS - 1);
        assert!(driver.handle(SessionEvent::Tick).is_empty());

        // The deadline expires: the attempt times out and a retry is
        // scheduled one backoff later, but nothing is sent yet.
        env.advance_ms(1);
        assert!(driver.handle(SessionEvent::Tick).is_empty());

        // After the backoff the same sealed frame goes out again.
        env.advance_ms(1_000);
        let actions = driver.handle(SessionEvent::Tick);
        assert_eq!(actions, vec![SessionAction::SendBytes(first)]);
    }

    #[test]
    fn handshake_timeout_triggers_reconnect() {
        let (env, mut driver) = driver();
        driver.handle(SessionEvent::ChannelOpened);

        env.advance_ms(HANDSHAKE_DEADLINE_MS + 1);
        let actions = driver.handle(SessionEvent::Tick);

        assert!(matches!(actions[0], SessionAction::NotifyError(_)));
        assert!(matches!(actions[1], SessionAction::CloseChannel { .. }));
        assert_eq!(actions[2], SessionAction::Reconnect { delay_ms: 1_000 });
    }

    #[test]
    fn fatal_close_codes_do_not_reconnect() {
        for code in [1000u16, 1002, 1003, 1007, 1008, 1009, 1011] {
            let (env, mut driver) = driver();
            connect(&env, &mut driver);

            let actions =
                driver.handle(SessionEvent::ChannelClosed { code, reason: String::new() });
            assert_eq!(
                actions,
                vec![SessionAction::NotifyDisconnected],
                "code {code} must not reconnect"
            );
        }
    }

    #[test]
    fn abnormal_close_reconnects_with_growing_backoff() {
        let (env, mut driver) = driver();
        connect(&env, &mut driver);

        let actions =
            driver.handle(SessionEvent::ChannelClosed { code: 1006, reason: String::new() });
        assert_eq!(actions[1], SessionAction::Reconnect { delay_ms: 1_000 });

        let actions =
            driver.handle(SessionEvent::ChannelClosed { code: 1006, reason: String::new() });
        assert_eq!(actions[1], SessionAction::Reconnect { delay_ms: 2_000 });

        // A successful handshake resets the ladder.
        connect(&env, &mut driver);
        let actions =
            driver.handle(SessionEvent::ChannelClosed { code: 1006, reason: String::new() });
        assert_eq!(actions[1], SessionAction::Reconnect { delay_ms: 1_000 });
    }

    #[test]
    fn send_to_unknown_peer_errors() {
        let (env, mut driver) = driver();
        connect(&env, &mut driver);

        let actions = driver.handle(SessionEvent::SendRequested {
            peer_id: "nobody".to_string(),
            plaintext: b"x".to_vec(),
        });
        assert!(matches!(
            actions[0],
            SessionAction::NotifyError(SessionError::UnknownPeer(_))
        ));
    }

    #[test]
    fn inbound_message_from_server_invokes_observer_action() {
        let (env, mut driver) = driver();
        let mut server_ratchet = connect(&env, &mut driver);

        // The server replies through its side of the ratchet. Sequence is
        // the server channel's own counter; the client does not enforce it.
        let frame = seal_message(&env, &mut server_ratchet, 0, b"welcome").unwrap();
        let actions = driver.handle(SessionEvent::FrameReceived(Bytes::from(frame.encode())));

        assert_eq!(
            actions,
            vec![SessionAction::NotifyMessage {
                peer_id: SERVER_PEER_ID.to_string(),
                plaintext: b"welcome".to_vec(),
            }]
        );
    }

    #[test]
    fn queued_messages_reseal_after_reconnect() {
        let (env, mut driver) = driver();
        connect(&env, &mut driver);

        let actions = driver.handle(SessionEvent::SendRequested {
            peer_id: SERVER_PEER_ID.to_string(),
            plaintext: b"survivor".to_vec(),
        });
        assert!(matches!(actions[0], SessionAction::SendBytes(_)));

        // Connection dies without an ack.
        driver.handle(SessionEvent::ChannelClosed { code: 1006, reason: String::new() });
        assert_eq!(driver.queued_len(), 1);

        // New connection: the message is re-sealed with sequence 0 under
        // the fresh ratchet and decrypts on the new server side.
        let actions = driver.handle(SessionEvent::ChannelOpened);
        let (reply, mut new_server) = respond_to(&env, &actions);
        let actions = driver.handle(SessionEvent::FrameReceived(reply));

        let SessionAction::SendBytes(bytes) = &actions[1] else { panic!() };
        let frame = MessageFrame::decode(bytes).unwrap();
        assert_eq!(frame.sequence, 0);
        let (_, plaintext) = open_message(&mut new_server, &frame).unwrap();
        assert_eq!(plaintext, b"survivor");
    }
}
