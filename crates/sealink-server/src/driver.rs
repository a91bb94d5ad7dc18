//! Relay driver.
//!
//! Sans-IO orchestrator for every relay decision: admission, the
//! handshake gauntlet (rate limit, replay check, responder handshake),
//! sequence discipline, acks, stored-message delivery, and the periodic
//! cleanup. Events in, actions out; the runtime in `lib.rs` does the I/O.
//!
//! Per-connection state machine:
//!
//! ```text
//! Accept ──152-byte InitiatorInit──> Handshake ──reply──> Active ──> Closed
//!    │                                  │                    │
//!    └── capacity 1008                  └── 1007/1008        └── 1007/1008/1009
//! ```

use std::collections::HashMap;

use bytes::Bytes;

use sealink_core::{handshake, Environment, SessionError};
use sealink_proto::{
    handshake::INITIATOR_INIT_LEN, Ack, InitiatorInit, MessageFrame, MIN_FRAME_LEN,
};

use crate::{
    config::RelayConfig,
    nonce_tracker::{NonceCheck, NonceTracker},
    rate_limit::RateLimiter,
    session::{ServerSession, SessionPhase},
    store::MessageStore,
};

/// Events the relay runtime feeds the driver.
#[derive(Debug)]
pub enum RelayEvent {
    /// A transport connection was accepted.
    ConnectionAccepted {
        /// Runtime-assigned connection id.
        conn_id: u64,
        /// Transport-layer remote address.
        remote_addr: String,
    },
    /// A binary frame arrived on a connection.
    FrameReceived {
        /// Source connection.
        conn_id: u64,
        /// Raw frame bytes.
        bytes: Bytes,
    },
    /// A connection went away.
    ConnectionClosed {
        /// Connection that closed.
        conn_id: u64,
        /// Transport-provided reason, for logs only.
        reason: String,
    },
    /// Periodic cleanup tick.
    Tick,
}

/// Actions the runtime executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Send bytes to a connection.
    Send {
        /// Target connection.
        conn_id: u64,
        /// Frame bytes.
        bytes: Bytes,
    },
    /// Close a connection.
    Close {
        /// Target connection.
        conn_id: u64,
        /// Close code.
        code: u16,
        /// Coarse reason.
        reason: String,
    },
    /// Emit a log line.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
}

/// Log severities carried in [`RelayAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Notable state changes.
    Info,
    /// Rejected traffic and policy hits.
    Warn,
    /// Invariant breaks.
    Error,
}

/// Sans-IO relay driver.
pub struct RelayDriver<E: Environment> {
    env: E,
    config: RelayConfig,
    sessions: HashMap<u64, ServerSession>,
    nonce_tracker: NonceTracker,
    handshake_limiter: RateLimiter,
    message_limiter: RateLimiter,
    store: MessageStore,
    last_cleanup_ms: u64,
}

impl<E: Environment> RelayDriver<E> {
    /// Create a driver with the given limits.
    pub fn new(env: E, config: RelayConfig) -> Self {
        let now_ms = env.now_unix_ms();
        Self {
            nonce_tracker: NonceTracker::new(config.nonce_ttl_ms, config.nonce_capacity),
            handshake_limiter: RateLimiter::new(60_000, config.handshake_rate_per_min),
            message_limiter: RateLimiter::new(
                config.message_rate_window_ms,
                config.message_rate_max,
            ),
            store: MessageStore::new(config.message_expiry_ms, config.max_stored_messages),
            sessions: HashMap::new(),
            last_cleanup_ms: now_ms,
            env,
            config,
        }
    }

    /// Process one event.
    pub fn process(&mut self, event: RelayEvent) -> Vec<RelayAction> {
        match event {
            RelayEvent::ConnectionAccepted { conn_id, remote_addr } => {
                self.handle_accepted(conn_id, remote_addr)
            },
            RelayEvent::FrameReceived { conn_id, bytes } => self.handle_frame(conn_id, &bytes),
            RelayEvent::ConnectionClosed { conn_id, reason } => {
                self.handle_closed(conn_id, &reason)
            },
            RelayEvent::Tick => self.handle_tick(),
        }
    }

    /// Queue a ciphertext for an offline recipient.
    ///
    /// Delivery happens when a connection authenticated as `recipient`
    /// reaches Active.
    pub fn store_message(&mut self, recipient: &str, bytes: Bytes, sequence: u32) {
        self.store.store(recipient, bytes, sequence, self.env.now_unix_ms());
    }

    /// Live connection count.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Tracked handshake nonces.
    pub fn nonce_count(&self) -> usize {
        self.nonce_tracker.len()
    }

    /// Messages queued for `recipient`.
    pub fn stored_for(&self, recipient: &str) -> usize {
        self.store.pending(recipient)
    }

    /// Identity of a connection, once authenticated.
    pub fn client_id(&self, conn_id: u64) -> Option<&str> {
        self.sessions.get(&conn_id).and_then(|session| session.client_id.as_deref())
    }

    /// Clear timers-adjacent state on shutdown.
    pub fn shutdown(&mut self) {
        self.nonce_tracker.clear();
        self.sessions.clear();
    }

    fn handle_accepted(&mut self, conn_id: u64, remote_addr: String) -> Vec<RelayAction> {
        let now_ms = self.env.now_unix_ms();

        if self.sessions.len() >= self.config.max_sessions {
            return vec![
                RelayAction::Close {
                    conn_id,
                    code: 1008,
                    reason: "Capacity".to_string(),
                },
                log(LogLevel::Warn, format!("connection {conn_id} rejected: at capacity")),
            ];
        }

        self.sessions.insert(conn_id, ServerSession::new(remote_addr, now_ms));

        vec![log(LogLevel::Debug, format!("connection {conn_id} accepted"))]
    }

    fn handle_frame(&mut self, conn_id: u64, bytes: &Bytes) -> Vec<RelayAction> {
        let Some(session) = self.sessions.get(&conn_id) else {
            return vec![log(LogLevel::Warn, format!("frame from unknown connection {conn_id}"))];
        };

        match session.phase {
            SessionPhase::Handshake => self.handle_handshake_frame(conn_id, bytes),
            SessionPhase::Active => self.handle_message_frame(conn_id, bytes),
        }
    }

    fn handle_handshake_frame(&mut self, conn_id: u64, bytes: &Bytes) -> Vec<RelayAction> {
        let now_ms = self.env.now_unix_ms();

        // The only permitted frame in this phase is a 152-byte init.
        if bytes.len() != INITIATOR_INIT_LEN {
            return self.reject(
                conn_id,
                &SessionError::SizeViolation {
                    len: bytes.len(),
                    min: INITIATOR_INIT_LEN,
                    max: INITIATOR_INIT_LEN,
                },
            );
        }

        // Rate limit by transport address: the identity is not yet proven.
        let remote_addr = match self.sessions.get(&conn_id) {
            Some(session) => session.remote_addr.clone(),
            None => return Vec::new(),
        };
        if !self.handshake_limiter.check(&remote_addr, now_ms) {
            return self.reject(conn_id, &SessionError::RateLimitExceeded { scope: "handshake" });
        }

        // Replay check on the trailing 16 bytes before any crypto.
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&bytes[INITIATOR_INIT_LEN - 16..]);
        if self.nonce_tracker.check(nonce, now_ms) == NonceCheck::Replay {
            return self.reject(conn_id, &SessionError::ReplayDetected);
        }

        let init = match InitiatorInit::decode(bytes) {
            Ok(init) => init,
            Err(err) => return self.reject(conn_id, &SessionError::Protocol(err)),
        };

        let outcome = match handshake::respond(&self.env, &init) {
            Ok(outcome) => outcome,
            Err(err) => return self.reject(conn_id, &err),
        };

        // The relay never decrypts session traffic; drop the ratchet (and
        // with it the root key material) as soon as the reply exists.
        let client_id = outcome.client_identity.party_id();
        drop(outcome.ratchet);

        let Some(session) = self.sessions.get_mut(&conn_id) else {
            return Vec::new();
        };
        session.activate(client_id.clone(), now_ms);

        let mut actions = vec![
            RelayAction::Send { conn_id, bytes: Bytes::from(outcome.reply.encode()) },
            log(LogLevel::Info, format!("connection {conn_id} authenticated as {client_id}")),
        ];

        // Deliver anything queued for this identity, in stored order.
        let pending = self.store.take(&client_id, now_ms);
        if !pending.is_empty() {
            actions.push(log(
                LogLevel::Debug,
                format!("delivering {} stored messages to {client_id}", pending.len()),
            ));
            for message in pending {
                actions.push(RelayAction::Send { conn_id, bytes: message.bytes });
            }
        }

        actions
    }

    fn handle_message_frame(&mut self, conn_id: u64, bytes: &Bytes) -> Vec<RelayAction> {
        let now_ms = self.env.now_unix_ms();

        if bytes.len() < MIN_FRAME_LEN || bytes.len() > self.config.max_message_size {
            return self.reject(
                conn_id,
                &SessionError::SizeViolation {
                    len: bytes.len(),
                    min: MIN_FRAME_LEN,
                    max: self.config.max_message_size,
                },
            );
        }

        let client_id = {
            let Some(session) = self.sessions.get_mut(&conn_id) else {
                return Vec::new();
            };
            session.last_activity_ms = now_ms;
            session.client_id.clone()
        };
        let Some(client_id) = client_id else {
            return self.reject(
                conn_id,
                &SessionError::Internal("active session without identity".to_string()),
            );
        };

        if !self.message_limiter.check(&client_id, now_ms) {
            return self.reject(conn_id, &SessionError::RateLimitExceeded { scope: "message" });
        }

        // Strict contiguous sequence on the wire.
        let sequence = match MessageFrame::peek_sequence(bytes) {
            Ok(sequence) => sequence,
            Err(err) => return self.reject(conn_id, &SessionError::Protocol(err)),
        };

        let Some(session) = self.sessions.get_mut(&conn_id) else {
            return Vec::new();
        };
        if sequence != session.expected_sequence {
            let expected = session.expected_sequence;
            return self.reject(conn_id, &SessionError::SequenceError { expected, got: sequence });
        }
        session.expected_sequence = session.expected_sequence.wrapping_add(1);

        // Ack with success=0 for a well-formed prefix whose full frame is
        // malformed; the relay cannot (and does not) decrypt either way.
        let message_id = match MessageFrame::peek_message_id(bytes) {
            Ok(message_id) => message_id,
            Err(err) => return self.reject(conn_id, &SessionError::Protocol(err)),
        };
        let success = MessageFrame::decode(bytes).is_ok();

        let ack = Ack { message_id, received_at_ms: now_ms, success };
        vec![RelayAction::Send { conn_id, bytes: Bytes::from(ack.encode()) }]
    }

    fn handle_closed(&mut self, conn_id: u64, reason: &str) -> Vec<RelayAction> {
        if self.sessions.remove(&conn_id).is_some() {
            return vec![log(
                LogLevel::Debug,
                format!("connection {conn_id} closed: {reason}"),
            )];
        }
        Vec::new()
    }

    fn handle_tick(&mut self) -> Vec<RelayAction> {
        let now_ms = self.env.now_unix_ms();
        if now_ms.saturating_sub(self.last_cleanup_ms) < self.config.cleanup_interval_ms {
            return Vec::new();
        }
        self.last_cleanup_ms = now_ms;

        self.nonce_tracker.sweep(now_ms);
        self.store.prune_expired(now_ms);
        self.handshake_limiter.gc(now_ms);
        self.message_limiter.gc(now_ms);
        self.store.shed_buckets(self.config.max_stored_messages.saturating_mul(10));

        vec![log(
            LogLevel::Debug,
            format!(
                "cleanup: {} sessions, {} nonces, {} recipients queued",
                self.sessions.len(),
                self.nonce_tracker.len(),
                self.store.recipient_count()
            ),
        )]
    }

    /// Close a connection for `err`, with the coarse wire reason.
    fn reject(&mut self, conn_id: u64, err: &SessionError) -> Vec<RelayAction> {
        self.sessions.remove(&conn_id);
        vec![
            RelayAction::Close {
                conn_id,
                code: err.close_code(),
                reason: err.close_reason().to_string(),
            },
            log(LogLevel::Warn, format!("connection {conn_id} rejected: {err}")),
        ]
    }
}

impl<E: Environment> std::fmt::Debug for RelayDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayDriver")
            .field("sessions", &self.sessions.len())
            .field("nonces", &self.nonce_tracker.len())
            .field("recipients_queued", &self.store.recipient_count())
            .finish()
    }
}

fn log(level: LogLevel, message: String) -> RelayAction {
    RelayAction::Log { level, message }
}
