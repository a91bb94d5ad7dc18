//! Sealink protocol core.
//!
//! Everything shared between client and relay that is not pure crypto or
//! pure wire format: the environment abstraction (time, randomness, sleep),
//! the duplex-channel interface the transports bind to, the three-message
//! handshake logic, message sealing/opening, and the error kinds with their
//! close-code mapping.
//!
//! Protocol logic here is Sans-IO: functions take the current time and
//! random material through [`env::Environment`] and return values or typed
//! errors. Only the channel plumbing touches async primitives, and only
//! through `tokio::sync`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod env;
pub mod error;
pub mod handshake;
pub mod seal;

pub use channel::{channel_pair, ChannelEvent, Duplex, DuplexHandle};
pub use env::{Environment, SystemEnv};
pub use error::SessionError;
pub use handshake::{respond, HandshakeOutcome, InitiatorHandshake, ResponderOutcome};
pub use seal::{open_message, seal_message};

/// Maximum tolerated clock skew for handshake timestamps (±5 minutes).
pub const MAX_CLOCK_SKEW_MS: u64 = 5 * 60 * 1000;

/// Initiator-side deadline for completing the handshake.
pub const HANDSHAKE_DEADLINE_MS: u64 = 10_000;
