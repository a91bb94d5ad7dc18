//! Session-level error kinds and their close-code mapping.
//!
//! Every error a peer can observe maps to a duplex-channel close code, and
//! the close reason strings are deliberately coarse: the relay never tells
//! a peer *why* its handshake failed beyond the code itself.

use sealink_crypto::CryptoError;
use sealink_proto::{close_code, ProtocolError};
use thiserror::Error;

/// Errors produced by session and relay logic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Inbound frame outside the configured size bounds.
    #[error("frame of {len} bytes outside bounds [{min}, {max}]")]
    SizeViolation {
        /// Observed frame length.
        len: usize,
        /// Minimum acceptable length.
        min: usize,
        /// Maximum acceptable length.
        max: usize,
    },

    /// AEAD tag or outer MAC failed to verify.
    #[error("authentication failure")]
    AuthFailure,

    /// Handshake signature did not verify.
    #[error("invalid handshake signature")]
    SignatureInvalid,

    /// Handshake timestamp outside the ±5 minute window.
    #[error("timestamp {timestamp_ms} outside tolerance of {now_ms}")]
    TimestampOutOfRange {
        /// Timestamp carried by the frame.
        timestamp_ms: u64,
        /// Receiver's clock at the check.
        now_ms: u64,
    },

    /// Handshake nonce already seen inside its TTL.
    #[error("handshake nonce replayed")]
    ReplayDetected,

    /// A rate window was exhausted.
    #[error("rate limit exceeded for {scope}")]
    RateLimitExceeded {
        /// Which limiter fired ("handshake" or "message").
        scope: &'static str,
    },

    /// Wire sequence did not match expectations.
    #[error("sequence error: expected {expected}, got {got}")]
    SequenceError {
        /// Sequence the receiver required.
        expected: u32,
        /// Sequence the frame carried.
        got: u32,
    },

    /// A ratchet chain hit its message limit.
    #[error("sending or receiving chain exhausted")]
    ChainExhausted,

    /// Skipped-key cache policy violation.
    #[error("too many skipped message keys")]
    TooManySkipped,

    /// Message from a superseded chain whose key is gone.
    #[error("old chain key missing for message {index}")]
    OldChainKeyMissing {
        /// Message number within the superseded chain.
        index: u32,
    },

    /// Initiator-side handshake deadline expired.
    #[error("handshake timed out after {elapsed_ms} ms")]
    HandshakeTimeout {
        /// Time spent waiting.
        elapsed_ms: u64,
    },

    /// Frame failed structural decoding.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No ratchet state exists for the requested peer.
    #[error("unknown peer {0}")]
    UnknownPeer(String),

    /// The duplex channel is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// Unexpected invariant break.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Close code to emit on the duplex channel for this error.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::SizeViolation { len, max, .. } => {
                if len > max {
                    close_code::TOO_BIG
                } else {
                    close_code::INVALID_FRAME
                }
            },
            Self::AuthFailure
            | Self::SequenceError { .. }
            | Self::TooManySkipped
            | Self::OldChainKeyMissing { .. }
            | Self::Protocol(_) => close_code::INVALID_FRAME,
            Self::SignatureInvalid
            | Self::TimestampOutOfRange { .. }
            | Self::ReplayDetected
            | Self::RateLimitExceeded { .. } => close_code::POLICY,
            Self::ChainExhausted | Self::Internal(_) => close_code::INTERNAL,
            Self::HandshakeTimeout { .. } | Self::UnknownPeer(_) | Self::ChannelClosed => {
                close_code::NORMAL
            },
        }
    }

    /// Coarse, non-discriminating close reason for the peer.
    ///
    /// Deliberately vaguer than [`std::fmt::Display`]: the Display text is
    /// for local logs, this string goes on the wire.
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::SizeViolation { .. } => "Frame size",
            Self::AuthFailure
            | Self::SignatureInvalid
            | Self::TimestampOutOfRange { .. }
            | Self::HandshakeTimeout { .. } => "Handshake failed",
            Self::ReplayDetected => "Replay detected",
            Self::RateLimitExceeded { .. } => "Rate limit",
            Self::SequenceError { .. } => "Sequence error",
            Self::Protocol(_) => "Invalid frame",
            Self::ChainExhausted
            | Self::TooManySkipped
            | Self::OldChainKeyMissing { .. }
            | Self::UnknownPeer(_)
            | Self::ChannelClosed
            | Self::Internal(_) => "Internal error",
        }
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthFailure => Self::AuthFailure,
            CryptoError::SignatureInvalid => Self::SignatureInvalid,
            CryptoError::ChainExhausted { .. } => Self::ChainExhausted,
            CryptoError::TooManySkipped { .. } => Self::TooManySkipped,
            CryptoError::OldChainKeyMissing { index } => Self::OldChainKeyMissing { index },
            CryptoError::InvalidKey(reason) | CryptoError::NotInitialized(reason) => {
                Self::Internal(reason.to_string())
            },
        }
    }
}
