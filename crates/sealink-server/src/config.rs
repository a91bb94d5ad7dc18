//! Relay configuration.

use crate::{
    nonce_tracker::{DEFAULT_NONCE_CAPACITY, DEFAULT_NONCE_TTL_MS},
    store::{DEFAULT_MAX_STORED_MESSAGES, DEFAULT_MESSAGE_EXPIRY_MS},
};

/// Driver-level limits and windows.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Largest accepted frame, bytes.
    pub max_message_size: usize,
    /// Stored-message lifetime, milliseconds.
    pub message_expiry_ms: u64,
    /// Message rate window, milliseconds.
    pub message_rate_window_ms: u64,
    /// Messages allowed per identity per window.
    pub message_rate_max: u32,
    /// Handshakes allowed per transport address per minute.
    pub handshake_rate_per_min: u32,
    /// Concurrent connection cap.
    pub max_sessions: usize,
    /// Per-recipient stored-message cap.
    pub max_stored_messages: usize,
    /// Handshake-nonce TTL, milliseconds.
    pub nonce_ttl_ms: u64,
    /// Handshake-nonce cache capacity.
    pub nonce_capacity: usize,
    /// Cleanup and nonce-sweep cadence, milliseconds.
    pub cleanup_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1_048_576,
            message_expiry_ms: DEFAULT_MESSAGE_EXPIRY_MS,
            message_rate_window_ms: 60_000,
            message_rate_max: 100,
            handshake_rate_per_min: 10,
            max_sessions: 10_000,
            max_stored_messages: DEFAULT_MAX_STORED_MESSAGES,
            nonce_ttl_ms: DEFAULT_NONCE_TTL_MS,
            nonce_capacity: DEFAULT_NONCE_CAPACITY,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Full server configuration: bind address plus driver limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Identity keypair path.
    pub identity_key_path: String,
    /// Driver limits.
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            identity_key_path: "./data/server-identity.key".to_string(),
            relay: RelayConfig::default(),
        }
    }
}
