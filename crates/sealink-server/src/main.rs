//! Sealink relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:8080, identity at ./data/server-identity.key
//! sealink-server
//!
//! # Everything is also settable from the environment
//! PORT=9000 MAX_SESSIONS=500 sealink-server
//! ```

use std::path::Path;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sealink_core::SystemEnv;
use sealink_server::{identity, RelayConfig, Server, ServerConfig};

/// Sealink end-to-end encrypted message relay.
#[derive(Parser, Debug)]
#[command(name = "sealink-server")]
#[command(about = "Sealink message relay")]
#[command(version)]
struct Args {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Largest accepted frame, bytes
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value_t = 1_048_576)]
    max_message_size: usize,

    /// Stored-message lifetime, milliseconds
    #[arg(long, env = "MESSAGE_EXPIRY", default_value_t = 7 * 24 * 60 * 60 * 1000)]
    message_expiry: u64,

    /// Message rate window, milliseconds
    #[arg(long, env = "MESSAGE_RATE_WINDOW", default_value_t = 60_000)]
    message_rate_window: u64,

    /// Messages allowed per identity per window
    #[arg(long, env = "MESSAGE_RATE_MAX", default_value_t = 100)]
    message_rate_max: u32,

    /// Handshakes allowed per address per minute
    #[arg(long, env = "HANDSHAKE_RATE_PER_MIN", default_value_t = 10)]
    handshake_rate_per_min: u32,

    /// Concurrent connection cap
    #[arg(long, env = "MAX_SESSIONS", default_value_t = 10_000)]
    max_sessions: usize,

    /// Per-recipient stored-message cap
    #[arg(long, env = "MAX_STORED_MESSAGES", default_value_t = 10_000)]
    max_stored_messages: usize,

    /// Handshake-nonce TTL, milliseconds
    #[arg(long, env = "NONCE_TTL", default_value_t = 300_000)]
    nonce_ttl: u64,

    /// Handshake-nonce cache capacity
    #[arg(long, env = "NONCE_CAPACITY", default_value_t = 100_000)]
    nonce_capacity: usize,

    /// Identity keypair path
    #[arg(long, env = "SERVER_IDENTITY_KEY_PATH", default_value = "./data/server-identity.key")]
    server_identity_key_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            identity_key_path: self.server_identity_key_path,
            relay: RelayConfig {
                max_message_size: self.max_message_size,
                message_expiry_ms: self.message_expiry,
                message_rate_window_ms: self.message_rate_window,
                message_rate_max: self.message_rate_max,
                handshake_rate_per_min: self.handshake_rate_per_min,
                max_sessions: self.max_sessions,
                max_stored_messages: self.max_stored_messages,
                nonce_ttl_ms: self.nonce_ttl,
                nonce_capacity: self.nonce_capacity,
                ..RelayConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.into_config();
    let env = SystemEnv::new();

    // The identity anchors first-use pinning; the relay itself never signs
    // session traffic with it.
    let server_identity = identity::load_or_create(&env, Path::new(&config.identity_key_path))?;
    tracing::info!("server identity: {}", server_identity.public().party_id());

    let server = Server::bind(&config).await?;
    tracing::info!("listening on {}", server.local_addr()?);

    let handle = server.handle();
    tokio::spawn(async move {
        wait_for_termination().await;
        tracing::info!("shutdown signal received");
        handle.shutdown();
    });

    server.run().await?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
