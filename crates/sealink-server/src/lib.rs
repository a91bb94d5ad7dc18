//! Sealink relay server.
//!
//! The relay accepts duplex channels, runs the responder handshake per
//! connection, enforces rate limits and sequence discipline, stores
//! ciphertexts for offline recipients, and emits acks — all without ever
//! holding plaintext or long-lived key material.
//!
//! # Architecture
//!
//! [`RelayDriver`] is the Sans-IO orchestrator (events in, actions out).
//! [`Server`] wraps it with the framed-TCP transport, a connection task
//! per accepted socket, and the periodic cleanup tick. The driver is the
//! unit under test; the runtime is glue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod driver;
pub mod identity;
pub mod nonce_tracker;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod transport;

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Mutex, Notify, RwLock};

pub use config::{RelayConfig, ServerConfig};
pub use driver::{LogLevel, RelayAction, RelayDriver, RelayEvent};
pub use identity::IdentityError;
pub use nonce_tracker::{NonceCheck, NonceTracker};
pub use rate_limit::RateLimiter;
pub use session::{ServerSession, SessionPhase};
pub use store::{MessageStore, StoredMessage};
pub use transport::{TcpTransport, TransportError};

use sealink_core::{ChannelEvent, Duplex, DuplexHandle, Environment, SystemEnv};

/// Cleanup tick cadence fed to the driver. The driver applies its own
/// configured interval on top.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Outbound handles for live connections.
type HandleMap = Arc<RwLock<HashMap<u64, DuplexHandle>>>;

/// Production relay runtime.
pub struct Server {
    driver: Arc<Mutex<RelayDriver<SystemEnv>>>,
    transport: TcpTransport,
    handles: HandleMap,
    env: SystemEnv,
    shutdown: Arc<Notify>,
}

/// Handle for stopping a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Server {
    /// Bind the listener and assemble the runtime.
    pub async fn bind(config: &ServerConfig) -> Result<Self, TransportError> {
        let env = SystemEnv::new();
        let transport =
            TcpTransport::bind(&config.host, config.port, config.relay.max_message_size).await?;
        let driver = RelayDriver::new(env.clone(), config.relay.clone());

        Ok(Self {
            driver: Arc::new(Mutex::new(driver)),
            transport,
            handles: Arc::new(RwLock::new(HashMap::new())),
            env,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, TransportError> {
        self.transport.local_addr()
    }

    /// Handle for shutting the server down from signal handlers.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { shutdown: Arc::clone(&self.shutdown) }
    }

    /// Accept and serve connections until shutdown.
    pub async fn run(self) -> Result<(), TransportError> {
        tracing::info!("relay listening on {}", self.transport.local_addr()?);

        let ticker = tokio::spawn(tick_loop(
            Arc::clone(&self.driver),
            Arc::clone(&self.handles),
            Arc::clone(&self.shutdown),
        ));

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok((duplex, remote_addr)) => {
                        let conn_id = random_conn_id(&self.env);
                        tokio::spawn(serve_connection(
                            conn_id,
                            remote_addr.to_string(),
                            duplex,
                            Arc::clone(&self.driver),
                            Arc::clone(&self.handles),
                        ));
                    },
                    Err(err) => {
                        tracing::error!(error = %err, "accept failed");
                    },
                },
                () = self.shutdown.notified() => break,
            }
        }

        // Stop timers, forget sessions, close the listener (by drop). Live
        // channels are closed by their transport pumps as tasks wind down.
        ticker.abort();
        self.driver.lock().await.shutdown();
        tracing::info!("relay stopped");

        Ok(())
    }
}

fn random_conn_id(env: &SystemEnv) -> u64 {
    let mut bytes = [0u8; 8];
    env.random_bytes(&mut bytes);
    u64::from_be_bytes(bytes)
}

/// Feed the driver's cleanup tick until shutdown.
async fn tick_loop(
    driver: Arc<Mutex<RelayDriver<SystemEnv>>>,
    handles: HandleMap,
    shutdown: Arc<Notify>,
) {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let actions = driver.lock().await.process(RelayEvent::Tick);
                execute_actions(actions, &handles).await;
            },
            () = shutdown.notified() => return,
        }
    }
}

/// Serve one connection: register its handle, pump events into the
/// driver, and clean up on close.
async fn serve_connection(
    conn_id: u64,
    remote_addr: String,
    mut duplex: Duplex,
    driver: Arc<Mutex<RelayDriver<SystemEnv>>>,
    handles: HandleMap,
) {
    handles.write().await.insert(conn_id, duplex.handle());

    let actions = driver
        .lock()
        .await
        .process(RelayEvent::ConnectionAccepted { conn_id, remote_addr });
    let closed = execute_actions(actions, &handles).await.contains(&conn_id);

    if !closed {
        loop {
            let event = match duplex.recv().await {
                Some(ChannelEvent::Frame(bytes)) => RelayEvent::FrameReceived { conn_id, bytes },
                Some(ChannelEvent::Closed { code, reason }) => {
                    let reason = format!("close {code}: {reason}");
                    let actions = driver
                        .lock()
                        .await
                        .process(RelayEvent::ConnectionClosed { conn_id, reason });
                    execute_actions(actions, &handles).await;
                    break;
                },
                None => {
                    let actions = driver.lock().await.process(RelayEvent::ConnectionClosed {
                        conn_id,
                        reason: "transport lost".to_string(),
                    });
                    execute_actions(actions, &handles).await;
                    break;
                },
            };

            let actions = driver.lock().await.process(event);
            if execute_actions(actions, &handles).await.contains(&conn_id) {
                break;
            }
        }
    }

    handles.write().await.remove(&conn_id);
}

/// Execute driver actions. Returns the connections that were closed.
async fn execute_actions(actions: Vec<RelayAction>, handles: &HandleMap) -> Vec<u64> {
    let mut closed = Vec::new();

    for action in actions {
        match action {
            RelayAction::Send { conn_id, bytes } => {
                let handle = handles.read().await.get(&conn_id).cloned();
                match handle {
                    Some(handle) => {
                        if handle.send(bytes).await.is_err() {
                            tracing::debug!(conn_id, "send to closed connection dropped");
                        }
                    },
                    None => tracing::debug!(conn_id, "send target not connected"),
                }
            },
            RelayAction::Close { conn_id, code, reason } => {
                let handle = handles.write().await.remove(&conn_id);
                if let Some(handle) = handle {
                    handle.close(code, &reason).await;
                }
                closed.push(conn_id);
            },
            RelayAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
        }
    }

    closed
}
