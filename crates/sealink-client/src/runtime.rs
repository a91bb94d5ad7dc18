//! Tokio runtime binding for the session driver.
//!
//! Owns the duplex channel, a tick timer, and the observer; executes
//! driver actions and re-dials through the caller's connector when the
//! close-code policy schedules a reconnect.

use std::{future::Future, pin::Pin, time::Duration};

use tokio::sync::mpsc;

use sealink_core::{ChannelEvent, Duplex, Environment, SessionError};
use sealink_proto::close_code;

use crate::{
    event::SessionObserver,
    session::{SessionAction, SessionDriver, SessionEvent},
};

/// Driver tick cadence. Fine enough to hit 5-second ack deadlines within
/// a few percent.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Factory the runtime calls for each connection attempt.
pub type Connector =
    Box<dyn FnMut() -> Pin<Box<dyn Future<Output = Result<Duplex, SessionError>> + Send>> + Send>;

/// Commands accepted from a [`SessionHandle`].
#[derive(Debug)]
enum Command {
    Send { peer_id: String, plaintext: Vec<u8> },
    Shutdown,
}

/// Cloneable handle for submitting work to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Queue `plaintext` for delivery to `peer_id`.
    pub async fn send(&self, peer_id: &str, plaintext: Vec<u8>) -> Result<(), SessionError> {
        self.tx
            .send(Command::Send { peer_id: peer_id.to_string(), plaintext })
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Shut the session down with a normal close.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

/// Runs a [`SessionDriver`] against real I/O.
pub struct SessionRuntime<E: Environment, O: SessionObserver> {
    driver: SessionDriver<E>,
    observer: O,
    connector: Connector,
    env: E,
    commands: mpsc::Receiver<Command>,
}

impl<E: Environment, O: SessionObserver> SessionRuntime<E, O> {
    /// Build a runtime and its command handle.
    pub fn new(
        driver: SessionDriver<E>,
        observer: O,
        connector: Connector,
        env: E,
    ) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::channel(64);
        (Self { driver, observer, connector, env, commands }, SessionHandle { tx })
    }

    /// Run until shut down or a fatal close ends the session.
    pub async fn run(mut self) {
        loop {
            let duplex = match (self.connector)().await {
                Ok(duplex) => duplex,
                Err(err) => {
                    self.observer.on_error(&err);
                    self.env.sleep(Duration::from_millis(1_000)).await;
                    continue;
                },
            };

            match self.drive_connection(duplex).await {
                ConnectionEnd::Reconnect { delay_ms } => {
                    self.env.sleep(Duration::from_millis(delay_ms)).await;
                },
                ConnectionEnd::Finished => return,
            }
        }
    }

    /// Drive one connection to completion.
    async fn drive_connection(&mut self, mut duplex: Duplex) -> ConnectionEnd {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let actions = self.driver.handle(SessionEvent::ChannelOpened);
        if let Some(end) = self.apply(actions, &duplex).await {
            return end;
        }

        loop {
            let actions = tokio::select! {
                event = duplex.recv() => match event {
                    Some(ChannelEvent::Frame(bytes)) => {
                        self.driver.handle(SessionEvent::FrameReceived(bytes))
                    },
                    Some(ChannelEvent::Closed { code, reason }) => {
                        tracing::debug!(code, %reason, "channel closed by peer");
                        let actions =
                            self.driver.handle(SessionEvent::ChannelClosed { code, reason });
                        return self.apply(actions, &duplex).await.unwrap_or(ConnectionEnd::Finished);
                    },
                    None => {
                        // Torn transport: treat as abnormal closure.
                        let actions = self.driver.handle(SessionEvent::ChannelClosed {
                            code: 1006,
                            reason: "transport lost".to_string(),
                        });
                        return self.apply(actions, &duplex).await.unwrap_or(ConnectionEnd::Finished);
                    },
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send { peer_id, plaintext }) => {
                        self.driver.handle(SessionEvent::SendRequested { peer_id, plaintext })
                    },
                    Some(Command::Shutdown) | None => {
                        duplex.close(close_code::NORMAL, "Closing").await;
                        return ConnectionEnd::Finished;
                    },
                },
                _ = tick.tick() => self.driver.handle(SessionEvent::Tick),
            };

            if let Some(end) = self.apply(actions, &duplex).await {
                return end;
            }
        }
    }

    /// Execute driver actions. Returns `Some` when the connection ended.
    async fn apply(
        &mut self,
        actions: Vec<SessionAction>,
        duplex: &Duplex,
    ) -> Option<ConnectionEnd> {
        let mut end = None;

        for action in actions {
            match action {
                SessionAction::SendBytes(bytes) => {
                    if duplex.send(bytes).await.is_err() {
                        tracing::debug!("send on closed channel dropped");
                    }
                },
                SessionAction::CloseChannel { code, reason } => {
                    duplex.close(code, &reason).await;
                    end.get_or_insert(ConnectionEnd::Finished);
                },
                SessionAction::Reconnect { delay_ms } => {
                    end = Some(ConnectionEnd::Reconnect { delay_ms });
                },
                SessionAction::NotifyMessage { peer_id, plaintext } => {
                    self.observer.on_message(&peer_id, &plaintext);
                },
                SessionAction::NotifyError(err) => {
                    tracing::warn!(error = %err, "session error");
                    self.observer.on_error(&err);
                },
                SessionAction::NotifyConnected => self.observer.on_connected(),
                SessionAction::NotifyDisconnected => self.observer.on_disconnected(),
            }
        }

        end
    }
}

/// How a connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    /// Dial again after the backoff delay.
    Reconnect {
        /// Delay before the next attempt.
        delay_ms: u64,
    },
    /// The session is done; do not reconnect.
    Finished,
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use sealink_core::{channel_pair, respond, SystemEnv};
    use sealink_crypto::IdentityKeyPair;
    use sealink_proto::{Ack, InitiatorInit, MessageFrame};

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingObserver {
        messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        connected: Arc<Mutex<u32>>,
    }

    impl SessionObserver for RecordingObserver {
        fn on_message(&mut self, peer_id: &str, plaintext: &[u8]) {
            self.messages.lock().unwrap().push((peer_id.to_string(), plaintext.to_vec()));
        }
        fn on_error(&mut self, _error: &SessionError) {}
        fn on_connected(&mut self) {
            *self.connected.lock().unwrap() += 1;
        }
        fn on_disconnected(&mut self) {}
    }

    /// Minimal in-process responder: handshake, then ack every frame.
    async fn fake_relay(mut duplex: Duplex, env: SystemEnv) {
        let Some(ChannelEvent::Frame(bytes)) = duplex.recv().await else { return };
        let init = InitiatorInit::decode(&bytes).unwrap();
        let outcome = respond(&env, &init).unwrap();
        duplex.send(Bytes::from(outcome.reply.encode())).await.unwrap();

        while let Some(ChannelEvent::Frame(bytes)) = duplex.recv().await {
            if let Ok(message_id) = MessageFrame::peek_message_id(&bytes) {
                let ack =
                    Ack { message_id, received_at_ms: env.now_unix_ms(), success: true };
                if duplex.send(Bytes::from(ack.encode())).await.is_err() {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn runtime_connects_and_delivers_acked_sends() {
        let env = SystemEnv::new();
        let driver = SessionDriver::new(env.clone(), IdentityKeyPair::from_seed([1u8; 32]));
        let observer = RecordingObserver::default();
        let connected = observer.connected.clone();

        let relay_env = env.clone();
        let connector: Connector = Box::new(move || {
            let relay_env = relay_env.clone();
            Box::pin(async move {
                let (client_end, relay_end) = channel_pair();
                tokio::spawn(fake_relay(relay_end, relay_env));
                Ok(client_end)
            })
        });

        let (runtime, handle) = SessionRuntime::new(driver, observer, connector, env);
        let task = tokio::spawn(runtime.run());

        // Give the handshake a moment, then send and shut down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.send("server", b"hello".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        task.await.unwrap();
        assert_eq!(*connected.lock().unwrap(), 1);
    }
}
