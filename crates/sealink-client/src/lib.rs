//! Sealink client session.
//!
//! The [`SessionDriver`] is the protocol state machine: it runs the
//! initiator handshake, owns per-peer ratchets, queues outbound messages
//! with ack-timeout and exponential-backoff retry, and applies the
//! close-code reconnect policy. It is Sans-IO — events in, actions out —
//! so every timing and failure path is testable without a network.
//!
//! [`SessionRuntime`] binds a driver to a duplex channel, a tick timer,
//! and a [`SessionObserver`], reconnecting through a caller-supplied
//! connector when the close-code policy allows it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event;
pub mod queue;
pub mod runtime;
pub mod session;

pub use event::{NullObserver, SessionObserver};
pub use queue::{OutboundQueue, ACK_TIMEOUT_MS, MAX_RETRIES, RETRY_BASE_MS, RETRY_CAP_MS};
pub use runtime::{Connector, SessionHandle, SessionRuntime};
pub use session::{SessionAction, SessionDriver, SessionEvent, SERVER_PEER_ID};
