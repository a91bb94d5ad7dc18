//! Duplex channel between a session and its transport.
//!
//! The protocol core consumes an ordered, length-preserving, reliable
//! duplex byte stream with out-of-band close codes. [`Duplex`] is that
//! interface; [`channel_pair`] builds a cross-wired in-memory pair used by
//! tests, the harness, and transport bindings alike. A transport binding
//! (e.g. the relay's TCP framing) holds one end and pumps the other end's
//! traffic to the network.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Capacity of each direction's in-memory buffer.
const CHANNEL_CAPACITY: usize = 64;

/// What a duplex endpoint can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A binary frame, delivered intact and in order.
    Frame(Bytes),
    /// The peer closed the channel.
    Closed {
        /// Close code (WebSocket-compatible values).
        code: u16,
        /// Coarse close reason.
        reason: String,
    },
}

/// One endpoint of a duplex channel.
///
/// Dropping an endpoint without calling [`close`](Self::close) surfaces as
/// an end-of-stream (`None`) to the peer, the same way a torn transport
/// does; the owner decides whether that is fatal.
#[derive(Debug)]
pub struct Duplex {
    tx: mpsc::Sender<ChannelEvent>,
    rx: mpsc::Receiver<ChannelEvent>,
}

impl Duplex {
    /// Send a binary frame to the peer.
    ///
    /// # Errors
    ///
    /// `Err(())`-like `ChannelSendError` if the peer is gone.
    pub async fn send(&self, frame: Bytes) -> Result<(), ChannelSendError> {
        self.tx.send(ChannelEvent::Frame(frame)).await.map_err(|_| ChannelSendError)
    }

    /// Close the channel with a code and coarse reason.
    ///
    /// Delivery is best-effort: if the peer already went away there is
    /// nobody left to tell.
    pub async fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(ChannelEvent::Closed { code, reason: reason.to_string() }).await;
    }

    /// Receive the next event. `None` means the peer endpoint was dropped.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive for drivers polled from a select loop.
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }

    /// Cloneable send-only handle to this endpoint's peer.
    ///
    /// Lets a server address many connections from one place while each
    /// connection task keeps the receiving half.
    pub fn handle(&self) -> DuplexHandle {
        DuplexHandle { tx: self.tx.clone() }
    }
}

/// Send-only handle cloned off a [`Duplex`].
#[derive(Debug, Clone)]
pub struct DuplexHandle {
    tx: mpsc::Sender<ChannelEvent>,
}

impl DuplexHandle {
    /// Send a binary frame to the peer.
    pub async fn send(&self, frame: Bytes) -> Result<(), ChannelSendError> {
        self.tx.send(ChannelEvent::Frame(frame)).await.map_err(|_| ChannelSendError)
    }

    /// Close the channel with a code and coarse reason.
    pub async fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(ChannelEvent::Closed { code, reason: reason.to_string() }).await;
    }
}

/// Error returned when sending on a dead channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSendError;

impl std::fmt::Display for ChannelSendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "duplex channel closed")
    }
}

impl std::error::Error for ChannelSendError {}

/// Build a cross-wired in-memory duplex pair.
///
/// Frames sent on one endpoint arrive on the other, in order.
pub fn channel_pair() -> (Duplex, Duplex) {
    let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);

    (Duplex { tx: a_tx, rx: a_rx }, Duplex { tx: b_tx, rx: b_rx })
}
