//! Session observer capability set.

use sealink_core::SessionError;

/// Callbacks a session owner provides at construction.
///
/// The runtime invokes these from driver actions; implementations should
/// return quickly and never block.
pub trait SessionObserver: Send {
    /// A message from `peer_id` decrypted successfully.
    fn on_message(&mut self, peer_id: &str, plaintext: &[u8]);

    /// The session hit an error. Fatal errors are followed by
    /// [`on_disconnected`](Self::on_disconnected) without a reconnect.
    fn on_error(&mut self, error: &SessionError);

    /// Handshake completed; the session can send.
    fn on_connected(&mut self);

    /// The channel closed. A reconnect may follow per the close-code
    /// policy.
    fn on_disconnected(&mut self);
}

/// Observer that ignores everything; useful for relays-only tools and
/// tests that assert on actions instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_message(&mut self, _peer_id: &str, _plaintext: &[u8]) {}
    fn on_error(&mut self, _error: &SessionError) {}
    fn on_connected(&mut self) {}
    fn on_disconnected(&mut self) {}
}
