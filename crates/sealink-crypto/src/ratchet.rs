//! Double-Ratchet state machine.
//!
//! One `Ratchet` instance covers one direction-pair with one peer. The root
//! key advances on every DH step; each advanced root yields exactly one
//! chain, which is why a fixed chain-derivation info string stays
//! deterministic across both endpoints.
//!
//! A DH step is two-sided: detecting a new remote ephemeral re-keys the
//! receiving chain, then rotates the local ephemeral and pre-derives the
//! next sending chain. The lazy derivation in [`Ratchet::send`] only ever
//! fires for the party that speaks first after initialization.

use std::collections::VecDeque;

use zeroize::Zeroize;

use crate::{
    chain::ChainKey,
    error::CryptoError,
    kdf,
    keys::{EphemeralKeyPair, EphemeralPublic, HeaderKey, MessageKey, RootKey},
};

/// Cap on cached skipped message keys across the whole session.
pub const MAX_SKIPPED_KEYS: usize = 1000;

/// Ratchet metadata the sender must place in the message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetHeader {
    /// Sender's current DH ratchet public key.
    pub dh_public: EphemeralPublic,
    /// Message number within the current sending chain.
    pub message_number: u32,
    /// Length of the sender's previous sending chain.
    pub previous_chain_length: u32,
}

/// Header keys an inbound encrypted header may be sealed under.
///
/// Tried in order: the current receiving chain's key, then the
/// next-chain key (a match signals a DH step), then the superseded
/// chain's key (stragglers whose message keys sit in the skipped cache).
#[derive(Debug)]
pub struct HeaderKeyCandidates {
    /// Key of the current receiving chain, if one exists.
    pub current: Option<HeaderKey>,
    /// Key the peer's next chain will use; derivable before the DH step
    /// because header keys come from the pre-advance root.
    pub next: HeaderKey,
    /// Key of the most recently superseded receiving chain.
    pub previous: Option<HeaderKey>,
}

/// A cached message key for an out-of-order message, tagged with the remote
/// ephemeral that keyed its chain.
struct SkippedKey {
    remote: [u8; 32],
    index: u32,
    key: MessageKey,
}

/// Double-Ratchet session state.
///
/// # Invariants
///
/// - `send_counter` equals the sending chain's index whenever a sending
///   chain exists; likewise for `receive_counter` outside DH-step catch-up.
/// - No two message keys are ever derived from the same (chain, index) pair.
/// - At most [`MAX_SKIPPED_KEYS`] skipped keys are cached; eviction is
///   oldest-inserted-first and zeroizes the evicted key.
pub struct Ratchet {
    root_key: RootKey,
    local_ephemeral: EphemeralKeyPair,
    /// Latest remote ephemeral we know of; target of the next lazy sending
    /// derivation.
    remote_ephemeral: Option<EphemeralPublic>,
    /// Remote ephemeral the current receiving chain is keyed to. Unset until
    /// the first inbound DH step.
    receiving_remote: Option<EphemeralPublic>,
    sending_chain: Option<ChainKey>,
    receiving_chain: Option<ChainKey>,
    /// Header key for the current sending chain.
    send_header_key: Option<HeaderKey>,
    /// Header key for the current receiving chain.
    recv_header_key: Option<HeaderKey>,
    /// Header key for the superseded receiving chain, kept for stragglers.
    prev_recv_header_key: Option<HeaderKey>,
    send_counter: u32,
    receive_counter: u32,
    /// Length of our previous sending chain; travels in outgoing headers.
    previous_send_length: u32,
    skipped: VecDeque<SkippedKey>,
}

impl Ratchet {
    /// Initialize from a handshake-derived root key.
    ///
    /// The initiator passes the responder's ephemeral public as
    /// `remote_ephemeral`; the responder passes the initiator's.
    pub fn initialize(
        root_key: RootKey,
        local_ephemeral: EphemeralKeyPair,
        remote_ephemeral: Option<EphemeralPublic>,
    ) -> Self {
        Self {
            root_key,
            local_ephemeral,
            remote_ephemeral,
            receiving_remote: None,
            sending_chain: None,
            receiving_chain: None,
            send_header_key: None,
            recv_header_key: None,
            prev_recv_header_key: None,
            send_counter: 0,
            receive_counter: 0,
            previous_send_length: 0,
            skipped: VecDeque::new(),
        }
    }

    /// Our current DH ratchet public key.
    pub fn dh_public(&self) -> EphemeralPublic {
        self.local_ephemeral.public()
    }

    /// Messages sent on the current sending chain.
    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    /// Messages consumed from the current receiving chain.
    pub fn receive_counter(&self) -> u32 {
        self.receive_counter
    }

    /// Number of cached skipped message keys.
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// Header key sealing our outgoing headers. `None` until the first
    /// sending chain exists.
    pub fn send_header_key(&self) -> Option<&HeaderKey> {
        self.send_header_key.as_ref()
    }

    /// Header keys an inbound header may be sealed under.
    pub fn header_key_candidates(&self) -> HeaderKeyCandidates {
        HeaderKeyCandidates {
            current: self.recv_header_key.clone(),
            next: HeaderKey(kdf::derive_header_key(&self.root_key)),
            previous: self.prev_recv_header_key.clone(),
        }
    }

    /// Derive the next sending message key and its header metadata.
    ///
    /// If no sending chain exists yet (first send after initialization), one
    /// is derived by advancing the root over a DH with the current remote
    /// ephemeral — the same advance the peer performs on receipt.
    ///
    /// # Errors
    ///
    /// - `CryptoError::NotInitialized` if no remote ephemeral is known.
    /// - `CryptoError::ChainExhausted` after 2^32 - 1 messages on the chain.
    pub fn send(&mut self) -> Result<(MessageKey, RatchetHeader), CryptoError> {
        if self.sending_chain.is_none() {
            let remote = self
                .remote_ephemeral
                .ok_or(CryptoError::NotInitialized("no remote ephemeral for sending chain"))?;
            self.derive_sending_chain(&remote);
        }

        let chain = match self.sending_chain.as_mut() {
            Some(chain) => chain,
            None => unreachable!("sending chain derived above"),
        };

        let key = chain.advance()?;
        self.send_counter = chain.index();

        debug_assert_eq!(self.send_counter, key.index() + 1);

        let header = RatchetHeader {
            dh_public: self.local_ephemeral.public(),
            message_number: key.index(),
            previous_chain_length: self.previous_send_length,
        };

        Ok((key, header))
    }

    /// Obtain the message key for an inbound message.
    ///
    /// `remote_dh`, `message_number`, and `previous_chain_length` come from
    /// the decoded message header. Handles, in order: cached skipped keys,
    /// DH-step detection (with old-chain catch-up), forward skips within the
    /// current chain, and the in-order case.
    ///
    /// # Errors
    ///
    /// - `CryptoError::OldChainKeyMissing` for a superseded-chain message
    ///   whose key is no longer cached.
    /// - `CryptoError::TooManySkipped` if a skip would exceed the cache cap.
    /// - `CryptoError::ChainExhausted` at the 2^32 - 1 chain limit.
    pub fn recv(
        &mut self,
        remote_dh: &EphemeralPublic,
        message_number: u32,
        previous_chain_length: u32,
    ) -> Result<MessageKey, CryptoError> {
        if let Some(key) = self.take_skipped(remote_dh, message_number) {
            return Ok(key);
        }

        let step_needed = match &self.receiving_remote {
            Some(current) => current != remote_dh,
            None => true,
        };

        if step_needed {
            self.dh_step(remote_dh, previous_chain_length)?;
        }

        let chain_index = match self.receiving_chain.as_ref() {
            Some(chain) => chain.index(),
            None => unreachable!("dh_step installs a receiving chain"),
        };

        if message_number < chain_index {
            // The key was derived and consumed (or evicted) earlier; a
            // replayed or long-lost message cannot be recovered.
            return Err(CryptoError::OldChainKeyMissing { index: message_number });
        }

        if message_number > chain_index {
            self.skip_current_chain(message_number)?;
        }

        let chain = match self.receiving_chain.as_mut() {
            Some(chain) => chain,
            None => unreachable!("receiving chain checked above"),
        };

        let key = chain.advance()?;
        self.receive_counter = chain.index();

        debug_assert_eq!(key.index(), message_number);

        Ok(key)
    }

    /// Zeroize every key byte reachable from this state.
    ///
    /// Also runs on drop; callers invoke it explicitly when tearing down a
    /// session so lifetimes do not dictate hygiene.
    pub fn destroy(&mut self) {
        self.root_key = RootKey::from_bytes([0u8; 32]);
        self.sending_chain = None;
        self.receiving_chain = None;
        self.send_header_key = None;
        self.recv_header_key = None;
        self.prev_recv_header_key = None;
        while let Some(mut entry) = self.skipped.pop_front() {
            entry.key.zeroize();
        }
        // The ephemeral secret zeroizes when the pair drops; replace it with
        // a throwaway so the live state no longer references it.
        self.local_ephemeral = EphemeralKeyPair::from_seed([0u8; 32]);
        self.remote_ephemeral = None;
        self.receiving_remote = None;
        self.send_counter = 0;
        self.receive_counter = 0;
        self.previous_send_length = 0;
    }

    /// Perform the two-sided DH step for a newly seen remote ephemeral.
    fn dh_step(
        &mut self,
        remote_dh: &EphemeralPublic,
        previous_chain_length: u32,
    ) -> Result<(), CryptoError> {
        // Catch up the superseded receiving chain so its undelivered keys
        // stay available through the skipped-key cache.
        if self.receiving_chain.is_some() {
            self.skip_current_chain(previous_chain_length)?;
        }

        // Receiving side: advance the root over DH(local, new remote) and
        // key the new receiving chain to the new remote ephemeral. The
        // chain's header key comes from the pre-advance root.
        self.prev_recv_header_key = self.recv_header_key.take();
        self.recv_header_key = Some(HeaderKey(kdf::derive_header_key(&self.root_key)));

        let shared = self.local_ephemeral.diffie_hellman(remote_dh);
        self.root_key = kdf::advance_root(&self.root_key, &shared);
        drop(shared);

        self.receiving_chain = Some(ChainKey::new(kdf::derive_chain(&self.root_key)));
        self.receiving_remote = Some(*remote_dh);
        self.remote_ephemeral = Some(*remote_dh);
        self.receive_counter = 0;

        // Sending side: rotate our ephemeral and pre-derive the next sending
        // chain so replies ratchet forward immediately.
        self.previous_send_length = self.sending_chain.as_ref().map_or(0, ChainKey::index);
        self.rotate_local_ephemeral();
        self.derive_sending_chain(remote_dh);
        self.send_counter = 0;

        Ok(())
    }

    /// Advance the root over DH(local, remote) and install a fresh sending
    /// chain, with its header key taken from the pre-advance root.
    fn derive_sending_chain(&mut self, remote: &EphemeralPublic) {
        self.send_header_key = Some(HeaderKey(kdf::derive_header_key(&self.root_key)));

        let shared = self.local_ephemeral.diffie_hellman(remote);
        self.root_key = kdf::advance_root(&self.root_key, &shared);
        drop(shared);

        self.sending_chain = Some(ChainKey::new(kdf::derive_chain(&self.root_key)));
    }

    fn rotate_local_ephemeral(&mut self) {
        let mut seed = [0u8; 32];
        crate::primitives::os_random_bytes(&mut seed);
        self.local_ephemeral = EphemeralKeyPair::from_seed(seed);
        seed.zeroize();
    }

    /// Derive and cache keys for indices `[chain.index, target)` on the
    /// current receiving chain.
    fn skip_current_chain(&mut self, target: u32) -> Result<(), CryptoError> {
        let (chain_index, remote) = match (&self.receiving_chain, &self.receiving_remote) {
            (Some(chain), Some(remote)) => (chain.index(), remote.to_bytes()),
            // No receiving chain yet means nothing to skip: the very first
            // inbound DH step starts at index 0.
            _ => return Ok(()),
        };

        if target <= chain_index {
            return Ok(());
        }

        let span = target - chain_index;
        if span as usize > MAX_SKIPPED_KEYS {
            return Err(CryptoError::TooManySkipped {
                requested: span,
                cap: MAX_SKIPPED_KEYS as u32,
            });
        }

        let chain = match self.receiving_chain.as_mut() {
            Some(chain) => chain,
            None => unreachable!("checked above"),
        };

        for _ in 0..span {
            let key = chain.advance()?;
            let index = key.index();
            if self.skipped.len() >= MAX_SKIPPED_KEYS {
                if let Some(mut oldest) = self.skipped.pop_front() {
                    oldest.key.zeroize();
                }
            }
            self.skipped.push_back(SkippedKey { remote, index, key });
        }

        self.receive_counter = chain.index();

        Ok(())
    }

    /// Remove and return a cached key for `(remote_dh, index)`, if present.
    fn take_skipped(&mut self, remote_dh: &EphemeralPublic, index: u32) -> Option<MessageKey> {
        let remote = remote_dh.to_bytes();
        let pos = self
            .skipped
            .iter()
            .position(|entry| entry.index == index && entry.remote == remote)?;

        self.skipped.remove(pos).map(|entry| entry.key)
    }
}

impl Drop for Ratchet {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Ratchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ratchet")
            .field("send_counter", &self.send_counter)
            .field("receive_counter", &self.receive_counter)
            .field("skipped", &self.skipped.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_root;
    use crate::keys::SharedSecret;

    /// Build an initialized ratchet pair sharing one root key, as a
    /// completed handshake would leave them.
    fn pair() -> (Ratchet, Ratchet) {
        let initiator_eph = EphemeralKeyPair::from_seed([1u8; 32]);
        let responder_eph = EphemeralKeyPair::from_seed([2u8; 32]);
        let root = derive_root(&SharedSecret([3u8; 32]));

        let initiator = Ratchet::initialize(
            root.clone(),
            EphemeralKeyPair::from_seed([1u8; 32]),
            Some(responder_eph.public()),
        );
        let responder =
            Ratchet::initialize(root, responder_eph, Some(initiator_eph.public()));

        (initiator, responder)
    }

    #[test]
    fn first_message_keys_agree() {
        let (mut alice, mut bob) = pair();

        let (send_key, header) = alice.send().unwrap();
        let recv_key = bob
            .recv(&header.dh_public, header.message_number, header.previous_chain_length)
            .unwrap();

        assert_eq!(send_key.enc_key(), recv_key.enc_key());
        assert_eq!(send_key.mac_key(), recv_key.mac_key());
        assert_eq!(send_key.index(), 0);
    }

    #[test]
    fn counters_track_chain_indices() {
        let (mut alice, mut bob) = pair();

        for expected in 1..=5u32 {
            let (_, header) = alice.send().unwrap();
            assert_eq!(alice.send_counter(), expected);

            bob.recv(&header.dh_public, header.message_number, header.previous_chain_length)
                .unwrap();
            assert_eq!(bob.receive_counter(), expected);
        }
    }

    #[test]
    fn conversation_ratchets_across_direction_changes() {
        let (mut alice, mut bob) = pair();

        for round in 0..4 {
            let (ka, ha) = alice.send().unwrap();
            let kb = bob.recv(&ha.dh_public, ha.message_number, ha.previous_chain_length).unwrap();
            assert_eq!(ka.enc_key(), kb.enc_key(), "round {round} alice->bob");

            let (kb, hb) = bob.send().unwrap();
            let ka = alice
                .recv(&hb.dh_public, hb.message_number, hb.previous_chain_length)
                .unwrap();
            assert_eq!(kb.enc_key(), ka.enc_key(), "round {round} bob->alice");
        }
    }

    #[test]
    fn reply_uses_a_fresh_dh_public() {
        let (mut alice, mut bob) = pair();

        let (_, first) = alice.send().unwrap();
        bob.recv(&first.dh_public, first.message_number, first.previous_chain_length).unwrap();

        let (_, reply) = bob.send().unwrap();
        assert_ne!(reply.dh_public, first.dh_public);

        let (_, second) = alice.send().unwrap();
        assert_eq!(second.dh_public, first.dh_public, "no inbound step, same chain");
    }

    #[test]
    fn out_of_order_within_chain_uses_skipped_cache() {
        let (mut alice, mut bob) = pair();

        let mut sent = Vec::new();
        for _ in 0..5 {
            sent.push(alice.send().unwrap());
        }

        // Deliver 0, then 4, then 1..=3.
        let deliver = |bob: &mut Ratchet, (key, header): &(MessageKey, RatchetHeader)| {
            let got = bob
                .recv(&header.dh_public, header.message_number, header.previous_chain_length)
                .unwrap();
            assert_eq!(got.enc_key(), key.enc_key());
        };

        deliver(&mut bob, &sent[0]);
        deliver(&mut bob, &sent[4]);
        assert_eq!(bob.skipped_len(), 3);

        deliver(&mut bob, &sent[1]);
        deliver(&mut bob, &sent[2]);
        deliver(&mut bob, &sent[3]);
        assert_eq!(bob.skipped_len(), 0);
    }

    #[test]
    fn duplicate_delivery_is_rejected() {
        let (mut alice, mut bob) = pair();

        let (_, header) = alice.send().unwrap();
        bob.recv(&header.dh_public, header.message_number, header.previous_chain_length).unwrap();

        assert!(matches!(
            bob.recv(&header.dh_public, header.message_number, header.previous_chain_length),
            Err(CryptoError::OldChainKeyMissing { index: 0 })
        ));
    }

    #[test]
    fn skip_beyond_cap_is_refused() {
        let (mut alice, mut bob) = pair();

        let (_, header) = alice.send().unwrap();

        let result = bob.recv(&header.dh_public, MAX_SKIPPED_KEYS as u32 + 5, 0);
        assert!(matches!(result, Err(CryptoError::TooManySkipped { .. })));
    }

    #[test]
    fn old_chain_messages_recovered_across_dh_step() {
        let (mut alice, mut bob) = pair();

        // Alice sends three; bob only receives the first.
        let m0 = alice.send().unwrap();
        let m1 = alice.send().unwrap();
        let m2 = alice.send().unwrap();
        bob.recv(&m0.1.dh_public, m0.1.message_number, m0.1.previous_chain_length).unwrap();

        // Bob replies; alice's next send runs on a fresh chain with a new
        // DH public and previous_chain_length = 3.
        let (_, reply) = bob.send().unwrap();
        alice.recv(&reply.dh_public, reply.message_number, reply.previous_chain_length).unwrap();
        let m3 = alice.send().unwrap();
        assert_eq!(m3.1.previous_chain_length, 3);
        assert_eq!(m3.1.message_number, 0);

        // The new-chain message arrives first; the stragglers decrypt from
        // the skipped cache afterwards.
        let k3 = bob.recv(&m3.1.dh_public, m3.1.message_number, m3.1.previous_chain_length).unwrap();
        assert_eq!(k3.enc_key(), m3.0.enc_key());
        assert_eq!(bob.skipped_len(), 2);

        let k1 = bob.recv(&m1.1.dh_public, m1.1.message_number, m1.1.previous_chain_length).unwrap();
        let k2 = bob.recv(&m2.1.dh_public, m2.1.message_number, m2.1.previous_chain_length).unwrap();
        assert_eq!(k1.enc_key(), m1.0.enc_key());
        assert_eq!(k2.enc_key(), m2.0.enc_key());
        assert_eq!(bob.skipped_len(), 0);
    }

    #[test]
    fn destroy_clears_counters_and_cache() {
        let (mut alice, mut bob) = pair();

        let sent: Vec<_> = (0..4).map(|_| alice.send().unwrap()).collect();
        bob.recv(&sent[3].1.dh_public, 3, 0).unwrap();
        assert_eq!(bob.skipped_len(), 3);

        bob.destroy();
        assert_eq!(bob.skipped_len(), 0);
        assert_eq!(bob.receive_counter(), 0);
    }

    #[test]
    fn header_keys_line_up_across_peers() {
        let (mut alice, mut bob) = pair();

        // Before any traffic, bob's "next" candidate is the key alice's
        // first chain will seal headers under.
        let expected = bob.header_key_candidates().next;
        let (_, header) = alice.send().unwrap();
        assert_eq!(alice.send_header_key().unwrap(), &expected);

        // After the step, that key is bob's "current".
        bob.recv(&header.dh_public, header.message_number, header.previous_chain_length).unwrap();
        let candidates = bob.header_key_candidates();
        assert_eq!(candidates.current.as_ref().unwrap(), &expected);

        // Bob's reply chain header key is what alice now predicts as next.
        let alice_next = alice.header_key_candidates().next;
        let (_, reply) = bob.send().unwrap();
        assert_eq!(bob.send_header_key().unwrap(), &alice_next);

        // After alice's step, her superseded-chain slot is still empty (no
        // receiving chain existed), and the new current matches.
        alice.recv(&reply.dh_public, reply.message_number, reply.previous_chain_length).unwrap();
        assert_eq!(alice.header_key_candidates().current.as_ref().unwrap(), &alice_next);
    }

    #[test]
    fn superseded_chain_header_key_is_retained() {
        let (mut alice, mut bob) = pair();

        let (_, first) = alice.send().unwrap();
        bob.recv(&first.dh_public, first.message_number, first.previous_chain_length).unwrap();
        let old_current = bob.header_key_candidates().current.unwrap();

        // A reply and a fresh alice chain supersede bob's receiving chain.
        let (_, reply) = bob.send().unwrap();
        alice.recv(&reply.dh_public, reply.message_number, reply.previous_chain_length).unwrap();
        let (_, fresh) = alice.send().unwrap();
        bob.recv(&fresh.dh_public, fresh.message_number, fresh.previous_chain_length).unwrap();

        assert_eq!(bob.header_key_candidates().previous.unwrap(), old_current);
    }

    #[test]
    fn send_without_remote_fails() {
        let root = derive_root(&SharedSecret([9u8; 32]));
        let mut ratchet =
            Ratchet::initialize(root, EphemeralKeyPair::from_seed([4u8; 32]), None);

        assert!(matches!(ratchet.send(), Err(CryptoError::NotInitialized(_))));
    }
}
