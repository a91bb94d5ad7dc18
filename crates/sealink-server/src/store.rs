//! Bounded store for offline recipients' ciphertexts.
//!
//! The relay cannot decrypt what it stores; entries are opaque bytes
//! tagged with the sequence the sender assigned. Buckets are per
//! recipient, capped, and expire on the cleanup tick.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

/// Default message expiry: 7 days.
pub const DEFAULT_MESSAGE_EXPIRY_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Default per-recipient message cap.
pub const DEFAULT_MAX_STORED_MESSAGES: usize = 10_000;

/// One stored ciphertext.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Opaque frame bytes as the sender produced them.
    pub bytes: Bytes,
    /// Sequence the sender assigned; delivery preserves stored order.
    pub sequence: u32,
    /// When the relay stored the message.
    pub stored_at_ms: u64,
    /// When the message becomes eligible for pruning.
    pub expires_at_ms: u64,
}

/// Per-recipient bounded ciphertext buffers.
#[derive(Debug)]
pub struct MessageStore {
    buckets: HashMap<String, VecDeque<StoredMessage>>,
    expiry_ms: u64,
    per_recipient_cap: usize,
}

impl MessageStore {
    /// Create a store with the given expiry and per-recipient cap.
    pub fn new(expiry_ms: u64, per_recipient_cap: usize) -> Self {
        Self { buckets: HashMap::new(), expiry_ms, per_recipient_cap }
    }

    /// Queue `bytes` for `recipient`. Over-cap inserts drop the oldest
    /// stored message first.
    pub fn store(&mut self, recipient: &str, bytes: Bytes, sequence: u32, now_ms: u64) {
        let bucket = self.buckets.entry(recipient.to_string()).or_default();

        if bucket.len() >= self.per_recipient_cap {
            bucket.pop_front();
        }

        bucket.push_back(StoredMessage {
            bytes,
            sequence,
            stored_at_ms: now_ms,
            expires_at_ms: now_ms + self.expiry_ms,
        });
    }

    /// Remove and return `recipient`'s pending messages in stored order,
    /// skipping any that expired.
    pub fn take(&mut self, recipient: &str, now_ms: u64) -> Vec<StoredMessage> {
        let Some(bucket) = self.buckets.remove(recipient) else {
            return Vec::new();
        };

        bucket.into_iter().filter(|message| message.expires_at_ms > now_ms).collect()
    }

    /// Messages currently queued for `recipient`.
    pub fn pending(&self, recipient: &str) -> usize {
        self.buckets.get(recipient).map_or(0, VecDeque::len)
    }

    /// Recipients with queued messages.
    pub fn recipient_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop expired messages and empty buckets.
    pub fn prune_expired(&mut self, now_ms: u64) {
        for bucket in self.buckets.values_mut() {
            bucket.retain(|message| message.expires_at_ms > now_ms);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
    }

    /// If recipient count exceeds `max_recipients`, drop the oldest half
    /// of the buckets (by most recent store time).
    pub fn shed_buckets(&mut self, max_recipients: usize) {
        if self.buckets.len() <= max_recipients {
            return;
        }

        let mut order: Vec<(String, u64)> = self
            .buckets
            .iter()
            .map(|(recipient, bucket)| {
                let last = bucket.back().map_or(0, |message| message.stored_at_ms);
                (recipient.clone(), last)
            })
            .collect();
        order.sort_by_key(|(_, last)| *last);

        let drop_count = self.buckets.len() / 2;
        for (recipient, _) in order.into_iter().take(drop_count) {
            self.buckets.remove(&recipient);
        }
    }
}
