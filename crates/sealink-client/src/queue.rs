//! Outbound message queue with retry bookkeeping.
//!
//! Messages are queued as plaintext and sealed at first transmission, so a
//! reconnect (which rekeys the session and resets the channel sequence)
//! can re-seal survivors instead of replaying frames the new relay state
//! would reject.

use bytes::Bytes;

/// Ack timeout per transmission attempt.
pub const ACK_TIMEOUT_MS: u64 = 5_000;

/// Base retry delay; doubles per attempt.
pub const RETRY_BASE_MS: u64 = 1_000;

/// Retry delay ceiling.
pub const RETRY_CAP_MS: u64 = 60_000;

/// Attempts before a message is dropped.
pub const MAX_RETRIES: u32 = 10;

/// A message sealed for one transmission attempt.
#[derive(Debug, Clone)]
pub struct SealedCopy {
    /// Message id of the sealed frame, correlating acks.
    pub message_id: [u8; 16],
    /// Encoded frame bytes for retransmission.
    pub bytes: Bytes,
}

/// One queued outbound message.
#[derive(Debug)]
pub struct QueuedMessage {
    /// Destination peer.
    pub peer_id: String,
    /// Plaintext payload, kept until acked so reconnects can re-seal.
    pub plaintext: Vec<u8>,
    /// Current sealed form, if transmitted on the live connection.
    pub sealed: Option<SealedCopy>,
    /// Transmission attempts so far.
    pub retry_count: u32,
    /// Earliest time of the next transmission attempt.
    pub next_retry_ms: u64,
    /// Ack deadline for the in-flight attempt, if one is outstanding.
    pub ack_deadline_ms: Option<u64>,
}

impl QueuedMessage {
    /// Exponential backoff delay for the current retry count.
    pub fn backoff_ms(&self) -> u64 {
        let factor = 1u64 << self.retry_count.min(16);
        (RETRY_BASE_MS.saturating_mul(factor)).min(RETRY_CAP_MS)
    }
}

/// FIFO of outbound messages awaiting transmission or acknowledgment.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: Vec<QueuedMessage>,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue a new message, ready for immediate transmission.
    pub fn push(&mut self, peer_id: String, plaintext: Vec<u8>, now_ms: u64) {
        self.entries.push(QueuedMessage {
            peer_id,
            plaintext,
            sealed: None,
            retry_count: 0,
            next_retry_ms: now_ms,
            ack_deadline_ms: None,
        });
    }

    /// Entries due for a transmission attempt: not in flight and past
    /// their retry time.
    pub fn due(&mut self, now_ms: u64) -> impl Iterator<Item = &mut QueuedMessage> {
        self.entries
            .iter_mut()
            .filter(move |entry| entry.ack_deadline_ms.is_none() && entry.next_retry_ms <= now_ms)
    }

    /// Resolve an ack by message id. Returns the entry if it was found.
    ///
    /// On success the entry is removed; on failure it is scheduled for
    /// retry and `None` is returned unless the retry budget is exhausted,
    /// in which case the dropped entry is returned.
    pub fn resolve_ack(
        &mut self,
        message_id: &[u8; 16],
        success: bool,
        now_ms: u64,
    ) -> AckResolution {
        let Some(pos) = self.entries.iter().position(|entry| {
            entry.sealed.as_ref().is_some_and(|sealed| &sealed.message_id == message_id)
        }) else {
            return AckResolution::UnknownId;
        };

        if success {
            self.entries.remove(pos);
            return AckResolution::Delivered;
        }

        self.schedule_retry_at(pos, now_ms)
    }

    /// Time out in-flight attempts whose ack deadline passed.
    ///
    /// Returns ids of messages dropped after exhausting their retries.
    pub fn expire_acks(&mut self, now_ms: u64) -> Vec<[u8; 16]> {
        let mut dropped = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            let timed_out = self.entries[index]
                .ack_deadline_ms
                .is_some_and(|deadline| deadline <= now_ms);

            if timed_out {
                if let AckResolution::Dropped { message_id } =
                    self.schedule_retry_at(index, now_ms)
                {
                    dropped.push(message_id);
                    continue; // entry removed; same index now holds the next one
                }
            }
            index += 1;
        }
        dropped
    }

    /// Clear transmission state after a disconnect: sealed frames from the
    /// old session are useless and in-flight attempts will never be acked.
    pub fn reset_for_reconnect(&mut self, now_ms: u64) {
        for entry in &mut self.entries {
            entry.sealed = None;
            entry.ack_deadline_ms = None;
            entry.next_retry_ms = now_ms;
        }
    }

    fn schedule_retry_at(&mut self, pos: usize, now_ms: u64) -> AckResolution {
        let entry = &mut self.entries[pos];
        entry.ack_deadline_ms = None;

        if entry.retry_count >= MAX_RETRIES {
            let entry = self.entries.remove(pos);
            let message_id =
                entry.sealed.as_ref().map_or([0u8; 16], |sealed| sealed.message_id);
            return AckResolution::Dropped { message_id };
        }

        entry.next_retry_ms = now_ms + entry.backoff_ms();
        entry.retry_count += 1;
        AckResolution::Retrying
    }
}

/// Outcome of resolving an ack or an ack timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResolution {
    /// Message delivered and removed.
    Delivered,
    /// Attempt failed; a retry is scheduled.
    Retrying,
    /// Retry budget exhausted; the message was dropped.
    Dropped {
        /// Id of the last sealed attempt.
        message_id: [u8; 16],
    },
    /// No queued message matches the ack.
    UnknownId,
}
