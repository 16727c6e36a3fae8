//! The reliability layer: sequence numbers, ACK tracking, retransmission,
//! and duplicate suppression on top of unreliable datagrams.
//!
//! Retransmissions always carry the ORIGINAL sequence number — allocating a
//! fresh one would defeat duplicate detection on the far side.
//!
//! The layer is clock-free: callers pass `Instant`s in, which keeps every
//! timing path unit-testable without sleeping.

use pb_protocol::Message;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Received-sequence FIFO capacity. Duplicates older than this many
/// intervening messages may be reprocessed; accepted by design.
pub const RECEIVED_FIFO_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// PendingSend
// ---------------------------------------------------------------------------

/// A sent message awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub message: Message,
    pub sequence_number: u32,
    pub target: SocketAddr,
    pub first_sent_at: Instant,
    pub last_attempt: Instant,
    pub retry_count: u32,
    pub timeout: Duration,
}

impl PendingSend {
    fn due(&self, now: Instant) -> bool {
        now.duration_since(self.last_attempt) >= self.timeout
    }
}

/// What one timer pass produced: frames to re-send, and frames given up on.
#[derive(Debug, Default)]
pub struct TickResult {
    pub retransmits: Vec<(u32, Message, SocketAddr)>,
    pub evicted: Vec<(u32, Message)>,
}

// ---------------------------------------------------------------------------
// ReliabilityLayer
// ---------------------------------------------------------------------------

pub struct ReliabilityLayer {
    timeout: Duration,
    max_retries: u32,
    sequence_counter: u32,
    pending: HashMap<u32, PendingSend>,
    received: VecDeque<u32>,
    fifo_capacity: usize,
}

impl Default for ReliabilityLayer {
    fn default() -> Self {
        ReliabilityLayer::new(DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES)
    }
}

impl ReliabilityLayer {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        ReliabilityLayer {
            timeout,
            max_retries,
            sequence_counter: 0,
            pending: HashMap::new(),
            received: VecDeque::with_capacity(RECEIVED_FIFO_CAPACITY),
            fifo_capacity: RECEIVED_FIFO_CAPACITY,
        }
    }

    /// Next sequence number; the first allocation returns 1.
    pub fn next_seq(&mut self) -> u32 {
        self.sequence_counter += 1;
        self.sequence_counter
    }

    /// Allocate a sequence number, stamp it on the message (for variants
    /// that carry one), and track the send for retransmission unless the
    /// message is an ACK.
    pub fn register_send(&mut self, message: &mut Message, target: SocketAddr, now: Instant) -> u32 {
        let seq = self.next_seq();
        message.set_sequence_number(seq);
        if !matches!(message, Message::Ack(_)) {
            self.pending.insert(
                seq,
                PendingSend {
                    message: message.clone(),
                    sequence_number: seq,
                    target,
                    first_sent_at: now,
                    last_attempt: now,
                    retry_count: 0,
                    timeout: self.timeout,
                },
            );
        }
        seq
    }

    /// Clear the pending entry for an acknowledged sequence number.
    /// Unknown ack numbers are ignored.
    pub fn on_ack(&mut self, ack_number: u32) {
        self.pending.remove(&ack_number);
    }

    /// Walk the pending table: due entries under the retry cap are re-emitted
    /// with their original sequence number; due entries at the cap are
    /// evicted and reported.
    pub fn tick(&mut self, now: Instant) -> TickResult {
        let mut result = TickResult::default();
        let due: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due(now))
            .map(|(&seq, _)| seq)
            .collect();

        for seq in due {
            let entry = self.pending.get_mut(&seq).expect("seq collected above");
            if entry.retry_count < self.max_retries {
                entry.retry_count += 1;
                entry.last_attempt = now;
                result
                    .retransmits
                    .push((seq, entry.message.clone(), entry.target));
            } else {
                let entry = self.pending.remove(&seq).expect("seq collected above");
                result.evicted.push((seq, entry.message));
            }
        }
        result
    }

    /// True when `seq` is still in the received FIFO.
    pub fn is_duplicate(&self, seq: u32) -> bool {
        self.received.contains(&seq)
    }

    /// Record a received sequence number, dropping the oldest entry once the
    /// FIFO is full.
    pub fn mark_received(&mut self, seq: u32) {
        if self.received.len() == self.fifo_capacity {
            self.received.pop_front();
        }
        self.received.push_back(seq);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop all state: counter, pending table, and received FIFO.
    pub fn reset(&mut self) {
        self.sequence_counter = 0;
        self.pending.clear();
        self.received.clear();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
