// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Time-ordered outbound queue with jittered retransmission.
//!
//! UDP gives no delivery guarantee; the protocol compensates by repeating
//! every send. One logical send expands into 1 initial + N scheduled
//! repeats, each a full queue entry with its own due time. The repeat
//! delay starts uniformly random inside the per-mode window and doubles
//! per repeat up to a cap, so co-located instances never retransmit in
//! lockstep.

use crate::config::{
    MULTICAST_UDP_MAX_DELAY_MS, MULTICAST_UDP_MIN_DELAY_MS, MULTICAST_UDP_REPEAT,
    MULTICAST_UDP_UPPER_DELAY_MS, UNICAST_UDP_MAX_DELAY_MS, UNICAST_UDP_MIN_DELAY_MS,
    UNICAST_UDP_REPEAT, UNICAST_UDP_UPPER_DELAY_MS,
};
use crate::protocol::types::Envelope;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How an outbound message is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Single destination via the shared unicast-out socket.
    Unicast,
    /// Discovery group via every registered adapter send socket.
    Multicast,
}

/// One logical outbound message; queue entries share it across repeats.
#[derive(Debug)]
pub struct OutboundMessage {
    pub envelope: Envelope,
    pub dest: SocketAddr,
    pub mode: SendMode,
}

struct QueuedSend {
    due: Instant,
    /// Tie-break so equal due times pop in scheduling order.
    seq: u64,
    message: Arc<OutboundMessage>,
}

impl PartialEq for QueuedSend {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for QueuedSend {}

impl PartialOrd for QueuedSend {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedSend {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

struct QueueInner {
    heap: BinaryHeap<Reverse<QueuedSend>>,
    next_seq: u64,
}

impl QueueInner {
    fn push(&mut self, due: Instant, message: Arc<OutboundMessage>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueuedSend { due, seq, message }));
    }
}

/// Min-heap of scheduled sends keyed by due time, shared between the
/// engine (producer) and the send loop (consumer).
pub struct SendQueue {
    inner: Mutex<QueueInner>,
}

impl SendQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Schedule a send with no initial delay.
    pub fn schedule(&self, envelope: Envelope, dest: SocketAddr, mode: SendMode) {
        self.schedule_with_delay(envelope, dest, mode, Duration::ZERO);
    }

    /// Schedule the initial send at `now + initial_delay` plus the
    /// per-mode repeats.
    pub fn schedule_with_delay(
        &self,
        envelope: Envelope,
        dest: SocketAddr,
        mode: SendMode,
        initial_delay: Duration,
    ) {
        let (repeat, min_ms, max_ms, upper_ms) = match mode {
            SendMode::Unicast => (
                UNICAST_UDP_REPEAT,
                UNICAST_UDP_MIN_DELAY_MS,
                UNICAST_UDP_MAX_DELAY_MS,
                UNICAST_UDP_UPPER_DELAY_MS,
            ),
            SendMode::Multicast => (
                MULTICAST_UDP_REPEAT,
                MULTICAST_UDP_MIN_DELAY_MS,
                MULTICAST_UDP_MAX_DELAY_MS,
                MULTICAST_UDP_UPPER_DELAY_MS,
            ),
        };
        let message = Arc::new(OutboundMessage {
            envelope,
            dest,
            mode,
        });
        let mut due = Instant::now() + initial_delay;
        let mut delta = Duration::from_millis(fastrand::u64(min_ms..=max_ms));
        let upper = Duration::from_millis(upper_ms);

        let mut inner = self.inner.lock();
        inner.push(due, Arc::clone(&message));
        for _ in 0..repeat {
            due += delta;
            inner.push(due, Arc::clone(&message));
            delta = (delta * 2).min(upper);
        }
    }

    /// Pop the earliest entry whose due time has elapsed.
    #[must_use]
    pub fn pop_due(&self, now: Instant) -> Option<Arc<OutboundMessage>> {
        let mut inner = self.inner.lock();
        match inner.heap.peek() {
            Some(Reverse(head)) if head.due <= now => {
                inner.heap.pop().map(|Reverse(entry)| entry.message)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{Action, Envelope};

    fn dest() -> SocketAddr {
        "239.255.255.250:3702".parse().expect("valid IP:port")
    }

    #[test]
    fn test_multicast_send_expands_to_initial_plus_repeats() {
        let queue = SendQueue::new();
        queue.schedule(Envelope::new(Action::Probe), dest(), SendMode::Multicast);
        assert_eq!(queue.len(), 1 + MULTICAST_UDP_REPEAT);
    }

    #[test]
    fn test_unicast_send_repeats_fewer_times() {
        let queue = SendQueue::new();
        queue.schedule(Envelope::new(Action::Resolve), dest(), SendMode::Unicast);
        assert_eq!(queue.len(), 1 + UNICAST_UDP_REPEAT);
        assert!(UNICAST_UDP_REPEAT < MULTICAST_UDP_REPEAT);
    }

    #[test]
    fn test_only_initial_entry_due_immediately() {
        let queue = SendQueue::new();
        queue.schedule(Envelope::new(Action::Probe), dest(), SendMode::Multicast);

        let now = Instant::now();
        let first = queue.pop_due(now);
        assert!(first.is_some(), "initial send is due at once");
        assert!(
            queue.pop_due(now).is_none(),
            "repeats are delayed by at least the minimum window"
        );
        assert_eq!(queue.len(), MULTICAST_UDP_REPEAT);
    }

    #[test]
    fn test_initial_delay_defers_first_send() {
        let queue = SendQueue::new();
        queue.schedule_with_delay(
            Envelope::new(Action::Hello),
            dest(),
            SendMode::Multicast,
            Duration::from_millis(400),
        );
        assert!(queue.pop_due(Instant::now()).is_none());
        assert!(queue
            .pop_due(Instant::now() + Duration::from_millis(450))
            .is_some());
    }

    #[test]
    fn test_all_repeats_due_within_bounded_window() {
        // Worst case: 250ms + 500ms + 500ms + 500ms = 1750ms after the
        // initial send for multicast.
        let queue = SendQueue::new();
        queue.schedule(Envelope::new(Action::Probe), dest(), SendMode::Multicast);
        let horizon = Instant::now() + Duration::from_secs(2);
        let mut drained = 0;
        while queue.pop_due(horizon).is_some() {
            drained += 1;
        }
        assert_eq!(drained, 1 + MULTICAST_UDP_REPEAT);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_entries_pop_in_due_order() {
        let queue = SendQueue::new();
        let mut late = Envelope::new(Action::Probe);
        late.message_id = "late".to_string();
        let mut early = Envelope::new(Action::Probe);
        early.message_id = "early".to_string();

        queue.schedule_with_delay(late, dest(), SendMode::Unicast, Duration::from_millis(30));
        queue.schedule_with_delay(early, dest(), SendMode::Unicast, Duration::ZERO);

        let horizon = Instant::now() + Duration::from_millis(40);
        let first = queue.pop_due(horizon).expect("two entries are due");
        assert_eq!(first.envelope.message_id, "early");
        let second = queue.pop_due(horizon).expect("second entry is due");
        assert_eq!(second.envelope.message_id, "late");
    }

    #[test]
    fn test_repeats_share_the_logical_message() {
        let queue = SendQueue::new();
        queue.schedule(Envelope::new(Action::Probe), dest(), SendMode::Unicast);
        let horizon = Instant::now() + Duration::from_secs(2);
        let first = queue.pop_due(horizon).expect("initial entry");
        let second = queue.pop_due(horizon).expect("first repeat");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.envelope.message_id, second.envelope.message_id);
    }
}
