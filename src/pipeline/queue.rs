//! Bounded drop-oldest frame queue

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::protocol::FrameEnvelope;

/// A queued frame
#[derive(Debug, Clone)]
pub struct QueueSlot {
    pub envelope: FrameEnvelope,
    pub enqueued_at: Instant,
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub depth: usize,
    pub pushed: u64,
    pub dropped: u64,
}

/// Bounded FIFO that evicts its oldest entry to admit a new one
///
/// `push` never waits. A single consumer drains it with [`next`](Self::next).
pub struct FrameQueue {
    slots: Mutex<VecDeque<QueueSlot>>,
    capacity: usize,
    notify: Notify,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// `capacity` is raised to 1 if zero
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame, returning the evicted one if the queue was full
    pub fn push(&self, envelope: FrameEnvelope) -> Option<QueueSlot> {
        let evicted = {
            let mut slots = self.slots.lock();
            let evicted = if slots.len() >= self.capacity {
                slots.pop_front()
            } else {
                None
            };
            slots.push_back(QueueSlot {
                envelope,
                enqueued_at: Instant::now(),
            });
            evicted
        };

        self.pushed.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    pub fn pop(&self) -> Option<QueueSlot> {
        self.slots.lock().pop_front()
    }

    /// Wait for the next frame
    pub async fn next(&self) -> QueueSlot {
        loop {
            if let Some(slot) = self.pop() {
                return slot;
            }
            self.notify.notified().await;
        }
    }

    /// Queued envelopes, oldest first
    pub fn snapshot(&self) -> Vec<FrameEnvelope> {
        self.slots
            .lock()
            .iter()
            .map(|slot| slot.envelope.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            depth: self.len(),
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn frame(ts: u64) -> FrameEnvelope {
        FrameEnvelope::video(ts, vec![ts as u8])
    }

    #[test]
    fn test_drop_oldest() {
        let queue = FrameQueue::new(3);
        for ts in 0..10 {
            queue.push(frame(ts));
        }

        let timestamps: Vec<u64> = queue
            .snapshot()
            .iter()
            .map(|f| f.timestamp_micros)
            .collect();
        assert_eq!(timestamps, vec![7, 8, 9]);
        assert_eq!(queue.dropped(), 7);
        assert_eq!(queue.stats().pushed, 10);
    }

    #[test]
    fn test_push_returns_evicted() {
        let queue = FrameQueue::new(1);
        assert!(queue.push(frame(1)).is_none());
        let evicted = queue.push(frame(2)).unwrap();
        assert_eq!(evicted.envelope.timestamp_micros, 1);
        assert_eq!(queue.pop().unwrap().envelope.timestamp_micros, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_next_waits_for_push() {
        let queue = FrameQueue::new(2);
        let mut next = task::spawn(queue.next());
        assert_pending!(next.poll());

        queue.push(frame(5));
        assert!(next.is_woken());
        let slot = assert_ready!(next.poll());
        assert_eq!(slot.envelope.timestamp_micros, 5);
    }
}
