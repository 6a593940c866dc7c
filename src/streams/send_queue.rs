use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::pacer::{QueuePriority, QueueSnapshot};

/// A queue of items waiting for the pacer, keeping track of the total queue time.
#[derive(Debug)]
pub(crate) struct SendQueue<T> {
    queue: VecDeque<Entry<T>>,
    total: TotalQueue,
    last_emitted: Option<Instant>,
}

#[derive(Debug)]
struct Entry<T> {
    queued_at: Instant,
    size: usize,
    item: T,
}

impl<T> SendQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            total: TotalQueue::default(),
            last_emitted: None,
        }
    }

    pub fn push(&mut self, item: T, size: usize, now: Instant) {
        // Queue time can't be negative if the caller's clock goes backwards.
        let queued_at = self.total.last.map(|l| l.max(now)).unwrap_or(now);
        self.total.increase(queued_at, size);
        self.queue.push_back(Entry {
            queued_at,
            size,
            item,
        });
    }

    pub fn pop(&mut self, now: Instant) -> Option<T> {
        let entry = self.queue.pop_front()?;

        let now = now.max(entry.queued_at);
        let queue_time = now - entry.queued_at;
        self.total.decrease(now, entry.size, queue_time);
        self.last_emitted = Some(now);

        Some(entry.item)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.queue.iter().map(|e| &e.item)
    }

    pub(crate) fn snapshot(&mut self, now: Instant, priority: QueuePriority) -> QueueSnapshot {
        let now = self.total.move_time_forward(now);

        QueueSnapshot {
            created_at: now,
            size: self.total.unsent_size,
            packet_count: self.total.unsent_count as u32,
            total_queue_time_origin: self.total.queue_time,
            last_emitted: self.last_emitted,
            first_unsent: self.queue.front().map(|e| e.queued_at),
            priority: if self.total.unsent_count > 0 {
                priority
            } else {
                QueuePriority::Empty
            },
        }
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.total.clear();
    }
}

// Total queue time in buffer. This lovely drawing explains how to add more time.
//
// -time--------------------------------------------------------->
//
// +--------------+
// |              |
// +--------------+
//      +---------+                          Already
//      |         |                           queued
//      +---------+                         durations
//          +-----+
//          |     |
//          +-----+
//                       +-+
//                       | |         <-----  Add next
//                       +-+                  packet
//
//
//
// +--------------+--------+
// |              |@@@@@@@@|
// +--------------+--------+
//      +---------+--------+                 The @ is
//      |         |@@@@@@@@|                  what's
//      +---------+--------+                  added
//          +-----+--------+
//          |     |@@@@@@@@|
//          +-----+--------+
//                       +-+
//                       |@|
//                       +-+
#[derive(Debug, Default)]
struct TotalQueue {
    /// Number of unsent packets.
    unsent_count: usize,
    /// The data size (bytes) of the unsent packets.
    unsent_size: usize,
    /// The total queue time of all the unsent packets.
    queue_time: Duration,
    /// When we last added some value to `queue_time`.
    last: Option<Instant>,
}

impl TotalQueue {
    /// Returns the instant the totals are valid for, never earlier than the last one.
    fn move_time_forward(&mut self, now: Instant) -> Instant {
        let Some(last) = self.last else {
            return now;
        };

        let now = now.max(last);
        let from_last = now - last;
        self.queue_time += from_last * (self.unsent_count as u32);
        self.last = Some(now);
        now
    }

    fn increase(&mut self, now: Instant, size: usize) {
        self.move_time_forward(now);
        self.unsent_count += 1;
        self.unsent_size += size;
        self.last = Some(now);
    }

    fn decrease(&mut self, now: Instant, size: usize, queue_time: Duration) {
        self.move_time_forward(now);

        self.unsent_count = self.unsent_count.saturating_sub(1);
        self.unsent_size = self.unsent_size.saturating_sub(size);
        self.queue_time = self.queue_time.saturating_sub(queue_time);

        if self.unsent_count == 0 {
            self.queue_time = Duration::ZERO;
            self.last = None;
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}
