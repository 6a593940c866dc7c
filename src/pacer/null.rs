use std::collections::HashMap;
use std::time::Instant;

use super::{Pacer, QueueState};
use crate::rtp::{Bitrate, DataSize};

/// A null pacer that doesn't pace.
#[derive(Debug)]
pub struct NullPacer {
    last_sends: HashMap<usize, Instant>,
    queue_states: Vec<QueueState>,
    needs_timeout_before_next_poll: bool,
}

impl Default for NullPacer {
    fn default() -> Self {
        Self {
            last_sends: HashMap::default(),
            queue_states: Vec::default(),
            needs_timeout_before_next_poll: true,
        }
    }
}

impl Pacer for NullPacer {
    fn set_pacing_rate(&mut self, _pacing_bitrate: Bitrate) {
        // We don't care
    }

    fn poll_timeout(&self) -> Option<Instant> {
        if self.needs_timeout_before_next_poll {
            self.last_sends.values().min().copied()
        } else {
            None
        }
    }

    fn handle_timeout(&mut self, _now: Instant, iter: impl Iterator<Item = QueueState>) {
        self.needs_timeout_before_next_poll = false;
        self.queue_states.clear();
        self.queue_states.extend(iter);
    }

    fn poll_queue(&mut self) -> Option<usize> {
        if self.needs_timeout_before_next_poll {
            return None;
        }

        let non_empty_queues = self
            .queue_states
            .iter()
            .filter(|q| q.snapshot.packet_count > 0);

        // Retransmissions first, then round robin on the least recently sent on queue.
        let to_send_on = non_empty_queues
            .min_by_key(|q| (q.snapshot.priority, self.last_sends.get(&q.stream)))
            .map(|q| q.stream);

        if to_send_on.is_some() {
            self.needs_timeout_before_next_poll = true;
        }

        to_send_on
    }

    fn register_send(&mut self, now: Instant, _packet_size: DataSize, from: usize) {
        self.last_sends.insert(from, now);
    }

    fn clear(&mut self) {
        self.queue_states.clear();
    }
}

#[cfg(test)]
mod test {
    use super::super::{QueuePriority, QueueSnapshot};
    use super::*;

    #[test]
    fn round_robin_between_streams() {
        let now = Instant::now();
        let mut pacer = NullPacer::default();

        let state = |stream| QueueState {
            stream,
            snapshot: QueueSnapshot {
                created_at: now,
                size: 100,
                packet_count: 1,
                priority: QueuePriority::Media,
                ..Default::default()
            },
        };

        pacer.handle_timeout(now, [state(0), state(1)].into_iter());
        let first = pacer.poll_queue().unwrap();
        pacer.register_send(now, DataSize::bytes(100), first);
        assert!(pacer.poll_queue().is_none());

        pacer.handle_timeout(now, [state(0), state(1)].into_iter());
        let second = pacer.poll_queue().unwrap();
        assert_ne!(first, second);
    }
}
