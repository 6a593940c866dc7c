use std::time::{Duration, Instant};

use super::{Pacer, QueueState};
use crate::rtp::{Bitrate, DataSize};
use crate::util::Soonest;

const MAX_BITRATE: Bitrate = Bitrate::gbps(10);
const MAX_DEBT_IN_TIME: Duration = Duration::from_millis(500);
const PACING: Duration = Duration::from_millis(40);

/// A leaky bucket pacer that can overshoot the target bitrate when required.
pub struct LeakyBucketPacer {
    /// Pacing bitrate.
    pacing_bitrate: Bitrate,
    /// Adjusted pacing bitrate for when we need to drain queues.
    adjusted_bitrate: Bitrate,
    /// The last time we refreshed media debt and potentially adjusted the bitrate.
    last_handle_time: Option<Instant>,
    /// The last time we indicated that a packet should be sent.
    last_emitted: Option<Instant>,
    /// The next time we should send a queued packet.
    next_poll_time: Option<Instant>,
    /// The current media debt.
    media_debt: DataSize,
    /// The longest the average packet can spend in the queue before we force it to be drained.
    queue_limit: Duration,
    /// The queue states given by last handle_timeout.
    queue_states: Vec<QueueState>,
    /// The next return value for `poll_queue`
    next_poll_queue: Option<usize>,
    /// Gates poll_queue() until handle_timeout() is called after packet emission.
    needs_timeout_before_next_poll: bool,
}

impl Pacer for LeakyBucketPacer {
    fn set_pacing_rate(&mut self, pacing_bitrate: Bitrate) {
        self.pacing_bitrate = pacing_bitrate;

        // bitrate will be updated on next handle_timeout().
    }

    fn poll_timeout(&self) -> Option<Instant> {
        let next_handle_time = self.last_handle_time.map(|lh| lh + PACING);

        next_handle_time.soonest(self.next_poll_time)
    }

    fn handle_timeout(&mut self, now: Instant, iter: impl Iterator<Item = QueueState>) {
        // Clear the gate when time advances
        self.needs_timeout_before_next_poll = false;

        // Recalculated below if needed.
        self.next_poll_time = None;

        // This is called periodically and whenever packet is queued.
        self.queue_states.clear();
        self.queue_states.extend(iter);

        let elapsed = self.update_handle_time_and_get_elapsed(now);

        self.clear_debt(elapsed);
        self.maybe_update_adjusted_bitrate(now);

        if self.next_poll_queue.is_some() {
            return;
        }

        let Some((next_poll_time, queue)) = self.next_poll(now) else {
            return;
        };

        if now < next_poll_time {
            // Between now and the next poll, queue state can change such that we should poll
            // a different queue i.e. a retransmission could be queued.
            self.next_poll_queue = None;
        } else {
            self.next_poll_queue = Some(queue);
        }

        self.next_poll_time = Some(next_poll_time);
    }

    fn poll_queue(&mut self) -> Option<usize> {
        if self.needs_timeout_before_next_poll {
            return None;
        }

        let next = self.next_poll_queue.take()?;

        self.needs_timeout_before_next_poll = true;
        self.request_immediate_timeout();

        Some(next)
    }

    fn register_send(&mut self, now: Instant, packet_size: DataSize, _from: usize) {
        self.last_emitted = Some(now);

        self.media_debt += packet_size;
        self.media_debt = self
            .media_debt
            .min(self.adjusted_bitrate * MAX_DEBT_IN_TIME);
        trace!(media_debt = %self.media_debt, "Pacer register send");
    }

    fn clear(&mut self) {
        self.next_poll_queue = None;
        self.next_poll_time = None;
        self.queue_states.clear();
    }
}

impl LeakyBucketPacer {
    pub fn new(initial_pacing_bitrate: Bitrate) -> Self {
        const DEFAULT_QUEUE_LIMIT: Duration = Duration::from_secs(2);

        Self {
            pacing_bitrate: initial_pacing_bitrate,
            adjusted_bitrate: Bitrate::ZERO,
            last_handle_time: None,
            last_emitted: None,
            next_poll_time: None,
            media_debt: DataSize::ZERO,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            queue_states: vec![],
            next_poll_queue: None,
            needs_timeout_before_next_poll: true,
        }
    }

    fn update_handle_time_and_get_elapsed(&mut self, now: Instant) -> Duration {
        let Some(previous_handle_time) = self.last_handle_time else {
            self.last_handle_time = Some(now);
            return Duration::ZERO;
        };

        let elapsed = now.saturating_duration_since(previous_handle_time);
        self.last_handle_time = Some(now.max(previous_handle_time));

        elapsed
    }

    fn clear_debt(&mut self, elapsed: Duration) {
        self.media_debt = self
            .media_debt
            .saturating_sub(self.adjusted_bitrate * elapsed);
    }

    fn next_poll(&self, now: Instant) -> Option<(Instant, usize)> {
        let non_empty_queues = self
            .queue_states
            .iter()
            .filter(|q| q.snapshot.packet_count > 0);

        // If we have never sent before, do so immediately.
        if self.last_emitted.is_none() {
            return non_empty_queues
                .min_by_key(|q| q.snapshot.priority)
                .map(|q| (now, q.stream));
        };

        // Send on the non-empty queue with the highest priority that was least recently
        // sent on.
        let queue =
            non_empty_queues.min_by_key(|q| (q.snapshot.priority, q.snapshot.last_emitted))?;

        if self.adjusted_bitrate.is_zero() {
            return None;
        }

        let drain_debt_time = self.media_debt / self.adjusted_bitrate;
        let next_send_offset = if drain_debt_time > PACING {
            // Too much debt, wait for it to clear out before sending again.
            drain_debt_time
        } else {
            Duration::ZERO
        };

        let time = self
            .last_handle_time
            .map(|h| h + next_send_offset)
            .unwrap_or(now);

        Some((time, queue.stream))
    }

    fn maybe_update_adjusted_bitrate(&mut self, now: Instant) {
        self.adjusted_bitrate = self.pacing_bitrate;

        let (queue_time, queued_packets, queue_size) =
            self.queue_states
                .iter()
                .fold((Duration::ZERO, 0, DataSize::ZERO), |acc, q| {
                    (
                        acc.0 + q.snapshot.total_queue_time(now),
                        acc.1 + q.snapshot.packet_count,
                        acc.2 + DataSize::from(q.snapshot.size),
                    )
                });
        if queued_packets == 0 {
            return;
        }

        let avg_queue_time = queue_time / queued_packets;

        // The average time we want the packet in the queue to at most to wait to drain.
        let target_queue_wait =
            Duration::from_millis(1).max(self.queue_limit.saturating_sub(avg_queue_time));
        // Min data rate to drain what's currently in the queue.
        let min_rate = queue_size / target_queue_wait;
        if min_rate > self.adjusted_bitrate {
            // Min rate exceeds our pacing rate, increase the rate to force drain the queue.
            self.adjusted_bitrate = min_rate.clamp(Bitrate::ZERO, MAX_BITRATE);
            debug!(bitrate = %self.adjusted_bitrate, "Pacer adjusted to drain queue");
        }
    }

    fn request_immediate_timeout(&mut self) {
        // Next microsecond to ensure time advances between packets.
        const MINIMAL_DELTA: Duration = Duration::from_micros(1);

        self.next_poll_time = self.last_handle_time.map(|t| t + MINIMAL_DELTA);
    }
}

#[cfg(test)]
mod test {
    use super::super::{QueuePriority, QueueSnapshot};
    use super::*;

    fn duration_ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn queue(stream: usize, now: Instant, sizes: &[usize], priority: QueuePriority) -> QueueState {
        QueueState {
            stream,
            snapshot: QueueSnapshot {
                created_at: now,
                size: sizes.iter().sum(),
                packet_count: sizes.len() as u32,
                total_queue_time_origin: Duration::ZERO,
                last_emitted: None,
                first_unsent: (!sizes.is_empty()).then_some(now),
                priority: if sizes.is_empty() {
                    QueuePriority::Empty
                } else {
                    priority
                },
            },
        }
    }

    #[test]
    fn test_typical_behavior() {
        let now = Instant::now();
        // 2,000 bits per second, 10 bytes per pacing interval(40ms)
        let mut pacer = LeakyBucketPacer::new((10 * 200).into());

        let t = now + duration_ms(1);
        pacer.handle_timeout(t, [queue(0, t, &[], QueuePriority::Media)].into_iter());
        assert!(pacer.poll_queue().is_none(), "Nothing queued");

        let t = now + duration_ms(21);
        pacer.handle_timeout(t, [queue(0, t, &[5], QueuePriority::Media)].into_iter());
        assert_eq!(
            pacer.poll_queue(),
            Some(0),
            "First packet should be released because we have no debt"
        );
        pacer.register_send(t, DataSize::bytes(5), 0);
        assert!(pacer.poll_queue().is_none(), "Gated until next handle_timeout");

        let t = now + duration_ms(28);
        pacer.handle_timeout(t, [queue(0, t, &[8, 25], QueuePriority::Media)].into_iter());
        assert_eq!(
            pacer.poll_queue(),
            Some(0),
            "Second packet should be released because the debt is within tolerance"
        );
        pacer.register_send(t, DataSize::bytes(8), 0);

        pacer.handle_timeout(t, [queue(0, t, &[25], QueuePriority::Media)].into_iter());
        assert!(
            pacer.poll_queue().is_none(),
            "Third packet should not be released because we have too much debt"
        );
        assert_eq!(pacer.poll_timeout(), Some(t + PACING));

        let t = now + duration_ms(72);
        pacer.handle_timeout(t, [queue(0, t, &[25], QueuePriority::Media)].into_iter());
        assert_eq!(pacer.poll_queue(), Some(0), "Debt has drained");
    }

    #[test]
    fn test_queue_drain() {
        let now = Instant::now();
        let mut pacer = LeakyBucketPacer::new(Bitrate::new(1000));

        let mut state = queue(0, now, &[1000; 10], QueuePriority::Media);
        // Every packet has been waiting 1.9s on average.
        state.snapshot.total_queue_time_origin = Duration::from_millis(19_000);

        pacer.handle_timeout(now, [state].into_iter());

        // 10kB to drain in the remaining 100ms.
        assert!((pacer.adjusted_bitrate.as_f64() - 800_000.0).abs() < 1.0);
    }

    #[test]
    fn test_retransmission_first() {
        let now = Instant::now();
        let mut pacer = LeakyBucketPacer::new(Bitrate::mbps(1));

        pacer.handle_timeout(
            now,
            [
                queue(0, now, &[100], QueuePriority::Media),
                queue(1, now, &[100], QueuePriority::Retransmission),
            ]
            .into_iter(),
        );
        assert_eq!(pacer.poll_queue(), Some(1));
        pacer.register_send(now, DataSize::bytes(100), 1);

        let t = now + duration_ms(1);
        pacer.handle_timeout(
            t,
            [
                queue(0, now, &[100], QueuePriority::Media),
                queue(1, now, &[100], QueuePriority::Retransmission),
            ]
            .into_iter(),
        );
        assert_eq!(pacer.poll_queue(), Some(1));
    }

    #[test]
    fn test_clear_forgets_decision() {
        let now = Instant::now();
        let mut pacer = LeakyBucketPacer::new(Bitrate::mbps(1));

        pacer.handle_timeout(now, [queue(0, now, &[100], QueuePriority::Media)].into_iter());
        pacer.clear();
        assert!(pacer.poll_queue().is_none());
    }
}
