use std::time::{Duration, Instant};

/// Packets sent within this long of the first packet of a group belong to the group.
const BURST_TIME: Duration = Duration::from_millis(5);

/// Packets arriving this close together with a negative propagation delta are a burst.
const BURST_ARRIVAL: Duration = Duration::from_millis(5);

// Groups with arrival deltas this much larger than the send delta are considered a reset
// of the arrival clock.
const ARRIVAL_TIME_OFFSET_THRESHOLD: Duration = Duration::from_secs(3);

/// Difference between two consecutive packet groups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupDelta {
    /// Send time difference between the last packets of the groups, in ms.
    pub send_delta_ms: f64,
    /// Arrival time difference between the last packets of the groups, in ms.
    pub arrival_delta_ms: f64,
    /// Difference in size.
    pub size_delta: i64,
    /// Arrival of the last packet of the newer group.
    pub arrival: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Group {
    first_send_ms: f64,
    last_send_ms: f64,
    last_arrival: Instant,
    size: usize,
}

impl Group {
    fn new(send_ms: f64, arrival: Instant, size: usize) -> Self {
        Group {
            first_send_ms: send_ms,
            last_send_ms: send_ms,
            last_arrival: arrival,
            size,
        }
    }

    fn add(&mut self, send_ms: f64, arrival: Instant, size: usize) {
        self.last_send_ms = self.last_send_ms.max(send_ms);
        self.last_arrival = self.last_arrival.max(arrival);
        self.size += size;
    }
}

/// Groups packets sent in short bursts and yields the delay variation between groups.
#[derive(Debug, Default)]
pub struct InterArrival {
    current: Option<Group>,
    previous: Option<Group>,
}

impl InterArrival {
    /// Add a packet. `send_ms` is the unwrapped send time in ms from the sender's clock.
    ///
    /// Returns the delta between the two latest complete groups when a group completes.
    pub fn add_packet(&mut self, send_ms: f64, arrival: Instant, size: usize) -> Option<GroupDelta> {
        let Some(current) = &mut self.current else {
            self.current = Some(Group::new(send_ms, arrival, size));
            return None;
        };

        if send_ms < current.first_send_ms {
            // Reordered from before the current group.
            trace!(send_ms, "Ignore out of order packet");
            return None;
        }

        if Self::belongs_to(current, send_ms, arrival) {
            current.add(send_ms, arrival, size);
            return None;
        }

        // New group, the current one is complete.
        let completed = *current;
        let delta = self.previous.and_then(|prev| Self::delta(&prev, &completed));

        self.previous = Some(completed);
        self.current = Some(Group::new(send_ms, arrival, size));

        delta
    }

    fn belongs_to(group: &Group, send_ms: f64, arrival: Instant) -> bool {
        let send_delta = send_ms - group.first_send_ms;
        if send_delta <= BURST_TIME.as_secs_f64() * 1000.0 {
            return true;
        }

        // Packets queued up in the network arrive in a burst.
        let arrival_delta = arrival.saturating_duration_since(group.last_arrival);
        let propagation_ms =
            arrival_delta.as_secs_f64() * 1000.0 - (send_ms - group.last_send_ms);
        propagation_ms < 0.0 && arrival_delta <= BURST_ARRIVAL
    }

    fn delta(prev: &Group, cur: &Group) -> Option<GroupDelta> {
        let send_delta_ms = cur.last_send_ms - prev.last_send_ms;
        let arrival_delta = cur.last_arrival.checked_duration_since(prev.last_arrival)?;
        let arrival_delta_ms = arrival_delta.as_secs_f64() * 1000.0;

        if arrival_delta_ms - send_delta_ms >= ARRIVAL_TIME_OFFSET_THRESHOLD.as_secs_f64() * 1000.0
        {
            debug!(arrival_delta_ms, send_delta_ms, "Arrival clock jump, ignore group");
            return None;
        }

        Some(GroupDelta {
            send_delta_ms,
            arrival_delta_ms,
            size_delta: cur.size as i64 - prev.size as i64,
            arrival: cur.last_arrival,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn groups_within_burst() {
        let now = Instant::now();
        let mut ia = InterArrival::default();

        // Group 1: 0, 2, 4ms.
        assert!(ia.add_packet(0.0, now, 100).is_none());
        assert!(ia.add_packet(2.0, now + ms(2), 100).is_none());
        assert!(ia.add_packet(4.0, now + ms(4), 100).is_none());

        // Group 2 starts, group 1 complete but no previous group.
        assert!(ia.add_packet(20.0, now + ms(21), 100).is_none());

        // Group 3 starts, delta between group 1 and 2.
        let d = ia.add_packet(40.0, now + ms(45), 100).unwrap();
        assert_eq!(d.send_delta_ms, 16.0);
        assert!((d.arrival_delta_ms - 17.0).abs() < 1e-6);
        assert_eq!(d.size_delta, -200);
        assert_eq!(d.arrival, now + ms(21));
    }

    #[test]
    fn out_of_order_ignored() {
        let now = Instant::now();
        let mut ia = InterArrival::default();
        ia.add_packet(10.0, now, 100);
        assert!(ia.add_packet(5.0, now + ms(1), 100).is_none());
    }

    #[test]
    fn network_burst_joins_group() {
        let now = Instant::now();
        let mut ia = InterArrival::default();
        ia.add_packet(0.0, now, 100);
        // Sent 20ms later but arrives 1ms after, queued in the network.
        ia.add_packet(20.0, now + ms(1), 100);
        let current = ia.current.unwrap();
        assert_eq!(current.size, 200);
    }
}
