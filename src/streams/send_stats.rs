use std::time::Instant;

use crate::rtp::Bitrate;
use crate::util::value_history::ValueHistory;

/// Counters of one outgoing stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamTxStats {
    /// Key frames accepted for sending.
    pub key_frames: u64,
    /// Delta frames accepted for sending.
    pub delta_frames: u64,
    /// Count of packets sent, including retransmissions.
    pub packets: u64,
    /// Count of bytes sent, including retransmissions.
    pub bytes: u64,
    /// Count of retransmitted packets alone.
    pub packets_resent: u64,
    /// Count of retransmitted bytes alone.
    pub bytes_resent: u64,
    /// Count of NACK entries received.
    pub nacks: u64,
    /// Retransmissions postponed because the rate limit was exhausted.
    pub resends_deferred: u64,
    /// Packets reported as received by feedback.
    pub acked: u64,
    /// Packets reported as lost by feedback.
    pub lost: u64,
}

/// Holder of stats.
#[derive(Debug)]
pub(crate) struct StreamTxStatsHolder {
    pub counts: StreamTxStats,
    /// Bytes sent, for the bitrate over the last second.
    bytes_transmitted: ValueHistory<u64>,
}

impl StreamTxStatsHolder {
    pub fn new() -> Self {
        Self {
            counts: StreamTxStats::default(),
            bytes_transmitted: ValueHistory::default(),
        }
    }

    pub fn increase_frames(&mut self, key: bool) {
        if key {
            self.counts.key_frames += 1;
        } else {
            self.counts.delta_frames += 1;
        }
    }

    pub fn update_packet_counts(&mut self, bytes: u64, is_resend: bool, now: Instant) {
        self.counts.packets += 1;
        self.counts.bytes += bytes;
        if is_resend {
            self.counts.bytes_resent += bytes;
            self.counts.packets_resent += 1;
        }
        self.bytes_transmitted.push(now, bytes);
    }

    pub fn increase_nacks(&mut self) {
        self.counts.nacks += 1;
    }

    pub fn increase_deferred(&mut self) {
        self.counts.resends_deferred += 1;
    }

    pub fn update_feedback(&mut self, received: bool) {
        if received {
            self.counts.acked += 1;
        } else {
            self.counts.lost += 1;
        }
    }

    pub fn purge_old(&mut self, now: Instant) {
        self.bytes_transmitted.purge_old(now);
    }

    /// Bitrate sent over the last second. Might be stale unless `purge_old` is called first.
    pub fn bitrate(&self) -> Bitrate {
        Bitrate::new(self.bytes_transmitted.sum() * 8)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn counts_and_bitrate() {
        let now = Instant::now();
        let mut s = StreamTxStatsHolder::new();

        s.increase_frames(true);
        s.increase_frames(false);
        s.update_packet_counts(1000, false, now);
        s.update_packet_counts(500, true, now + Duration::from_millis(500));

        assert_eq!(s.counts.key_frames, 1);
        assert_eq!(s.counts.delta_frames, 1);
        assert_eq!(s.counts.packets, 2);
        assert_eq!(s.counts.bytes, 1500);
        assert_eq!(s.counts.packets_resent, 1);
        assert_eq!(s.counts.bytes_resent, 500);
        assert_eq!(s.bitrate(), Bitrate::new(12_000));

        s.purge_old(now + Duration::from_millis(1200));
        assert_eq!(s.bitrate(), Bitrate::new(4_000));
    }
}
