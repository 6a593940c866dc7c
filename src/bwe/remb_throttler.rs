use std::time::{Duration, Instant};

use crate::rtp::{Bitrate, Remb, Ssrc};

/// Minimum time between two REMB unless the estimate drops.
const REMB_SEND_INTERVAL: Duration = Duration::from_millis(200);

/// A decrease of at least this ratio is sent right away.
const SEND_THRESHOLD: f64 = 1.03;

/// Limits how often estimates are sent as REMB.
#[derive(Debug)]
pub(crate) struct RembThrottler {
    sender_ssrc: Ssrc,
    last_send: Option<Instant>,
    /// Last estimate that went out, before capping by the max desired bitrate.
    last_bitrate: Option<Bitrate>,
    last_ssrcs: Vec<Ssrc>,
    max_desired: Option<Bitrate>,
}

impl RembThrottler {
    pub fn new(sender_ssrc: Ssrc) -> Self {
        RembThrottler {
            sender_ssrc,
            last_send: None,
            last_bitrate: None,
            last_ssrcs: vec![],
            max_desired: None,
        }
    }

    /// A new receive side estimate for `ssrcs`.
    pub fn on_receive_bitrate_changed(
        &mut self,
        ssrcs: Vec<Ssrc>,
        bitrate: Bitrate,
        now: Instant,
    ) -> Option<Remb> {
        let recently_sent = self
            .last_send
            .map(|t| now < t + REMB_SEND_INTERVAL)
            .unwrap_or(false);

        let significant_drop = self
            .last_bitrate
            .map(|last| bitrate * SEND_THRESHOLD <= last)
            .unwrap_or(true);

        if recently_sent && !significant_drop {
            return None;
        }

        self.last_send = Some(now);
        self.last_bitrate = Some(bitrate);
        self.last_ssrcs.clone_from(&ssrcs);

        let capped = match self.max_desired {
            Some(max) => bitrate.min(max),
            None => bitrate,
        };

        trace!(%capped, ?ssrcs, "Send REMB");

        Some(self.remb(capped, ssrcs))
    }

    /// Cap the REMB at `bitrate`. Sent right away unless a lower value just went out.
    pub fn set_max_desired(&mut self, bitrate: Bitrate, now: Instant) -> Option<Remb> {
        self.max_desired = Some(bitrate);

        let recently_sent = self
            .last_send
            .map(|t| now.saturating_duration_since(t) < REMB_SEND_INTERVAL)
            .unwrap_or(false);

        let below_max = self
            .last_bitrate
            .map(|last| !last.is_zero() && last <= bitrate)
            .unwrap_or(false);

        if recently_sent && below_max {
            return None;
        }

        debug!(%bitrate, "Max desired receive bitrate");
        self.last_send = Some(now);

        Some(self.remb(bitrate, self.last_ssrcs.clone()))
    }

    fn remb(&self, bitrate: Bitrate, ssrcs: Vec<Ssrc>) -> Remb {
        Remb {
            sender_ssrc: self.sender_ssrc,
            bitrate,
            ssrcs,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn first_estimate_sent() {
        let now = Instant::now();
        let mut t = RembThrottler::new(1.into());

        let remb = t
            .on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(500), now)
            .unwrap();
        assert_eq!(remb.bitrate, Bitrate::kbps(500));
        assert_eq!(remb.ssrcs, vec![2.into()]);
        assert_eq!(remb.sender_ssrc, 1.into());
    }

    #[test]
    fn throttles_within_interval() {
        let now = Instant::now();
        let mut t = RembThrottler::new(1.into());
        t.on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(500), now);

        // Increase, too soon.
        assert!(t
            .on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(600), now + ms(100))
            .is_none());

        // Small decrease, too soon.
        assert!(t
            .on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(490), now + ms(100))
            .is_none());

        // Interval passed.
        assert!(t
            .on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(600), now + ms(200))
            .is_some());
    }

    #[test]
    fn large_decrease_sent_immediately() {
        let now = Instant::now();
        let mut t = RembThrottler::new(1.into());
        t.on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(500), now);

        let remb = t
            .on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(400), now + ms(10))
            .unwrap();
        assert_eq!(remb.bitrate, Bitrate::kbps(400));
    }

    #[test]
    fn capped_by_max_desired() {
        let now = Instant::now();
        let mut t = RembThrottler::new(1.into());
        t.on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(500), now);

        // Lower than what was sent goes out right away.
        let remb = t.set_max_desired(Bitrate::kbps(300), now + ms(10)).unwrap();
        assert_eq!(remb.bitrate, Bitrate::kbps(300));
        assert_eq!(remb.ssrcs, vec![2.into()]);

        let remb = t
            .on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(800), now + ms(500))
            .unwrap();
        assert_eq!(remb.bitrate, Bitrate::kbps(300));
    }

    #[test]
    fn max_desired_above_last_is_quiet() {
        let now = Instant::now();
        let mut t = RembThrottler::new(1.into());
        t.on_receive_bitrate_changed(vec![2.into()], Bitrate::kbps(500), now);

        assert!(t.set_max_desired(Bitrate::kbps(800), now + ms(10)).is_none());
        assert!(t.set_max_desired(Bitrate::kbps(800), now + ms(300)).is_some());
    }
}
