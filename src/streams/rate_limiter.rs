use std::time::{Duration, Instant};

use crate::rtp::Bitrate;
use crate::util::value_history::ValueHistory;

/// Window the retransmission budget is measured over.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// Sliding window cap on bytes, shared by all streams of a sender.
///
/// Without a max rate everything is let through.
#[derive(Debug)]
pub struct RateLimiter {
    used: ValueHistory<u64>,
    max_rate: Option<Bitrate>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        RateLimiter {
            used: ValueHistory::new(window),
            max_rate: None,
        }
    }

    pub fn set_max_rate(&mut self, rate: Bitrate) {
        self.max_rate = Some(rate);
    }

    /// Use `bytes` of the budget if that fits, returns whether it did.
    pub fn try_use(&mut self, bytes: usize, now: Instant) -> bool {
        self.used.purge_old(now);

        if let Some(max_rate) = self.max_rate {
            let budget = max_rate * self.used.max_time();
            if self.used.sum() + bytes as u64 > budget.as_bytes() {
                return false;
            }
        }

        self.used.push(now, bytes as u64);
        true
    }

    /// When the oldest use falls out of the window, freeing budget.
    pub fn next_available(&self) -> Option<Instant> {
        // purge_old is strict, the value is gone just after the window.
        const EPSILON: Duration = Duration::from_millis(1);

        self.used
            .oldest()
            .map(|t| t + self.used.max_time() + EPSILON)
    }

    pub fn clear(&mut self) {
        self.used.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unlimited_without_rate() {
        let now = Instant::now();
        let mut r = RateLimiter::default();
        assert!(r.try_use(1_000_000, now));
    }

    #[test]
    fn denies_over_budget_and_releases() {
        let now = Instant::now();
        let mut r = RateLimiter::default();
        // 1000 bytes per second.
        r.set_max_rate(Bitrate::kbps(8));

        assert!(r.try_use(600, now));
        assert!(r.try_use(400, now + Duration::from_millis(100)));
        assert!(!r.try_use(1, now + Duration::from_millis(200)));

        let at = r.next_available().unwrap();
        assert_eq!(at, now + Duration::from_millis(1001));

        // The first 600 bytes have left the window.
        assert!(r.try_use(600, at));
        assert!(!r.try_use(1, at));
    }

    #[test]
    fn clear_restores_budget() {
        let now = Instant::now();
        let mut r = RateLimiter::default();
        r.set_max_rate(Bitrate::kbps(8));

        assert!(r.try_use(1000, now));
        assert!(!r.try_use(1, now));

        r.clear();
        assert!(r.next_available().is_none());
        assert!(r.try_use(1000, now));
    }

    #[test]
    fn zero_rate_denies_everything() {
        let now = Instant::now();
        let mut r = RateLimiter::default();
        r.set_max_rate(Bitrate::ZERO);
        assert!(!r.try_use(1, now));
    }
}
