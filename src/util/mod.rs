use std::time::{Duration, Instant};

pub(crate) mod average;
pub(crate) mod bitstream;
pub(crate) mod ewma;
pub(crate) mod value_history;

mod time_tricks;
pub(crate) use time_tricks::{already_happened, not_happening};

pub(crate) trait Soonest {
    fn soonest(self, other: Self) -> Self;
}

impl Soonest for Option<Instant> {
    fn soonest(self, other: Self) -> Self {
        match (self, other) {
            (Some(v1), Some(v2)) => Some(v1.min(v2)),
            (None, v) => v,
            (v, None) => v,
        }
    }
}

/// Compact NTP ("middle 32 bits") representation of a duration since some epoch.
///
/// 16 bits of seconds followed by 16 bits of fraction.
pub(crate) fn compact_ntp(since: Duration) -> u32 {
    let secs = (since.as_secs() & 0xffff) as u32;
    let fract = ((since.subsec_nanos() as u64) << 16) / 1_000_000_000;
    secs << 16 | fract as u32
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn soonest_prefers_earliest() {
        let now = Instant::now();
        let later = now + Duration::from_millis(10);

        assert_eq!(Some(now).soonest(Some(later)), Some(now));
        assert_eq!(None.soonest(Some(later)), Some(later));
        assert_eq!(Some(now).soonest(None), Some(now));
        assert_eq!(None::<Instant>.soonest(None), None);
    }

    #[test]
    fn compact_ntp_halves() {
        assert_eq!(compact_ntp(Duration::from_millis(1500)), 0x0001_8000);
        assert_eq!(compact_ntp(Duration::from_secs(65_537)), 0x0001_0000);
    }
}
