use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

pub(crate) fn not_happening() -> Instant {
    const YEARS_100: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);
    static FUTURE: Lazy<Instant> = Lazy::new(|| Instant::now() + YEARS_100);
    *FUTURE
}

// A fixed instant in the past that relative wire clocks (abs-send-time, RFC 8888 report
// timestamps) are measured from. Up to an hour back, less if the machine uptime is shorter.
static BEGINNING_OF_TIME: Lazy<Instant> = Lazy::new(|| {
    let now = Instant::now();
    let mut secs = 3600;
    loop {
        if let Some(v) = now.checked_sub(Duration::from_secs(secs)) {
            break v;
        }
        secs -= 1;
        if secs == 0 {
            break now;
        }
    }
});

pub(crate) fn already_happened() -> Instant {
    *BEGINNING_OF_TIME
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordering() {
        let now = Instant::now();
        assert!(already_happened() <= now);
        assert!(not_happening() > now);
    }
}
