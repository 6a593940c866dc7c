use std::time::{Duration, Instant};

/// Time-based EWMA (Exponentially Weighted Moving Average).
///
/// The smoothing factor adapts to the real time between samples:
///
/// alpha = 1 - exp(-dt / tau)
///
/// and then updates:
///
/// avg = avg + alpha * (x - avg)
#[derive(Debug, Clone)]
pub(crate) struct TimeEwma {
    tau: Duration,
    last_at: Option<Instant>,
    avg: Option<f64>,
}

impl TimeEwma {
    pub(crate) fn new(tau: Duration) -> Self {
        Self {
            tau,
            last_at: None,
            avg: None,
        }
    }

    /// Update EWMA with a new sample.
    ///
    /// Returns the current average after applying this sample.
    pub(crate) fn update(&mut self, now: Instant, value: f64) -> f64 {
        let Some(last) = self.last_at else {
            self.last_at = Some(now);
            self.avg = Some(value);
            return value;
        };

        let dt = now.saturating_duration_since(last);
        self.last_at = Some(now);

        let tau_s = self.tau.as_secs_f64().max(1e-9);
        let alpha = 1.0 - (-dt.as_secs_f64() / tau_s).exp();

        let avg = match self.avg {
            Some(avg) => avg + alpha * (value - avg),
            None => value,
        };

        self.avg = Some(avg);
        avg
    }

    #[cfg(test)]
    pub(crate) fn avg(&self) -> Option<f64> {
        self.avg
    }

    pub(crate) fn reset(&mut self) {
        self.last_at = None;
        self.avg = None;
    }
}
