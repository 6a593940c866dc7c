use std::collections::VecDeque;
use std::time::Instant;

use super::inter_arrival::GroupDelta;
use super::BandwidthUsage;

const SMOOTHING_COEF: f64 = 0.9;
const THRESHOLD_GAIN: f64 = 4.0;
const MAX_NUM_DELTAS: usize = 60;
const DELTA_COUNTER_MAX: usize = 1000;

const INITIAL_THRESHOLD_MS: f64 = 12.5;
const K_UP: f64 = 0.0087;
const K_DOWN: f64 = 0.039;
const MIN_THRESHOLD_MS: f64 = 6.0;
const MAX_THRESHOLD_MS: f64 = 600.0;
const MAX_ADAPT_OFFSET_MS: f64 = 15.0;
const MAX_TIME_DELTA_MS: f64 = 100.0;
const OVERUSE_TIME_THRESHOLD_MS: f64 = 10.0;

/// Detects overuse from the trend of delay variations.
///
/// A linear regression over the smoothed accumulated delay of the latest `window_size`
/// groups. A positive slope means queues are building up.
#[derive(Debug)]
pub struct TrendlineEstimator {
    window_size: usize,
    num_of_deltas: usize,
    first_arrival: Option<Instant>,
    accumulated_delay: f64,
    smoothed_delay: f64,
    /// (arrival ms since first, smoothed delay ms)
    history: VecDeque<(f64, f64)>,
    prev_trend: f64,

    threshold: f64,
    last_threshold_update: Option<Instant>,
    time_over_using: Option<f64>,
    overuse_counter: usize,
    hypothesis: BandwidthUsage,
}

impl TrendlineEstimator {
    pub fn new(window_size: usize) -> Self {
        TrendlineEstimator {
            window_size,
            num_of_deltas: 0,
            first_arrival: None,
            accumulated_delay: 0.0,
            smoothed_delay: 0.0,
            history: VecDeque::with_capacity(window_size),
            prev_trend: 0.0,
            threshold: INITIAL_THRESHOLD_MS,
            last_threshold_update: None,
            time_over_using: None,
            overuse_counter: 0,
            hypothesis: BandwidthUsage::Normal,
        }
    }

    pub fn hypothesis(&self) -> BandwidthUsage {
        self.hypothesis
    }

    pub fn add_delay_observation(&mut self, delta: GroupDelta) {
        let delay_ms = delta.arrival_delta_ms - delta.send_delta_ms;

        self.num_of_deltas = (self.num_of_deltas + 1).min(DELTA_COUNTER_MAX);
        let first_arrival = *self.first_arrival.get_or_insert(delta.arrival);

        self.accumulated_delay += delay_ms;
        self.smoothed_delay =
            SMOOTHING_COEF * self.smoothed_delay + (1.0 - SMOOTHING_COEF) * self.accumulated_delay;

        let arrival_ms = delta
            .arrival
            .saturating_duration_since(first_arrival)
            .as_secs_f64()
            * 1000.0;

        self.history.push_back((arrival_ms, self.smoothed_delay));
        while self.history.len() > self.window_size {
            self.history.pop_front();
        }

        let trend = if self.history.len() == self.window_size {
            linear_fit_slope(&self.history).unwrap_or(self.prev_trend)
        } else {
            self.prev_trend
        };

        self.detect(trend, delta.send_delta_ms, delta.arrival);
    }

    fn detect(&mut self, trend: f64, send_delta_ms: f64, now: Instant) {
        if self.num_of_deltas < 2 {
            self.hypothesis = BandwidthUsage::Normal;
            return;
        }

        let modified_trend = self.num_of_deltas.min(MAX_NUM_DELTAS) as f64 * trend * THRESHOLD_GAIN;

        if modified_trend > self.threshold {
            let over = match self.time_over_using {
                // Initialize the timer. Assume we've been over-using half of the time since
                // the previous sample.
                None => send_delta_ms / 2.0,
                Some(t) => t + send_delta_ms,
            };
            self.time_over_using = Some(over);
            self.overuse_counter += 1;

            if over > OVERUSE_TIME_THRESHOLD_MS
                && self.overuse_counter > 1
                && trend >= self.prev_trend
            {
                self.time_over_using = Some(0.0);
                self.overuse_counter = 0;
                self.set_hypothesis(BandwidthUsage::Overuse);
            }
        } else if modified_trend < -self.threshold {
            self.time_over_using = None;
            self.overuse_counter = 0;
            self.set_hypothesis(BandwidthUsage::Underuse);
        } else {
            self.time_over_using = None;
            self.overuse_counter = 0;
            self.set_hypothesis(BandwidthUsage::Normal);
        }

        self.prev_trend = trend;
        self.update_threshold(modified_trend, now);
    }

    fn set_hypothesis(&mut self, h: BandwidthUsage) {
        if self.hypothesis != h {
            debug!(from = ?self.hypothesis, to = ?h, "Trendline hypothesis");
        }
        self.hypothesis = h;
    }

    fn update_threshold(&mut self, modified_trend: f64, now: Instant) {
        let Some(last) = self.last_threshold_update else {
            self.last_threshold_update = Some(now);
            return;
        };

        let abs = modified_trend.abs();
        if abs > self.threshold + MAX_ADAPT_OFFSET_MS {
            // Avoid adapting the threshold to big latency spikes.
            self.last_threshold_update = Some(now);
            return;
        }

        let k = if abs < self.threshold { K_DOWN } else { K_UP };
        let dt_ms = (now.saturating_duration_since(last).as_secs_f64() * 1000.0)
            .min(MAX_TIME_DELTA_MS);

        self.threshold += k * (abs - self.threshold) * dt_ms;
        self.threshold = self.threshold.clamp(MIN_THRESHOLD_MS, MAX_THRESHOLD_MS);
        self.last_threshold_update = Some(now);
    }

    #[cfg(test)]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

fn linear_fit_slope(points: &VecDeque<(f64, f64)>) -> Option<f64> {
    let n = points.len() as f64;
    let (sum_x, sum_y) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    let avg_x = sum_x / n;
    let avg_y = sum_y / n;

    let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), (x, y)| {
        (num + (x - avg_x) * (y - avg_y), den + (x - avg_x) * (x - avg_x))
    });

    if den == 0.0 {
        return None;
    }

    Some(num / den)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn feed(t: &mut TrendlineEstimator, start: Instant, groups: usize, extra_delay_ms: f64) {
        for i in 0..groups {
            let arrival = start + Duration::from_secs_f64(i as f64 * (20.0 + extra_delay_ms) / 1000.0);
            t.add_delay_observation(GroupDelta {
                send_delta_ms: 20.0,
                arrival_delta_ms: 20.0 + extra_delay_ms,
                size_delta: 0,
                arrival,
            });
        }
    }

    #[test]
    fn slope() {
        let points: VecDeque<_> = vec![(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)].into();
        assert_eq!(linear_fit_slope(&points), Some(2.0));

        let flat: VecDeque<_> = vec![(1.0, 1.0), (1.0, 3.0)].into();
        assert_eq!(linear_fit_slope(&flat), None);
    }

    #[test]
    fn stable_delay_is_normal() {
        let mut t = TrendlineEstimator::new(20);
        feed(&mut t, Instant::now(), 100, 0.0);
        assert_eq!(t.hypothesis(), BandwidthUsage::Normal);
    }

    #[test]
    fn growing_delay_is_overuse() {
        let mut t = TrendlineEstimator::new(20);
        feed(&mut t, Instant::now(), 100, 5.0);
        assert_eq!(t.hypothesis(), BandwidthUsage::Overuse);
    }

    #[test]
    fn shrinking_delay_is_underuse() {
        let mut t = TrendlineEstimator::new(20);
        let start = Instant::now();
        feed(&mut t, start, 40, 5.0);
        // Queues drain.
        for i in 0..40 {
            let arrival = start + Duration::from_millis(1000 + i * 15);
            t.add_delay_observation(GroupDelta {
                send_delta_ms: 20.0,
                arrival_delta_ms: 15.0,
                size_delta: 0,
                arrival,
            });
        }
        assert_eq!(t.hypothesis(), BandwidthUsage::Underuse);
    }

    #[test]
    fn threshold_stays_in_bounds() {
        let mut t = TrendlineEstimator::new(20);
        feed(&mut t, Instant::now(), 500, 0.0);
        assert!(t.threshold() >= MIN_THRESHOLD_MS);
        assert!(t.threshold() <= MAX_THRESHOLD_MS);
    }
}
