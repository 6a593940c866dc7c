use std::fmt;
use std::time::{Duration, Instant};

use super::BandwidthUsage;
use crate::rtp::Bitrate;
use crate::util::average::MovingAverage;

/// Smoothing factor applied to moving stats for observed bitrates when we are in the decreasing
/// state.
const OBSERVED_BIT_RATE_SMOOTHING_FACTOR: f64 = 0.95;
/// The ratio of current estimated bandwidth to use when decreasing the rate.
const BETA: f64 = 0.85;
/// The coefficient used for multiplicative rate increase.
const MULTIPLICATIVE_INCREASE_COEF: f64 = 1.08;
/// The maximal ratio of the observed bitrate that we allow estimating in a single increase.
const MAX_ESTIMATE_RATIO: f64 = 1.5;
/// Backoff time added to RTT for the response time.
const DEFAULT_BACKOFF_TIME: Duration = Duration::from_millis(100);
/// Number of standard deviations below mean to reset observed bitrate average.
const OBSERVED_BITRATE_RESET_THRESHOLD_STD: f64 = 3.0;

/// Additive increase, multiplicative decrease control of the estimated bitrate.
///
/// Inputs are:
/// * The incoming bitrate measured over the last second.
/// * RTT.
/// * Over/under use signal from the trendline.
#[derive(Debug)]
pub struct AimdRateControl {
    state: State,

    estimated_bitrate: Bitrate,
    min_bitrate: Bitrate,
    max_bitrate: Bitrate,

    /// The last observed incoming bitrate.
    last_observed_bitrate: Option<Bitrate>,
    /// The averaged observed bitrate when we have been in the decrease state.
    averaged_observed_bitrate: MovingAverage,
    /// The last time we updated the estimated bitrate.
    last_estimate_update: Option<Instant>,
    last_rtt: Option<Duration>,
}

impl AimdRateControl {
    pub fn new(start_bitrate: Bitrate, min_bitrate: Bitrate, max_bitrate: Bitrate) -> Self {
        Self {
            state: State::Increase,

            estimated_bitrate: start_bitrate.clamp(min_bitrate, max_bitrate),
            min_bitrate,
            max_bitrate,

            last_observed_bitrate: None,
            averaged_observed_bitrate: MovingAverage::new(OBSERVED_BIT_RATE_SMOOTHING_FACTOR),
            last_estimate_update: None,
            last_rtt: None,
        }
    }

    pub fn set_rtt(&mut self, rtt: Duration) {
        self.last_rtt = Some(rtt);
    }

    /// Whether we produced an estimate yet.
    pub fn valid_estimate(&self) -> bool {
        self.last_estimate_update.is_some()
    }

    /// Update with the latest detector signal.
    pub fn update(
        &mut self,
        signal: BandwidthUsage,
        observed_bitrate: Bitrate,
        rtt: Option<Duration>,
        now: Instant,
    ) {
        self.last_observed_bitrate = Some(observed_bitrate);
        if let Some(rtt) = rtt {
            self.last_rtt = Some(rtt);
        }

        self.state = self.state.transition(signal);
        trace!(state = %self.state, %observed_bitrate, "Rate control update");

        match self.state {
            State::Increase => {
                self.increase(observed_bitrate, now);
            }
            State::Decrease => {
                // Observed bitrate statistics are kept regardless of whether we reduce.
                self.update_observed_bitrate(observed_bitrate);

                if self.time_to_reduce_further(now, observed_bitrate) {
                    self.decrease(observed_bitrate, now);
                }
            }
            State::Hold => {}
        }
    }

    fn update_observed_bitrate(&mut self, observed_bitrate: Bitrate) {
        let below = self
            .averaged_observed_bitrate
            .lower_range(OBSERVED_BITRATE_RESET_THRESHOLD_STD)
            .map(|lower| observed_bitrate.as_f64() < lower)
            .unwrap_or(false);

        if below {
            self.averaged_observed_bitrate.reset();
        }
        self.averaged_observed_bitrate
            .update(observed_bitrate.as_f64());
    }

    /// Successive decreases need one rtt (10-200ms) in between, unless throughput is below
    /// half the estimate.
    fn time_to_reduce_further(&self, now: Instant, observed_bitrate: Bitrate) -> bool {
        let Some(last_change) = self.last_estimate_update else {
            return true;
        };

        let rtt = self.last_rtt.unwrap_or(DEFAULT_BACKOFF_TIME);
        let reduction_interval = rtt.clamp(Duration::from_millis(10), Duration::from_millis(200));

        if now.saturating_duration_since(last_change) >= reduction_interval {
            return true;
        }

        observed_bitrate < self.estimated_bitrate * 0.5
    }

    /// The current estimated bitrate.
    pub fn estimated_bitrate(&self) -> Bitrate {
        self.estimated_bitrate
    }

    fn increase(&mut self, observed_bitrate: Bitrate, now: Instant) {
        // Don't run away from what we actually receive.
        let increase_limit = observed_bitrate * 1.5 + Bitrate::kbps(10);

        if self.estimated_bitrate >= increase_limit {
            self.last_estimate_update = Some(now);
            return;
        }

        let last_estimate_update = *self.last_estimate_update.get_or_insert(now);

        let above = self
            .averaged_observed_bitrate
            .upper_range(3.0)
            .map(|upper| observed_bitrate.as_f64() > upper)
            .unwrap_or(false);

        if above {
            self.averaged_observed_bitrate.reset();
        }

        let since_last_update = now.saturating_duration_since(last_estimate_update);

        let mut new_estimate = if self.is_near_convergence() {
            let response_time = self.last_rtt.unwrap_or(Duration::ZERO) + DEFAULT_BACKOFF_TIME;

            let alpha =
                0.5 * (since_last_update.as_secs_f64() / response_time.as_secs_f64()).min(1.0);
            let expected_packet_size = self.estimated_packet_size();
            self.estimated_bitrate.as_f64() + (alpha * expected_packet_size).max(1000.0)
        } else {
            let eta = MULTIPLICATIVE_INCREASE_COEF.powf(since_last_update.as_secs_f64().min(1.0));
            let increase = ((eta - 1.0) * self.estimated_bitrate.as_f64()).max(1_000.0);

            self.estimated_bitrate.as_f64() + increase
        };

        let max = observed_bitrate.as_f64() * MAX_ESTIMATE_RATIO;
        new_estimate = max.min(new_estimate).min(increase_limit.as_f64());

        self.update_estimate(new_estimate.into(), now);
    }

    fn decrease(&mut self, observed_bitrate: Bitrate, now: Instant) {
        let mut new_estimate = observed_bitrate * BETA;

        if self.estimated_bitrate < new_estimate {
            // Avoid increasing the bitrate on overuse
            new_estimate = self.estimated_bitrate;
        }

        debug!(from = %self.estimated_bitrate, to = %new_estimate, "Decrease estimate");

        self.state = State::Hold;
        self.update_estimate(new_estimate, now);
    }

    fn is_near_convergence(&self) -> bool {
        if !self.averaged_observed_bitrate.valid() {
            return false;
        }
        let Some(last_observed_bitrate) = self.last_observed_bitrate else {
            return false;
        };

        self.averaged_observed_bitrate
            .within_std(last_observed_bitrate.as_f64(), 3.0)
    }

    fn update_estimate(&mut self, bitrate: Bitrate, now: Instant) {
        self.estimated_bitrate = bitrate.clamp(self.min_bitrate, self.max_bitrate);
        self.last_estimate_update = Some(now);
    }

    fn estimated_packet_size(&self) -> f64 {
        // Assume 30 FPS video dominates the bitrate.
        let bits_per_frame = self.estimated_bitrate.as_f64() / 30.0;
        let packets_per_frame = (bits_per_frame / (1200.0 / 8.0)).ceil();

        bits_per_frame / packets_per_frame
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    Increase,
    Hold,
    #[default]
    Decrease,
}

impl State {
    fn transition(&self, signal: BandwidthUsage) -> Self {
        match (self, signal) {
            (_, BandwidthUsage::Overuse) => Self::Decrease,
            (_, BandwidthUsage::Underuse) => Self::Hold,
            (Self::Decrease, BandwidthUsage::Normal) => Self::Hold,
            (Self::Hold | Self::Increase, BandwidthUsage::Normal) => Self::Increase,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Hold => write!(f, "hold"),
            State::Increase => write!(f, "increase"),
            State::Decrease => write!(f, "decrease"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{AimdRateControl, BandwidthUsage, State};

    #[test]
    fn test_state_transitions() {
        let hold = State::Hold;
        assert_eq!(hold.transition(BandwidthUsage::Overuse), State::Decrease);
        assert_eq!(hold.transition(BandwidthUsage::Normal), State::Increase);
        assert_eq!(hold.transition(BandwidthUsage::Underuse), State::Hold);

        let increase = State::Increase;
        assert_eq!(increase.transition(BandwidthUsage::Overuse), State::Decrease);
        assert_eq!(increase.transition(BandwidthUsage::Normal), State::Increase);
        assert_eq!(increase.transition(BandwidthUsage::Underuse), State::Hold);

        let decrease = State::Decrease;
        assert_eq!(decrease.transition(BandwidthUsage::Overuse), State::Decrease);
        assert_eq!(decrease.transition(BandwidthUsage::Normal), State::Hold);
        assert_eq!(decrease.transition(BandwidthUsage::Underuse), State::Hold);
    }

    mod aimd {
        use std::time::Instant;

        use super::{duration_ms, AimdRateControl, BandwidthUsage};

        fn make_control(estimated_bitrate: u64) -> AimdRateControl {
            AimdRateControl::new(estimated_bitrate.into(), 10_000.into(), 50_000_000.into())
        }

        #[test]
        fn test_initial_estimate() {
            let rate_control = make_control(100_000);
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 100_000);
            assert!(!rate_control.valid_estimate());
        }

        #[test]
        fn test_normal_yields_multiplicative_increase() {
            let now = Instant::now();
            let mut rate_control = make_control(100_000);

            rate_control.update(BandwidthUsage::Normal, 85_000.into(), None, now);
            assert_eq!(
                rate_control.estimated_bitrate().as_u64(),
                101_000,
                "Initial estimate should increase by the minimum(1Kbit/s)"
            );

            rate_control.update(
                BandwidthUsage::Normal,
                95_000.into(),
                None,
                now + duration_ms(500),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 104_963);

            rate_control.update(
                BandwidthUsage::Normal,
                97_000.into(),
                None,
                now + duration_ms(1000),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 109_081);
        }

        #[test]
        fn test_underuse_holds() {
            let now = Instant::now();
            let mut rate_control = make_control(100_000);
            rate_control.update(BandwidthUsage::Normal, 85_000.into(), None, now);
            rate_control.update(
                BandwidthUsage::Normal,
                95_000.into(),
                None,
                now + duration_ms(500),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 104_963);

            rate_control.update(
                BandwidthUsage::Underuse,
                97_000.into(),
                None,
                now + duration_ms(1000),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 104_963);

            rate_control.update(
                BandwidthUsage::Underuse,
                97_000.into(),
                None,
                now + duration_ms(2000),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 104_963);
        }

        #[test]
        fn test_overuse_decreases_to_beta_of_observed() {
            let now = Instant::now();
            let mut rate_control = make_control(100_000);
            rate_control.update(BandwidthUsage::Normal, 85_000.into(), None, now);

            rate_control.update(
                BandwidthUsage::Overuse,
                90_000.into(),
                None,
                now + duration_ms(500),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 76_500);
        }

        #[test]
        fn test_overuse_then_stable() {
            let now = Instant::now();
            let mut rate_control = make_control(100_000);
            rate_control.update(
                BandwidthUsage::Normal,
                85_000.into(),
                Some(duration_ms(80)),
                now,
            );

            rate_control.update(
                BandwidthUsage::Overuse,
                90_000.into(),
                None,
                now + duration_ms(500),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 76_500);

            rate_control.update(
                BandwidthUsage::Overuse,
                75_000.into(),
                None,
                now + duration_ms(1000),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 63_750);

            // Straight back to increase on the next normal signal.
            rate_control.update(
                BandwidthUsage::Normal,
                60_000.into(),
                None,
                now + duration_ms(1500),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 66_251);

            rate_control.update(
                BandwidthUsage::Normal,
                60_000.into(),
                None,
                now + duration_ms(2500),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 71_552);

            // Additive increase near convergence.
            rate_control.update(
                BandwidthUsage::Normal,
                70_000.into(),
                None,
                now + duration_ms(3500),
            );
            assert_eq!(rate_control.estimated_bitrate().as_u64(), 72_552);
        }
    }

    fn duration_ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }
}
