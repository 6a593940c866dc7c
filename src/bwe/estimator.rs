use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::inter_arrival::InterArrival;
use super::rate_control::AimdRateControl;
use super::trendline::TrendlineEstimator;
use super::{BandwidthUsage, ReceivedPacket};
use crate::rtp::{Bitrate, DataSize, Ssrc};
use crate::util::value_history::ValueHistory;

/// Streams not heard from in this long are dropped from the estimate.
const STREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Window of the incoming bitrate.
const INCOMING_WINDOW: Duration = Duration::from_secs(1);

/// Interval until there is a valid estimate to derive one from.
const INITIAL_PROCESS_INTERVAL: Duration = Duration::from_millis(500);

const TRENDLINE_WINDOW: usize = 20;

// Size of a REMB that estimates are sent in, for the feedback interval.
const REMB_SIZE_BYTES: f64 = 80.0;

const RTP_TICKS_PER_MS: f64 = 90.0;
const ABS_SEND_TIME_TICKS_PER_MS: f64 = (1 << 18) as f64 / 1000.0;

/// Which send time the estimator groups packets by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    /// RTP timestamps per SSRC, assuming a 90kHz clock.
    SingleStream,
    /// The abs-send-time header extension, shared by all streams.
    AbsSendTime,
}

/// Unwraps a send time counter of `bits` width into milliseconds.
#[derive(Debug)]
struct SendClock {
    bits: u32,
    ticks_per_ms: f64,
    last: Option<u32>,
    unwrapped: i64,
}

impl SendClock {
    fn new(kind: EstimatorKind) -> Self {
        let (bits, ticks_per_ms) = match kind {
            EstimatorKind::SingleStream => (32, RTP_TICKS_PER_MS),
            EstimatorKind::AbsSendTime => (24, ABS_SEND_TIME_TICKS_PER_MS),
        };
        SendClock {
            bits,
            ticks_per_ms,
            last: None,
            unwrapped: 0,
        }
    }

    fn unwrap_ms(&mut self, raw: u32) -> f64 {
        let modulus = 1_i64 << self.bits;
        let mask = (modulus - 1) as u32;
        let raw = raw & mask;

        if let Some(last) = self.last {
            let mut delta = (raw.wrapping_sub(last) & mask) as i64;
            if delta >= modulus / 2 {
                delta -= modulus;
            }
            self.unwrapped += delta;
        } else {
            self.unwrapped = raw as i64;
        }
        self.last = Some(raw);

        self.unwrapped as f64 / self.ticks_per_ms
    }
}

#[derive(Debug)]
struct Detector {
    clock: SendClock,
    inter_arrival: InterArrival,
    trendline: TrendlineEstimator,
}

impl Detector {
    fn new(kind: EstimatorKind) -> Self {
        Detector {
            clock: SendClock::new(kind),
            inter_arrival: InterArrival::default(),
            trendline: TrendlineEstimator::new(TRENDLINE_WINDOW),
        }
    }

    fn add(&mut self, send_time: u32, arrival: Instant, size: usize) {
        let send_ms = self.clock.unwrap_ms(send_time);
        if let Some(delta) = self.inter_arrival.add_packet(send_ms, arrival, size) {
            self.trendline.add_delay_observation(delta);
        }
    }

    fn hypothesis(&self) -> BandwidthUsage {
        self.trendline.hypothesis()
    }
}

/// Estimates the bitrate a remote sender can use from delay variation of incoming packets.
///
/// Used when the sender doesn't stamp transport wide sequence numbers, so the estimate has
/// to be made at the receiver and sent back as REMB.
#[derive(Debug)]
pub(crate) struct RemoteBitrateEstimator {
    kind: EstimatorKind,
    last_seen: HashMap<Ssrc, Instant>,
    /// Per SSRC detectors, single stream only.
    detectors: HashMap<Ssrc, Detector>,
    /// The one detector for abs-send-time.
    shared: Option<Detector>,
    incoming: ValueHistory<u64>,
    first_packet: Option<Instant>,
    rate_control: AimdRateControl,
    bounds: (Bitrate, Bitrate, Bitrate),
    last_process: Option<Instant>,
    process_interval: Duration,
    rtt: Option<Duration>,
}

impl RemoteBitrateEstimator {
    pub fn new(kind: EstimatorKind, initial: Bitrate, min: Bitrate, max: Bitrate) -> Self {
        debug!(?kind, "New remote bitrate estimator");
        RemoteBitrateEstimator {
            kind,
            last_seen: HashMap::new(),
            detectors: HashMap::new(),
            shared: None,
            incoming: ValueHistory::new(INCOMING_WINDOW),
            first_packet: None,
            rate_control: AimdRateControl::new(initial, min, max),
            bounds: (initial, min, max),
            last_process: None,
            process_interval: INITIAL_PROCESS_INTERVAL,
            rtt: None,
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        self.kind
    }

    /// Add an incoming packet.
    ///
    /// Overuse is acted on immediately, in which case an estimate is returned.
    pub fn incoming_packet(
        &mut self,
        packet: &ReceivedPacket,
        now: Instant,
    ) -> Option<(Vec<Ssrc>, Bitrate)> {
        let send_time = match self.kind {
            EstimatorKind::SingleStream => packet.rtp_timestamp,
            EstimatorKind::AbsSendTime => {
                let Some(ast) = packet.abs_send_time else {
                    trace!(ssrc = %packet.ssrc, "Ignore packet without abs-send-time");
                    return None;
                };
                ast
            }
        };

        self.first_packet.get_or_insert(now);
        self.incoming.push(now, packet.size as u64);
        self.last_seen.insert(packet.ssrc, now);

        let kind = self.kind;
        let before = self.hypothesis();

        let detector = match kind {
            EstimatorKind::SingleStream => self
                .detectors
                .entry(packet.ssrc)
                .or_insert_with(|| Detector::new(kind)),
            EstimatorKind::AbsSendTime => self.shared.get_or_insert_with(|| Detector::new(kind)),
        };
        detector.add(send_time, now, packet.size);

        let after = self.hypothesis();
        if after == BandwidthUsage::Overuse && before != BandwidthUsage::Overuse {
            debug!(ssrc = %packet.ssrc, "Overuse detected");
            return self.update_estimate(now);
        }

        None
    }

    /// The most severe hypothesis over all detectors.
    fn hypothesis(&self) -> BandwidthUsage {
        let all = self.detectors.values().chain(self.shared.iter());
        all.map(|d| d.hypothesis())
            .fold(BandwidthUsage::Normal, |acc, h| match (acc, h) {
                (BandwidthUsage::Overuse, _) | (_, BandwidthUsage::Overuse) => {
                    BandwidthUsage::Overuse
                }
                (BandwidthUsage::Underuse, _) | (_, BandwidthUsage::Underuse) => {
                    BandwidthUsage::Underuse
                }
                _ => BandwidthUsage::Normal,
            })
    }

    fn incoming_bitrate(&mut self, now: Instant) -> Option<Bitrate> {
        self.incoming.purge_old(now);
        let elapsed = now.saturating_duration_since(self.first_packet?);
        let window = elapsed.min(INCOMING_WINDOW);
        if window.is_zero() {
            return None;
        }
        Some(DataSize::bytes(self.incoming.sum()) / window)
    }

    fn timeout_streams(&mut self, now: Instant) {
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) <= STREAM_TIMEOUT);

        if self.last_seen.len() != before {
            let last_seen = &self.last_seen;
            self.detectors.retain(|ssrc, _| last_seen.contains_key(ssrc));
            debug!(streams = self.last_seen.len(), "Timed out receive streams");
        }

        if self.last_seen.is_empty() {
            self.shared = None;
        }
    }

    fn update_estimate(&mut self, now: Instant) -> Option<(Vec<Ssrc>, Bitrate)> {
        self.timeout_streams(now);

        if self.last_seen.is_empty() {
            // Start over when all streams are gone.
            let (initial, min, max) = self.bounds;
            self.rate_control = AimdRateControl::new(initial, min, max);
            return None;
        }

        let usage = self.hypothesis();
        let incoming = self.incoming_bitrate(now)?;

        self.rate_control.update(usage, incoming, self.rtt, now);

        if !self.rate_control.valid_estimate() {
            return None;
        }

        let estimate = self.rate_control.estimated_bitrate();
        self.process_interval = feedback_interval(estimate);

        let mut ssrcs: Vec<Ssrc> = self.last_seen.keys().copied().collect();
        ssrcs.sort();

        Some((ssrcs, estimate))
    }

    /// Run the periodic update if due.
    pub fn process(&mut self, now: Instant) -> Option<(Vec<Ssrc>, Bitrate)> {
        if self.time_until_process(now) > Duration::ZERO {
            return None;
        }
        self.last_process = Some(now);
        self.update_estimate(now)
    }

    pub fn time_until_process(&self, now: Instant) -> Duration {
        match self.last_process {
            Some(last) => (last + self.process_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn on_rtt_update(&mut self, avg_rtt: Duration) {
        self.rtt = Some(avg_rtt);
        self.rate_control.set_rtt(avg_rtt);
    }

    #[cfg(test)]
    pub(crate) fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    pub fn remove_stream(&mut self, ssrc: Ssrc) {
        self.last_seen.remove(&ssrc);
        self.detectors.remove(&ssrc);
    }

    pub fn latest_estimate(&self) -> Option<Bitrate> {
        self.rate_control
            .valid_estimate()
            .then(|| self.rate_control.estimated_bitrate())
    }
}

/// How often to send estimates so they take at most 5% of the estimated bitrate.
fn feedback_interval(estimate: Bitrate) -> Duration {
    const MIN: Duration = Duration::from_millis(200);
    const MAX: Duration = Duration::from_millis(1000);

    let share = estimate.as_f64() * 0.05;
    if share <= 0.0 {
        return MAX;
    }
    let secs = REMB_SIZE_BYTES * 8.0 / share;
    Duration::from_secs_f64(secs.min(MAX.as_secs_f64())).clamp(MIN, MAX)
}
