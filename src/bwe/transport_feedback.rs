use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::rtp::{extend_u16, Bitrate, Rtcp, Ssrc, Twcc, DELTA_UNIT};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
const MIN_INTERVAL: Duration = Duration::from_millis(50);
const MAX_INTERVAL: Duration = Duration::from_millis(250);

/// Share of the send bitrate feedback may use.
const BANDWIDTH_SHARE: f64 = 0.05;

// IP, UDP, SRTP overhead plus a typical feedback packet.
const REPORT_SIZE_BYTES: usize = 20 + 8 + 10 + 30;

/// Arrivals older than this relative to the latest packet are dropped unreported.
const BACK_WINDOW: Duration = Duration::from_millis(500);

/// Upper bound of statuses in one report.
const MAX_STATUSES: usize = 500;

/// 64ms reference time in 250us delta ticks.
const TICKS_PER_REFERENCE: i64 = 256;

/// Collects arrival times of packets carrying transport wide sequence numbers and
/// periodically reports them as transport wide congestion control feedback.
#[derive(Debug)]
pub(crate) struct TransportFeedbackGenerator {
    sender_ssrc: Ssrc,
    media_ssrc: Option<Ssrc>,
    time_zero: Option<Instant>,
    last_seq: Option<u64>,
    window_start: Option<u64>,
    arrivals: BTreeMap<u64, Instant>,
    feedback_count: u8,
    interval: Duration,
    last_process: Option<Instant>,
}

impl TransportFeedbackGenerator {
    pub fn new(sender_ssrc: Ssrc) -> Self {
        TransportFeedbackGenerator {
            sender_ssrc,
            media_ssrc: None,
            time_zero: None,
            last_seq: None,
            window_start: None,
            arrivals: BTreeMap::new(),
            feedback_count: 0,
            interval: DEFAULT_INTERVAL,
            last_process: None,
        }
    }

    pub fn on_received_packet(&mut self, ssrc: Ssrc, transport_seq: u16, now: Instant) {
        let seq = extend_u16(self.last_seq, transport_seq);
        if self.last_seq.map(|l| seq > l).unwrap_or(true) {
            self.last_seq = Some(seq);
        }

        if let Some(start) = self.window_start {
            if seq < start {
                trace!(seq, start, "Transport feedback for already reported packet");
                return;
            }
        }

        self.time_zero.get_or_insert(now);
        self.media_ssrc = Some(ssrc);
        self.arrivals.entry(seq).or_insert(now);
        self.window_start = Some(self.window_start.map(|s| s.min(seq)).unwrap_or(seq));

        self.drop_stale(now);
    }

    fn drop_stale(&mut self, now: Instant) {
        while let Some((seq, at)) = self.arrivals.first_key_value() {
            if now.saturating_duration_since(*at) <= BACK_WINDOW {
                break;
            }
            let seq = *seq;
            self.arrivals.remove(&seq);
            trace!(seq, "Drop stale arrival");
        }

        if let (Some(start), Some((first, _))) = (self.window_start, self.arrivals.first_key_value())
        {
            self.window_start = Some(start.max(*first));
        }
    }

    /// Adapt the interval so feedback uses a small share of the send bitrate.
    pub fn on_send_bandwidth_estimate_changed(&mut self, bitrate: Bitrate) {
        let share = bitrate.as_f64() * BANDWIDTH_SHARE;
        self.interval = if share <= 0.0 {
            MAX_INTERVAL
        } else {
            let secs = (REPORT_SIZE_BYTES * 8) as f64 / share;
            Duration::from_secs_f64(secs.min(MAX_INTERVAL.as_secs_f64()))
                .clamp(MIN_INTERVAL, MAX_INTERVAL)
        };
        trace!(interval = ?self.interval, "Transport feedback interval");
    }

    /// Send feedback if due. Returns the time until next time.
    pub fn process(&mut self, now: Instant, out: &mut Vec<Rtcp>) -> Duration {
        if let Some(last) = self.last_process {
            let next = last + self.interval;
            if now < next {
                return next - now;
            }
        }
        self.last_process = Some(now);
        self.send_feedback(out);
        self.interval
    }

    fn send_feedback(&mut self, out: &mut Vec<Rtcp>) {
        let (Some(start), Some(time_zero), Some(ssrc)) =
            (self.window_start, self.time_zero, self.media_ssrc)
        else {
            return;
        };
        let Some(end) = self.arrivals.last_key_value().map(|(k, _)| *k) else {
            return;
        };

        let ticks = |at: Instant| {
            (at.saturating_duration_since(time_zero).as_micros() / DELTA_UNIT.as_micros()) as i64
        };

        let mut seq = start;
        while seq <= end {
            // The report is anchored on its first received packet.
            let Some(first) = self.arrivals.range(seq..).next().map(|(_, at)| *at) else {
                break;
            };
            let reference = ticks(first) / TICKS_PER_REFERENCE;
            let mut prev = reference * TICKS_PER_REFERENCE;

            let base_seq = seq;
            let mut deltas = Vec::new();

            while seq <= end && deltas.len() < MAX_STATUSES {
                match self.arrivals.get(&seq) {
                    None => deltas.push(None),
                    Some(at) => {
                        let t = ticks(*at);
                        let Ok(delta) = i16::try_from(t - prev) else {
                            // Continue in a new report.
                            break;
                        };
                        deltas.push(Some(delta));
                        prev = t;
                    }
                }
                seq += 1;
            }

            let twcc = Twcc {
                sender_ssrc: self.sender_ssrc,
                ssrc,
                base_seq: base_seq as u16,
                reference_time: (reference as u32) & 0xff_ffff,
                feedback_count: self.feedback_count,
                deltas,
            };
            trace!(?twcc, "Send transport feedback");

            self.feedback_count = self.feedback_count.wrapping_add(1);
            out.push(Rtcp::Twcc(twcc));
        }

        self.arrivals.retain(|s, _| *s > end);
        self.window_start = Some(end + 1);
    }

    #[cfg(test)]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
