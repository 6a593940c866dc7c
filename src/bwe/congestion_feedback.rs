use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::rtp::{extend_u16, Bitrate, Ccfb, CcfbBlock, CcfbMetric, Rtcp, Ssrc};
use crate::rtp::{ATO_OVERRANGE, ATO_UNITS_PER_SEC};
use crate::util::{already_happened, compact_ntp};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
const MIN_INTERVAL: Duration = Duration::from_millis(25);
const MAX_INTERVAL: Duration = Duration::from_millis(250);

const BANDWIDTH_SHARE: f64 = 0.05;

// IP, UDP, SRTP and header of the feedback packet, with room for a handful of reports.
const REPORT_SIZE_BYTES: usize = 20 + 8 + 10 + 12 + 40;

/// RFC 8888 caps the reports per block.
const MAX_REPORTS_PER_BLOCK: u64 = 16_384;

/// Received packets of one SSRC since the last feedback.
#[derive(Debug, Default)]
struct Tracker {
    last_seq: Option<u64>,
    last_reported: Option<u64>,
    arrivals: BTreeMap<u64, (Instant, u8)>,
}

impl Tracker {
    fn on_received(&mut self, seq: u16, ecn: u8, now: Instant) {
        let seq = extend_u16(self.last_seq, seq);
        if self.last_seq.map(|l| seq > l).unwrap_or(true) {
            self.last_seq = Some(seq);
        }

        if let Some(reported) = self.last_reported {
            if seq <= reported {
                trace!(seq, "Congestion feedback for already reported packet");
                return;
            }
        }

        self.arrivals.entry(seq).or_insert((now, ecn));
    }

    fn block(&mut self, ssrc: Ssrc, now: Instant) -> Option<CcfbBlock> {
        let (&first, _) = self.arrivals.first_key_value()?;
        let (&end, _) = self.arrivals.last_key_value()?;

        // Continue after the last report, unless that leaves too much to cover.
        let begin = match self.last_reported {
            Some(r) if end - r <= MAX_REPORTS_PER_BLOCK => r + 1,
            _ => first.max(end.saturating_sub(MAX_REPORTS_PER_BLOCK - 1)),
        };

        let metrics = (begin..=end)
            .map(|seq| {
                self.arrivals.get(&seq).map(|(at, ecn)| CcfbMetric {
                    ecn: *ecn,
                    ato: arrival_time_offset(now.saturating_duration_since(*at)),
                })
            })
            .collect();

        self.arrivals.clear();
        self.last_reported = Some(end);

        Some(CcfbBlock {
            ssrc,
            begin_seq: begin as u16,
            metrics,
        })
    }
}

/// Offset in 1/1024 seconds, capped at the overrange value.
fn arrival_time_offset(offset: Duration) -> u16 {
    let units = offset.as_micros() * ATO_UNITS_PER_SEC as u128 / 1_000_000;
    units.min(ATO_OVERRANGE as u128) as u16
}

/// Produces RTCP congestion control feedback as of RFC 8888.
#[derive(Debug)]
pub(crate) struct CcfbGenerator {
    sender_ssrc: Ssrc,
    trackers: HashMap<Ssrc, Tracker>,
    interval: Duration,
    last_process: Option<Instant>,
}

impl CcfbGenerator {
    pub fn new(sender_ssrc: Ssrc) -> Self {
        CcfbGenerator {
            sender_ssrc,
            trackers: HashMap::new(),
            interval: DEFAULT_INTERVAL,
            last_process: None,
        }
    }

    pub fn on_received_packet(&mut self, ssrc: Ssrc, seq: u16, now: Instant) {
        // ECN is not exposed to us, report Not-ECT.
        self.trackers
            .entry(ssrc)
            .or_default()
            .on_received(seq, 0, now);
    }

    pub fn on_send_bandwidth_estimate_changed(&mut self, bitrate: Bitrate) {
        let share = bitrate.as_f64() * BANDWIDTH_SHARE;
        self.interval = if share <= 0.0 {
            MAX_INTERVAL
        } else {
            let secs = (REPORT_SIZE_BYTES * 8) as f64 / share;
            Duration::from_secs_f64(secs.min(MAX_INTERVAL.as_secs_f64()))
                .clamp(MIN_INTERVAL, MAX_INTERVAL)
        };
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

        let mut ssrcs: Vec<_> = self.trackers.keys().copied().collect();
        ssrcs.sort();

        let blocks: Vec<_> = ssrcs
            .into_iter()
            .filter_map(|ssrc| self.trackers.get_mut(&ssrc)?.block(ssrc, now))
            .collect();

        if !blocks.is_empty() {
            let ccfb = Ccfb {
                sender_ssrc: self.sender_ssrc,
                blocks,
                report_timestamp: compact_ntp(now.saturating_duration_since(already_happened())),
            };
            trace!(?ccfb, "Send congestion control feedback");
            out.push(Rtcp::Ccfb(ccfb));
        }

        self.interval
    }
}
