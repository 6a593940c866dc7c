use std::time::{Duration, Instant};

use super::headroom::{adjusted_bitrate, utilization_factor};
use super::{LayerConstraints, VideoBitrateAllocation};
use super::{MAX_SPATIAL_LAYERS, MAX_TEMPORAL_LAYERS};
use crate::rtp::{Bitrate, DataSize};
use crate::util::value_history::ValueHistory;

const WINDOW: Duration = Duration::from_secs(3);

// Too little data before this to say anything about utilization.
const MIN_WINDOW: Duration = Duration::from_millis(500);

/// Tracks how much the encoder produces and how much goes on the wire, relative to what
/// was allocated.
#[derive(Debug)]
pub struct UtilizationTracker {
    frame_bytes: Vec<ValueHistory<u64>>,
    sent_bytes: ValueHistory<u64>,
    allocation: VideoBitrateAllocation,
    target: Bitrate,
    started: Option<Instant>,
}

impl UtilizationTracker {
    /// New tracker over a 3 second window.
    pub fn new() -> Self {
        UtilizationTracker {
            frame_bytes: (0..MAX_SPATIAL_LAYERS)
                .map(|_| ValueHistory::new(WINDOW))
                .collect(),
            sent_bytes: ValueHistory::new(WINDOW),
            allocation: VideoBitrateAllocation::default(),
            target: Bitrate::ZERO,
            started: None,
        }
    }

    /// The allocation and network target that utilization is measured against.
    pub fn set_allocation(&mut self, allocation: VideoBitrateAllocation, target: Bitrate) {
        self.allocation = allocation;
        self.target = target;
    }

    /// An encoded frame of `bytes` for spatial layer `spatial`.
    pub fn on_encoded_frame(&mut self, spatial: usize, bytes: usize, now: Instant) {
        let Some(history) = self.frame_bytes.get_mut(spatial) else {
            return;
        };
        self.started.get_or_insert(now);
        history.push(now, bytes as u64);
    }

    /// Bytes handed to the transport, media and retransmissions.
    pub fn on_bytes_sent(&mut self, bytes: usize, now: Instant) {
        self.started.get_or_insert(now);
        self.sent_bytes.push(now, bytes as u64);
    }

    fn purge(&mut self, now: Instant) {
        for h in &mut self.frame_bytes {
            h.purge_old(now);
        }
        self.sent_bytes.purge_old(now);
    }

    fn window(&self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.started?);
        if elapsed < MIN_WINDOW {
            return None;
        }
        Some(elapsed.min(WINDOW))
    }

    fn rate(bytes: u64, window: Duration) -> Bitrate {
        DataSize::bytes(bytes) / window
    }

    /// The rate the encoder produces over all layers.
    ///
    /// Zero until enough time has passed.
    pub fn media_rate(&mut self, now: Instant) -> Bitrate {
        self.purge(now);
        let Some(window) = self.window(now) else {
            return Bitrate::ZERO;
        };
        let bytes = self.frame_bytes.iter().map(|h| h.sum()).sum();
        Self::rate(bytes, window)
    }

    /// Produced over allocated bitrate of one spatial layer.
    pub fn media_utilization(&mut self, spatial: usize, now: Instant) -> Option<f64> {
        self.purge(now);
        let window = self.window(now)?;
        let allocated = self.allocation.spatial_layer_sum(spatial);
        if allocated == 0 {
            return None;
        }
        let bytes = self.frame_bytes.get(spatial)?.sum();
        Some(Self::rate(bytes, window).as_f64() / allocated as f64)
    }

    /// Sent over targeted bitrate.
    pub fn network_utilization(&mut self, now: Instant) -> Option<f64> {
        self.purge(now);
        let window = self.window(now)?;
        if self.target.is_zero() {
            return None;
        }
        let bytes = self.sent_bytes.sum();
        Some(Self::rate(bytes, window).as_f64() / self.target.as_f64())
    }

    /// Lower the layers of `allocation` that overshoot.
    pub fn adjust(
        &mut self,
        allocation: &VideoBitrateAllocation,
        layers: &[LayerConstraints],
        headroom_fraction: f64,
        now: Instant,
    ) -> VideoBitrateAllocation {
        let network = self.network_utilization(now).unwrap_or(1.0);
        let mut adjusted = *allocation;

        for spatial in allocation.active_spatial_layers() {
            let media = self.media_utilization(spatial, now).unwrap_or(1.0);
            let factor = utilization_factor(media, network, headroom_fraction);
            if factor <= 1.0 {
                continue;
            }

            let sum = allocation.spatial_layer_sum(spatial);
            let min = layers
                .get(spatial)
                .map(|l| l.min)
                .unwrap_or(Bitrate::ZERO);
            let new_sum = adjusted_bitrate(Bitrate::new(sum), factor, min);
            let new_sum = new_sum.as_f64().floor() as u64;

            debug!(spatial, factor, from = sum, to = new_sum, "Adjust for overshoot");
            rescale(&mut adjusted, spatial, sum, new_sum);
        }

        adjusted
    }
}

impl Default for UtilizationTracker {
    fn default() -> Self {
        Self::new()
    }
}

// Scale the temporal layers of one spatial layer from `from` to `to` keeping the proportions.
fn rescale(allocation: &mut VideoBitrateAllocation, spatial: usize, from: u64, to: u64) {
    if from == 0 {
        return;
    }

    let used: Vec<usize> = (0..MAX_TEMPORAL_LAYERS)
        .filter(|t| allocation.get(spatial, *t).is_some())
        .collect();

    let mut total = 0;
    for (i, t) in used.iter().enumerate() {
        let part = if i == used.len() - 1 {
            to - total
        } else {
            let v = allocation.get(spatial, *t).unwrap_or(0);
            (v as f64 * to as f64 / from as f64).floor() as u64
        };
        total += part;
        allocation.set(spatial, *t, part);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn one_layer(bps: u64) -> VideoBitrateAllocation {
        let mut a = VideoBitrateAllocation::default();
        a.set(0, 0, bps * 6 / 10);
        a.set(0, 1, bps * 4 / 10);
        a
    }

    // Feed 30fps frames and the same bytes on the wire for 3 seconds.
    fn feed(t: &mut UtilizationTracker, start: Instant, media_bps: u64, wire_bps: u64) -> Instant {
        let mut now = start;
        for _ in 0..90 {
            t.on_encoded_frame(0, (media_bps / 8 / 30) as usize, now);
            t.on_bytes_sent((wire_bps / 8 / 30) as usize, now);
            now += Duration::from_millis(1000 / 30);
        }
        now
    }

    #[test]
    fn no_data_no_utilization() {
        let now = Instant::now();
        let mut t = UtilizationTracker::new();
        assert_eq!(t.media_rate(now), Bitrate::ZERO);
        assert_eq!(t.network_utilization(now), None);

        t.on_bytes_sent(1000, now);
        assert_eq!(t.network_utilization(now + Duration::from_millis(100)), None);
    }

    #[test]
    fn on_target_no_adjustment() {
        let start = Instant::now();
        let mut t = UtilizationTracker::new();
        let alloc = one_layer(300_000);
        t.set_allocation(alloc, Bitrate::kbps(300));

        let now = feed(&mut t, start, 300_000, 330_000);
        let layers = [LayerConstraints::new(
            Bitrate::kbps(30),
            Bitrate::kbps(300),
            Bitrate::kbps(300),
        )];

        // Network 10% over is within 10% headroom.
        let adjusted = t.adjust(&alloc, &layers, 0.1, now);
        let sum = adjusted.spatial_layer_sum(0);
        assert!(sum >= 290_000, "{sum}");
    }

    #[test]
    fn media_overshoot_lowers_layer() {
        let start = Instant::now();
        let mut t = UtilizationTracker::new();
        let alloc = one_layer(300_000);
        t.set_allocation(alloc, Bitrate::kbps(300));

        let now = feed(&mut t, start, 450_000, 450_000);
        let media_rate = t.media_rate(now);
        assert!(media_rate > Bitrate::kbps(400), "{media_rate}");

        let layers = [LayerConstraints::new(
            Bitrate::kbps(30),
            Bitrate::kbps(300),
            Bitrate::kbps(300),
        )];
        let adjusted = t.adjust(&alloc, &layers, 0.1, now);
        let sum = adjusted.spatial_layer_sum(0);
        assert!(sum < 250_000, "{sum}");
        assert!(adjusted.get(0, 1).is_some());
    }

    #[test]
    fn rescale_keeps_layers() {
        let mut a = one_layer(100_000);
        rescale(&mut a, 0, 100_000, 50_001);
        assert_eq!(a.get(0, 0), Some(30_000));
        assert_eq!(a.get(0, 1), Some(20_001));
    }
}
