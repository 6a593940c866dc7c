use super::{LayerConstraints, VideoBitrateAllocation};
use super::{MAX_SPATIAL_LAYERS, MAX_TEMPORAL_LAYERS};
use crate::rtp::Bitrate;

// Share of the spatial layer rate per temporal layer, indexed by number of temporal layers.
const TEMPORAL_SPLIT: [&[f64]; MAX_TEMPORAL_LAYERS] = [
    &[1.0],
    &[0.6, 0.4],
    &[0.4, 0.2, 0.4],
    &[0.25, 0.15, 0.2, 0.4],
];

/// Distribute `ceiling` over the layers, base layer first.
///
/// A layer is only enabled if its min fits in what is left after the layers below it. Layers
/// above the first one that doesn't fit are starved. Enabled layers are then raised toward their
/// target in order, and finally toward their max in order.
///
/// The sum of the allocation never exceeds `ceiling` and no layer exceeds its max.
pub fn allocate(ceiling: Bitrate, layers: &[LayerConstraints]) -> VideoBitrateAllocation {
    let mut allocation = VideoBitrateAllocation::default();

    let budget = ceiling.as_f64().max(0.0).floor() as u64;
    if budget == 0 {
        return allocation;
    }

    // (spatial index, min, target, max)
    let active: Vec<_> = layers
        .iter()
        .take(MAX_SPATIAL_LAYERS)
        .enumerate()
        .filter(|(_, l)| l.active)
        .map(|(i, l)| {
            let min = bps(l.min);
            let max = bps(l.max).max(min);
            let target = bps(l.target).clamp(min, max);
            (i, min, target, max)
        })
        .collect();

    let mut left = budget;
    let mut rates: Vec<u64> = vec![];

    for (i, min, _, _) in &active {
        if *min > left {
            trace!(spatial = i, min, left, "Layer starved");
            break;
        }
        rates.push(*min);
        left -= min;
    }

    for (rate, (_, _, target, _)) in rates.iter_mut().zip(&active) {
        let add = target.saturating_sub(*rate).min(left);
        *rate += add;
        left -= add;
    }

    for (rate, (_, _, _, max)) in rates.iter_mut().zip(&active) {
        let add = max.saturating_sub(*rate).min(left);
        *rate += add;
        left -= add;
    }

    for (rate, (spatial, _, _, _)) in rates.into_iter().zip(&active) {
        let temporal_layers = layers[*spatial].temporal_layers;
        split_temporal(&mut allocation, *spatial, rate, temporal_layers);
    }

    allocation
}

fn split_temporal(
    allocation: &mut VideoBitrateAllocation,
    spatial: usize,
    rate: u64,
    temporal_layers: u8,
) {
    let n = (temporal_layers as usize).clamp(1, MAX_TEMPORAL_LAYERS);
    let split = TEMPORAL_SPLIT[n - 1];

    let mut used = 0;
    for (t, share) in split.iter().enumerate() {
        let part = if t == n - 1 {
            // Rounding remainder goes to the highest layer.
            rate - used
        } else {
            (rate as f64 * share).floor() as u64
        };
        used += part;
        allocation.set(spatial, t, part);
    }
}

fn bps(b: Bitrate) -> u64 {
    b.as_f64().max(0.0).floor() as u64
}

#[cfg(test)]
mod test {
    use super::*;

    fn simulcast() -> Vec<LayerConstraints> {
        vec![
            LayerConstraints::new(Bitrate::kbps(30), Bitrate::kbps(150), Bitrate::kbps(200)),
            LayerConstraints::new(Bitrate::kbps(150), Bitrate::kbps(500), Bitrate::kbps(700)),
            LayerConstraints::new(Bitrate::kbps(600), Bitrate::kbps(2500), Bitrate::kbps(2500)),
        ]
    }

    #[test]
    fn zero_target_is_empty() {
        let a = allocate(Bitrate::ZERO, &simulcast());
        assert!(a.is_empty());
        assert_eq!(a.sum(), 0);
    }

    #[test]
    fn starve_upper_layers() {
        // Enough for layer 0 and 1 min, not layer 2.
        let a = allocate(Bitrate::kbps(400), &simulcast());
        assert_eq!(a.active_spatial_layers(), vec![0, 1]);
        // Both raised to target first: 150 + 250 of the 350 needed for layer 1.
        assert_eq!(a.spatial_layer_sum(0), 150_000);
        assert_eq!(a.spatial_layer_sum(1), 250_000);
        assert!(!a.is_spatial_layer_used(2));
    }

    #[test]
    fn below_base_min() {
        let a = allocate(Bitrate::kbps(20), &simulcast());
        assert!(a.is_empty());
    }

    #[test]
    fn up_to_max() {
        let a = allocate(Bitrate::mbps(10), &simulcast());
        assert_eq!(a.spatial_layer_sum(0), 200_000);
        assert_eq!(a.spatial_layer_sum(1), 700_000);
        assert_eq!(a.spatial_layer_sum(2), 2_500_000);
    }

    #[test]
    fn inactive_layer_skipped() {
        let mut layers = simulcast();
        layers[0].active = false;
        let a = allocate(Bitrate::kbps(700), &layers);
        assert!(!a.is_spatial_layer_used(0));
        // Layer 2 min doesn't fit next to layer 1 min, layer 1 is raised through target to max.
        assert_eq!(a.spatial_layer_sum(1), 700_000);
        assert!(!a.is_spatial_layer_used(2));
    }

    #[test]
    fn temporal_split() {
        let layers = vec![LayerConstraints::new(
            Bitrate::kbps(100),
            Bitrate::kbps(1000),
            Bitrate::kbps(1000),
        )
        .with_temporal_layers(3)];
        let a = allocate(Bitrate::new(100_001), &layers);
        assert_eq!(a.get(0, 0), Some(40_000));
        assert_eq!(a.get(0, 1), Some(20_000));
        assert_eq!(a.get(0, 2), Some(40_001));
        assert_eq!(a.get(0, 3), None);
    }

    #[test]
    fn invariants_hold() {
        let layers = simulcast();
        let min_sum: u64 = layers.iter().map(|l| bps(l.min)).sum();

        for kbps in (0..5000).step_by(37) {
            let target = Bitrate::kbps(kbps);
            let a = allocate(target, &layers);

            assert!(a.sum() <= kbps * 1000, "sum above target at {kbps}");

            for (i, l) in layers.iter().enumerate() {
                let sum = a.spatial_layer_sum(i);
                assert!(sum <= bps(l.max), "layer {i} above max at {kbps}");
                if kbps * 1000 >= min_sum {
                    assert!(sum >= bps(l.min), "layer {i} below min at {kbps}");
                }
            }
        }
    }
}
