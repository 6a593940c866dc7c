//! Distribution of a target bitrate over spatial and temporal layers.

use serde::{Deserialize, Serialize};

use crate::rtp::Bitrate;

mod distributor;
pub use distributor::allocate;

mod headroom;
pub use headroom::{adjusted_bitrate, headroom_ceiling, utilization_factor};
pub use headroom::{packets_per_frame_estimate, payload_bitrate};

mod utilization;
pub use utilization::UtilizationTracker;

/// Max number of spatial (simulcast) layers in an allocation.
pub const MAX_SPATIAL_LAYERS: usize = 5;

/// Max number of temporal layers per spatial layer.
pub const MAX_TEMPORAL_LAYERS: usize = 4;

/// Bitrate constraints of one spatial layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerConstraints {
    /// Below this the layer is not worth sending.
    pub min: Bitrate,
    /// The layer is raised to this before any layer goes above its target.
    pub target: Bitrate,
    /// Never allocated more than this.
    pub max: Bitrate,
    /// Number of temporal layers, 1 to 4.
    pub temporal_layers: u8,
    /// Whether the layer is configured for sending.
    pub active: bool,
}

impl LayerConstraints {
    /// An active layer without temporal layers.
    pub fn new(min: Bitrate, target: Bitrate, max: Bitrate) -> Self {
        LayerConstraints {
            min,
            target,
            max,
            temporal_layers: 1,
            active: true,
        }
    }

    /// Set the number of temporal layers.
    pub fn with_temporal_layers(mut self, n: u8) -> Self {
        self.temporal_layers = n;
        self
    }

    /// Set whether the layer is active.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub(crate) fn is_ordered(&self) -> bool {
        self.min <= self.target && self.target <= self.max
    }
}

/// Bitrate per spatial and temporal layer, in bits per second.
///
/// An absent entry means the layer is not sendable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoBitrateAllocation {
    bitrates: [[Option<u64>; MAX_TEMPORAL_LAYERS]; MAX_SPATIAL_LAYERS],
}

impl VideoBitrateAllocation {
    /// Bitrate of one layer, if allocated.
    pub fn get(&self, spatial: usize, temporal: usize) -> Option<u64> {
        *self.bitrates.get(spatial)?.get(temporal)?
    }

    /// Set the bitrate of one layer. Returns `false` if the indexes are out of range.
    pub fn set(&mut self, spatial: usize, temporal: usize, bps: u64) -> bool {
        let Some(slot) = self
            .bitrates
            .get_mut(spatial)
            .and_then(|s| s.get_mut(temporal))
        else {
            return false;
        };
        *slot = Some(bps);
        true
    }

    /// Whether any temporal layer of the spatial layer is allocated.
    pub fn is_spatial_layer_used(&self, spatial: usize) -> bool {
        self.bitrates
            .get(spatial)
            .map(|s| s.iter().any(|t| t.is_some()))
            .unwrap_or(false)
    }

    /// Sum of all temporal layers of a spatial layer.
    pub fn spatial_layer_sum(&self, spatial: usize) -> u64 {
        self.bitrates
            .get(spatial)
            .map(|s| s.iter().flatten().sum())
            .unwrap_or(0)
    }

    /// Sum of all layers.
    pub fn sum(&self) -> u64 {
        (0..MAX_SPATIAL_LAYERS)
            .map(|s| self.spatial_layer_sum(s))
            .sum()
    }

    /// Sum of all layers as bitrate.
    pub fn sum_bitrate(&self) -> Bitrate {
        Bitrate::new(self.sum())
    }

    /// Indexes of allocated spatial layers.
    pub fn active_spatial_layers(&self) -> Vec<usize> {
        (0..MAX_SPATIAL_LAYERS)
            .filter(|s| self.is_spatial_layer_used(*s))
            .collect()
    }

    /// Whether nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.active_spatial_layers().is_empty()
    }
}

/// A new target from the congestion controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateUpdate {
    /// Bitrate to aim for.
    pub target: Bitrate,
    /// Network capacity that is available but not yet confirmed.
    pub headroom: Option<Bitrate>,
}

impl BitrateUpdate {
    /// An update without headroom.
    pub fn new(target: Bitrate) -> Self {
        BitrateUpdate {
            target,
            headroom: None,
        }
    }

    /// Set the headroom.
    pub fn with_headroom(mut self, headroom: Bitrate) -> Self {
        self.headroom = Some(headroom);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocation_sums() {
        let mut a = VideoBitrateAllocation::default();
        assert!(a.is_empty());
        assert!(a.set(0, 0, 100));
        assert!(a.set(0, 1, 50));
        assert!(a.set(2, 0, 300));
        assert!(!a.set(MAX_SPATIAL_LAYERS, 0, 1));
        assert!(!a.set(0, MAX_TEMPORAL_LAYERS, 1));

        assert_eq!(a.get(0, 1), Some(50));
        assert_eq!(a.get(1, 0), None);
        assert_eq!(a.get(9, 9), None);
        assert_eq!(a.spatial_layer_sum(0), 150);
        assert_eq!(a.sum(), 450);
        assert_eq!(a.active_spatial_layers(), vec![0, 2]);
    }
}
