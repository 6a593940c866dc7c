use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allocation::LayerConstraints;
use crate::error::ConfigError;
use crate::rtp::{Bitrate, Extension, ExtensionMap, Pt, Ssrc, RTP_FIXED_HEADER_SIZE};
use crate::streams::{DEFAULT_MAX_AGE, DEFAULT_MAX_PACKETS};

/// Which lost packets are retransmitted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetransmissionMode {
    /// Never retransmit.
    Off,
    /// Only packets of the temporal base layer, or frames without temporal layers.
    BaseLayer,
    /// Every packet.
    #[default]
    AllLayers,
}

/// How frame ids in the dependency descriptor are numbered across streams.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameIdPolicy {
    /// Each stream numbers its own frames. Frame ids never collide across simulcast streams.
    #[default]
    Independent,
    /// All streams draw from one shared counter. For receivers that use a single frame id
    /// space for all simulcast streams.
    Shared,
}

/// Which feedback the receive side produces for send side bandwidth estimation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackMode {
    /// Transport wide congestion control feedback keyed by the transport sequence number
    /// header extension.
    #[default]
    TransportSequenceNumber,
    /// Congestion control feedback as of RFC 8888, keyed by SSRC and RTP sequence number.
    Rfc8888,
}

/// Configuration of a [`RtpVideoSender`][crate::RtpVideoSender].
///
/// ```
/// use rtpflow::SenderConfig;
///
/// let config = SenderConfig::new()
///     .set_ssrcs(vec![1.into(), 2.into()])
///     .set_rtx_ssrcs(vec![3.into(), 4.into()])
///     .set_payload_types(vec![96.into()]);
/// ```
///
/// Configs implement [`Clone`] to help create multiple senders.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub(crate) ssrcs: Vec<Ssrc>,
    pub(crate) rtx_ssrcs: Vec<Ssrc>,
    pub(crate) payload_types: Vec<Pt>,
    pub(crate) rtx_payload_types: Vec<Pt>,
    pub(crate) exts: ExtensionMap,
    pub(crate) max_packet_size: usize,
    pub(crate) transport_overhead: usize,
    pub(crate) retransmission_mode: RetransmissionMode,
    pub(crate) frame_id_policy: FrameIdPolicy,
    pub(crate) pacing: bool,
    pub(crate) pacing_factor: f64,
    pub(crate) initial_bitrate: Bitrate,
    pub(crate) adjust_for_overshoot: bool,
    pub(crate) headroom_fraction: f64,
    pub(crate) layers: Vec<LayerConstraints>,
    pub(crate) history_size: usize,
    pub(crate) history_max_age: Duration,
}

impl SenderConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        SenderConfig::default()
    }

    /// Media SSRCs, one per simulcast stream, in simulcast index order.
    pub fn ssrcs(&self) -> &[Ssrc] {
        &self.ssrcs
    }

    /// Set the media SSRCs, one per simulcast stream.
    pub fn set_ssrcs(mut self, ssrcs: Vec<Ssrc>) -> Self {
        self.ssrcs = ssrcs;
        self
    }

    /// Set the RTX SSRCs. Either empty (no RTX) or one per media SSRC.
    pub fn set_rtx_ssrcs(mut self, ssrcs: Vec<Ssrc>) -> Self {
        self.rtx_ssrcs = ssrcs;
        self
    }

    /// RTX SSRCs.
    pub fn rtx_ssrcs(&self) -> &[Ssrc] {
        &self.rtx_ssrcs
    }

    /// Set the media payload types. Either one shared by all streams, or one per stream.
    pub fn set_payload_types(mut self, pts: Vec<Pt>) -> Self {
        self.payload_types = pts;
        self
    }

    /// Set the RTX payload types. Empty means media payload type + 1. Otherwise one shared by
    /// all streams, or one per stream.
    pub fn set_rtx_payload_types(mut self, pts: Vec<Pt>) -> Self {
        self.rtx_payload_types = pts;
        self
    }

    /// The configured extension mapping.
    ///
    /// Defaults to abs-send-time on 2, transport-wide-cc on 3 and the dependency descriptor on 9.
    pub fn extension_map(&mut self) -> &mut ExtensionMap {
        &mut self.exts
    }

    /// Set the extension map replacing the existing.
    pub fn set_extension_map(mut self, exts: ExtensionMap) -> Self {
        self.exts = exts;
        self
    }

    /// Set an extension mapping.
    pub fn set_extension(mut self, id: u8, ext: Extension) -> Self {
        self.exts.set(id, ext);
        self
    }

    /// Max size of an RTP packet including header and extensions.
    ///
    /// Defaults to 1200.
    pub fn set_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Max size of an RTP packet.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Bytes added per packet below RTP (IP, UDP, SRTP).
    ///
    /// Defaults to 0. Can be changed later with `on_transport_overhead_changed`.
    pub fn set_transport_overhead(mut self, bytes: usize) -> Self {
        self.transport_overhead = bytes;
        self
    }

    /// Initial retransmission mode.
    ///
    /// Defaults to [`RetransmissionMode::AllLayers`].
    pub fn set_retransmission_mode(mut self, mode: RetransmissionMode) -> Self {
        self.retransmission_mode = mode;
        self
    }

    /// Frame id numbering across streams.
    ///
    /// Defaults to [`FrameIdPolicy::Independent`].
    pub fn set_frame_id_policy(mut self, policy: FrameIdPolicy) -> Self {
        self.frame_id_policy = policy;
        self
    }

    /// Frame id numbering across streams.
    pub fn frame_id_policy(&self) -> FrameIdPolicy {
        self.frame_id_policy
    }

    /// Toggle pacing.
    ///
    /// With pacing the packets of a frame are spread out at `pacing_factor` times the target
    /// bitrate. Without it every queued packet goes out immediately. Defaults to enabled.
    pub fn set_pacing(mut self, enabled: bool) -> Self {
        self.pacing = enabled;
        self
    }

    /// Multiple of the target bitrate used for pacing.
    ///
    /// Defaults to 2.5.
    pub fn set_pacing_factor(mut self, factor: f64) -> Self {
        self.pacing_factor = factor;
        self
    }

    /// Bitrate used for pacing before the first `on_bitrate_updated`. Retransmissions are
    /// not limited until then.
    ///
    /// Defaults to 300kbps.
    pub fn set_initial_bitrate(mut self, bitrate: Bitrate) -> Self {
        self.initial_bitrate = bitrate;
        self
    }

    /// Compensate for encoders overshooting their targets.
    ///
    /// Tracks encoded frame sizes and sent bytes, lowers the allocation of layers that overshoot
    /// and allows the allocation to rise into the network headroom up to the measured media rate.
    /// Defaults to disabled.
    pub fn set_adjust_for_overshoot(mut self, enabled: bool) -> Self {
        self.adjust_for_overshoot = enabled;
        self
    }

    /// Fraction of network overshoot tolerated before adjusting.
    ///
    /// Defaults to 0.1 (10%).
    pub fn set_headroom_fraction(mut self, fraction: f64) -> Self {
        self.headroom_fraction = fraction;
        self
    }

    /// Constraints per spatial (simulcast) layer, base layer first.
    pub fn set_layers(mut self, layers: Vec<LayerConstraints>) -> Self {
        self.layers = layers;
        self
    }

    /// Constraints per spatial layer.
    pub fn layers(&self) -> &[LayerConstraints] {
        &self.layers
    }

    /// Number of sent packets kept for retransmission per stream.
    ///
    /// Defaults to 600.
    pub fn set_history_size(mut self, packets: usize) -> Self {
        self.history_size = packets;
        self
    }

    /// Upper bound on how long sent packets are kept for retransmission.
    ///
    /// Defaults to 3 seconds.
    pub fn set_history_max_age(mut self, age: Duration) -> Self {
        self.history_max_age = age;
        self
    }

    pub(crate) fn payload_type(&self, index: usize) -> Option<Pt> {
        pick(&self.payload_types, index)
    }

    pub(crate) fn rtx(&self, index: usize) -> Option<(Ssrc, Pt)> {
        let ssrc = *self.rtx_ssrcs.get(index)?;
        let pt = pick(&self.rtx_payload_types, index)
            .or_else(|| self.payload_type(index).map(|p| p.rtx_default()))?;
        Some((ssrc, pt))
    }

    /// Check the lists line up.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let n = self.ssrcs.len();

        if n == 0 {
            return Err(ConfigError::NoStreams);
        }

        if !self.rtx_ssrcs.is_empty() && self.rtx_ssrcs.len() != n {
            return Err(ConfigError::RtxSsrcCount {
                expected: n,
                actual: self.rtx_ssrcs.len(),
            });
        }

        if self.payload_types.len() != 1 && self.payload_types.len() != n {
            return Err(ConfigError::PayloadTypeCount {
                expected: n,
                actual: self.payload_types.len(),
            });
        }

        let rtx_pts = self.rtx_payload_types.len();
        if rtx_pts > 1 && rtx_pts != n {
            return Err(ConfigError::RtxPayloadTypeCount {
                expected: n,
                actual: rtx_pts,
            });
        }

        let mut seen = HashSet::new();
        for ssrc in self.ssrcs.iter().chain(self.rtx_ssrcs.iter()) {
            if !seen.insert(*ssrc) {
                return Err(ConfigError::DuplicateSsrc(*ssrc));
            }
        }

        if self.max_packet_size <= RTP_FIXED_HEADER_SIZE {
            return Err(ConfigError::PacketSize(self.max_packet_size));
        }

        if let Some(i) = self.layers.iter().position(|l| !l.is_ordered()) {
            return Err(ConfigError::LayerConstraints(i));
        }

        Ok(())
    }
}

// One shared value or one per index.
fn pick<T: Copy>(list: &[T], index: usize) -> Option<T> {
    match list.len() {
        0 => None,
        1 => Some(list[0]),
        _ => list.get(index).copied(),
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            ssrcs: vec![],
            rtx_ssrcs: vec![],
            payload_types: vec![],
            rtx_payload_types: vec![],
            exts: ExtensionMap::standard(),
            max_packet_size: 1200,
            transport_overhead: 0,
            retransmission_mode: RetransmissionMode::default(),
            frame_id_policy: FrameIdPolicy::default(),
            pacing: true,
            pacing_factor: 2.5,
            initial_bitrate: Bitrate::kbps(300),
            adjust_for_overshoot: false,
            headroom_fraction: 0.1,
            layers: vec![],
            history_size: DEFAULT_MAX_PACKETS,
            history_max_age: DEFAULT_MAX_AGE,
        }
    }
}

/// Configuration of a [`ReceiveSideCongestionController`][crate::ReceiveSideCongestionController].
#[derive(Debug, Clone)]
pub struct CongestionConfig {
    pub(crate) feedback_mode: FeedbackMode,
    pub(crate) sender_ssrc: Ssrc,
    pub(crate) initial_bitrate: Bitrate,
    pub(crate) min_bitrate: Bitrate,
    pub(crate) max_bitrate: Bitrate,
}

impl CongestionConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        CongestionConfig::default()
    }

    /// Which feedback to produce.
    ///
    /// Defaults to [`FeedbackMode::TransportSequenceNumber`].
    pub fn set_feedback_mode(mut self, mode: FeedbackMode) -> Self {
        self.feedback_mode = mode;
        self
    }

    /// Which feedback to produce.
    pub fn feedback_mode(&self) -> FeedbackMode {
        self.feedback_mode
    }

    /// SSRC used as sender of feedback packets.
    ///
    /// Defaults to a random value.
    pub fn set_sender_ssrc(mut self, ssrc: Ssrc) -> Self {
        self.sender_ssrc = ssrc;
        self
    }

    /// Start value of the receive side estimate.
    ///
    /// Defaults to 300kbps.
    pub fn set_initial_bitrate(mut self, bitrate: Bitrate) -> Self {
        self.initial_bitrate = bitrate;
        self
    }

    /// Bounds of the receive side estimate.
    ///
    /// Defaults to 30kbps and 10gbps.
    pub fn set_bitrate_bounds(mut self, min: Bitrate, max: Bitrate) -> Self {
        self.min_bitrate = min;
        self.max_bitrate = max.max(min);
        self
    }
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            feedback_mode: FeedbackMode::default(),
            sender_ssrc: Ssrc::new(),
            initial_bitrate: Bitrate::kbps(300),
            min_bitrate: Bitrate::kbps(30),
            max_bitrate: Bitrate::gbps(10),
        }
    }
}
