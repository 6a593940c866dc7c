use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::rtp::{FrameDependencyStructure, Ssrc};

/// Whether a frame can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Key frame, decodable without references.
    Key,
    /// Frame referencing earlier frames.
    Delta,
}

/// Generic codec information driving the dependency descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericFrameInfo {
    /// Index of the template in the dependency structure that describes this frame.
    pub template_index: u8,
    /// The dependency structure, attached to key frames.
    ///
    /// Delta frames refer to the structure of the latest key frame.
    pub structure: Option<FrameDependencyStructure>,
}

/// An encoded video frame as produced by an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Encoded payload.
    pub data: Vec<u8>,
    /// Key or delta.
    pub frame_type: FrameType,
    /// RTP timestamp of the frame, 90kHz.
    pub rtp_timestamp: u32,
    /// When the frame was captured.
    pub capture_time: Instant,
    /// Which stream (simulcast layer) the frame is for.
    pub simulcast_index: usize,
    /// Temporal layer, if the encoder produces several.
    pub temporal_index: Option<u8>,
    /// Spatial layer, if the encoder produces several.
    pub spatial_index: Option<u8>,
    /// Information for the dependency descriptor extension.
    pub generic: Option<GenericFrameInfo>,
}

impl EncodedImage {
    /// A frame for stream 0 without layer information.
    pub fn new(
        data: Vec<u8>,
        frame_type: FrameType,
        rtp_timestamp: u32,
        capture_time: Instant,
    ) -> Self {
        EncodedImage {
            data,
            frame_type,
            rtp_timestamp,
            capture_time,
            simulcast_index: 0,
            temporal_index: None,
            spatial_index: None,
            generic: None,
        }
    }

    /// Set the simulcast index.
    pub fn with_simulcast_index(mut self, index: usize) -> Self {
        self.simulcast_index = index;
        self
    }

    /// Set the temporal layer.
    pub fn with_temporal_index(mut self, index: u8) -> Self {
        self.temporal_index = Some(index);
        self
    }

    /// Attach generic frame information.
    pub fn with_generic(mut self, generic: GenericFrameInfo) -> Self {
        self.generic = Some(generic);
        self
    }

    /// Whether this is a key frame.
    pub fn is_key(&self) -> bool {
        self.frame_type == FrameType::Key
    }

    /// Whether this frame belongs to the temporal base layer.
    ///
    /// Frames without temporal information are considered base layer.
    pub fn is_base_layer(&self) -> bool {
        matches!(self.temporal_index, None | Some(0))
    }
}

/// Result of a frame that was accepted for sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSent {
    /// SSRC of the stream the frame was packetized on.
    pub ssrc: Ssrc,
    /// RTP timestamp of the packets.
    pub rtp_timestamp: u32,
    /// Frame id assigned to the frame.
    pub frame_id: i64,
    /// Number of packets the frame was split into.
    pub packets: usize,
}
