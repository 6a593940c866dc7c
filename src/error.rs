use thiserror::Error;

use crate::rtp::Ssrc;

/// Reasons an encoded frame was not sent.
///
/// A rejected frame has no side effects, nothing is packetized or counted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SendError {
    /// Sending is disabled, see `RtpVideoSender::set_sending`.
    #[error("Sending is not enabled")]
    NotSending,

    /// The layer the frame belongs to is disabled by the latest layer allocation.
    #[error("Layer {0} is not active")]
    InactiveLayer(usize),

    /// The frame refers to a simulcast index we have no stream for.
    #[error("No stream for simulcast index {0}")]
    UnknownStream(usize),

    /// The headers leave no room for payload within the max packet size.
    #[error("Max packet size {0} leaves no room for payload")]
    NoPayloadRoom(usize),

    /// The sender that owned the frame handle is gone.
    #[error("Sender is dropped")]
    Disconnected,
}

/// Inconsistent sender or controller configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// At least one stream is required.
    #[error("No SSRC configured")]
    NoStreams,

    /// Each SSRC must be unique across media and RTX.
    #[error("Duplicate SSRC: {0}")]
    DuplicateSsrc(Ssrc),

    /// RTX SSRCs must be absent or one per media SSRC.
    #[error("Expected {expected} RTX SSRCs, got {actual}")]
    RtxSsrcCount {
        /// Number of media SSRCs.
        expected: usize,
        /// Number of RTX SSRCs given.
        actual: usize,
    },

    /// Payload types must be one shared or one per stream.
    #[error("Expected 1 or {expected} payload types, got {actual}")]
    PayloadTypeCount {
        /// Number of media SSRCs.
        expected: usize,
        /// Number of payload types given.
        actual: usize,
    },

    /// RTX payload types must be absent, one shared or one per stream.
    #[error("Expected 0, 1 or {expected} RTX payload types, got {actual}")]
    RtxPayloadTypeCount {
        /// Number of media SSRCs.
        expected: usize,
        /// Number of RTX payload types given.
        actual: usize,
    },

    /// The max packet size can't hold an RTP header.
    #[error("Max packet size too small: {0}")]
    PacketSize(usize),

    /// Layer constraints where min > target or target > max.
    #[error("Layer constraints for spatial layer {0} are not ordered min <= target <= max")]
    LayerConstraints(usize),
}
