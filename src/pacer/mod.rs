//! Pacing of queued packets onto the network.

use std::time::Instant;

use crate::rtp::{Bitrate, DataSize};

mod null;
use null::NullPacer;

mod leaky;
use leaky::LeakyBucketPacer;

mod queue;
pub(crate) use queue::{QueuePriority, QueueSnapshot, QueueState};

#[allow(clippy::large_enum_variant)]
pub(crate) enum PacerImpl {
    Null(NullPacer),
    LeakyBucket(LeakyBucketPacer),
}

impl PacerImpl {
    pub fn leaky_bucket(rate: Bitrate) -> PacerImpl {
        PacerImpl::LeakyBucket(LeakyBucketPacer::new(rate))
    }

    pub fn null() -> PacerImpl {
        PacerImpl::Null(NullPacer::default())
    }
}

impl Pacer for PacerImpl {
    fn set_pacing_rate(&mut self, pacing_bitrate: Bitrate) {
        match self {
            PacerImpl::Null(v) => v.set_pacing_rate(pacing_bitrate),
            PacerImpl::LeakyBucket(v) => v.set_pacing_rate(pacing_bitrate),
        }
    }

    fn poll_timeout(&self) -> Option<Instant> {
        match self {
            PacerImpl::Null(v) => v.poll_timeout(),
            PacerImpl::LeakyBucket(v) => v.poll_timeout(),
        }
    }

    fn handle_timeout(&mut self, now: Instant, iter: impl Iterator<Item = QueueState>) {
        match self {
            PacerImpl::Null(v) => v.handle_timeout(now, iter),
            PacerImpl::LeakyBucket(v) => v.handle_timeout(now, iter),
        }
    }

    fn poll_queue(&mut self) -> Option<usize> {
        match self {
            PacerImpl::Null(v) => v.poll_queue(),
            PacerImpl::LeakyBucket(v) => v.poll_queue(),
        }
    }

    fn register_send(&mut self, now: Instant, packet_size: DataSize, from: usize) {
        match self {
            PacerImpl::Null(v) => v.register_send(now, packet_size, from),
            PacerImpl::LeakyBucket(v) => v.register_send(now, packet_size, from),
        }
    }

    fn clear(&mut self) {
        match self {
            PacerImpl::Null(v) => v.clear(),
            PacerImpl::LeakyBucket(v) => v.clear(),
        }
    }
}

/// A packet Pacer.
///
/// The pacer is responsible for ensuring correct pacing of packets onto the network at a given
/// bitrate. It never holds packets itself, it decides which stream queue to poll next.
pub(crate) trait Pacer {
    /// Set the pacing bitrate. The pacing rate can be exceeded if required to drain excessively
    /// long packet queues.
    fn set_pacing_rate(&mut self, pacing_bitrate: Bitrate);

    /// Poll for a timeout.
    fn poll_timeout(&self) -> Option<Instant>;

    /// Handle time moving forward, should be called periodically as indicated by
    /// [`Pacer::poll_timeout`] and whenever the queues change.
    fn handle_timeout(&mut self, now: Instant, iter: impl Iterator<Item = QueueState>);

    /// Determines which stream queue to poll, if any.
    fn poll_queue(&mut self) -> Option<usize>;

    /// Register a packet having been sent.
    ///
    /// **MUST** be called each time [`Pacer::poll_queue`] produces a stream and that
    /// stream produced a packet.
    fn register_send(&mut self, now: Instant, packet_size: DataSize, from: usize);

    /// Forget any queue decision. Used when the queues are emptied.
    fn clear(&mut self);
}
