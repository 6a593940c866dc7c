//! Outgoing RTP streams: packetization, send queues and retransmission state.

mod history;
pub use history::{AckState, PacketHistory, StoredPacket};
pub use history::{DEFAULT_MAX_AGE, DEFAULT_MAX_PACKETS};

mod rate_limiter;
pub(crate) use rate_limiter::RateLimiter;

mod packetize;

mod send;
pub(crate) use send::Outgoing;
pub use send::{RtpPayloadState, StreamTx};

mod send_queue;

mod send_stats;
pub use send_stats::StreamTxStats;
