//! A Sans I/O RTP video sender in Rust.
//!
//! rtpflow takes encoded video frames, one per simulcast layer, and turns them into paced RTP
//! packets for a [`Transport`] of your choice. It keeps a history of what was sent so it can
//! retransmit on NACK and on transport wide feedback, limits how much bandwidth retransmissions
//! may use, and splits a target bitrate over the layers.
//!
//! For the receiving end the crate has a [`ReceiveSideCongestionController`], which turns
//! arriving packets into feedback for the remote sender: either transport wide congestion
//! control reports (TWCC), RFC 8888 congestion control feedback (CCFB) or a REMB estimate.
//!
//! # Sans I/O
//!
//! Nothing in here does network talking, spawns threads or reads the clock. Time is handed in
//! as `now: Instant` and the owner drives the sender with two calls:
//!
//! * [`RtpVideoSender::poll_timeout`] tells when the sender next needs to be woken up.
//! * [`RtpVideoSender::handle_timeout`] does the work that is due: packetize frames posted
//!   through a [`FrameHandle`], send what the pacer allows and retry deferred retransmissions.
//!
//! Incoming RTCP is given to [`RtpVideoSender::deliver_rtcp`] and new bitrate targets to
//! [`RtpVideoSender::on_bitrate_updated`].
//!
//! ```
//! use std::time::{Duration, Instant};
//!
//! use rtpflow::allocation::BitrateUpdate;
//! use rtpflow::rtp::Bitrate;
//! use rtpflow::{EncodedImage, FrameType, PacketOptions, RtpVideoSender};
//! use rtpflow::{SenderConfig, Transport};
//!
//! struct Socket(Vec<Vec<u8>>);
//!
//! impl Transport for Socket {
//!     fn send_rtp(&mut self, packet: &[u8], _options: &PacketOptions) -> bool {
//!         self.0.push(packet.to_vec());
//!         true
//!     }
//! }
//!
//! let config = SenderConfig::new()
//!     .set_ssrcs(vec![1111.into()])
//!     .set_rtx_ssrcs(vec![2222.into()])
//!     .set_payload_types(vec![96.into()]);
//!
//! let mut sender = RtpVideoSender::new(config, Default::default(), Socket(vec![])).unwrap();
//!
//! let now = Instant::now();
//! sender.set_sending(true, now);
//! sender.on_bitrate_updated(BitrateUpdate::new(Bitrate::kbps(800)), 30.0, now);
//!
//! let frame = EncodedImage::new(vec![0; 3000], FrameType::Key, 90_000, now);
//! let sent = sender.on_encoded_image(frame, now).unwrap();
//! assert!(sent.packets > 1);
//!
//! // Run the pacer until everything is out.
//! let mut now = now;
//! for _ in 0..100 {
//!     if sender.transport().0.len() == sent.packets {
//!         break;
//!     }
//!     now = sender
//!         .poll_timeout()
//!         .unwrap_or(now)
//!         .max(now + Duration::from_millis(1));
//!     sender.handle_timeout(now);
//! }
//! assert_eq!(sender.transport().0.len(), sent.packets);
//! ```
//!
//! # Feedback
//!
//! Which kind of congestion feedback the remote end sends is configured with
//! [`CongestionConfig::set_feedback_mode`] on the receiving side. The sender accepts all of
//! them: NACKs trigger retransmissions, transport feedback (TWCC or CCFB) marks packets as
//! acknowledged or lost, and lost original packets that the remote end has no way of NACKing
//! are retransmitted early.
//!
//! # Logging
//!
//! The crate logs through [tracing][tracing]. Packet level events are on `trace`, state changes
//! on `debug` and the occasional odd input on `warn`.
//!
//! [tracing]: https://docs.rs/tracing

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::bool_to_int_with_if)]
#![allow(clippy::assertions_on_constants)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::get_first)]
#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod allocation;

mod bwe;
pub use bwe::{BandwidthUsage, EstimatorKind};
pub use bwe::{ReceiveSideCongestionController, ReceivedPacket};

mod config;
pub use config::{CongestionConfig, FeedbackMode, FrameIdPolicy};
pub use config::{RetransmissionMode, SenderConfig};

mod error;
pub use error::{ConfigError, SendError};

mod pacer;

/// Low level RTP and RTCP types.
pub mod rtp;

mod sender;
pub use sender::{EncodedImage, FrameSent, FrameType, GenericFrameInfo};
pub use sender::{FeedbackSummary, PacketFeedback};
pub use sender::{FrameHandle, PacketOptions, RtpVideoSender, Transport};

mod streams;
pub use streams::{AckState, PacketHistory, StoredPacket};
pub use streams::{RtpPayloadState, StreamTx, StreamTxStats};

mod util;

#[cfg(test)]
mod test {
    use std::panic::UnwindSafe;

    use super::*;

    struct Nop;

    impl Transport for Nop {
        fn send_rtp(&mut self, _packet: &[u8], _options: &PacketOptions) -> bool {
            true
        }
    }

    fn sender() -> RtpVideoSender<Nop> {
        let config = SenderConfig::new()
            .set_ssrcs(vec![1.into()])
            .set_payload_types(vec![96.into()]);
        RtpVideoSender::new(config, Default::default(), Nop).unwrap()
    }

    #[test]
    fn sender_is_send() {
        fn is_send<T: Send>(_t: T) {}
        is_send(sender());
        is_send(sender().frame_handle());
    }

    #[test]
    fn sender_is_unwind_safe() {
        fn is_unwind_safe<T: UnwindSafe>(_t: T) {}
        is_unwind_safe(sender().frame_handle());
    }

    #[test]
    fn controller_is_send_and_sync() {
        fn is_send<T: Send>(_t: &T) {}
        fn is_sync<T: Sync>(_t: &T) {}
        let c = ReceiveSideCongestionController::new(CongestionConfig::default());
        is_send(&c);
        is_sync(&c);
    }
}
