//! Receive side congestion control.
//!
//! Incoming RTP packets feed one of three paths, decided per packet:
//!
//! * Packets with a transport wide sequence number are reported back to the sender as
//!   transport wide congestion control feedback. The sender estimates bandwidth.
//! * With [`FeedbackMode::Rfc8888`] all packets are reported as RFC 8888 congestion control
//!   feedback instead.
//! * Otherwise the bandwidth is estimated here from delay variations and sent as REMB.
//!
//! The controller is shared between the thread receiving packets and the thread driving
//! time, hence `&self` and internal locks.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::{CongestionConfig, FeedbackMode};
use crate::rtp::{Bitrate, Rtcp, RtpHeader, Ssrc};

mod congestion_feedback;
mod estimator;
mod inter_arrival;
mod rate_control;
mod remb_throttler;
mod transport_feedback;
mod trendline;

use congestion_feedback::CcfbGenerator;
use estimator::RemoteBitrateEstimator;
use remb_throttler::RembThrottler;
use transport_feedback::TransportFeedbackGenerator;

pub use estimator::EstimatorKind;

/// Consecutive packets without abs-send-time before going back to the single stream estimator.
const ABS_SEND_TIME_SWITCH_THRESHOLD: u32 = 30;

/// State of the delay based overuse detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthUsage {
    /// Queuing delay is growing.
    Overuse,
    /// No trend in the queuing delay.
    Normal,
    /// Queues are draining.
    Underuse,
}

impl fmt::Display for BandwidthUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandwidthUsage::Overuse => write!(f, "overuse"),
            BandwidthUsage::Normal => write!(f, "normal"),
            BandwidthUsage::Underuse => write!(f, "underuse"),
        }
    }
}

/// What the congestion controller needs to know about a received RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// SSRC of the packet.
    pub ssrc: Ssrc,
    /// RTP sequence number.
    pub sequence_number: u16,
    /// RTP timestamp.
    pub rtp_timestamp: u32,
    /// Transport wide sequence number extension, if present.
    pub transport_sequence_number: Option<u16>,
    /// Absolute send time extension, if present.
    pub abs_send_time: Option<u32>,
    /// Size of the entire packet in bytes.
    pub size: usize,
    /// Whether the packet is audio.
    pub is_audio: bool,
}

impl ReceivedPacket {
    /// Collect what's needed from a parsed header.
    pub fn from_rtp(header: &RtpHeader, size: usize, is_audio: bool) -> Self {
        ReceivedPacket {
            ssrc: header.ssrc,
            sequence_number: header.sequence_number,
            rtp_timestamp: header.timestamp,
            transport_sequence_number: header.ext_vals.transport_cc,
            abs_send_time: header.ext_vals.abs_send_time,
            size,
            is_audio,
        }
    }
}

#[derive(Debug)]
struct EstimatorState {
    estimator: RemoteBitrateEstimator,
    packets_since_abs_send_time: u32,
    remb: RembThrottler,
}

#[derive(Debug)]
enum FeedbackGenerator {
    TransportSequenceNumber(TransportFeedbackGenerator),
    Rfc8888(CcfbGenerator),
}

/// Produces congestion control feedback for a remote sender.
///
/// Feedback is polled with [`ReceiveSideCongestionController::poll_rtcp`]. Time is driven by
/// [`ReceiveSideCongestionController::maybe_process`].
///
/// ```
/// # use std::time::Instant;
/// use rtpflow::{CongestionConfig, ReceiveSideCongestionController, ReceivedPacket};
///
/// let controller = ReceiveSideCongestionController::new(CongestionConfig::new());
/// let now = Instant::now();
///
/// controller.on_received_packet(
///     &ReceivedPacket {
///         ssrc: 1.into(),
///         sequence_number: 1,
///         rtp_timestamp: 0,
///         transport_sequence_number: Some(1),
///         abs_send_time: None,
///         size: 1200,
///         is_audio: false,
///     },
///     now,
/// );
///
/// let _wait = controller.maybe_process(now);
/// while let Some(_rtcp) = controller.poll_rtcp() {
///     // serialize and send.
/// }
/// ```
#[derive(Debug)]
pub struct ReceiveSideCongestionController {
    config: CongestionConfig,
    estimator: Mutex<EstimatorState>,
    feedback: Mutex<FeedbackGenerator>,
    output: Mutex<VecDeque<Rtcp>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReceiveSideCongestionController {
    /// Create a new controller.
    pub fn new(config: CongestionConfig) -> Self {
        let feedback = match config.feedback_mode {
            FeedbackMode::TransportSequenceNumber => FeedbackGenerator::TransportSequenceNumber(
                TransportFeedbackGenerator::new(config.sender_ssrc),
            ),
            FeedbackMode::Rfc8888 => {
                FeedbackGenerator::Rfc8888(CcfbGenerator::new(config.sender_ssrc))
            }
        };

        let estimator = EstimatorState {
            estimator: Self::new_estimator(&config, EstimatorKind::SingleStream),
            packets_since_abs_send_time: 0,
            remb: RembThrottler::new(config.sender_ssrc),
        };

        ReceiveSideCongestionController {
            config,
            estimator: Mutex::new(estimator),
            feedback: Mutex::new(feedback),
            output: Mutex::new(VecDeque::new()),
        }
    }

    fn new_estimator(config: &CongestionConfig, kind: EstimatorKind) -> RemoteBitrateEstimator {
        RemoteBitrateEstimator::new(
            kind,
            config.initial_bitrate,
            config.min_bitrate,
            config.max_bitrate,
        )
    }

    /// Handle a received RTP packet.
    pub fn on_received_packet(&self, packet: &ReceivedPacket, now: Instant) {
        if self.config.feedback_mode == FeedbackMode::Rfc8888 {
            if let FeedbackGenerator::Rfc8888(g) = &mut *lock(&self.feedback) {
                g.on_received_packet(packet.ssrc, packet.sequence_number, now);
            }
            return;
        }

        if let Some(seq) = packet.transport_sequence_number {
            if let FeedbackGenerator::TransportSequenceNumber(g) = &mut *lock(&self.feedback) {
                g.on_received_packet(packet.ssrc, seq, now);
            }
            return;
        }

        if packet.is_audio {
            // Audio only takes part in send side estimation.
            return;
        }

        let remb = {
            let mut state = lock(&self.estimator);
            self.pick_estimator(&mut state, packet.abs_send_time.is_some());

            let state = &mut *state;
            state
                .estimator
                .incoming_packet(packet, now)
                .and_then(|(ssrcs, bitrate)| {
                    state.remb.on_receive_bitrate_changed(ssrcs, bitrate, now)
                })
        };

        if let Some(remb) = remb {
            lock(&self.output).push_back(Rtcp::Remb(remb));
        }
    }

    fn pick_estimator(&self, state: &mut EstimatorState, has_abs_send_time: bool) {
        let using_abs_send_time = state.estimator.kind() == EstimatorKind::AbsSendTime;

        if has_abs_send_time {
            if !using_abs_send_time {
                info!("Switch to abs-send-time estimator");
                state.estimator = Self::new_estimator(&self.config, EstimatorKind::AbsSendTime);
            }
            state.packets_since_abs_send_time = 0;
        } else if using_abs_send_time {
            state.packets_since_abs_send_time += 1;
            if state.packets_since_abs_send_time >= ABS_SEND_TIME_SWITCH_THRESHOLD {
                info!("Switch to single stream estimator");
                state.estimator = Self::new_estimator(&self.config, EstimatorKind::SingleStream);
                state.packets_since_abs_send_time = 0;
            }
        }
    }

    /// Run due work. Returns the time until it should be called again.
    pub fn maybe_process(&self, now: Instant) -> Duration {
        let mut out = Vec::new();

        let until_feedback = match &mut *lock(&self.feedback) {
            FeedbackGenerator::TransportSequenceNumber(g) => g.process(now, &mut out),
            FeedbackGenerator::Rfc8888(g) => g.process(now, &mut out),
        };

        let until = if self.config.feedback_mode == FeedbackMode::Rfc8888 {
            until_feedback
        } else {
            let mut state = lock(&self.estimator);
            let state = &mut *state;

            if let Some((ssrcs, bitrate)) = state.estimator.process(now) {
                if let Some(remb) = state.remb.on_receive_bitrate_changed(ssrcs, bitrate, now) {
                    out.push(Rtcp::Remb(remb));
                }
            }

            state.estimator.time_until_process(now).min(until_feedback)
        };

        if !out.is_empty() {
            lock(&self.output).extend(out);
        }

        until
    }

    /// The send side estimate changed. Adapts how often feedback is sent.
    pub fn on_bitrate_changed(&self, bitrate: Bitrate) {
        match &mut *lock(&self.feedback) {
            FeedbackGenerator::TransportSequenceNumber(g) => {
                g.on_send_bandwidth_estimate_changed(bitrate)
            }
            FeedbackGenerator::Rfc8888(g) => g.on_send_bandwidth_estimate_changed(bitrate),
        }
    }

    /// Average round trip time as measured by the RTCP layer.
    pub fn on_rtt_update(&self, avg_rtt: Duration) {
        trace!(?avg_rtt, "RTT update");
        lock(&self.estimator).estimator.on_rtt_update(avg_rtt);
    }

    /// Stop estimating for an SSRC.
    pub fn remove_stream(&self, ssrc: Ssrc) {
        lock(&self.estimator).estimator.remove_stream(ssrc);
    }

    /// The latest receive side estimate, if there is one.
    pub fn latest_receive_side_estimate(&self) -> Option<Bitrate> {
        lock(&self.estimator).estimator.latest_estimate()
    }

    /// Cap the REMB sent to the remote.
    pub fn set_max_desired_receive_bitrate(&self, bitrate: Bitrate, now: Instant) {
        let remb = lock(&self.estimator).remb.set_max_desired(bitrate, now);

        if let Some(remb) = remb {
            lock(&self.output).push_back(Rtcp::Remb(remb));
        }
    }

    /// Which receive side estimator is in use.
    pub fn estimator_kind(&self) -> EstimatorKind {
        lock(&self.estimator).estimator.kind()
    }

    /// Next feedback packet to send.
    pub fn poll_rtcp(&self) -> Option<Rtcp> {
        lock(&self.output).pop_front()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn packet(seq: u16, twcc: Option<u16>, ast: Option<u32>, is_audio: bool) -> ReceivedPacket {
        ReceivedPacket {
            ssrc: 7.into(),
            sequence_number: seq,
            rtp_timestamp: seq as u32 * 3000,
            transport_sequence_number: twcc,
            abs_send_time: ast,
            size: 1000,
            is_audio,
        }
    }

    fn controller(mode: FeedbackMode) -> ReceiveSideCongestionController {
        ReceiveSideCongestionController::new(
            CongestionConfig::new()
                .set_feedback_mode(mode)
                .set_sender_ssrc(1.into()),
        )
    }

    #[test]
    fn is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReceiveSideCongestionController>();
    }

    #[test]
    fn rtt_update_reaches_estimator() {
        let c = controller(FeedbackMode::TransportSequenceNumber);
        c.on_rtt_update(Duration::from_millis(120));
        assert_eq!(
            lock(&c.estimator).estimator.rtt(),
            Some(Duration::from_millis(120))
        );
    }

    #[test]
    fn switches_estimator_on_abs_send_time() {
        let now = Instant::now();
        let c = controller(FeedbackMode::TransportSequenceNumber);
        assert_eq!(c.estimator_kind(), EstimatorKind::SingleStream);

        c.on_received_packet(&packet(1, None, Some(100), false), now);
        assert_eq!(c.estimator_kind(), EstimatorKind::AbsSendTime);

        for i in 0..29 {
            c.on_received_packet(&packet(2 + i, None, None, false), now);
        }
        assert_eq!(c.estimator_kind(), EstimatorKind::AbsSendTime);

        c.on_received_packet(&packet(31, None, None, false), now);
        assert_eq!(c.estimator_kind(), EstimatorKind::SingleStream);
    }

    #[test]
    fn abs_send_time_resets_the_count() {
        let now = Instant::now();
        let c = controller(FeedbackMode::TransportSequenceNumber);
        c.on_received_packet(&packet(1, None, Some(100), false), now);

        for i in 0..20 {
            c.on_received_packet(&packet(2 + i, None, None, false), now);
        }
        c.on_received_packet(&packet(22, None, Some(200), false), now);
        for i in 0..20 {
            c.on_received_packet(&packet(23 + i, None, None, false), now);
        }
        assert_eq!(c.estimator_kind(), EstimatorKind::AbsSendTime);
    }

    #[test]
    fn transport_sequence_number_bypasses_estimator() {
        let now = Instant::now();
        let c = controller(FeedbackMode::TransportSequenceNumber);
        c.on_received_packet(&packet(1, Some(1), Some(100), false), now);
        assert_eq!(c.estimator_kind(), EstimatorKind::SingleStream);

        c.maybe_process(now);
        assert!(matches!(c.poll_rtcp(), Some(Rtcp::Twcc(_))));
        assert!(c.poll_rtcp().is_none());
    }

    #[test]
    fn audio_without_transport_sequence_number_ignored() {
        let now = Instant::now();
        let c = controller(FeedbackMode::TransportSequenceNumber);
        c.on_received_packet(&packet(1, None, Some(100), true), now);
        assert_eq!(c.estimator_kind(), EstimatorKind::SingleStream);
        assert_eq!(c.latest_receive_side_estimate(), None);
    }

    #[test]
    fn rfc8888_reports_everything() {
        let now = Instant::now();
        let c = controller(FeedbackMode::Rfc8888);
        c.on_received_packet(&packet(1, Some(1), None, false), now);
        c.on_received_packet(&packet(2, None, Some(1), true), now);
        assert_eq!(c.estimator_kind(), EstimatorKind::SingleStream);

        let wait = c.maybe_process(now);
        assert_eq!(wait, Duration::from_millis(100));

        let Some(Rtcp::Ccfb(ccfb)) = c.poll_rtcp() else {
            panic!("Expected congestion control feedback");
        };
        assert_eq!(ccfb.blocks[0].metrics.len(), 2);
        assert!(c.poll_rtcp().is_none());
    }

    #[test]
    fn process_interval_is_soonest() {
        let now = Instant::now();
        let c = controller(FeedbackMode::TransportSequenceNumber);

        // Both run at the first call.
        let wait = c.maybe_process(now);
        assert_eq!(wait, Duration::from_millis(100));

        c.on_bitrate_changed(Bitrate::mbps(10));
        let wait = c.maybe_process(now + Duration::from_millis(100));
        assert_eq!(wait, Duration::from_millis(50));
    }

    #[test]
    fn max_desired_bitrate_sends_remb() {
        let now = Instant::now();
        let c = controller(FeedbackMode::TransportSequenceNumber);
        c.set_max_desired_receive_bitrate(Bitrate::kbps(500), now);

        let Some(Rtcp::Remb(remb)) = c.poll_rtcp() else {
            panic!("Expected REMB");
        };
        assert_eq!(remb.bitrate, Bitrate::kbps(500));
        assert_eq!(remb.sender_ssrc, 1.into());
    }
}
