//! The video sender: frames in, paced RTP out, feedback driving retransmissions.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::allocation::{allocate, headroom_ceiling, packets_per_frame_estimate};
use crate::allocation::{payload_bitrate, BitrateUpdate, UtilizationTracker};
use crate::allocation::{LayerConstraints, VideoBitrateAllocation};
use crate::config::{FrameIdPolicy, RetransmissionMode, SenderConfig};
use crate::error::{ConfigError, SendError};
use crate::pacer::{Pacer, PacerImpl};
use crate::rtp::{Bitrate, Ccfb, DataSize, Extension, ExtensionValues, Nack, Rtcp};
use crate::rtp::{RtpHeader, SeqNo, Ssrc};
use crate::streams::{Outgoing, PacketHistory, RateLimiter, RtpPayloadState, StreamTx};
use crate::util::ewma::TimeEwma;
use crate::util::{already_happened, Soonest};

mod frame;
pub use frame::{EncodedImage, FrameSent, FrameType, GenericFrameInfo};

mod feedback;
pub use feedback::{FeedbackSummary, PacketFeedback};
use feedback::{apply_feedback, stream_index};

mod handle;
pub use handle::FrameHandle;
use handle::{Activation, Posted};

mod registry;
use registry::SendRegistry;

/// How often histories are culled and stats purged when nothing else is going on.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Transport sequence numbers we can map feedback back for.
const REGISTRY_SIZE: usize = 8192;

/// Measured frame rate drift that triggers a new payload bitrate.
const FRAMERATE_DRIFT: f64 = 0.1;

/// Smoothing of the measured frame rate.
const FRAMERATE_TAU: Duration = Duration::from_secs(1);

/// Video RTP clock rate.
const VIDEO_CLOCK_RATE: f64 = 90_000.0;

/// The sink that puts RTP packets on the network.
pub trait Transport {
    /// Send one serialized RTP packet.
    ///
    /// Returns `false` if the packet could not be sent. The packet is then dropped and not
    /// kept for retransmission.
    fn send_rtp(&mut self, packet: &[u8], options: &PacketOptions) -> bool;
}

/// Information accompanying a packet handed to the [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketOptions {
    /// Transport wide sequence number, if the packet carries one.
    pub packet_id: Option<u64>,
    /// Whether this is a retransmission.
    pub is_retransmission: bool,
    /// SSRC the packet is sent as. The RTX SSRC for retransmissions on RTX.
    pub ssrc: Ssrc,
}

/// Result of asking for a retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resend {
    Queued,
    Deferred,
    Skipped,
}

/// Sends encoded video frames over one or more RTP streams.
///
/// One stream per simulcast index, each with an optional RTX stream for retransmissions.
/// The sender is Sans-IO: time is passed in, and the owner drives it with
/// [`RtpVideoSender::poll_timeout`] and [`RtpVideoSender::handle_timeout`].
///
/// ```
/// # use std::time::Instant;
/// use rtpflow::{EncodedImage, FrameType, PacketOptions, RtpVideoSender, SenderConfig, Transport};
///
/// struct Sink(usize);
///
/// impl Transport for Sink {
///     fn send_rtp(&mut self, _packet: &[u8], _options: &PacketOptions) -> bool {
///         self.0 += 1;
///         true
///     }
/// }
///
/// let config = SenderConfig::new()
///     .set_ssrcs(vec![1.into()])
///     .set_payload_types(vec![96.into()]);
///
/// let mut sender = RtpVideoSender::new(config, Default::default(), Sink(0)).unwrap();
///
/// let now = Instant::now();
/// sender.set_sending(true, now);
///
/// let frame = EncodedImage::new(vec![0; 3000], FrameType::Key, 0, now);
/// let sent = sender.on_encoded_image(frame, now).unwrap();
/// assert_eq!(sent.packets, 3);
/// ```
pub struct RtpVideoSender<T: Transport> {
    config: SenderConfig,
    transport: T,

    /// One per simulcast index.
    streams: Vec<StreamTx>,

    pacer: PacerImpl,

    /// Sending state mirrored for frame handles.
    activation: Arc<Activation>,
    /// Kept to hand out clones.
    handle: FrameHandle,
    frames: Receiver<Posted>,

    /// Retransmission budget shared by all streams.
    rate_limiter: RateLimiter,
    /// Retransmissions waiting for the rate limiter.
    deferred: VecDeque<(usize, SeqNo)>,

    registry: SendRegistry,
    /// Next transport wide sequence number.
    transport_seq: u64,

    /// Latest frame id of the shared counter.
    shared_frame_id: i64,

    rtt: Option<Duration>,
    remote_estimate: Option<Bitrate>,

    target: Option<BitrateUpdate>,
    /// Frame rate the payload bitrate was last computed for.
    framerate: f64,
    measured_framerate: TimeEwma,
    last_rtp_timestamp: Option<u32>,
    payload_bitrate: Bitrate,
    allocation: VideoBitrateAllocation,
    utilization: UtilizationTracker,

    last_housekeeping: Option<Instant>,
}

impl<T: Transport> RtpVideoSender<T> {
    /// Create a sender for the streams in `config`.
    ///
    /// `states` are payload states of an earlier sender for the same SSRCs, see
    /// [`RtpVideoSender::get_rtp_payload_states`]. Streams without a prior state start at
    /// random values.
    pub fn new(
        config: SenderConfig,
        states: HashMap<Ssrc, RtpPayloadState>,
        transport: T,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut streams = Vec::with_capacity(config.ssrcs.len());

        for (index, ssrc) in config.ssrcs.iter().enumerate() {
            let pt = config
                .payload_type(index)
                .ok_or(ConfigError::PayloadTypeCount {
                    expected: config.ssrcs.len(),
                    actual: config.payload_types.len(),
                })?;

            let state = states
                .get(ssrc)
                .copied()
                .unwrap_or_else(RtpPayloadState::random);

            let history = PacketHistory::new(config.history_size, config.history_max_age);

            streams.push(StreamTx::new(
                *ssrc,
                pt,
                config.rtx(index),
                state,
                None,
                history,
            ));
        }

        let shared_frame_id = states
            .values()
            .map(|s| s.shared_frame_id)
            .max()
            .unwrap_or(0);

        let pacer = if config.pacing {
            PacerImpl::leaky_bucket(config.initial_bitrate * config.pacing_factor)
        } else {
            PacerImpl::null()
        };

        let activation = Arc::new(Activation::new(streams.len()));
        let (handle, frames) = handle::channel(activation.clone());

        info!(ssrcs = ?config.ssrcs, rtx = ?config.rtx_ssrcs, "Create RtpVideoSender");

        Ok(RtpVideoSender {
            transport,
            streams,
            pacer,
            activation,
            handle,
            frames,
            rate_limiter: RateLimiter::default(),
            deferred: VecDeque::new(),
            registry: SendRegistry::new(REGISTRY_SIZE),
            transport_seq: 1,
            shared_frame_id,
            rtt: None,
            remote_estimate: None,
            target: None,
            framerate: 30.0,
            measured_framerate: TimeEwma::new(FRAMERATE_TAU),
            last_rtp_timestamp: None,
            payload_bitrate: Bitrate::ZERO,
            allocation: VideoBitrateAllocation::default(),
            utilization: UtilizationTracker::new(),
            last_housekeeping: None,
            config,
        })
    }

    /// A handle to post frames from another thread.
    pub fn frame_handle(&self) -> FrameHandle {
        self.handle.clone()
    }

    /// Enable or disable sending.
    ///
    /// Disabling drops everything queued, deferred retransmissions and the packet histories.
    pub fn set_sending(&mut self, sending: bool, now: Instant) {
        if self.is_sending() == sending {
            return;
        }
        info!(sending, "Set sending");
        self.activation.set_sending(sending);

        if !sending {
            for stream in &mut self.streams {
                stream.clear();
            }
            self.deferred.clear();
            self.pacer.clear();
            self.registry.clear();
            self.rate_limiter.clear();
            self.measured_framerate.reset();
            self.last_rtp_timestamp = None;

            // Frames posted before the toggle.
            while self.frames.try_recv().is_ok() {}
        }

        self.last_housekeeping.get_or_insert(now);
    }

    /// Whether sending is enabled.
    pub fn is_sending(&self) -> bool {
        self.activation.is_sending()
    }

    /// Enable the streams at the given simulcast indexes, disable the rest.
    ///
    /// A disabled stream drops its queued packets, deferred retransmissions and history.
    pub fn on_video_layers_allocation_updated(&mut self, active: &[usize], now: Instant) {
        let mut changed = false;

        for (index, stream) in self.streams.iter_mut().enumerate() {
            let is_active = active.contains(&index);
            if stream.is_active() == is_active {
                continue;
            }

            stream.set_active(is_active);
            self.activation.set_active(index, is_active);

            if !is_active {
                stream.clear();
                self.deferred.retain(|(i, _)| *i != index);
            }
            changed = true;
        }

        if changed {
            // The pacer may have picked a queue that is now empty.
            self.pacer.clear();
            self.update_payload_bitrate(now);
        }
    }

    /// Packetize and queue a frame, then send what the pacer allows.
    pub fn on_encoded_image(
        &mut self,
        frame: EncodedImage,
        now: Instant,
    ) -> Result<FrameSent, SendError> {
        self.activation.check(frame.simulcast_index)?;

        let index = frame.simulcast_index;
        let stream = self
            .streams
            .get_mut(index)
            .ok_or(SendError::UnknownStream(index))?;

        // Committed once packetization succeeds.
        let frame_id = match self.config.frame_id_policy {
            FrameIdPolicy::Independent => stream.payload_state().frame_id,
            FrameIdPolicy::Shared => self.shared_frame_id + 1,
        };

        let packets = stream.packetize(
            &frame,
            frame_id,
            &self.config.exts,
            self.config.max_packet_size,
            now,
        )?;

        let ssrc = stream.ssrc();

        if packets > 0 {
            match self.config.frame_id_policy {
                FrameIdPolicy::Independent => {
                    stream.next_independent_frame_id();
                }
                FrameIdPolicy::Shared => {
                    self.shared_frame_id = frame_id;
                    for s in &mut self.streams {
                        s.set_shared_frame_id(frame_id);
                    }
                }
            }

            self.utilization
                .on_encoded_frame(index, frame.data.len(), now);
            self.measure_framerate(frame.rtp_timestamp, now);
        }

        trace!(%ssrc, frame_id, packets, key = frame.is_key(), "Frame queued");

        self.send_queued(now);

        Ok(FrameSent {
            ssrc,
            rtp_timestamp: frame.rtp_timestamp,
            frame_id,
            packets,
        })
    }

    fn measure_framerate(&mut self, rtp_timestamp: u32, now: Instant) {
        let Some(last) = self.last_rtp_timestamp.replace(rtp_timestamp) else {
            return;
        };

        // Same frame on another simulcast stream, or a jump we can't make sense of.
        let delta = rtp_timestamp.wrapping_sub(last);
        if delta == 0 || delta as f64 > VIDEO_CLOCK_RATE {
            return;
        }

        let measured = self
            .measured_framerate
            .update(now, VIDEO_CLOCK_RATE / delta as f64);

        if (measured - self.framerate).abs() > self.framerate * FRAMERATE_DRIFT {
            debug!(from = self.framerate, to = measured, "Frame rate drift");
            self.framerate = measured.max(1.0);
            self.update_payload_bitrate(now);
        }
    }

    /// Process a compound RTCP packet from the remote end.
    pub fn deliver_rtcp(&mut self, buf: &[u8], now: Instant) {
        let mut feedback = VecDeque::new();
        Rtcp::read_packet(buf, &mut feedback);

        for rtcp in feedback {
            match rtcp {
                Rtcp::Nack(nack) => self.on_nack(nack, now),
                Rtcp::Twcc(twcc) => {
                    let records = self.registry.apply_report(&twcc, now);
                    self.on_packet_feedback_vector(&records, now);
                }
                Rtcp::Ccfb(ccfb) => {
                    let records = self.ccfb_records(&ccfb);
                    self.on_packet_feedback_vector(&records, now);
                }
                Rtcp::Remb(remb) => {
                    debug!(bitrate = %remb.bitrate, ssrcs = ?remb.ssrcs, "Remote estimate");
                    self.remote_estimate = Some(remb.bitrate);
                }
            }
        }

        self.send_queued(now);
    }

    fn on_nack(&mut self, nack: Nack, now: Instant) {
        let Some(index) = self.streams.iter().position(|s| s.ssrc() == nack.ssrc) else {
            trace!(ssrc = %nack.ssrc, "NACK for unknown SSRC");
            return;
        };

        for entry in nack.reports.iter().copied() {
            let base = self.streams[index].extend_seq_no(entry.pid);

            for seq_no in entry.into_iter(base) {
                self.streams[index].increase_nacks();
                self.request_resend(index, seq_no, now);
            }
        }
    }

    /// Map RFC 8888 reports of our media SSRCs to packet feedback.
    fn ccfb_records(&self, ccfb: &Ccfb) -> Vec<PacketFeedback> {
        let mut records = vec![];

        for block in &ccfb.blocks {
            let Some(stream) = self.streams.iter().find(|s| s.ssrc() == block.ssrc) else {
                // RTX sequence numbers can't be mapped to the media packets.
                trace!(ssrc = %block.ssrc, "Congestion feedback for unknown SSRC");
                continue;
            };

            for (i, metric) in block.metrics.iter().enumerate() {
                let seq = block.begin_seq.wrapping_add(i as u16);
                records.push(PacketFeedback {
                    ssrc: block.ssrc,
                    sequence_number: stream.extend_seq_no(seq),
                    received: metric.is_some(),
                    is_retransmission: false,
                });
            }
        }

        records
    }

    /// Apply per packet delivery feedback.
    ///
    /// Received packets are no longer retransmitted. Lost packets on a stream with no later
    /// received packet in the batch are retransmitted right away, the remote end can't NACK
    /// what it has not noticed missing.
    pub fn on_packet_feedback_vector(
        &mut self,
        feedback: &[PacketFeedback],
        now: Instant,
    ) -> FeedbackSummary {
        let mut summary = FeedbackSummary::default();

        let early = apply_feedback(&mut self.streams, feedback, &mut summary);

        for (index, seq_no) in early {
            debug!(ssrc = %self.streams[index].ssrc(), %seq_no, "Early retransmission");
            if self.request_resend(index, seq_no, now) == Resend::Queued {
                summary.retransmissions += 1;
            }
        }

        self.send_queued(now);

        summary
    }

    fn request_resend(&mut self, index: usize, seq_no: SeqNo, now: Instant) -> Resend {
        if self.deferred.contains(&(index, seq_no)) {
            return Resend::Deferred;
        }

        let min_interval = self.rtt.unwrap_or(Duration::ZERO);
        let stream = &mut self.streams[index];

        let Some(size) = stream.retransmission_size(
            seq_no,
            now,
            min_interval,
            self.config.retransmission_mode,
            &self.config.exts,
        ) else {
            trace!(ssrc = %stream.ssrc(), %seq_no, "No retransmission");
            return Resend::Skipped;
        };

        if !self.rate_limiter.try_use(size, now) {
            debug!(ssrc = %stream.ssrc(), %seq_no, "Retransmission deferred by rate limit");
            stream.increase_deferred();
            self.deferred.push_back((index, seq_no));
            return Resend::Deferred;
        }

        stream.queue_resend(seq_no, size, now);
        Resend::Queued
    }

    fn retry_deferred(&mut self, now: Instant) {
        let min_interval = self.rtt.unwrap_or(Duration::ZERO);

        while let Some(&(index, seq_no)) = self.deferred.front() {
            let stream = &mut self.streams[index];

            let size = stream.retransmission_size(
                seq_no,
                now,
                min_interval,
                self.config.retransmission_mode,
                &self.config.exts,
            );

            let Some(size) = size else {
                trace!(ssrc = %stream.ssrc(), %seq_no, "Deferred retransmission dropped");
                self.deferred.pop_front();
                continue;
            };

            if !self.rate_limiter.try_use(size, now) {
                break;
            }

            self.deferred.pop_front();
            stream.queue_resend(seq_no, size, now);
        }
    }

    /// A new target bitrate from the congestion controller.
    ///
    /// `framerate` is the frame rate the encoder is configured for. Returns the allocation the
    /// encoder should follow.
    pub fn on_bitrate_updated(
        &mut self,
        update: BitrateUpdate,
        framerate: f64,
        now: Instant,
    ) -> VideoBitrateAllocation {
        debug!(target = %update.target, headroom = ?update.headroom, framerate, "Bitrate updated");

        self.target = Some(update);
        self.framerate = framerate.max(1.0);

        self.pacer
            .set_pacing_rate(update.target * self.config.pacing_factor);
        self.rate_limiter.set_max_rate(update.target);

        self.update_payload_bitrate(now);

        self.allocation
    }

    fn update_payload_bitrate(&mut self, now: Instant) {
        let Some(update) = self.target else {
            return;
        };

        let packet_size = self.config.max_packet_size + self.config.transport_overhead;

        let last_packets: usize = self
            .streams
            .iter()
            .filter(|s| s.is_active())
            .filter_map(|s| s.last_packets_per_frame())
            .sum();

        let packets_per_frame = if last_packets > 0 {
            last_packets
        } else {
            packets_per_frame_estimate(update.target, self.framerate, packet_size)
        };

        let packets_per_second = packets_per_frame as f64 * self.framerate;
        let overhead = self.rtp_header_size() + self.config.transport_overhead;

        self.payload_bitrate = payload_bitrate(update.target, overhead, packets_per_second);

        let media_rate = self.utilization.media_rate(now);
        let ceiling = headroom_ceiling(
            self.payload_bitrate,
            update.headroom,
            media_rate,
            self.config.adjust_for_overshoot,
        );

        let layers = self.layer_constraints();
        let mut allocation = allocate(ceiling, &layers);

        if self.config.adjust_for_overshoot {
            self.utilization.set_allocation(allocation, update.target);
            allocation = self.utilization.adjust(
                &allocation,
                &layers,
                self.config.headroom_fraction,
                now,
            );
        }

        trace!(
            payload = %self.payload_bitrate,
            %ceiling,
            packets_per_second,
            allocated = allocation.sum(),
            "Payload bitrate"
        );

        self.allocation = allocation;
    }

    /// Configured constraints with layers of deactivated streams turned off.
    fn layer_constraints(&self) -> Vec<LayerConstraints> {
        self.config
            .layers
            .iter()
            .enumerate()
            .map(|(index, layer)| {
                let stream_active = self.streams.get(index).map_or(true, |s| s.is_active());
                layer.with_active(layer.active && stream_active)
            })
            .collect()
    }

    /// RTP header with the extensions stamped on every packet.
    fn rtp_header_size(&self) -> usize {
        let exts = &self.config.exts;
        let header = RtpHeader {
            ext_vals: ExtensionValues {
                abs_send_time: exts.contains(Extension::AbsoluteSendTime).then_some(0),
                transport_cc: exts.contains(Extension::TransportSequenceNumber).then_some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        header.write_len(exts)
    }

    /// Bytes added per packet below RTP changed.
    pub fn on_transport_overhead_changed(&mut self, bytes: usize, now: Instant) {
        if self.config.transport_overhead == bytes {
            return;
        }
        debug!(bytes, "Transport overhead changed");
        self.config.transport_overhead = bytes;
        self.update_payload_bitrate(now);
    }

    /// Change which packets are retransmitted.
    pub fn set_retransmission_mode(&mut self, mode: RetransmissionMode) {
        info!(?mode, "Set retransmission mode");
        self.config.retransmission_mode = mode;
    }

    /// A new round trip time estimate.
    ///
    /// Used as the minimum time between retransmissions of the same packet, and to scale how
    /// long packets are kept.
    pub fn on_rtt_update(&mut self, rtt: Duration) {
        self.rtt = Some(rtt);
        for stream in &mut self.streams {
            stream.set_rtt(rtt);
        }
    }

    /// Payload states to hand to the next sender for the same SSRCs.
    pub fn get_rtp_payload_states(&self) -> HashMap<Ssrc, RtpPayloadState> {
        self.streams
            .iter()
            .map(|s| (s.ssrc(), s.payload_state()))
            .collect()
    }

    /// Latest REMB from the remote end.
    pub fn remote_estimate(&self) -> Option<Bitrate> {
        self.remote_estimate
    }

    /// Bitrate left for media after packet overhead, as of the latest bitrate update.
    pub fn payload_bitrate(&self) -> Bitrate {
        self.payload_bitrate
    }

    /// The latest layer allocation.
    pub fn allocation(&self) -> &VideoBitrateAllocation {
        &self.allocation
    }

    /// The stream at a simulcast index.
    pub fn stream(&self, simulcast_index: usize) -> Option<&StreamTx> {
        self.streams.get(simulcast_index)
    }

    /// The stream sending as `ssrc`, media or RTX.
    pub fn stream_by_ssrc(&self, ssrc: Ssrc) -> Option<&StreamTx> {
        stream_index(&self.streams, ssrc).map(|i| &self.streams[i])
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// When [`RtpVideoSender::handle_timeout`] should be called next.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let pacing_at = self.pacer.poll_timeout();

        let deferred_at = if self.deferred.is_empty() {
            None
        } else {
            self.rate_limiter.next_available()
        };

        let housekeeping_at = self.last_housekeeping.map(|t| t + HOUSEKEEPING_INTERVAL);

        pacing_at.soonest(deferred_at).soonest(housekeeping_at)
    }

    /// Move time forward.
    ///
    /// Takes frames posted through [`FrameHandle`], retries deferred retransmissions and sends
    /// what the pacer allows.
    pub fn handle_timeout(&mut self, now: Instant) {
        while let Ok(Posted { generation, frame }) = self.frames.try_recv() {
            if generation != self.activation.generation() {
                debug!(generation, "Drop frame checked before sending was disabled");
                continue;
            }
            if let Err(e) = self.on_encoded_image(frame, now) {
                debug!("Drop frame from handle: {}", e);
            }
        }

        let housekeeping_due = self
            .last_housekeeping
            .map(|t| now >= t + HOUSEKEEPING_INTERVAL)
            .unwrap_or(true);

        if housekeeping_due {
            for stream in &mut self.streams {
                stream.handle_timeout(now);
            }
            self.last_housekeeping = Some(now);
        }

        self.retry_deferred(now);
        self.send_queued(now);
    }

    fn update_queue_state(&mut self, now: Instant) {
        let iter = self
            .streams
            .iter_mut()
            .enumerate()
            .map(|(i, s)| s.queue_state(i, now));

        self.pacer.handle_timeout(now, iter);
    }

    /// Hand packets to the transport as long as the pacer allows.
    fn send_queued(&mut self, now: Instant) {
        loop {
            self.update_queue_state(now);

            let Some(index) = self.pacer.poll_queue() else {
                break;
            };

            let Some(outgoing) = self.streams.get_mut(index).and_then(|s| s.poll_packet(now))
            else {
                break;
            };

            self.send_packet(index, outgoing, now);
        }
    }

    fn send_packet(&mut self, index: usize, mut outgoing: Outgoing, now: Instant) {
        let exts = &self.config.exts;
        let ext_vals = &mut outgoing.packet.header.ext_vals;

        let packet_id = if exts.contains(Extension::TransportSequenceNumber) {
            let seq = self.transport_seq;
            self.transport_seq += 1;
            ext_vals.transport_cc = Some(seq as u16);
            Some(seq)
        } else {
            None
        };

        if exts.contains(Extension::AbsoluteSendTime) {
            ext_vals.abs_send_time = Some(abs_send_time(now));
        }

        let buf = outgoing.packet.to_bytes(exts);
        let options = PacketOptions {
            packet_id,
            is_retransmission: outgoing.is_retransmission,
            ssrc: outgoing.packet.header.ssrc,
        };

        let stream = &mut self.streams[index];

        if !self.transport.send_rtp(&buf, &options) {
            debug!(ssrc = %options.ssrc, seq_no = %outgoing.seq_no, "Transport refused packet");
            stream.on_send_failed(&outgoing);
            return;
        }

        trace!(
            ssrc = %options.ssrc,
            seq_no = %outgoing.seq_no,
            packet_id = ?packet_id,
            len = buf.len(),
            resend = outgoing.is_retransmission,
            "Sent RTP"
        );

        if let Some(packet_id) = packet_id {
            self.registry.register(
                packet_id.into(),
                stream.ssrc(),
                outgoing.seq_no,
                outgoing.is_retransmission,
                now,
                buf.len(),
            );
        }

        self.pacer
            .register_send(now, DataSize::from(buf.len()), index);
        self.utilization.on_bytes_sent(buf.len(), now);

        stream.on_sent(outgoing, buf.len(), now);
    }
}

/// abs-send-time, 6.18 fixed point seconds in 24 bits.
fn abs_send_time(now: Instant) -> u32 {
    let micros = now.saturating_duration_since(already_happened()).as_micros();
    (((micros << 18) / 1_000_000) & 0xff_ffff) as u32
}
