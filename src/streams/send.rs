use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::RetransmissionMode;
use crate::error::SendError;
use crate::pacer::{QueuePriority, QueueState};
use crate::rtp::{DependencyDescriptor, Extension, ExtensionMap, ExtensionValues};
use crate::rtp::{Bitrate, FrameDependencyStructure, Pt, RtpHeader, RtpPacket, SeqNo, Ssrc};
use crate::sender::EncodedImage;

use super::history::{PacketHistory, StoredPacket};
use super::packetize::payload_sizes;
use super::send_queue::SendQueue;
use super::send_stats::{StreamTxStats, StreamTxStatsHolder};

/// Per stream counters that must survive a reconfiguration of the sender.
///
/// Obtained with `RtpVideoSender::get_rtp_payload_states` and handed back when creating
/// the next sender for the same SSRCs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpPayloadState {
    /// 15 bit picture id, incremented per frame.
    pub picture_id: i16,
    /// Index of the latest temporal base layer frame.
    pub tl0_pic_idx: u8,
    /// Frame id counter shared by all streams.
    pub shared_frame_id: i64,
    /// Frame id counter of this stream.
    pub frame_id: i64,
}

impl RtpPayloadState {
    /// Random starting point for a stream without prior state.
    pub fn random() -> Self {
        RtpPayloadState {
            picture_id: fastrand::i16(0..=0x7fff),
            tl0_pic_idx: fastrand::u8(..),
            shared_frame_id: 0,
            frame_id: 0,
        }
    }
}

/// A packet produced by packetization waiting for the pacer.
#[derive(Debug)]
pub(crate) struct QueuedPacket {
    packet: RtpPacket,
    seq_no: SeqNo,
    temporal_index: Option<u8>,
}

/// A packet the stream wants to hand to the transport.
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub packet: RtpPacket,
    /// Sequence number of the media packet, also for retransmissions.
    pub seq_no: SeqNo,
    pub temporal_index: Option<u8>,
    pub is_retransmission: bool,
}

/// Outgoing encoded stream.
///
/// A stream is a primary SSRC + optional RTX SSRC.
#[derive(Debug)]
pub struct StreamTx {
    /// Unique identifier of the media stream.
    ssrc: Ssrc,

    /// Payload type of media packets.
    pt: Pt,

    /// Identifier and payload type of a resend (RTX) stream. If we are doing resends.
    rtx: Option<(Ssrc, Pt)>,

    /// Next sequence number to use when sending media.
    seq_no: SeqNo,

    /// Next sequence number to use when sending on the RTX stream.
    seq_no_rtx: SeqNo,

    payload_state: RtpPayloadState,

    /// Whether any frame was sent. Counters are not advanced for the first frame.
    first_frame_sent: bool,

    /// Enabled by the latest layer allocation.
    active: bool,

    /// Dependency structure of the latest key frame.
    structure: Option<FrameDependencyStructure>,

    /// Sent packets for resends.
    history: PacketHistory,

    /// Packetized media waiting for the pacer.
    send_queue: SendQueue<QueuedPacket>,

    /// Sequence numbers of media packets to resend.
    resends: SendQueue<SeqNo>,

    /// Number of packets the latest frame was split into.
    last_packets_per_frame: Option<usize>,

    /// Last non-retransmission sequence number feedback was processed for.
    last_feedback_seq: Option<SeqNo>,

    stats: StreamTxStatsHolder,
}

impl StreamTx {
    pub(crate) fn new(
        ssrc: Ssrc,
        pt: Pt,
        rtx: Option<(Ssrc, Pt)>,
        payload_state: RtpPayloadState,
        initial_seq_no: Option<u16>,
        history: PacketHistory,
    ) -> Self {
        // Random start leaves plenty of room before the first wrap-around.
        let seq_no = initial_seq_no.unwrap_or_else(|| fastrand::u16(..0x8000)) as u64;
        let seq_no_rtx = fastrand::u16(..0x8000) as u64;

        debug!("Create StreamTx for SSRC: {}", ssrc);

        StreamTx {
            ssrc,
            pt,
            rtx,
            seq_no: seq_no.into(),
            seq_no_rtx: seq_no_rtx.into(),
            payload_state,
            first_frame_sent: false,
            active: true,
            structure: None,
            history,
            send_queue: SendQueue::new(),
            resends: SendQueue::new(),
            last_packets_per_frame: None,
            last_feedback_seq: None,
            stats: StreamTxStatsHolder::new(),
        }
    }

    /// The (primary) SSRC of this encoded stream.
    pub fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    /// Payload type of media packets.
    pub fn pt(&self) -> Pt {
        self.pt
    }

    /// The resend (RTX) SSRC and payload type, if any.
    pub fn rtx(&self) -> Option<(Ssrc, Pt)> {
        self.rtx
    }

    /// Whether the layer allocation enables this stream.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        info!(ssrc = %self.ssrc, active, "Stream activation changed");
        self.active = active;
    }

    /// Counters of this stream.
    pub fn stats(&self) -> StreamTxStats {
        self.stats.counts
    }

    /// Bitrate sent over the last second, as of the latest timeout.
    pub fn bitrate(&self) -> Bitrate {
        self.stats.bitrate()
    }

    pub(crate) fn payload_state(&self) -> RtpPayloadState {
        self.payload_state
    }

    /// The packet history of this stream.
    pub fn history(&self) -> &PacketHistory {
        &self.history
    }

    pub(crate) fn last_packets_per_frame(&self) -> Option<usize> {
        self.last_packets_per_frame
    }

    /// Next frame id when each stream numbers its own frames.
    pub(crate) fn next_independent_frame_id(&mut self) -> i64 {
        let id = self.payload_state.frame_id;
        self.payload_state.frame_id += 1;
        id
    }

    fn next_seq_no(&mut self) -> SeqNo {
        let seq_no = self.seq_no;
        self.seq_no = seq_no.next();
        seq_no
    }

    fn next_seq_no_rtx(&mut self) -> SeqNo {
        let seq_no = self.seq_no_rtx;
        self.seq_no_rtx = seq_no.next();
        seq_no
    }

    /// Split a frame into packets and queue them for the pacer.
    ///
    /// Returns the number of packets queued.
    pub(crate) fn packetize(
        &mut self,
        frame: &EncodedImage,
        frame_id: i64,
        exts: &ExtensionMap,
        max_packet_size: usize,
        now: Instant,
    ) -> Result<usize, SendError> {
        if frame.data.is_empty() {
            trace!(ssrc = %self.ssrc, "Empty frame, no packets");
            return Ok(0);
        }

        let mut ext_vals = ExtensionValues::default();
        if exts.contains(Extension::TransportSequenceNumber) {
            // Stamped when handed to the transport.
            ext_vals.transport_cc = Some(0);
        }
        if exts.contains(Extension::AbsoluteSendTime) {
            ext_vals.abs_send_time = Some(0);
        }

        let descriptor = self.dependency_descriptor(frame, frame_id, exts);

        let header_len = |descriptor: Option<DependencyDescriptor>| {
            let mut ext_vals = ext_vals.clone();
            ext_vals.dependency_descriptor = descriptor.and_then(|d| d.serialize());
            self.header(ext_vals, false).write_len(exts)
        };

        let first_header_len = header_len(descriptor.clone());
        let other_header_len = header_len(descriptor.clone().map(|d| DependencyDescriptor {
            start_of_frame: false,
            structure: None,
            ..d
        }));

        let sizes = payload_sizes(
            frame.data.len(),
            max_packet_size.saturating_sub(first_header_len),
            max_packet_size.saturating_sub(other_header_len),
        )
        .ok_or(SendError::NoPayloadRoom(max_packet_size))?;

        let count = sizes.len();
        let mut offset = 0;

        for (i, size) in sizes.into_iter().enumerate() {
            let first = i == 0;
            let last = i == count - 1;

            let mut ext_vals = ext_vals.clone();
            ext_vals.dependency_descriptor = descriptor.as_ref().and_then(|d| {
                DependencyDescriptor {
                    start_of_frame: first,
                    end_of_frame: last,
                    structure: if first { d.structure.clone() } else { None },
                    ..d.clone()
                }
                .serialize()
            });

            let seq_no = self.next_seq_no();
            let mut header = self.header(ext_vals, last);
            header.sequence_number = seq_no.as_u16();
            header.timestamp = frame.rtp_timestamp;

            let payload = frame.data[offset..offset + size].to_vec();
            offset += size;

            let packet = RtpPacket { header, payload };
            let len = packet.write_len(exts);

            trace!(ssrc = %self.ssrc, %seq_no, len, "Queue packet");

            self.send_queue.push(
                QueuedPacket {
                    packet,
                    seq_no,
                    temporal_index: frame.temporal_index,
                },
                len,
                now,
            );
        }

        self.advance_payload_state(frame);
        self.stats.increase_frames(frame.is_key());
        self.last_packets_per_frame = Some(count);

        Ok(count)
    }

    fn header(&self, ext_vals: ExtensionValues, marker: bool) -> RtpHeader {
        RtpHeader {
            marker,
            payload_type: self.pt,
            ssrc: self.ssrc,
            ext_vals,
            ..Default::default()
        }
    }

    fn dependency_descriptor(
        &mut self,
        frame: &EncodedImage,
        frame_id: i64,
        exts: &ExtensionMap,
    ) -> Option<DependencyDescriptor> {
        if !exts.contains(Extension::DependencyDescriptor) {
            return None;
        }

        let generic = frame.generic.as_ref()?;

        if frame.is_key() {
            if let Some(structure) = &generic.structure {
                self.structure = Some(structure.clone());
            }
        }

        let Some(structure) = &self.structure else {
            debug!(ssrc = %self.ssrc, "No dependency structure yet, skip descriptor");
            return None;
        };

        if generic.template_index as usize >= structure.templates.len() {
            debug!(
                ssrc = %self.ssrc,
                template_index = generic.template_index,
                "Template index outside structure, skip descriptor"
            );
            return None;
        }

        let template_id = (structure.structure_id + generic.template_index) % 64;

        let descriptor = DependencyDescriptor {
            start_of_frame: true,
            end_of_frame: false,
            template_id,
            frame_number: frame_id as u16,
            structure: frame.is_key().then(|| structure.clone()),
        };

        // An invalid structure can't be written, send the frame without descriptor.
        if descriptor.serialize().is_none() {
            warn!(ssrc = %self.ssrc, "Invalid dependency structure");
            return None;
        }

        Some(descriptor)
    }

    fn advance_payload_state(&mut self, frame: &EncodedImage) {
        let state = &mut self.payload_state;

        if self.first_frame_sent {
            state.picture_id = (state.picture_id.wrapping_add(1)) & 0x7fff;

            if frame.temporal_index == Some(0) {
                state.tl0_pic_idx = state.tl0_pic_idx.wrapping_add(1);
            }
        }

        self.first_frame_sent = true;
    }

    pub(crate) fn set_shared_frame_id(&mut self, shared_frame_id: i64) {
        self.payload_state.shared_frame_id = shared_frame_id;
    }

    /// Size on the wire of a retransmission of `seq_no`, if it may be retransmitted now.
    pub(crate) fn retransmission_size(
        &self,
        seq_no: SeqNo,
        now: Instant,
        min_interval: Duration,
        mode: RetransmissionMode,
        exts: &ExtensionMap,
    ) -> Option<usize> {
        if mode == RetransmissionMode::Off {
            return None;
        }

        let stored = self
            .history
            .get_packet_for_retransmission(seq_no, now, min_interval)?;

        if mode == RetransmissionMode::BaseLayer && !matches!(stored.temporal_index, None | Some(0))
        {
            trace!(%seq_no, "Not resending upper temporal layer");
            return None;
        }

        let rtx_overhead = if self.rtx.is_some() { 2 } else { 0 };

        Some(stored.packet.write_len(exts) + rtx_overhead)
    }

    /// Queue a resend that passed [`StreamTx::retransmission_size`].
    pub(crate) fn queue_resend(&mut self, seq_no: SeqNo, size: usize, now: Instant) {
        debug!(ssrc = %self.ssrc, %seq_no, "Queue resend");
        self.history.set_pending(seq_no, true);
        self.resends.push(seq_no, size, now);
    }

    pub(crate) fn increase_nacks(&mut self) {
        self.stats.increase_nacks();
    }

    pub(crate) fn increase_deferred(&mut self) {
        self.stats.increase_deferred();
    }

    pub(crate) fn queue_state(&mut self, index: usize, now: Instant) -> QueueState {
        let mut snapshot = self.send_queue.snapshot(now, QueuePriority::Media);
        snapshot.merge(&self.resends.snapshot(now, QueuePriority::Retransmission));

        QueueState {
            stream: index,
            snapshot,
        }
    }

    /// Next packet to send, resends before media.
    pub(crate) fn poll_packet(&mut self, now: Instant) -> Option<Outgoing> {
        while let Some(seq_no) = self.resends.pop(now) {
            if let Some(outgoing) = self.resend(seq_no) {
                return Some(outgoing);
            }
        }

        let queued = self.send_queue.pop(now)?;

        Some(Outgoing {
            packet: queued.packet,
            seq_no: queued.seq_no,
            temporal_index: queued.temporal_index,
            is_retransmission: false,
        })
    }

    fn resend(&mut self, seq_no: SeqNo) -> Option<Outgoing> {
        let Some(stored) = self.history.get(seq_no) else {
            // Evicted while in the queue.
            trace!(%seq_no, "Resend no longer in history");
            return None;
        };

        if !self.history.is_unacked(seq_no) {
            trace!(%seq_no, "Resend acked while queued");
            self.history.set_pending(seq_no, false);
            return None;
        }

        let temporal_index = stored.temporal_index;

        let packet = match self.rtx {
            Some((rtx_ssrc, rtx_pt)) => {
                let stored = stored.clone();
                let rtx_seq_no = self.next_seq_no_rtx();
                stored.to_rtx(rtx_ssrc, rtx_pt, rtx_seq_no)
            }
            None => stored.packet.clone(),
        };

        Some(Outgoing {
            packet,
            seq_no,
            temporal_index,
            is_retransmission: true,
        })
    }

    /// The packet was handed to the transport.
    pub(crate) fn on_sent(&mut self, outgoing: Outgoing, bytes: usize, now: Instant) {
        self.stats
            .update_packet_counts(bytes as u64, outgoing.is_retransmission, now);

        if outgoing.is_retransmission {
            self.history.mark_resent(outgoing.seq_no, now);
        } else {
            let stored = StoredPacket::new(
                outgoing.packet,
                outgoing.seq_no,
                outgoing.temporal_index,
                now,
            );
            self.history.put(stored, now);
        }
    }

    /// The transport refused the packet.
    pub(crate) fn on_send_failed(&mut self, outgoing: &Outgoing) {
        if outgoing.is_retransmission {
            self.history.set_pending(outgoing.seq_no, false);
        }
    }

    /// Whether feedback for `seq_no` is in order. Out of order feedback for original
    /// transmissions is a caller bug or duplicate.
    pub(crate) fn accept_feedback(&mut self, seq_no: SeqNo, is_retransmission: bool) -> bool {
        if is_retransmission {
            return true;
        }

        if let Some(last) = self.last_feedback_seq {
            if seq_no <= last {
                return false;
            }
        }

        self.last_feedback_seq = Some(seq_no);
        true
    }

    pub(crate) fn on_feedback(&mut self, seq_no: SeqNo, received: bool) {
        self.stats.update_feedback(received);
        if received {
            self.history.mark_acked(seq_no);
        }
    }

    /// Extend a 16 bit sequence number of this stream.
    pub(crate) fn extend_seq_no(&self, seq: u16) -> SeqNo {
        crate::rtp::extend_u16(Some(*self.seq_no), seq).into()
    }

    pub(crate) fn set_rtt(&mut self, rtt: Duration) {
        self.history.set_rtt(rtt);
    }

    pub(crate) fn handle_timeout(&mut self, now: Instant) {
        self.history.cull(now);
        self.stats.purge_old(now);
    }

    /// Drop queued packets, queued resends and the history.
    pub(crate) fn clear(&mut self) {
        let dropped = self.send_queue.len() + self.resends.len();
        if dropped > 0 || !self.history.is_empty() {
            debug!(ssrc = %self.ssrc, dropped, "Clear stream");
        }
        self.send_queue.clear();
        self.resends.clear();
        self.history.clear();
    }

    #[cfg(test)]
    pub(crate) fn has_queued(&self) -> bool {
        self.send_queue.len() + self.resends.len() > 0
    }

    /// Sequence numbers of media packets waiting in the queue.
    #[cfg(test)]
    pub(crate) fn queued_seq_nos(&self) -> Vec<SeqNo> {
        self.send_queue.iter().map(|q| q.seq_no).collect()
    }
}
