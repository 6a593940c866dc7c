use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::rtp::{Pt, RtpHeader, RtpPacket, SeqNo, Ssrc};

/// Default number of packets kept for retransmission per stream.
pub const DEFAULT_MAX_PACKETS: usize = 600;

/// Default upper bound on how long packets are kept for retransmission.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3);

// Packets are kept at least this long regardless of rtt.
const MIN_AGE: Duration = Duration::from_secs(1);

// Packets are kept this many rtt.
const AGE_RTT_MULTIPLIER: u32 = 3;

/// Acknowledgement state of a sent packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// Sent, no feedback about it yet.
    PendingAck,
    /// The remote side confirmed reception.
    Acked,
}

/// A sent packet kept for retransmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPacket {
    /// The packet as it was first sent.
    pub packet: RtpPacket,
    /// Extended sequence number.
    pub seq_no: SeqNo,
    /// Temporal layer of the frame the packet belongs to.
    pub temporal_index: Option<u8>,
    /// When the packet was first handed to the transport.
    pub sent_at: Instant,
    /// When the packet was last handed to the transport, original send or resend.
    pub last_sent: Instant,
    /// Number of times the packet has been resent.
    pub times_resent: u32,
    /// Whether this copy is a retransmission.
    pub is_retransmission: bool,
    /// Feedback state.
    pub ack: AckState,
    /// Sitting in a send queue waiting to be resent.
    pub(crate) pending_resend: bool,
}

impl StoredPacket {
    pub(crate) fn new(
        packet: RtpPacket,
        seq_no: SeqNo,
        temporal_index: Option<u8>,
        now: Instant,
    ) -> Self {
        StoredPacket {
            packet,
            seq_no,
            temporal_index,
            sent_at: now,
            last_sent: now,
            times_resent: 0,
            is_retransmission: false,
            ack: AckState::PendingAck,
            pending_resend: false,
        }
    }

    /// SSRC the packet was sent on.
    pub fn ssrc(&self) -> Ssrc {
        self.packet.header.ssrc
    }

    /// Size of the payload.
    pub fn payload_size(&self) -> usize {
        self.packet.payload.len()
    }

    /// Rewrite as an RTX packet (RFC 4588).
    ///
    /// The original sequence number is prefixed to the payload, SSRC, payload type and
    /// sequence number are those of the RTX stream.
    pub fn to_rtx(&self, rtx_ssrc: Ssrc, rtx_pt: Pt, rtx_seq_no: SeqNo) -> RtpPacket {
        let mut header = self.packet.header.clone();
        header.ssrc = rtx_ssrc;
        header.payload_type = rtx_pt;
        header.sequence_number = rtx_seq_no.as_u16();
        header.has_padding = false;

        let mut payload = vec![0; 2 + self.packet.payload.len()];
        let n = RtpHeader::write_original_sequence_number(&mut payload, self.seq_no);
        payload[n..].copy_from_slice(&self.packet.payload);

        RtpPacket { header, payload }
    }
}

/// Sent packets of one stream keyed by extended sequence number.
#[derive(Debug)]
pub struct PacketHistory {
    max_packets: usize,
    max_age: Duration,
    rtt: Duration,
    packets: BTreeMap<SeqNo, StoredPacket>,
}

impl Default for PacketHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKETS, DEFAULT_MAX_AGE)
    }
}

impl PacketHistory {
    /// Create a history keeping at most `max_packets`, for at most `max_age`.
    pub fn new(max_packets: usize, max_age: Duration) -> Self {
        PacketHistory {
            max_packets,
            max_age,
            rtt: Duration::ZERO,
            packets: BTreeMap::new(),
        }
    }

    /// Store a packet that was handed to the transport.
    pub fn put(&mut self, packet: StoredPacket, now: Instant) {
        trace!(seq_no = %packet.seq_no, "Store packet for retransmission");
        self.packets.insert(packet.seq_no, packet);
        self.cull(now);
    }

    /// Look up a stored packet.
    pub fn get(&self, seq_no: SeqNo) -> Option<&StoredPacket> {
        self.packets.get(&seq_no)
    }

    /// A copy of the packet if it may be retransmitted now.
    ///
    /// `min_interval` is the minimum time since the packet was last sent, usually the rtt.
    pub fn get_packet_for_retransmission(
        &self,
        seq_no: SeqNo,
        now: Instant,
        min_interval: Duration,
    ) -> Option<StoredPacket> {
        let stored = self.packets.get(&seq_no)?;

        if stored.ack == AckState::Acked {
            trace!(%seq_no, "Not resending acked packet");
            return None;
        }

        if stored.pending_resend {
            trace!(%seq_no, "Resend already queued");
            return None;
        }

        if now.saturating_duration_since(stored.last_sent) < min_interval {
            trace!(%seq_no, "Resend too soon after last send");
            return None;
        }

        let mut copy = stored.clone();
        copy.is_retransmission = true;
        Some(copy)
    }

    /// Whether the packet is still held and not acknowledged.
    pub fn is_unacked(&self, seq_no: SeqNo) -> bool {
        self.packets
            .get(&seq_no)
            .map(|p| p.ack == AckState::PendingAck)
            .unwrap_or(false)
    }

    pub(crate) fn set_pending(&mut self, seq_no: SeqNo, pending: bool) {
        if let Some(p) = self.packets.get_mut(&seq_no) {
            p.pending_resend = pending;
        }
    }

    /// Record that the packet was handed to the transport again.
    pub fn mark_resent(&mut self, seq_no: SeqNo, now: Instant) {
        if let Some(p) = self.packets.get_mut(&seq_no) {
            p.last_sent = now;
            p.times_resent += 1;
            p.pending_resend = false;
        }
    }

    /// Mark a packet as received by the remote side.
    ///
    /// Returns `false` if the packet is unknown or evicted.
    pub fn mark_acked(&mut self, seq_no: SeqNo) -> bool {
        let Some(p) = self.packets.get_mut(&seq_no) else {
            return false;
        };
        p.ack = AckState::Acked;
        true
    }

    /// Round trip time, used both for the resend interval and the history age.
    pub fn set_rtt(&mut self, rtt: Duration) {
        self.rtt = rtt;
    }

    fn max_age(&self) -> Duration {
        (self.rtt * AGE_RTT_MULTIPLIER)
            .max(MIN_AGE)
            .min(self.max_age)
    }

    /// Evict packets by capacity and age.
    pub fn cull(&mut self, now: Instant) {
        let max_age = self.max_age();

        let expired: Vec<SeqNo> = self
            .packets
            .iter()
            .take_while(|(_, p)| now.saturating_duration_since(p.sent_at) > max_age)
            .filter(|(_, p)| !p.pending_resend)
            .map(|(s, _)| *s)
            .collect();

        for seq_no in expired {
            self.packets.remove(&seq_no);
        }

        while self.packets.len() > self.max_packets {
            // Acked packets go first, then the oldest. Packets queued for resend stay.
            let victim = self
                .packets
                .iter()
                .find(|(_, p)| p.ack == AckState::Acked && !p.pending_resend)
                .or_else(|| self.packets.iter().find(|(_, p)| !p.pending_resend))
                .map(|(s, _)| *s);

            let Some(seq_no) = victim else {
                break;
            };
            self.packets.remove(&seq_no);
        }
    }

    /// Drop all stored packets.
    pub fn clear(&mut self) {
        self.packets.clear();
    }

    /// Number of stored packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether no packet is stored.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rtp::ExtensionMap;

    fn stored(seq: u64, now: Instant) -> StoredPacket {
        let packet = RtpPacket {
            header: RtpHeader {
                sequence_number: seq as u16,
                ssrc: 1.into(),
                payload_type: 96.into(),
                ..Default::default()
            },
            payload: vec![seq as u8; 10],
        };
        StoredPacket::new(packet, seq.into(), Some(0), now)
    }

    #[test]
    fn acked_is_not_retransmitted() {
        let now = Instant::now();
        let mut h = PacketHistory::default();
        h.put(stored(10, now), now);

        assert!(h
            .get_packet_for_retransmission(10.into(), now, Duration::ZERO)
            .is_some());
        assert!(h.mark_acked(10.into()));
        assert!(h
            .get_packet_for_retransmission(10.into(), now, Duration::ZERO)
            .is_none());
    }

    #[test]
    fn unknown_is_soft_no_op() {
        let now = Instant::now();
        let mut h = PacketHistory::default();
        assert!(!h.mark_acked(5.into()));
        assert!(h
            .get_packet_for_retransmission(5.into(), now, Duration::ZERO)
            .is_none());
        h.mark_resent(5.into(), now);
        assert!(h.is_empty());
    }

    #[test]
    fn respects_min_interval() {
        let now = Instant::now();
        let rtt = Duration::from_millis(100);
        let mut h = PacketHistory::default();
        h.put(stored(1, now), now);

        let later = now + Duration::from_millis(50);
        assert!(h.get_packet_for_retransmission(1.into(), later, rtt).is_none());

        let later = now + Duration::from_millis(100);
        assert!(h.get_packet_for_retransmission(1.into(), later, rtt).is_some());

        h.mark_resent(1.into(), later);
        assert!(h
            .get_packet_for_retransmission(1.into(), later + Duration::from_millis(10), rtt)
            .is_none());
        assert_eq!(h.get(1.into()).unwrap().times_resent, 1);
    }

    #[test]
    fn pending_is_not_returned_twice() {
        let now = Instant::now();
        let mut h = PacketHistory::default();
        h.put(stored(1, now), now);
        h.set_pending(1.into(), true);
        assert!(h
            .get_packet_for_retransmission(1.into(), now, Duration::ZERO)
            .is_none());
    }

    #[test]
    fn evicts_acked_first_on_capacity() {
        let now = Instant::now();
        let mut h = PacketHistory::new(3, DEFAULT_MAX_AGE);
        h.put(stored(1, now), now);
        h.put(stored(2, now), now);
        h.put(stored(3, now), now);
        h.mark_acked(2.into());

        h.put(stored(4, now), now);
        assert_eq!(h.len(), 3);
        assert!(h.get(2.into()).is_none());
        assert!(h.get(1.into()).is_some());

        h.put(stored(5, now), now);
        assert!(h.get(1.into()).is_none());
    }

    #[test]
    fn pending_resend_survives_eviction() {
        let now = Instant::now();
        let mut h = PacketHistory::new(1, DEFAULT_MAX_AGE);
        h.put(stored(1, now), now);
        h.set_pending(1.into(), true);
        h.put(stored(2, now), now);

        assert!(h.get(1.into()).is_some());
        assert!(h.get(2.into()).is_none());

        let later = now + Duration::from_secs(10);
        h.cull(later);
        assert!(h.get(1.into()).is_some());
    }

    #[test]
    fn evicts_by_age_scaled_by_rtt() {
        let now = Instant::now();
        let mut h = PacketHistory::default();
        h.put(stored(1, now), now);

        h.cull(now + Duration::from_millis(900));
        assert_eq!(h.len(), 1);
        h.cull(now + Duration::from_millis(1100));
        assert_eq!(h.len(), 0);

        h.set_rtt(Duration::from_millis(500));
        h.put(stored(2, now), now);
        h.cull(now + Duration::from_millis(1400));
        assert_eq!(h.len(), 1);
        h.cull(now + Duration::from_millis(1600));
        assert_eq!(h.len(), 0);

        // Bounded by max age.
        h.set_rtt(Duration::from_secs(5));
        h.put(stored(3, now), now);
        h.cull(now + Duration::from_millis(3100));
        assert_eq!(h.len(), 0);
    }

    #[test]
    fn rtx_wrapping() {
        let now = Instant::now();
        let p = stored(0x1234, now);
        let rtx = p.to_rtx(2.into(), 97.into(), 7.into());

        assert_eq!(rtx.header.ssrc, 2.into());
        assert_eq!(rtx.header.payload_type, 97.into());
        assert_eq!(rtx.header.sequence_number, 7);
        assert_eq!(&rtx.payload[..2], &[0x12, 0x34]);
        assert_eq!(&rtx.payload[2..], &p.packet.payload[..]);

        let exts = ExtensionMap::empty();
        let bytes = rtx.to_bytes(&exts);
        let parsed = RtpPacket::parse(&bytes, &exts).unwrap();
        assert_eq!(
            RtpHeader::read_original_sequence_number(&parsed.payload),
            Some(0x1234)
        );
    }
}
