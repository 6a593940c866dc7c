use std::collections::BTreeMap;

use crate::rtp::{SeqNo, Ssrc};
use crate::streams::StreamTx;

/// Delivery status of one sent packet, as learned from the remote end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFeedback {
    /// Media SSRC the packet was sent for.
    pub ssrc: Ssrc,
    /// Extended sequence number of the media packet. For retransmissions this is the sequence
    /// number of the original packet.
    pub sequence_number: SeqNo,
    /// Whether the remote end received the packet.
    pub received: bool,
    /// Whether the packet was a retransmission.
    pub is_retransmission: bool,
}

/// What came out of a batch of [`PacketFeedback`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackSummary {
    /// Records reporting the packet as received.
    pub acked: usize,
    /// Records reporting the packet as lost.
    pub lost: usize,
    /// Records out of order or duplicate for their stream.
    pub rejected: usize,
    /// Records for an SSRC we don't send.
    pub unknown: usize,
    /// Lost packets queued for retransmission.
    pub retransmissions: usize,
}

/// Index of the stream sending as `ssrc`, either as media or RTX.
pub(crate) fn stream_index(streams: &[StreamTx], ssrc: Ssrc) -> Option<usize> {
    streams
        .iter()
        .position(|s| s.ssrc() == ssrc || s.rtx().map(|(rtx, _)| rtx) == Some(ssrc))
}

/// Apply a batch of feedback to the streams.
///
/// Returns the packets to retransmit early. Those are lost original transmissions on streams
/// that had no later packet received within the batch. A later received packet means the
/// remote end will detect the gap and NACK it.
pub(crate) fn apply_feedback(
    streams: &mut [StreamTx],
    feedback: &[PacketFeedback],
    summary: &mut FeedbackSummary,
) -> Vec<(usize, SeqNo)> {
    let mut early: BTreeMap<usize, Vec<SeqNo>> = BTreeMap::new();

    for fb in feedback {
        let Some(index) = stream_index(streams, fb.ssrc) else {
            trace!(ssrc = %fb.ssrc, "Feedback for unknown SSRC");
            summary.unknown += 1;
            continue;
        };
        let stream = &mut streams[index];

        if !stream.accept_feedback(fb.sequence_number, fb.is_retransmission) {
            warn!(
                ssrc = %fb.ssrc,
                seq_no = %fb.sequence_number,
                "Feedback out of order or duplicate"
            );
            summary.rejected += 1;
            continue;
        }

        stream.on_feedback(fb.sequence_number, fb.received);

        if fb.received {
            summary.acked += 1;
            if !fb.is_retransmission {
                early.remove(&index);
            }
        } else {
            summary.lost += 1;
            if !fb.is_retransmission {
                early.entry(index).or_default().push(fb.sequence_number);
            }
        }
    }

    early
        .into_iter()
        .flat_map(|(index, seqs)| seqs.into_iter().map(move |s| (index, s)))
        .collect()
}
