use std::collections::VecDeque;
use std::time::Instant;

use crate::rtp::{SeqNo, Ssrc, Twcc};

use super::PacketFeedback;

/// Packets handed to the transport with a transport wide sequence number.
///
/// Maps feedback keyed on the transport wide sequence number back to the stream and the
/// media sequence number the packet had.
#[derive(Debug)]
pub(crate) struct SendRegistry {
    /// How many send records to keep.
    keep: usize,

    /// Records in transport sequence number order, without gaps.
    queue: VecDeque<SendRecord>,

    /// Last registered transport sequence number.
    last_registered: Option<SeqNo>,
}

#[derive(Debug)]
struct SendRecord {
    transport_seq: SeqNo,
    ssrc: Ssrc,
    seq_no: SeqNo,
    is_retransmission: bool,
    local_send_time: Instant,
    size: usize,
    /// Feedback for this record was already handed out.
    reported: bool,
}

impl SendRegistry {
    pub fn new(keep: usize) -> Self {
        SendRegistry {
            keep,
            queue: VecDeque::new(),
            last_registered: None,
        }
    }

    pub fn register(
        &mut self,
        transport_seq: SeqNo,
        ssrc: Ssrc,
        seq_no: SeqNo,
        is_retransmission: bool,
        now: Instant,
        size: usize,
    ) {
        if let Some(last) = self.last_registered {
            if !last.is_next(transport_seq) {
                // The queue is indexed by offset, a gap invalidates it.
                debug!(%last, %transport_seq, "Transport sequence gap, reset registry");
                self.queue.clear();
            }
        }

        self.last_registered = Some(transport_seq);
        self.queue.push_back(SendRecord {
            transport_seq,
            ssrc,
            seq_no,
            is_retransmission,
            local_send_time: now,
            size,
            reported: false,
        });

        while self.queue.len() > self.keep {
            self.queue.pop_front();
        }
    }

    fn get_mut(&mut self, transport_seq: SeqNo) -> Option<&mut SendRecord> {
        let first = self.queue.front()?.transport_seq;
        let index = transport_seq.checked_sub(*first)?;
        self.queue.get_mut(usize::try_from(index).ok()?)
    }

    /// Map a transport wide feedback report to per packet feedback.
    ///
    /// Packets already reported by an earlier feedback are skipped, as are packets we no
    /// longer (or never did) know about.
    pub fn apply_report(&mut self, twcc: &Twcc, now: Instant) -> Vec<PacketFeedback> {
        let Some(last) = self.last_registered else {
            return vec![];
        };

        // The receive times are not used, only whether a packet arrived.
        let statuses: Vec<_> = twcc
            .packets(now, last)
            .map(|(seq, at)| (seq, at.is_some()))
            .collect();

        let mut feedback = Vec::with_capacity(statuses.len());

        for (transport_seq, received) in statuses {
            let Some(record) = self.get_mut(transport_seq) else {
                trace!(%transport_seq, "Feedback for unknown transport sequence");
                continue;
            };

            if record.reported {
                continue;
            }
            record.reported = true;

            trace!(
                %transport_seq,
                ssrc = %record.ssrc,
                seq_no = %record.seq_no,
                size = record.size,
                since_send = ?now.saturating_duration_since(record.local_send_time),
                received,
                "Transport feedback"
            );

            feedback.push(PacketFeedback {
                ssrc: record.ssrc,
                sequence_number: record.seq_no,
                received,
                is_retransmission: record.is_retransmission,
            });
        }

        feedback
    }

    /// Extend a 16 bit transport sequence number relative to the last registered.
    #[cfg(test)]
    pub fn extend(&self, seq: u16) -> SeqNo {
        crate::rtp::extend_u16(self.last_registered.map(|s| *s), seq).into()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// A TWCC report from `base_seq` with received packets 1ms apart.
#[cfg(test)]
pub(crate) fn twcc_for(base_seq: u16, received: &[bool]) -> Twcc {
    Twcc {
        sender_ssrc: 0.into(),
        ssrc: 0.into(),
        base_seq,
        reference_time: 0,
        feedback_count: 0,
        deltas: received.iter().map(|r| r.then_some(4)).collect(),
    }
}
