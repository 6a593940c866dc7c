use super::header::LEN_HEADER;
use super::{ReportList, RtcpHeader, RtcpPacket, TransportType};
use crate::rtp::{extend_u16, SeqNo, Ssrc};

/// Generic NACK, asking for retransmission of missing packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    /// Sender of this feedback. Mostly irrelevant, but part of RTCP packets.
    pub sender_ssrc: Ssrc,
    /// The SSRC this nack reports missing packets for.
    pub ssrc: Ssrc,
    /// The missing packets. This can be multiple segments.
    pub reports: ReportList<NackEntry>,
}

/// A packet id and a bitmask of the following 16 packets.
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct NackEntry {
    /// First missing sequence number.
    pub pid: u16,
    /// Bit `i` set means `pid + i + 1` is missing as well.
    pub blp: u16,
}

impl Nack {
    /// Build NACKs for a set of missing sequence numbers, ascending order expected.
    ///
    /// Returns more than one NACK when the entries don't fit in one report list.
    pub fn from_seqs(sender_ssrc: Ssrc, ssrc: Ssrc, seqs: impl IntoIterator<Item = SeqNo>) -> Vec<Nack> {
        let mut entries: Vec<(SeqNo, NackEntry)> = vec![];

        for seq in seqs {
            if let Some((first, entry)) = entries.last_mut() {
                if *seq > **first && *seq - **first <= 16 {
                    entry.blp |= 1 << (*seq - **first - 1);
                    continue;
                }
            }
            entries.push((
                seq,
                NackEntry {
                    pid: seq.as_u16(),
                    blp: 0,
                },
            ));
        }

        ReportList::lists_from_iter(entries.into_iter().map(|(_, e)| e))
            .into_iter()
            .map(|reports| Nack {
                sender_ssrc,
                ssrc,
                reports,
            })
            .collect()
    }
}

impl RtcpPacket for Nack {
    fn header(&self) -> RtcpHeader {
        RtcpHeader::transport(TransportType::Nack, self.length_words())
    }

    fn length_words(&self) -> usize {
        // header
        // sender SSRC
        // media SSRC
        // 1 word per NackEntry
        1 + 2 + self.reports.len()
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(&mut buf[..LEN_HEADER]);
        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        let mut buf = &mut buf[12..];
        for r in &self.reports {
            buf[0..2].copy_from_slice(&r.pid.to_be_bytes());
            buf[2..4].copy_from_slice(&r.blp.to_be_bytes());
            buf = &mut buf[4..];
        }
        self.length_words() * 4
    }
}

impl<'a> TryFrom<&'a [u8]> for Nack {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 12 {
            return Err("Nack less than 12 bytes");
        }

        let sender_ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();
        let ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]).into();

        let mut reports = ReportList::new();

        for fci in buf[8..].chunks_exact(4).take(31) {
            let pid = u16::from_be_bytes([fci[0], fci[1]]);
            let blp = u16::from_be_bytes([fci[2], fci[3]]);
            reports.push(NackEntry { pid, blp });
        }

        Ok(Nack {
            sender_ssrc,
            ssrc,
            reports,
        })
    }
}

impl NackEntry {
    /// Iterator over sequence numbers missing.
    ///
    /// The given sequence number is used to interpret ROC.
    pub fn into_iter(self, seq_no: SeqNo) -> impl Iterator<Item = SeqNo> {
        let first = std::iter::once(self.pid);
        let rest = (0..16_u16)
            .filter(move |i| self.blp & (1 << i) > 0)
            .map(move |i| self.pid.wrapping_add(i + 1));

        first
            .chain(rest)
            .map(move |seq| extend_u16(Some(*seq_no), seq).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nack_entry_iter() {
        // 196_618
        let seq_no: SeqNo = (65_536_u64 * 3 + 10).into();

        // 196_508
        let pid = (65_536_u32 - 100) as u16;

        // 196_509, 196_512, 196_524
        let blp = 0b1000_0000_0000_1001;

        let entry = NackEntry { pid, blp };

        let nacks: Vec<_> = entry.into_iter(seq_no).collect();

        assert_eq!(
            nacks,
            vec![196508.into(), 196509.into(), 196512.into(), 196524.into()]
        );
    }

    #[test]
    fn from_seqs_packs_bitmask() {
        let seqs = [100, 101, 105, 116, 117].map(SeqNo::from);
        let nacks = Nack::from_seqs(1.into(), 2.into(), seqs);
        assert_eq!(nacks.len(), 1);

        let reports = &nacks[0].reports;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0], NackEntry { pid: 100, blp: 0b1000_0000_0001_0001 });
        assert_eq!(reports[1], NackEntry { pid: 117, blp: 0 });
    }

    #[test]
    fn write_parse() {
        let nack = Nack::from_seqs(1.into(), 2.into(), [SeqNo::from(7)]).remove(0);
        let mut buf = [0; 16];
        let n = nack.write_to(&mut buf);
        assert_eq!(n, 16);
        assert_eq!(&buf[..4], &[0x81, 205, 0, 3]);

        let parsed = Nack::try_from(&buf[4..]).unwrap();
        assert_eq!(parsed, nack);
    }
}
