use super::header::LEN_HEADER;
use super::{RtcpHeader, RtcpPacket, TransportType};
use crate::rtp::Ssrc;

/// Arrival time offsets are in 1/1024 seconds.
pub const ATO_UNITS_PER_SEC: u32 = 1024;

/// Largest arrival time offset that can be expressed. Larger offsets are reported as
/// "overrange".
pub const ATO_OVERRANGE: u16 = 0x1FFF;

/*
    0                   1                   2                   3
    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
   |V=2|P| FMT=11  |   PT = 205    |          length               |
   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
   |                 SSRC of RTCP packet sender                    |
   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
   |                   SSRC of 1st RTP Stream                      |
   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
   |          begin_seq            |          num_reports          |
   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
   |R|ECN|  Arrival time offset    | ...                           .
   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
   .                                                               .
   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
   |                        Report Timestamp (32 bits)             |
   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
*/

/// RTP Control Protocol (RTCP) Feedback for Congestion Control, RFC 8888.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ccfb {
    /// Sender of this feedback.
    pub sender_ssrc: Ssrc,
    /// One block per reported media SSRC.
    pub blocks: Vec<CcfbBlock>,
    /// Compact NTP time the report was created.
    pub report_timestamp: u32,
}

/// Reports for one SSRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcfbBlock {
    /// Media SSRC.
    pub ssrc: Ssrc,
    /// First reported sequence number.
    pub begin_seq: u16,
    /// One entry per sequence number from `begin_seq`. `None` is not received.
    pub metrics: Vec<Option<CcfbMetric>>,
}

/// Arrival information for one received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcfbMetric {
    /// ECN bits of the received packet.
    pub ecn: u8,
    /// Arrival time offset before the report timestamp in 1/1024 seconds.
    pub ato: u16,
}

impl CcfbBlock {
    fn length_words(&self) -> usize {
        // ssrc, begin_seq + num_reports, metrics padded to a word.
        2 + (self.metrics.len() + 1) / 2
    }
}

impl RtcpPacket for Ccfb {
    fn header(&self) -> RtcpHeader {
        RtcpHeader::transport(TransportType::Ccfb, self.length_words())
    }

    fn length_words(&self) -> usize {
        // header, sender ssrc, blocks, report timestamp
        2 + self.blocks.iter().map(|b| b.length_words()).sum::<usize>() + 1
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(&mut buf[..LEN_HEADER]);
        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());

        let mut o = 8;
        for block in &self.blocks {
            buf[o..o + 4].copy_from_slice(&block.ssrc.to_be_bytes());
            buf[o + 4..o + 6].copy_from_slice(&block.begin_seq.to_be_bytes());
            buf[o + 6..o + 8].copy_from_slice(&(block.metrics.len() as u16).to_be_bytes());
            o += 8;

            for m in &block.metrics {
                let v = match m {
                    Some(m) => {
                        1 << 15 | ((m.ecn as u16) & 0b11) << 13 | m.ato.min(ATO_OVERRANGE)
                    }
                    None => 0,
                };
                buf[o..o + 2].copy_from_slice(&v.to_be_bytes());
                o += 2;
            }

            if block.metrics.len() % 2 == 1 {
                buf[o..o + 2].copy_from_slice(&[0, 0]);
                o += 2;
            }
        }

        buf[o..o + 4].copy_from_slice(&self.report_timestamp.to_be_bytes());
        o += 4;

        debug_assert_eq!(o, self.length_words() * 4);
        o
    }
}

impl<'a> TryFrom<&'a [u8]> for Ccfb {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 8 {
            return Err("Ccfb less than 8 bytes");
        }

        let sender_ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();

        let ts = &buf[buf.len() - 4..];
        let report_timestamp = u32::from_be_bytes([ts[0], ts[1], ts[2], ts[3]]);

        let mut buf = &buf[4..buf.len() - 4];
        let mut blocks = vec![];

        while !buf.is_empty() {
            if buf.len() < 8 {
                return Err("Ccfb block less than 8 bytes");
            }
            let ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();
            let begin_seq = u16::from_be_bytes([buf[4], buf[5]]);
            let num_reports = u16::from_be_bytes([buf[6], buf[7]]) as usize;
            buf = &buf[8..];

            let padded = (num_reports + num_reports % 2) * 2;
            if buf.len() < padded {
                return Err("Ccfb block metrics larger than packet");
            }

            let metrics = buf[..num_reports * 2]
                .chunks_exact(2)
                .map(|b| {
                    let v = u16::from_be_bytes([b[0], b[1]]);
                    let received = v & 1 << 15 > 0;
                    received.then_some(CcfbMetric {
                        ecn: ((v >> 13) & 0b11) as u8,
                        ato: v & ATO_OVERRANGE,
                    })
                })
                .collect();

            buf = &buf[padded..];

            blocks.push(CcfbBlock {
                ssrc,
                begin_seq,
                metrics,
            });
        }

        Ok(Ccfb {
            sender_ssrc,
            blocks,
            report_timestamp,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_parse() {
        let ccfb = Ccfb {
            sender_ssrc: 9.into(),
            blocks: vec![
                CcfbBlock {
                    ssrc: 1.into(),
                    begin_seq: 65_534,
                    metrics: vec![
                        Some(CcfbMetric { ecn: 0, ato: 12 }),
                        None,
                        Some(CcfbMetric { ecn: 1, ato: 0 }),
                    ],
                },
                CcfbBlock {
                    ssrc: 2.into(),
                    begin_seq: 10,
                    metrics: vec![Some(CcfbMetric {
                        ecn: 0,
                        ato: ATO_OVERRANGE,
                    })],
                },
            ],
            report_timestamp: 0x0001_8000,
        };

        let mut buf = [0; 100];
        let n = ccfb.write_to(&mut buf);
        assert_eq!(n, (2 + 4 + 3 + 1) * 4);
        assert_eq!(&buf[..4], &[0x8b, 205, 0, 9]);
        assert_eq!(&buf[16..18], &[0x80, 12]);

        let parsed = Ccfb::try_from(&buf[4..n]).unwrap();
        assert_eq!(parsed, ccfb);
    }

    #[test]
    fn metrics_overrun_is_error() {
        let buf = [0, 0, 0, 9, 0, 0, 0, 1, 0, 0, 0, 4, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert!(Ccfb::try_from(&buf[..]).is_err());
    }
}
