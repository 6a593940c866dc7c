#![allow(clippy::unusual_byte_groupings)]

use std::collections::VecDeque;

mod header;
pub use header::{PayloadType, RtcpHeader, RtcpType, TransportType};

mod list;
pub use list::ReportList;

mod nack;
pub use nack::{Nack, NackEntry};

mod twcc;
pub use twcc::{Twcc, DELTA_UNIT, REFERENCE_TIME_UNIT};

mod ccfb;
pub use ccfb::{Ccfb, CcfbBlock, CcfbMetric, ATO_OVERRANGE, ATO_UNITS_PER_SEC};

mod remb;
pub use remb::Remb;

/// Something that can be written as an RTCP packet.
pub trait RtcpPacket {
    /// The RTCP header for this packet.
    fn header(&self) -> RtcpHeader;

    /// Length of entire RTCP packet (including header) in words (4 bytes).
    fn length_words(&self) -> usize;

    /// Write this packet to the buffer.
    ///
    /// Panics if the buffer doesn't have capacity to hold length_words * 4 bytes.
    fn write_to(&self, buf: &mut [u8]) -> usize;
}

/// RTCP feedback handled by the sender and produced by the congestion controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Rtcp {
    /// Reports missing packets.
    Nack(Nack),
    /// Transport Wide Congestion Control. Feedback for every received RTP packet.
    Twcc(Twcc),
    /// Congestion control feedback as of RFC 8888.
    Ccfb(Ccfb),
    /// Receiver Estimated Maximum Bitrate.
    Remb(Remb),
}

impl Rtcp {
    /// Parse a compound RTCP packet. Packets we don't handle are skipped.
    pub fn read_packet(buf: &[u8], feedback: &mut VecDeque<Rtcp>) {
        let mut buf = buf;
        loop {
            if buf.is_empty() {
                break;
            }

            let header: RtcpHeader = match buf.try_into() {
                Ok(v) => v,
                Err(e) => {
                    debug!("{}", e);
                    break;
                }
            };
            let has_padding = buf[0] & 0b00_1_00000 > 0;
            let full_length = header.length_words() * 4;

            if full_length > buf.len() {
                // this length is incorrect.
                break;
            }

            let unpadded_length = if has_padding {
                let pad = buf[full_length - 1] as usize;
                if full_length < header::LEN_HEADER + pad {
                    debug!("buf.len() is less than padding: {} < {}", full_length, pad);
                    break;
                }
                full_length - pad
            } else {
                full_length
            };

            match (&buf[..unpadded_length]).try_into() {
                Ok(v) => feedback.push_back(v),
                Err(e) => trace!("{}", e),
            }

            buf = &buf[full_length..];
        }
    }

    /// Write as many queued packets as fit in `buf`. Returns the number of bytes written.
    pub fn write_packet(feedback: &mut VecDeque<Rtcp>, buf: &mut [u8]) -> usize {
        let total_len = buf.len();
        let mut offset = 0;

        while let Some(fb) = feedback.front() {
            let item_len = fb.length_words() * 4;

            if total_len - offset < item_len {
                break;
            }

            let Some(fb) = feedback.pop_front() else {
                break;
            };
            let written = fb.write_to(&mut buf[offset..]);
            debug_assert_eq!(written, item_len, "length_words equals write_to length");

            offset += item_len;
        }

        offset
    }
}

impl RtcpPacket for Rtcp {
    fn header(&self) -> RtcpHeader {
        match self {
            Rtcp::Nack(v) => v.header(),
            Rtcp::Twcc(v) => v.header(),
            Rtcp::Ccfb(v) => v.header(),
            Rtcp::Remb(v) => v.header(),
        }
    }

    fn length_words(&self) -> usize {
        match self {
            Rtcp::Nack(v) => v.length_words(),
            Rtcp::Twcc(v) => v.length_words(),
            Rtcp::Ccfb(v) => v.length_words(),
            Rtcp::Remb(v) => v.length_words(),
        }
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        match self {
            Rtcp::Nack(v) => v.write_to(buf),
            Rtcp::Twcc(v) => v.write_to(buf),
            Rtcp::Ccfb(v) => v.write_to(buf),
            Rtcp::Remb(v) => v.write_to(buf),
        }
    }
}

impl<'a> TryFrom<&'a [u8]> for Rtcp {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        let header: RtcpHeader = buf.try_into()?;

        // By constraining the length, all subparsing can go
        // until they exhaust the buffer length. This presupposes
        // padding is removed from the input.
        let buf = &buf[header::LEN_HEADER..];

        Ok(match header.rtcp_type() {
            RtcpType::TransportLayerFeedback => match TransportType::try_from(header.fmt())? {
                TransportType::Nack => Rtcp::Nack(buf.try_into()?),
                TransportType::Ccfb => Rtcp::Ccfb(buf.try_into()?),
                TransportType::TransportWide => Rtcp::Twcc(buf.try_into()?),
            },
            RtcpType::PayloadSpecificFeedback => match PayloadType::try_from(header.fmt())? {
                PayloadType::ApplicationLayer => Rtcp::Remb(buf.try_into()?),
            },
            _ => return Err("Ignore RTCP type"),
        })
    }
}
