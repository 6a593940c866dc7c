use std::fmt;
use std::time::{Duration, Instant};

use super::header::LEN_HEADER;
use super::{RtcpHeader, RtcpPacket, TransportType};
use crate::rtp::{extend_u16, SeqNo, Ssrc};

/// Time resolution of the reference time, 64ms.
pub const REFERENCE_TIME_UNIT: Duration = Duration::from_millis(64);

/// Time resolution of the receive deltas, 250µs.
pub const DELTA_UNIT: Duration = Duration::from_micros(250);

const MAX_RUN_LENGTH: u16 = 0x1fff;

/// Transport Wide Congestion Control feedback.
///
/// Reports arrival (or loss) for a contiguous range of transport-wide sequence numbers.
#[derive(Clone, PartialEq, Eq)]
pub struct Twcc {
    /// Sender of this feedback. Mostly irrelevant, but part of RTCP packets.
    pub sender_ssrc: Ssrc,
    /// The media SSRC this report is for. Often 0 or the first media SSRC.
    pub ssrc: Ssrc,
    /// Start sequence number.
    pub base_seq: u16,
    /// Reference time in 64ms units, 24 bit.
    pub reference_time: u32,
    /// Increasing counter for each TWCC. For deduping.
    pub feedback_count: u8,
    /// One entry per reported sequence number starting at `base_seq`.
    ///
    /// `None` is not received. `Some(delta)` is the receive delta in 250µs units relative
    /// to the previous received packet (or the reference time for the first).
    pub deltas: Vec<Option<i16>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketStatus {
    NotReceived = 0b00,
    ReceivedSmallDelta = 0b01,
    ReceivedLargeOrNegativeDelta = 0b10,
    Unknown = 0b11,
}

impl From<u16> for PacketStatus {
    fn from(v: u16) -> Self {
        match v & 0b11 {
            0b00 => Self::NotReceived,
            0b01 => Self::ReceivedSmallDelta,
            0b10 => Self::ReceivedLargeOrNegativeDelta,
            _ => Self::Unknown,
        }
    }
}

impl PacketStatus {
    fn of(delta: Option<i16>) -> Self {
        match delta {
            None => Self::NotReceived,
            Some(d) if (0..=255).contains(&d) => Self::ReceivedSmallDelta,
            Some(_) => Self::ReceivedLargeOrNegativeDelta,
        }
    }

    fn delta_len(&self) -> usize {
        match self {
            Self::ReceivedSmallDelta => 1,
            Self::ReceivedLargeOrNegativeDelta => 2,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketChunk {
    Run(PacketStatus, u16),
    VectorSingle(u16),
    VectorDouble(u16),
}

impl PacketChunk {
    fn parse(x: u16) -> Self {
        let is_vec = x & 0b1000_0000_0000_0000 > 0;
        if is_vec {
            let is_double = x & 0b0100_0000_0000_0000 > 0;
            let bits = x & 0b0011_1111_1111_1111;
            if is_double {
                PacketChunk::VectorDouble(bits)
            } else {
                PacketChunk::VectorSingle(bits)
            }
        } else {
            PacketChunk::Run((x >> 13).into(), x & MAX_RUN_LENGTH)
        }
    }

    fn serialize(&self) -> u16 {
        match self {
            PacketChunk::Run(s, n) => (*s as u16) << 13 | (n & MAX_RUN_LENGTH),
            PacketChunk::VectorSingle(bits) => 0b1000_0000_0000_0000 | bits,
            PacketChunk::VectorDouble(bits) => 0b1100_0000_0000_0000 | bits,
        }
    }

    fn statuses(&self, out: &mut Vec<PacketStatus>) {
        match self {
            PacketChunk::Run(s, n) => out.extend((0..*n).map(|_| *s)),
            PacketChunk::VectorSingle(bits) => out.extend((0..14).rev().map(|i| {
                if bits & (1 << i) > 0 {
                    PacketStatus::ReceivedSmallDelta
                } else {
                    PacketStatus::NotReceived
                }
            })),
            PacketChunk::VectorDouble(bits) => {
                out.extend((0..7).rev().map(|i| PacketStatus::from(bits >> (i * 2))))
            }
        }
    }
}

impl Twcc {
    /// Number of reported statuses.
    pub fn status_count(&self) -> u16 {
        self.deltas.len() as u16
    }

    fn chunks(&self) -> Vec<PacketChunk> {
        let statuses: Vec<_> = self.deltas.iter().map(|d| PacketStatus::of(*d)).collect();
        let mut chunks = vec![];

        let mut i = 0;
        while i < statuses.len() {
            let s = statuses[i];
            let run = statuses[i..]
                .iter()
                .take(MAX_RUN_LENGTH as usize)
                .take_while(|x| **x == s)
                .count();

            if run >= 7 || i + run == statuses.len() {
                chunks.push(PacketChunk::Run(s, run as u16));
                i += run;
            } else {
                let mut bits = 0;
                for (n, st) in statuses[i..].iter().take(7).enumerate() {
                    bits |= (*st as u16) << (12 - n * 2);
                }
                chunks.push(PacketChunk::VectorDouble(bits));
                i += 7;
            }
        }

        chunks
    }

    fn delta_byte_len(&self) -> usize {
        self.deltas
            .iter()
            .map(|d| PacketStatus::of(*d).delta_len())
            .sum()
    }

    /// Iterate over the reported sequences and their remote receive times.
    ///
    /// `time_zero` is the instant reference time 0 maps to. `extend_from` is used
    /// to interpret the 16 bit sequence numbers.
    pub fn packets(
        &self,
        time_zero: Instant,
        extend_from: SeqNo,
    ) -> impl Iterator<Item = (SeqNo, Option<Instant>)> + '_ {
        let base_seq = extend_u16(Some(*extend_from), self.base_seq);
        let mut time = time_zero + REFERENCE_TIME_UNIT * self.reference_time;

        self.deltas.iter().enumerate().map(move |(i, d)| {
            // A base just before a wrap extends to the top of the range.
            let seq: SeqNo = base_seq.wrapping_add(i as u64).into();
            let at = d.map(|d| {
                let dur = DELTA_UNIT * d.unsigned_abs() as u32;
                time = if d < 0 {
                    time.checked_sub(dur).unwrap_or(time)
                } else {
                    time + dur
                };
                time
            });
            (seq, at)
        })
    }
}

impl RtcpPacket for Twcc {
    fn header(&self) -> RtcpHeader {
        RtcpHeader::transport(TransportType::TransportWide, self.length_words())
    }

    fn length_words(&self) -> usize {
        // header: 1
        // sender ssrc: 1
        // ssrc: 1
        // base seq + packet status: 1
        // ref time + feedback count: 1
        // chunks byte len + delta byte len + padding
        let total = self.chunks().len() * 2 + self.delta_byte_len();
        5 + (total + 3) / 4
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        let words = self.length_words();
        self.header().write_to(&mut buf[..LEN_HEADER]);
        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[12..14].copy_from_slice(&self.base_seq.to_be_bytes());
        buf[14..16].copy_from_slice(&self.status_count().to_be_bytes());
        buf[16..19].copy_from_slice(&self.reference_time.to_be_bytes()[1..4]);
        buf[19] = self.feedback_count;

        let mut o = 20;
        for c in self.chunks() {
            buf[o..o + 2].copy_from_slice(&c.serialize().to_be_bytes());
            o += 2;
        }

        for d in self.deltas.iter().flatten() {
            match PacketStatus::of(Some(*d)) {
                PacketStatus::ReceivedSmallDelta => {
                    buf[o] = *d as u8;
                    o += 1;
                }
                _ => {
                    buf[o..o + 2].copy_from_slice(&d.to_be_bytes());
                    o += 2;
                }
            }
        }

        let total = words * 4;
        if o < total {
            for b in &mut buf[o..total] {
                *b = 0;
            }
            // RTCP padding, last byte is pad count.
            buf[total - 1] = (total - o) as u8;
            buf[0] |= 0b00_1_00000;
        }

        total
    }
}

impl<'a> TryFrom<&'a [u8]> for Twcc {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 16 {
            return Err("Less than 16 bytes for start of Twcc");
        }

        let sender_ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();
        let ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]).into();
        let base_seq = u16::from_be_bytes([buf[8], buf[9]]);
        let status_count = u16::from_be_bytes([buf[10], buf[11]]) as usize;
        let reference_time = u32::from_be_bytes([0, buf[12], buf[13], buf[14]]);
        let feedback_count = buf[15];

        let mut buf = &buf[16..];

        let mut statuses = Vec::with_capacity(status_count);
        while statuses.len() < status_count {
            if buf.len() < 2 {
                return Err("Less than 2 bytes for PacketChunk");
            }
            let chunk = PacketChunk::parse(u16::from_be_bytes([buf[0], buf[1]]));
            chunk.statuses(&mut statuses);
            buf = &buf[2..];
        }
        statuses.truncate(status_count);

        let mut deltas = Vec::with_capacity(status_count);
        for s in statuses {
            let d = match s {
                PacketStatus::ReceivedSmallDelta => {
                    let (&v, rest) = buf.split_first().ok_or("Not enough buf for small delta")?;
                    buf = rest;
                    Some(v as i16)
                }
                PacketStatus::ReceivedLargeOrNegativeDelta => {
                    if buf.len() < 2 {
                        return Err("Not enough buf for large delta");
                    }
                    let v = i16::from_be_bytes([buf[0], buf[1]]);
                    buf = &buf[2..];
                    Some(v)
                }
                PacketStatus::NotReceived | PacketStatus::Unknown => None,
            };
            deltas.push(d);
        }

        Ok(Twcc {
            sender_ssrc,
            ssrc,
            base_seq,
            reference_time,
            feedback_count,
            deltas,
        })
    }
}

impl fmt::Debug for Twcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let received = self.deltas.iter().filter(|d| d.is_some()).count();
        f.debug_struct("Twcc")
            .field("sender_ssrc", &self.sender_ssrc)
            .field("ssrc", &self.ssrc)
            .field("base_seq", &self.base_seq)
            .field("status_count", &self.deltas.len())
            .field("received", &received)
            .field("reference_time", &self.reference_time)
            .field("feedback_count", &self.feedback_count)
            .finish()
    }
}
