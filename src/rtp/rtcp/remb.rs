use super::header::LEN_HEADER;
use super::{PayloadType, RtcpHeader, RtcpPacket};
use crate::rtp::{Bitrate, Ssrc};

const MANTISSA_MAX: u64 = 0x3_FFFF;
const REMB_OFFSET: usize = 16;

const UNIQUE_IDENTIFIER: [u8; 4] = [b'R', b'E', b'M', b'B'];

/*
    0                   1                   2                   3
    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |V=2|P| FMT=15  |   PT=206      |             length            |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |                  SSRC of packet sender                        |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |                  SSRC of media source (0)                     |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |  Unique identifier 'R' 'E' 'M' 'B'                            |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |  Num SSRC     | BR Exp    |  BR Mantissa                      |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |   SSRC feedback                                               |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |  ...                                                          |
*/

/// Receiver Estimated Maximum Bitrate.
#[derive(Debug, Clone, PartialEq)]
pub struct Remb {
    /// SSRC of sender
    pub sender_ssrc: Ssrc,
    /// Estimated maximum bitrate
    pub bitrate: Bitrate,
    /// SSRC entries which this packet applies to
    pub ssrcs: Vec<Ssrc>,
}

impl Remb {
    fn exp_mantissa(&self) -> (u8, u32) {
        let mut mantissa = self.bitrate.as_u64();
        let mut exp = 0;

        while mantissa > MANTISSA_MAX && exp < 63 {
            mantissa >>= 1;
            exp += 1;
        }

        (exp, mantissa.min(MANTISSA_MAX) as u32)
    }
}

impl RtcpPacket for Remb {
    fn header(&self) -> RtcpHeader {
        RtcpHeader::payload(PayloadType::ApplicationLayer, self.length_words())
    }

    fn length_words(&self) -> usize {
        // header
        // remb
        // ssrcs
        1 + REMB_OFFSET / 4 + self.ssrcs.len()
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        let (exp, mantissa) = self.exp_mantissa();

        self.header().write_to(&mut buf[..LEN_HEADER]);
        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&[0; 4]);
        buf[12..16].copy_from_slice(&UNIQUE_IDENTIFIER);
        buf[16] = self.ssrcs.len() as u8;
        // 6 bit exponent and 18 bit mantissa, big-endian.
        buf[17] = (exp << 2) | (mantissa >> 16) as u8;
        buf[18] = (mantissa >> 8) as u8;
        buf[19] = mantissa as u8;

        for (index, ssrc) in self.ssrcs.iter().enumerate() {
            let begin = LEN_HEADER + REMB_OFFSET + index * 4;
            buf[begin..begin + 4].copy_from_slice(&ssrc.to_be_bytes());
        }

        self.length_words() * 4
    }
}

impl<'a> TryFrom<&'a [u8]> for Remb {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 16 {
            return Err("Remb less than 16 bytes");
        }

        let sender_ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();

        if buf[8..12] != UNIQUE_IDENTIFIER {
            return Err("Missing remb identifier");
        }

        let ssrcs_len = buf[12] as usize;
        let exp = (buf[13] >> 2) as u32;
        let mantissa = ((buf[13] & 3) as u64) << 16 | (buf[14] as u64) << 8 | buf[15] as u64;

        let bitrate = mantissa
            .checked_shl(exp)
            .filter(|v| v >> exp == mantissa)
            .unwrap_or(u64::MAX);

        if buf.len() < 16 + ssrcs_len * 4 {
            return Err("Remb ssrc count larger than packet");
        }

        let ssrcs = buf[16..16 + ssrcs_len * 4]
            .chunks_exact(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]).into())
            .collect();

        Ok(Remb {
            sender_ssrc,
            bitrate: Bitrate::new(bitrate),
            ssrcs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remb_write() {
        let input = Remb {
            sender_ssrc: 1.into(),
            bitrate: Bitrate::new(8_927_168),
            ssrcs: vec![1_215_622_422.into()],
        };

        let expected = [
            143, 206, 0, 5, 0, 0, 0, 1, 0, 0, 0, 0, 82, 69, 77, 66, 1, 26, 32, 223, 72, 116, 237,
            22,
        ];

        let mut output = [0; 1500];
        let len = input.write_to(&mut output);
        assert_eq!(expected, output[0..len]);
    }

    #[test]
    fn remb_parse() {
        // Real data sent by Chrome while watching a 6Mb/s stream
        let input = [
            0, 0, 0, 1, 0, 0, 0, 0, 82, 69, 77, 66, 1, 26, 32, 223, 72, 116, 237, 22,
        ];

        let remb = Remb::try_from(&input[..]).unwrap();
        assert_eq!(remb.bitrate.as_u64(), 8_927_168);
        assert_eq!(remb.ssrcs, vec![1_215_622_422.into()]);
    }

    #[test]
    fn remb_truncated_ssrcs() {
        let input = [0, 0, 0, 1, 0, 0, 0, 0, 82, 69, 77, 66, 2, 26, 32, 223, 72, 116, 237, 22];
        assert!(Remb::try_from(&input[..]).is_err());
    }
}
