#![allow(clippy::unusual_byte_groupings)]

use super::ext::{ExtensionMap, ExtensionValues, ExtensionsForm};
use super::{Pt, SeqNo, Ssrc};

/// Size of the fixed RTP header, without CSRC and extensions.
pub const RTP_FIXED_HEADER_SIZE: usize = 12;

/// Parsed header from an RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Whether the packet carries padding at the end.
    pub has_padding: bool,
    /// For video, this marker signifies the end of a series of packets that
    /// together form a single video frame.
    pub marker: bool,
    /// Type of payload being carried.
    pub payload_type: Pt,
    /// Sequence number increasing by 1 for each RTP packet.
    pub sequence_number: u16,
    /// Timestamp in media time for the RTP packet, 90kHz for video.
    pub timestamp: u32,
    /// Sender source identifier.
    pub ssrc: Ssrc,
    /// The extension values parsed using the extension map.
    pub ext_vals: ExtensionValues,
    /// Length of header.
    pub header_len: usize,
}

impl RtpHeader {
    /// Size this header would take when written with `exts`.
    pub fn write_len(&self, exts: &ExtensionMap) -> usize {
        let block = exts.block_len(&self.ext_vals);
        if block == 0 {
            RTP_FIXED_HEADER_SIZE
        } else {
            RTP_FIXED_HEADER_SIZE + 4 + block
        }
    }

    pub(crate) fn write_to(&self, buf: &mut [u8], exts: &ExtensionMap) -> usize {
        let has_extension = exts.block_len(&self.ext_vals) > 0;

        buf[0] = 0b10_0_0_0000
            | if self.has_padding { 1 << 5 } else { 0 }
            | if has_extension { 1 << 4 } else { 0 };

        buf[1] = *self.payload_type & 0b0111_1111 | if self.marker { 1 << 7 } else { 0 };

        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        if !has_extension {
            return RTP_FIXED_HEADER_SIZE;
        }

        let exts_form = exts.form(&self.ext_vals);
        buf[12..14].copy_from_slice(&exts_form.serialize());

        let ext_buf = &mut buf[16..];
        let mut ext_len = exts.write_to(ext_buf, &self.ext_vals, exts_form);

        let pad = 4 - ext_len % 4;
        if pad < 4 {
            for b in &mut ext_buf[ext_len..ext_len + pad] {
                *b = 0;
            }
            ext_len += pad;
        }

        let ext_words = (ext_len / 4) as u16;
        buf[14..16].copy_from_slice(&ext_words.to_be_bytes());

        16 + ext_len
    }

    /// Parse an RTP header. Returns `None` for anything that isn't RTP version 2.
    pub fn parse(buf: &[u8], exts: &ExtensionMap) -> Option<RtpHeader> {
        let orig_len = buf.len();
        if buf.len() < RTP_FIXED_HEADER_SIZE {
            trace!("RTP header too short < 12: {}", buf.len());
            return None;
        }

        let version = (buf[0] & 0b1100_0000) >> 6;
        if version != 2 {
            trace!("RTP version is not 2");
            return None;
        }
        let has_padding = buf[0] & 0b0010_0000 > 0;
        let has_extension = buf[0] & 0b0001_0000 > 0;
        let csrc_count = (buf[0] & 0b0000_1111) as usize;
        let marker = buf[1] & 0b1000_0000 > 0;
        let payload_type = (buf[1] & 0b0111_1111).into();
        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let buf: &[u8] = &buf[RTP_FIXED_HEADER_SIZE..];

        // CSRC are not used by us, skip over them.
        let csrc_len = 4 * csrc_count;
        if buf.len() < csrc_len {
            trace!("RTP header invalid, not enough csrc");
            return None;
        }
        let buf: &[u8] = &buf[csrc_len..];

        let mut ext_vals = ExtensionValues::default();

        let rest = if !has_extension {
            buf
        } else {
            if buf.len() < 4 {
                trace!("RTP bad header extension");
                return None;
            }

            let Some(exts_form) = ExtensionsForm::parse([buf[0], buf[1]]) else {
                trace!(
                    "Ignoring unknown RTP header extensions form: {:?}",
                    u16::from_be_bytes([buf[0], buf[1]])
                );
                return None;
            };
            let ext_words = u16::from_be_bytes([buf[2], buf[3]]);
            let ext_len = ext_words as usize * 4;

            let buf: &[u8] = &buf[4..];

            if buf.len() < ext_len {
                trace!("RTP ext len larger than header {} > {}", buf.len(), ext_len);
                return None;
            }

            exts.parse(&buf[..ext_len], exts_form, &mut ext_vals);
            &buf[ext_len..]
        };

        Some(RtpHeader {
            has_padding,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc: ssrc.into(),
            ext_vals,
            header_len: orig_len - rest.len(),
        })
    }

    /// For RTX the original sequence number is inserted before the RTP payload.
    pub fn read_original_sequence_number(buf: &[u8]) -> Option<u16> {
        if buf.len() < 2 {
            // This is not an RTX packet, probably a padding packet
            return None;
        }
        Some(u16::from_be_bytes([buf[0], buf[1]]))
    }

    /// For RTX the original sequence number is inserted before the RTP payload.
    pub fn write_original_sequence_number(buf: &mut [u8], seq_no: SeqNo) -> usize {
        buf[0..2].copy_from_slice(&seq_no.as_u16().to_be_bytes());
        2
    }

    /// Sequencer number of this RTP header given the previous number.
    ///
    /// The logic detects wrap-arounds of the 16-bit RTP sequence number.
    pub fn sequence_number(&self, previous: Option<SeqNo>) -> SeqNo {
        extend_u16(previous.map(|v| *v), self.sequence_number).into()
    }
}

/// "extend" a 16 bit sequence number into a 64 bit by
/// using the knowledge of the previous such sequence number.
pub fn extend_u16(prev_ext_seq: Option<u64>, seq: u16) -> u64 {
    const MAX: u64 = 1 << 16;
    const HALF: u64 = MAX / 2;
    const ROC_MASK: i64 = (u64::MAX >> 16) as i64;

    let seq = seq as u64;

    let Some(prev_index) = prev_ext_seq else {
        // No wrap-around so far.
        return seq;
    };

    let roc = (prev_index >> 16) as i64; // how many wrap-arounds.
    let prev_seq = prev_index & (MAX - 1);

    let v = if prev_seq < HALF {
        if seq > HALF + prev_seq {
            (roc - 1) & ROC_MASK
        } else {
            roc
        }
    } else if prev_seq > seq + HALF {
        (roc + 1) & ROC_MASK
    } else {
        roc
    };

    (v as u64) * MAX + seq
}

impl Default for RtpHeader {
    fn default() -> Self {
        Self {
            has_padding: false,
            marker: false,
            payload_type: 96.into(),
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0.into(),
            ext_vals: ExtensionValues::default(),
            header_len: RTP_FIXED_HEADER_SIZE,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rtp::Extension;

    #[test]
    fn extend_u16_wrap_around() {
        assert_eq!(extend_u16(None, 0), 0);
        assert_eq!(extend_u16(Some(0), 1), 1);
        assert_eq!(extend_u16(Some(65_535), 0), 65_536);
        assert_eq!(extend_u16(Some(65_500), 2), 65_538);
        assert_eq!(extend_u16(Some(2), 1), 1);
        assert_eq!(extend_u16(Some(65_538), 1), 65_537);
        assert_eq!(extend_u16(Some(65_500), 65_500), 65_500);
    }

    #[test]
    fn header_without_extension_values() {
        let header = RtpHeader {
            payload_type: 33.into(),
            sequence_number: 47_000,
            timestamp: 10_000,
            ssrc: 44.into(),
            ..Default::default()
        };
        let exts = ExtensionMap::standard();
        let mut buf = vec![0; 100];
        let n = header.write_to(&mut buf, &exts);
        assert_eq!(header.write_len(&exts), n);
        assert_eq!(
            &buf[..n],
            &[128, 33, 183, 152, 0, 0, 39, 16, 0, 0, 0, 44]
        );
    }

    #[test]
    fn write_one_byte_form() {
        let mut exts = ExtensionMap::empty();
        exts.set(3, Extension::TransportSequenceNumber);

        let header = RtpHeader {
            payload_type: 33.into(),
            sequence_number: 47_001,
            timestamp: 12_000,
            ssrc: 44.into(),
            marker: true,
            ext_vals: ExtensionValues {
                transport_cc: Some(0x0102),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut buf = vec![0; 100];
        let n = header.write_to(&mut buf, &exts);
        assert_eq!(
            &buf[..n],
            &[
                144, 161, 183, 153, 0, 0, 46, 224, 0, 0, 0, 44, 0xBE, 0xDE, 0, 1, 0x31, 1, 2, 0
            ]
        );

        let parsed = RtpHeader::parse(&buf[..n], &exts).unwrap();
        assert!(parsed.marker);
        assert_eq!(parsed.header_len, 20);
        assert_eq!(parsed.ext_vals.transport_cc, Some(0x0102));
    }

    #[test]
    fn write_two_byte_form() {
        let mut exts = ExtensionMap::empty();
        // An ID larger than 14 forces the 2-byte header extension form
        exts.set(15, Extension::TransportSequenceNumber);

        let header = RtpHeader {
            payload_type: 33.into(),
            sequence_number: 47_000,
            timestamp: 10_000,
            ssrc: 44.into(),
            ext_vals: ExtensionValues {
                transport_cc: Some(7),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut buf = vec![0; 100];
        let n = header.write_to(&mut buf, &exts);
        assert_eq!(
            &buf[..n],
            &[144, 33, 183, 152, 0, 0, 39, 16, 0, 0, 0, 44, 0x10, 0x00, 0, 1, 15, 2, 0, 7]
        );

        let parsed = RtpHeader::parse(&buf[..n], &exts).unwrap();
        assert_eq!(parsed.ext_vals.transport_cc, Some(7));
    }

    #[test]
    fn parse_rejects_garbage() {
        let exts = ExtensionMap::standard();
        assert!(RtpHeader::parse(&[0x80, 0, 0], &exts).is_none());
        // version 1
        assert!(RtpHeader::parse(&[0x40; 12], &exts).is_none());
        // extension bit set but no extension header
        assert!(RtpHeader::parse(&[0x90, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1], &exts).is_none());
    }

    #[test]
    fn original_sequence_number() {
        let mut buf = [0; 2];
        RtpHeader::write_original_sequence_number(&mut buf, 65_537.into());
        assert_eq!(RtpHeader::read_original_sequence_number(&buf), Some(1));
        assert_eq!(RtpHeader::read_original_sequence_number(&buf[..1]), None);
    }
}
