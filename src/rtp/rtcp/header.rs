/// Length of the common RTCP header.
pub(crate) const LEN_HEADER: usize = 4;

/// The first word of every RTCP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    pub(crate) rtcp_type: RtcpType,
    pub(crate) fmt: u8,
    pub(crate) words_less_one: u16,
}

impl RtcpHeader {
    pub(crate) fn transport(kind: TransportType, length_words: usize) -> Self {
        RtcpHeader {
            rtcp_type: RtcpType::TransportLayerFeedback,
            fmt: kind as u8,
            words_less_one: (length_words - 1) as u16,
        }
    }

    pub(crate) fn payload(kind: PayloadType, length_words: usize) -> Self {
        RtcpHeader {
            rtcp_type: RtcpType::PayloadSpecificFeedback,
            fmt: kind as u8,
            words_less_one: (length_words - 1) as u16,
        }
    }

    /// Type of RTCP packet.
    pub fn rtcp_type(&self) -> RtcpType {
        self.rtcp_type
    }

    /// Feedback message type (FMT) or count, depending on packet type.
    pub fn fmt(&self) -> u8 {
        self.fmt
    }

    /// Length of entire RTCP packet (including header) in words (4 bytes).
    pub fn length_words(&self) -> usize {
        self.words_less_one as usize + 1
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) -> usize {
        buf[0] = 0b10_0_00000 | (self.fmt & 0b1_1111);
        buf[1] = self.rtcp_type as u8;
        buf[2..4].copy_from_slice(&self.words_less_one.to_be_bytes());
        LEN_HEADER
    }
}

impl<'a> TryFrom<&'a [u8]> for RtcpHeader {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < LEN_HEADER {
            return Err("Less than 4 bytes for RtcpHeader");
        }

        let version = (buf[0] & 0b11_0_00000) >> 6;
        if version != 2 {
            return Err("RTCP version is not 2");
        }

        let fmt = buf[0] & 0b00_0_11111;
        let rtcp_type = RtcpType::try_from(buf[1])?;
        let words_less_one = u16::from_be_bytes([buf[2], buf[3]]);

        Ok(RtcpHeader {
            rtcp_type,
            fmt,
            words_less_one,
        })
    }
}

/// Kind of RTCP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpType {
    /// RTCP_PT_SR
    SenderReport = 200,
    /// RTCP_PT_RR
    ReceiverReport = 201,
    /// RTCP_PT_SDES
    SourceDescription = 202,
    /// RTCP_PT_BYE
    Goodbye = 203,
    /// RTCP_PT_APP
    ApplicationDefined = 204,
    /// RTCP_PT_RTPFB
    TransportLayerFeedback = 205,
    /// RTCP_PT_PSFB
    PayloadSpecificFeedback = 206,
    /// RTCP_PT_XR
    ExtendedReport = 207,
}

impl TryFrom<u8> for RtcpType {
    type Error = &'static str;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        use RtcpType::*;
        match v {
            200 => Ok(SenderReport),
            201 => Ok(ReceiverReport),
            202 => Ok(SourceDescription),
            203 => Ok(Goodbye),
            204 => Ok(ApplicationDefined),
            205 => Ok(TransportLayerFeedback),
            206 => Ok(PayloadSpecificFeedback),
            207 => Ok(ExtendedReport),
            _ => {
                trace!("Unknown RtcpType: {}", v);
                Err("Unknown RtcpType")
            }
        }
    }
}

/// Subtypes of [`RtcpType::TransportLayerFeedback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Nack RTCP packet.
    ///
    /// Definition: <https://www.rfc-editor.org/rfc/rfc4585#section-6.2.1>
    Nack = 1,

    /// RTP Control Protocol (RTCP) Feedback for Congestion Control.
    ///
    /// Definition: <https://www.rfc-editor.org/rfc/rfc8888>
    Ccfb = 11,

    /// Transportwide congestion control packet.
    ///
    /// Definition: <https://tools.ietf.org/html/draft-holmer-rmcat-transport-wide-cc-extensions-01>
    TransportWide = 15,
}

impl TryFrom<u8> for TransportType {
    type Error = &'static str;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        use TransportType::*;
        match v {
            1 => Ok(Nack),
            11 => Ok(Ccfb),
            15 => Ok(TransportWide),
            _ => {
                trace!("Unknown TransportType: {}", v);
                Err("Unknown TransportType")
            }
        }
    }
}

/// Subtypes of [`RtcpType::PayloadSpecificFeedback`] that we handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    /// Application specific type, used for REMB.
    ///
    /// Definition: <https://www.rfc-editor.org/rfc/rfc4585#section-6.4>
    ApplicationLayer = 15,
}

impl TryFrom<u8> for PayloadType {
    type Error = &'static str;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            15 => Ok(PayloadType::ApplicationLayer),
            _ => Err("Ignore PayloadType"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_write_parse() {
        let h = RtcpHeader::transport(TransportType::Nack, 4);
        let mut buf = [0; 4];
        h.write_to(&mut buf);
        assert_eq!(buf, [0x81, 205, 0, 3]);

        let parsed: RtcpHeader = buf.as_slice().try_into().unwrap();
        assert_eq!(parsed, h);
        assert_eq!(parsed.length_words(), 4);
    }

    #[test]
    fn header_rejects_bad_version() {
        let r: Result<RtcpHeader, _> = [0x41, 205, 0, 3].as_slice().try_into();
        assert!(r.is_err());
    }
}
