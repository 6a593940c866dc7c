//! RTP and RTCP wire formats.

mod id;
pub use id::{Pt, SeqNo, Ssrc};

mod ext;
pub use ext::{Extension, ExtensionMap, ExtensionValues, MAX_ID};

mod header;
pub use header::{extend_u16, RtpHeader, RTP_FIXED_HEADER_SIZE};

mod dependency_descriptor;
pub use dependency_descriptor::{DecodeTargetIndication, DependencyDescriptor};
pub use dependency_descriptor::{FrameDependencyStructure, FrameDependencyTemplate};

mod rtcp;
pub use rtcp::*;

mod bandwidth;
pub use bandwidth::{Bitrate, DataSize};

/// An RTP packet, header and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// The parsed (or to be written) header.
    pub header: RtpHeader,
    /// Payload after the header.
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Size this packet takes on the wire with the given extensions.
    pub fn write_len(&self, exts: &ExtensionMap) -> usize {
        self.header.write_len(exts) + self.payload.len()
    }

    /// Serialize header and payload.
    pub fn to_bytes(&self, exts: &ExtensionMap) -> Vec<u8> {
        let mut buf = vec![0; self.write_len(exts)];
        let n = self.header.write_to(&mut buf, exts);
        buf[n..n + self.payload.len()].copy_from_slice(&self.payload);
        buf.truncate(n + self.payload.len());
        buf
    }

    /// Parse a packet. Padding, if any, is removed from the payload.
    pub fn parse(buf: &[u8], exts: &ExtensionMap) -> Option<RtpPacket> {
        let header = RtpHeader::parse(buf, exts)?;
        let mut payload = buf[header.header_len..].to_vec();

        if header.has_padding {
            let pad = *payload.last()? as usize;
            let len = payload.len().checked_sub(pad)?;
            payload.truncate(len);
        }

        Some(RtpPacket { header, payload })
    }
}
