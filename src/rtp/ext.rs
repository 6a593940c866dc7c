use std::fmt;

/// RTP header extensions understood by the sender and the congestion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Extension {
    /// <http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time>
    AbsoluteSendTime,
    /// <http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01>
    TransportSequenceNumber,
    /// <https://aomediacodec.github.io/av1-rtp-spec/#dependency-descriptor-rtp-header-extension>
    DependencyDescriptor,
}

const EXT_URI: &[(Extension, &str)] = &[
    (
        Extension::AbsoluteSendTime,
        "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
    ),
    (
        Extension::TransportSequenceNumber,
        "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
    ),
    (
        Extension::DependencyDescriptor,
        "https://aomediacodec.github.io/av1-rtp-spec/#dependency-descriptor-rtp-header-extension",
    ),
];

impl Extension {
    /// Parses an extension from a URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        EXT_URI.iter().find(|(_, u)| *u == uri).map(|(e, _)| *e)
    }

    /// Extension URI as used in SDP extmap lines.
    pub fn as_uri(&self) -> &'static str {
        EXT_URI
            .iter()
            .find(|(e, _)| e == self)
            .map(|(_, u)| *u)
            .unwrap_or("unknown")
    }

    fn write_to(&self, buf: &mut [u8], ev: &ExtensionValues) -> Option<usize> {
        match self {
            Extension::AbsoluteSendTime => {
                // 24 bit fixed point 6 bits for seconds, 18 for the decimals.
                // wraps around at 64 seconds.
                let v = ev.abs_send_time?;
                buf[..3].copy_from_slice(&(v & 0xff_ffff).to_be_bytes()[1..]);
                Some(3)
            }
            Extension::TransportSequenceNumber => {
                let v = ev.transport_cc?;
                buf[..2].copy_from_slice(&v.to_be_bytes());
                Some(2)
            }
            Extension::DependencyDescriptor => {
                let v = ev.dependency_descriptor.as_ref()?;
                if v.is_empty() {
                    return None;
                }
                buf[..v.len()].copy_from_slice(v);
                Some(v.len())
            }
        }
    }

    fn parse_value(&self, buf: &[u8], ev: &mut ExtensionValues) -> Option<()> {
        match self {
            Extension::AbsoluteSendTime => {
                if buf.len() < 3 {
                    return None;
                }
                ev.abs_send_time = Some(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]));
            }
            Extension::TransportSequenceNumber => {
                if buf.len() < 2 {
                    return None;
                }
                ev.transport_cc = Some(u16::from_be_bytes([buf[0], buf[1]]));
            }
            Extension::DependencyDescriptor => {
                if buf.len() < 3 {
                    return None;
                }
                ev.dependency_descriptor = Some(buf.to_vec());
            }
        }
        Some(())
    }

    fn value_len(&self, ev: &ExtensionValues) -> Option<usize> {
        match self {
            Extension::AbsoluteSendTime => ev.abs_send_time.map(|_| 3),
            Extension::TransportSequenceNumber => ev.transport_cc.map(|_| 2),
            Extension::DependencyDescriptor => ev
                .dependency_descriptor
                .as_ref()
                .filter(|v| !v.is_empty())
                .map(|v| v.len()),
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Extension::AbsoluteSendTime => "abs-send-time",
            Extension::TransportSequenceNumber => "transport-wide-cc",
            Extension::DependencyDescriptor => "dependency-descriptor",
        };
        write!(f, "{name}")
    }
}

// All header extensions must have a common "form", either using
// 1 byte for the (ID, len) or 2 bytes for the (ID, len).
// If one extension requires the two byte form
// (probably because of its size, but possibly because of ID),
// The form must be the two-byte variety for all of them.
#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ExtensionsForm {
    // See RFC 8285 Section 4.2
    // ID Range: 1..=14
    // Length Range: 1..=16
    OneByte = 0xBEDE,
    // See RFC 8285 Section 4.3
    // ID Range: 1..=255
    // Length Range: 0..=255
    TwoByte = 0x1000,
}

const MAX_ID_ONE_BYTE_FORM: u8 = 14;
const MAX_LEN_ONE_BYTE_FORM: usize = 16;

/// Highest extension id we map.
pub const MAX_ID: u8 = 16;

impl ExtensionsForm {
    pub(crate) fn serialize(self) -> [u8; 2] {
        (self as u16).to_be_bytes()
    }

    pub(crate) fn parse(bytes: [u8; 2]) -> Option<Self> {
        let serialized = u16::from_be_bytes(bytes);
        if serialized == ExtensionsForm::OneByte as u16 {
            Some(ExtensionsForm::OneByte)
        // Ignore the app bits
        } else if (serialized & 0xFFF0) == ExtensionsForm::TwoByte as u16 {
            Some(ExtensionsForm::TwoByte)
        } else {
            None
        }
    }
}

/// Values of the RTP header extensions of one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionValues {
    /// abs-send-time in 6.18 fixed point seconds, 24 bits.
    pub abs_send_time: Option<u32>,
    /// Transport-wide sequence number.
    pub transport_cc: Option<u16>,
    /// Serialized dependency descriptor.
    pub dependency_descriptor: Option<Vec<u8>>,
}

/// Mapping between RTP extension id to what extension that is.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtensionMap([Option<Extension>; MAX_ID as usize]); // index 0 is extmap:1.

impl ExtensionMap {
    /// Create an empty map.
    pub fn empty() -> Self {
        ExtensionMap([None; MAX_ID as usize])
    }

    /// Creates a map with the mappings Chrome offers for video.
    pub fn standard() -> Self {
        let mut exts = Self::empty();

        exts.set(2, Extension::AbsoluteSendTime);
        exts.set(3, Extension::TransportSequenceNumber);
        exts.set(9, Extension::DependencyDescriptor);

        exts
    }

    /// Set a mapping for an extension.
    ///
    /// The id must be in 1..=MAX_ID (1-indexed). Any previous id for the same
    /// extension is removed.
    pub fn set(&mut self, id: u8, ext: Extension) {
        if id < 1 || id > MAX_ID {
            debug!("Set RTP extension out of range 1-{}: {}", MAX_ID, id);
            return;
        }
        for e in self.0.iter_mut() {
            if *e == Some(ext) {
                *e = None;
            }
        }
        self.0[id as usize - 1] = Some(ext);
    }

    /// Remove the mapping for an extension.
    pub fn remove(&mut self, ext: Extension) {
        for e in self.0.iter_mut() {
            if *e == Some(ext) {
                *e = None;
            }
        }
    }

    /// Look up the extension for the id.
    pub fn lookup(&self, id: u8) -> Option<Extension> {
        if id >= 1 && id <= MAX_ID {
            self.0[id as usize - 1]
        } else {
            None
        }
    }

    /// Finds the id for an extension (if mapped).
    ///
    /// The returned id will be 1-based.
    pub fn id_of(&self, e: Extension) -> Option<u8> {
        self.0
            .iter()
            .position(|x| *x == Some(e))
            .map(|p| p as u8 + 1)
    }

    /// Whether the extension is mapped.
    pub fn contains(&self, e: Extension) -> bool {
        self.id_of(e).is_some()
    }

    /// Returns an iterator over the elements of the extension map
    pub fn iter(&self) -> impl Iterator<Item = (u8, Extension)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.map(|e| ((i + 1) as u8, e)))
    }

    pub(crate) fn form(&self, ev: &ExtensionValues) -> ExtensionsForm {
        let two_byte = self.iter().any(|(id, ext)| {
            let len = ext.value_len(ev);
            len.is_some() && (id > MAX_ID_ONE_BYTE_FORM || len > Some(MAX_LEN_ONE_BYTE_FORM))
        });

        if two_byte {
            ExtensionsForm::TwoByte
        } else {
            ExtensionsForm::OneByte
        }
    }

    /// Byte size of the extension block (without the 4 byte extension header,
    /// but including padding to a word boundary).
    pub(crate) fn block_len(&self, ev: &ExtensionValues) -> usize {
        let form = self.form(ev);
        let per_ext = match form {
            ExtensionsForm::OneByte => 1,
            ExtensionsForm::TwoByte => 2,
        };
        let len: usize = self
            .iter()
            .filter_map(|(_, e)| e.value_len(ev))
            .map(|l| l + per_ext)
            .sum();
        (len + 3) / 4 * 4
    }

    // https://tools.ietf.org/html/rfc8285
    pub(crate) fn parse(&self, mut buf: &[u8], form: ExtensionsForm, ev: &mut ExtensionValues) {
        loop {
            if buf.is_empty() {
                return;
            }

            if buf[0] == 0 {
                // padding
                buf = &buf[1..];
                continue;
            }

            let (id, len) = match form {
                ExtensionsForm::OneByte => {
                    let id = buf[0] >> 4;
                    let len = (buf[0] & 0xf) as usize + 1;
                    buf = &buf[1..];

                    if id == 15 {
                        // ID 15 is reserved and terminates processing of the
                        // extension block.
                        return;
                    }
                    (id, len)
                }
                ExtensionsForm::TwoByte => {
                    if buf.len() < 2 {
                        trace!("Not enough ext header len: {} < {}", buf.len(), 2);
                        return;
                    }
                    let id = buf[0];
                    let len = buf[1] as usize;
                    buf = &buf[2..];
                    (id, len)
                }
            };

            if buf.len() < len {
                trace!("Not enough type ext len: {} < {}", buf.len(), len);
                return;
            }

            if let Some(ext) = self.lookup(id) {
                if ext.parse_value(&buf[..len], ev).is_none() {
                    trace!("Failed to parse RTP extension: {}", ext);
                }
            }

            buf = &buf[len..];
        }
    }

    /// Write the extension block, returning bytes written (not padded).
    pub(crate) fn write_to(
        &self,
        ext_buf: &mut [u8],
        ev: &ExtensionValues,
        form: ExtensionsForm,
    ) -> usize {
        let orig_len = ext_buf.len();
        let mut b = ext_buf;

        for (id, ext) in self.iter() {
            match form {
                ExtensionsForm::OneByte => {
                    if let Some(n) = ext.write_to(&mut b[1..], ev) {
                        debug_assert!(n > 0 && n <= MAX_LEN_ONE_BYTE_FORM);
                        b[0] = id << 4 | (n as u8 - 1);
                        b = &mut b[1 + n..];
                    }
                }
                ExtensionsForm::TwoByte => {
                    if let Some(n) = ext.write_to(&mut b[2..], ev) {
                        b[0] = id;
                        b[1] = n as u8;
                        b = &mut b[2 + n..];
                    }
                }
            }
        }

        orig_len - b.len()
    }
}

impl Default for ExtensionMap {
    fn default() -> Self {
        ExtensionMap::standard()
    }
}

impl fmt::Debug for ExtensionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extensions(")?;
        let joined = self
            .iter()
            .map(|(id, e)| format!("{id}={e}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{joined}")?;
        write!(f, ")")?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uri_mapping() {
        for (e, uri) in EXT_URI {
            assert_eq!(Extension::from_uri(uri), Some(*e));
            assert_eq!(e.as_uri(), *uri);
        }
        assert_eq!(Extension::from_uri("urn:nope"), None);
    }

    #[test]
    fn set_moves_mapping() {
        let mut exts = ExtensionMap::empty();
        exts.set(3, Extension::TransportSequenceNumber);
        exts.set(5, Extension::TransportSequenceNumber);
        assert_eq!(exts.lookup(3), None);
        assert_eq!(exts.id_of(Extension::TransportSequenceNumber), Some(5));

        exts.set(0, Extension::AbsoluteSendTime);
        exts.set(17, Extension::AbsoluteSendTime);
        assert!(!exts.contains(Extension::AbsoluteSendTime));
    }

    #[test]
    fn long_value_needs_two_byte_form() {
        let exts = ExtensionMap::standard();
        let mut ev = ExtensionValues {
            transport_cc: Some(1),
            ..Default::default()
        };
        assert_eq!(exts.form(&ev), ExtensionsForm::OneByte);

        ev.dependency_descriptor = Some(vec![0; 17]);
        assert_eq!(exts.form(&ev), ExtensionsForm::TwoByte);
    }

    #[test]
    fn write_parse_one_byte() {
        let exts = ExtensionMap::standard();
        let ev = ExtensionValues {
            abs_send_time: Some(0x12_3456),
            transport_cc: Some(0xbeef),
            dependency_descriptor: Some(vec![0x80, 0x01, 0x02]),
        };
        let mut buf = [0; 64];
        let n = exts.write_to(&mut buf, &ev, ExtensionsForm::OneByte);
        assert_eq!(n, 4 + 3 + 4);
        assert_eq!(exts.block_len(&ev), 12);

        let mut parsed = ExtensionValues::default();
        exts.parse(&buf[..12], ExtensionsForm::OneByte, &mut parsed);
        assert_eq!(parsed, ev);
    }
}
