#![allow(unused)]
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Once;
use std::time::{Duration, Instant};

use rtpflow::rtp::{ExtensionMap, Nack, RtpHeader, RtpPacket, Rtcp, SeqNo, Ssrc};
use rtpflow::{EncodedImage, FrameType, PacketOptions, RtpVideoSender, SenderConfig, Transport};

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

pub const PT: u8 = 96;
pub const RTX_PT: u8 = 97;

/// A packet handed to the [`Recorder`].
#[derive(Debug, Clone)]
pub struct Sent {
    pub buf: Vec<u8>,
    pub options: PacketOptions,
}

impl Sent {
    pub fn parse(&self) -> RtpPacket {
        RtpPacket::parse(&self.buf, &ExtensionMap::standard()).expect("parseable RTP")
    }

    pub fn is_rtx(&self) -> bool {
        self.parse().header.payload_type == RTX_PT.into()
    }

    /// The media sequence number, unwrapping RTX.
    pub fn media_seq(&self) -> u16 {
        let p = self.parse();
        if p.header.payload_type == RTX_PT.into() {
            RtpHeader::read_original_sequence_number(&p.payload).expect("RTX payload")
        } else {
            p.header.sequence_number
        }
    }

    /// Media payload, without the RTX prefix.
    pub fn media_payload(&self) -> Vec<u8> {
        let p = self.parse();
        if p.header.payload_type == RTX_PT.into() {
            p.payload[2..].to_vec()
        } else {
            p.payload
        }
    }
}

/// Transport keeping everything it is given.
#[derive(Debug, Default)]
pub struct Recorder {
    pub sent: Vec<Sent>,
    pub refuse: bool,
}

impl Transport for Recorder {
    fn send_rtp(&mut self, packet: &[u8], options: &PacketOptions) -> bool {
        if self.refuse {
            return false;
        }
        self.sent.push(Sent {
            buf: packet.to_vec(),
            options: *options,
        });
        true
    }
}

impl Recorder {
    pub fn take(&mut self) -> Vec<Sent> {
        std::mem::take(&mut self.sent)
    }
}

pub fn ssrc(index: usize) -> Ssrc {
    (1000 + index as u32).into()
}

pub fn rtx_ssrc(index: usize) -> Ssrc {
    (2000 + index as u32).into()
}

/// `layers` simulcast streams with RTX, unpaced.
pub fn config(layers: usize) -> SenderConfig {
    SenderConfig::new()
        .set_ssrcs((0..layers).map(ssrc).collect())
        .set_rtx_ssrcs((0..layers).map(rtx_ssrc).collect())
        .set_payload_types(vec![PT.into()])
        .set_rtx_payload_types(vec![RTX_PT.into()])
        .set_pacing(false)
}

pub fn sender(config: SenderConfig, now: Instant) -> RtpVideoSender<Recorder> {
    let mut sender = RtpVideoSender::new(config, HashMap::new(), Recorder::default())
        .expect("valid config");
    sender.set_sending(true, now);
    sender
}

/// A frame of `len` bytes for the `n`th frame at 30fps.
pub fn frame(simulcast_index: usize, n: u32, len: usize, now: Instant) -> EncodedImage {
    let frame_type = if n == 0 {
        FrameType::Key
    } else {
        FrameType::Delta
    };
    EncodedImage::new(vec![n as u8; len], frame_type, n * 3000, now)
        .with_simulcast_index(simulcast_index)
}

/// Serialize RTCP the way a remote end would send it.
pub fn rtcp_bytes(packets: impl IntoIterator<Item = Rtcp>) -> Vec<u8> {
    let mut queue: VecDeque<Rtcp> = packets.into_iter().collect();
    let mut buf = vec![0; 1500];
    let n = Rtcp::write_packet(&mut queue, &mut buf);
    assert!(queue.is_empty(), "RTCP fits in one buffer");
    buf.truncate(n);
    buf
}

pub fn nack(ssrc: Ssrc, seqs: impl IntoIterator<Item = u16>) -> Vec<u8> {
    let seqs: BTreeSet<u16> = seqs.into_iter().collect();
    let nacks = Nack::from_seqs(
        9999.into(),
        ssrc,
        seqs.into_iter().map(|s| SeqNo::from(s as u64)),
    );
    rtcp_bytes(nacks.into_iter().map(Rtcp::Nack))
}

/// Drive the sender until nothing is due before `until`.
pub fn progress(sender: &mut RtpVideoSender<Recorder>, mut now: Instant, until: Instant) -> Instant {
    loop {
        let next = sender
            .poll_timeout()
            .unwrap_or(until)
            .max(now + Duration::from_millis(1));
        if next > until {
            sender.handle_timeout(until);
            return until;
        }
        now = next;
        sender.handle_timeout(now);
    }
}

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}
