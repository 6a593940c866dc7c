use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rtpflow::allocation::BitrateUpdate;
use rtpflow::rtp::{Bitrate, Rtcp, Ssrc};
use rtpflow::{CongestionConfig, FeedbackMode, ReceiveSideCongestionController, ReceivedPacket};

mod common;
use common::{config, frame, init_log, ms, nack, rtcp_bytes, rtx_ssrc, sender, ssrc, Sent};

const LAYERS: usize = 2;

/// Receiving end: what arrived per media SSRC, and which sequence numbers are missing.
#[derive(Default)]
struct Receiver {
    received: HashMap<Ssrc, BTreeSet<u16>>,
}

impl Receiver {
    fn on_packet(&mut self, p: &Sent) {
        let header = p.parse().header;
        let media = (0..LAYERS)
            .find(|i| header.ssrc == ssrc(*i) || header.ssrc == rtx_ssrc(*i))
            .map(ssrc)
            .expect("known SSRC");
        self.received.entry(media).or_default().insert(p.media_seq());
    }

    fn missing(&self, media: Ssrc) -> Vec<u16> {
        let Some(seqs) = self.received.get(&media) else {
            return vec![];
        };
        let (Some(first), Some(last)) = (seqs.first(), seqs.last()) else {
            return vec![];
        };
        (*first..=*last).filter(|s| !seqs.contains(s)).collect()
    }
}

fn run(mode: FeedbackMode, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);

    let start = Instant::now();
    let config = config(LAYERS).set_pacing(true);
    let mut s = sender(config, start);
    s.on_bitrate_updated(BitrateUpdate::new(Bitrate::mbps(2)), 30.0, start);
    s.on_rtt_update(ms(30));

    let controller = ReceiveSideCongestionController::new(CongestionConfig::new().set_feedback_mode(mode));
    let mut receiver = Receiver::default();

    let delay = ms(15);
    let mut network: VecDeque<(Instant, Sent)> = VecDeque::new();
    let mut lost = 0;

    let frames_until = start + Duration::from_secs(3);
    let end = frames_until + Duration::from_secs(1);

    let mut now = start;
    let mut n = 0;
    let mut next_frame = start;
    let mut next_nack = start + ms(50);

    while now < end {
        if now >= next_frame && now < frames_until {
            for layer in 0..LAYERS {
                s.on_encoded_image(frame(layer, n, 1500 + 2500 * layer, now), now)
                    .unwrap();
            }
            n += 1;
            next_frame += ms(33);
        }

        s.handle_timeout(now);

        for p in s.transport_mut().take() {
            if rng.random_bool(0.1) {
                lost += 1;
                continue;
            }
            network.push_back((now + delay, p));
        }

        while network.front().map(|(at, _)| *at <= now).unwrap_or(false) {
            let Some((_, p)) = network.pop_front() else {
                break;
            };
            let header = p.parse().header;
            controller.on_received_packet(&ReceivedPacket::from_rtp(&header, p.buf.len(), false), now);
            receiver.on_packet(&p);
        }

        controller.maybe_process(now);
        let mut rtcp: Vec<Rtcp> = vec![];
        while let Some(r) = controller.poll_rtcp() {
            rtcp.push(r);
        }
        if !rtcp.is_empty() {
            s.deliver_rtcp(&rtcp_bytes(rtcp), now);
        }

        if now >= next_nack {
            for layer in 0..LAYERS {
                let missing = receiver.missing(ssrc(layer));
                if !missing.is_empty() {
                    s.deliver_rtcp(&nack(ssrc(layer), missing), now);
                }
            }
            next_nack += ms(50);
        }

        now += ms(5);
    }

    assert!(lost > 0);

    for layer in 0..LAYERS {
        let media = ssrc(layer);
        assert_eq!(receiver.missing(media), Vec::<u16>::new(), "layer {}", layer);

        let stats = s.stream(layer).unwrap().stats();
        assert_eq!(stats.delta_frames + stats.key_frames, n as u64);
        assert!(stats.packets_resent > 0);
        assert!(stats.acked > 0);
        assert!(stats.lost > 0);

        // Everything the stream sent arrived at some point.
        let media_packets = stats.packets - stats.packets_resent;
        let received = receiver.received[&media].len() as u64;
        assert!(received + 5 >= media_packets, "{} of {}", received, media_packets);
    }
}

#[test]
pub fn recovers_with_transport_feedback() {
    init_log();
    run(FeedbackMode::TransportSequenceNumber, 1);
}

#[test]
pub fn recovers_with_congestion_control_feedback() {
    init_log();
    run(FeedbackMode::Rfc8888, 2);
}
