use crate::rtp::Bitrate;

/// Ceiling for the layer allocation.
///
/// With headroom allowed, the allocation may go above `target` up to the lesser of the headroom
/// and the rate the encoder naturally produces. Never below `target`.
pub fn headroom_ceiling(
    target: Bitrate,
    headroom: Option<Bitrate>,
    media_rate: Bitrate,
    allow: bool,
) -> Bitrate {
    match headroom {
        Some(headroom) if allow => target.max(headroom.min(media_rate)),
        _ => target,
    }
}

/// How much an encoder overshoots, as a factor >= 1.0.
///
/// `media` is the ratio of produced to allocated bitrate for a layer. `network` the ratio of sent
/// to targeted bitrate. The network ratio is tolerated up to `headroom_fraction` above 1.0.
pub fn utilization_factor(media: f64, network: f64, headroom_fraction: f64) -> f64 {
    1.0_f64.max(media.max(network - headroom_fraction))
}

/// Lower `rate` to compensate for overshoot, not below `min`.
///
/// Never returns more than `rate`.
pub fn adjusted_bitrate(rate: Bitrate, factor: f64, min: Bitrate) -> Bitrate {
    if factor <= 1.0 {
        return rate;
    }
    (rate / factor).max(min.min(rate))
}

/// Bitrate left for payload once per packet overhead is paid for.
///
/// `overhead_bytes` is the RTP header plus transport overhead of one packet.
pub fn payload_bitrate(target: Bitrate, overhead_bytes: usize, packets_per_second: f64) -> Bitrate {
    let overhead = overhead_bytes as f64 * 8.0 * packets_per_second;
    Bitrate::from(target.as_f64() - overhead).max(Bitrate::ZERO)
}

/// Number of packets a frame needs at `target` and `framerate`, when we have not yet seen one.
///
/// `packet_size` is the max packet size including transport overhead.
pub fn packets_per_frame_estimate(target: Bitrate, framerate: f64, packet_size: usize) -> usize {
    if packet_size == 0 {
        return 1;
    }
    let framerate = framerate.max(1.0);
    let frame_bytes = target.as_f64() / framerate / 8.0;
    (frame_bytes / packet_size as f64).ceil().max(0.0) as usize
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ceiling_without_headroom() {
        let target = Bitrate::kbps(500);
        assert_eq!(headroom_ceiling(target, None, Bitrate::mbps(1), true), target);
        assert_eq!(
            headroom_ceiling(target, Some(Bitrate::mbps(2)), Bitrate::mbps(1), false),
            target
        );
    }

    #[test]
    fn ceiling_with_headroom() {
        let target = Bitrate::kbps(500);

        // Media rate is the limit.
        let c = headroom_ceiling(target, Some(Bitrate::mbps(2)), Bitrate::kbps(800), true);
        assert_eq!(c, Bitrate::kbps(800));

        // Headroom is the limit.
        let c = headroom_ceiling(target, Some(Bitrate::kbps(600)), Bitrate::kbps(800), true);
        assert_eq!(c, Bitrate::kbps(600));

        // Never below target.
        let c = headroom_ceiling(target, Some(Bitrate::kbps(600)), Bitrate::kbps(100), true);
        assert_eq!(c, target);
    }

    #[test]
    fn utilization_within_headroom() {
        // 10% network overshoot is tolerated with 10% headroom.
        let f = utilization_factor(1.0, 1.1, 0.1);
        assert!((f - 1.0).abs() < 1e-9);
        assert_eq!(adjusted_bitrate(Bitrate::kbps(300), f, Bitrate::ZERO), Bitrate::kbps(300));
    }

    #[test]
    fn utilization_media_overshoot() {
        // With 100% headroom the network is ignored, the media overshoot remains.
        let f = utilization_factor(1.1, 1.3, 1.0);
        assert!((f - 1.1).abs() < 1e-9);
        let adjusted = adjusted_bitrate(Bitrate::kbps(330), f, Bitrate::ZERO);
        assert!((adjusted.as_f64() - 300_000.0).abs() < 1.0);
    }

    #[test]
    fn adjusted_never_boosts() {
        let f = utilization_factor(0.5, 0.5, 0.1);
        assert_eq!(f, 1.0);

        // Min doesn't lift the rate above where it was.
        let a = adjusted_bitrate(Bitrate::kbps(100), 2.0, Bitrate::kbps(200));
        assert_eq!(a, Bitrate::kbps(100));

        // But holds the rate at min.
        let a = adjusted_bitrate(Bitrate::kbps(300), 2.0, Bitrate::kbps(200));
        assert_eq!(a, Bitrate::kbps(200));
    }

    #[test]
    fn overhead_subtraction() {
        // 20 byte RTP header, 40 bytes transport overhead, 1500 byte packets.
        let overhead = 20 + 40;
        let packet_size = 1500 + 40;

        let ppf = packets_per_frame_estimate(Bitrate::kbps(300), 15.0, packet_size);
        assert_eq!(ppf * 15, 30);
        let payload = payload_bitrate(Bitrate::kbps(300), overhead, 30.0);
        assert_eq!(payload, Bitrate::new(300_000 - 60 * 8 * 30));

        let ppf = packets_per_frame_estimate(Bitrate::kbps(150), 15.0, packet_size);
        assert_eq!(ppf * 15, 15);

        let ppf = packets_per_frame_estimate(Bitrate::mbps(1), 30.0, packet_size);
        assert_eq!(ppf * 30, 90);
    }

    #[test]
    fn overhead_clamps_at_zero() {
        let payload = payload_bitrate(Bitrate::kbps(10), 60, 1000.0);
        assert_eq!(payload, Bitrate::ZERO);
    }
}
