/// Split `len` bytes of payload into packets.
///
/// The first packet can carry `first_capacity` bytes, every following packet `other_capacity`.
/// The sizes are balanced so that packets are about the same size, rather than filling every
/// packet to the brim and leaving a tiny last one.
///
/// Returns `None` if there's no room for payload at all.
pub(crate) fn payload_sizes(
    len: usize,
    first_capacity: usize,
    other_capacity: usize,
) -> Option<Vec<usize>> {
    if len == 0 {
        return Some(vec![]);
    }

    if first_capacity == 0 || (len > first_capacity && other_capacity == 0) {
        return None;
    }

    let count = if len <= first_capacity {
        1
    } else {
        1 + (len - first_capacity + other_capacity - 1) / other_capacity
    };

    let mut sizes = Vec::with_capacity(count);
    let mut remaining = len;

    for i in 0..count {
        let capacity = if i == 0 { first_capacity } else { other_capacity };
        let left = count - i;

        let balanced = (remaining + left - 1) / left;
        // What later packets can't take must go in this one.
        let at_least = remaining.saturating_sub((left - 1) * other_capacity);

        let size = balanced.max(at_least).min(capacity);
        sizes.push(size);
        remaining -= size;
    }

    debug_assert_eq!(remaining, 0);

    Some(sizes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_payload() {
        assert_eq!(payload_sizes(0, 100, 100), Some(vec![]));
    }

    #[test]
    fn single_packet() {
        assert_eq!(payload_sizes(100, 100, 100), Some(vec![100]));
    }

    #[test]
    fn balanced_split() {
        assert_eq!(payload_sizes(101, 100, 100), Some(vec![51, 50]));
        assert_eq!(payload_sizes(250, 100, 100), Some(vec![84, 83, 83]));
    }

    #[test]
    fn smaller_first_packet() {
        // First packet carries a larger header.
        assert_eq!(payload_sizes(110, 10, 100), Some(vec![10, 100]));
        assert_eq!(payload_sizes(150, 60, 100), Some(vec![60, 90]));
    }

    #[test]
    fn larger_first_packet() {
        assert_eq!(payload_sizes(105, 100, 10), Some(vec![95, 10]));
    }

    #[test]
    fn no_room() {
        assert_eq!(payload_sizes(10, 0, 100), None);
        assert_eq!(payload_sizes(110, 100, 0), None);
        assert_eq!(payload_sizes(90, 100, 0), Some(vec![90]));
    }

    #[test]
    fn all_bytes_placed() {
        for len in 1..2000 {
            let sizes = payload_sizes(len, 37, 53).unwrap();
            assert_eq!(sizes.iter().sum::<usize>(), len);
            assert!(sizes[0] <= 37);
            assert!(sizes[1..].iter().all(|s| *s <= 53 && *s > 0));
        }
    }
}
