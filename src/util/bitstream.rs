#![allow(clippy::collapsible_else_if)]

/// Reads MSB first bit fields.
pub(crate) struct BitRead<'a> {
    data: &'a [u8],
    idx: usize,
    remain: usize,
    tmp: u8,
}

impl<'a> BitRead<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitRead {
            data,
            idx: 0,
            remain: 0,
            tmp: 0,
        }
    }

    /// Read up to 64 bits.
    #[inline(always)]
    pub fn read_bits(&mut self, mut num: usize) -> Option<u64> {
        let mut r = 0;

        while num > 0 {
            if self.remain == 0 {
                if self.idx >= self.data.len() {
                    return None;
                }
                self.tmp = self.data[self.idx];
                self.idx += 1;
                self.remain = 8;
            }

            num -= 1;
            self.remain -= 1;
            if self.tmp & (1 << self.remain) > 0 {
                r |= 1 << num;
            }
        }

        Some(r)
    }

    #[inline(always)]
    pub fn read_bit(&mut self) -> Option<bool> {
        self.read_bits(1).map(|v| v == 1)
    }

    /// Non-symmetric unsigned value in the range `0..n`.
    pub fn read_non_symmetric(&mut self, n: u32) -> Option<u32> {
        let w = bit_width(n);
        let m = (1 << w) - n;
        let v = self.read_bits(w as usize - 1)? as u32;
        if v < m {
            return Some(v);
        }
        let extra = self.read_bits(1)? as u32;
        Some((v << 1) - m + extra)
    }

    /// Number of bits left to read.
    #[cfg(test)]
    pub fn bits_left(&self) -> usize {
        (self.data.len() - self.idx) * 8 + self.remain
    }
}

/// Writes MSB first bit fields.
#[derive(Debug, Default)]
pub(crate) struct BitWrite {
    data: Vec<u8>,
    used: usize,
}

impl BitWrite {
    pub fn new() -> Self {
        BitWrite::default()
    }

    pub fn write_bits(&mut self, value: u64, num: usize) {
        for i in (0..num).rev() {
            if self.used % 8 == 0 {
                self.data.push(0);
            }
            if value & (1 << i) > 0 {
                let last = self.data.len() - 1;
                self.data[last] |= 1 << (7 - self.used % 8);
            }
            self.used += 1;
        }
    }

    pub fn write_bit(&mut self, v: bool) {
        self.write_bits(v as u64, 1);
    }

    /// Non-symmetric unsigned value in the range `0..n`.
    pub fn write_non_symmetric(&mut self, v: u32, n: u32) {
        assert!(v < n, "non-symmetric value out of range");
        let w = bit_width(n);
        let m = (1 << w) - n;
        if v < m {
            self.write_bits(v as u64, w as usize - 1);
        } else {
            let t = v + m;
            self.write_bits((t >> 1) as u64, w as usize - 1);
            self.write_bits((t & 1) as u64, 1);
        }
    }

    #[cfg(test)]
    pub fn bit_len(&self) -> usize {
        self.used
    }

    /// The written bytes, zero padded to a byte boundary.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

fn bit_width(n: u32) -> u32 {
    32 - n.leading_zeros()
}
