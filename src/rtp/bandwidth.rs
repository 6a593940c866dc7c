use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A data rate expressed as bits per second(bps).
///
/// Internally the value is tracked as a floating point number for accuracy in the presence of
/// repeated calculations that can yield decimal values.
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Bitrate(f64);

impl Bitrate {
    /// Zero bits per second.
    pub const ZERO: Self = Self::new(0);

    /// Bitrate from bits per second.
    pub const fn new(bps: u64) -> Self {
        Bitrate(bps as f64)
    }

    /// Bitrate from kilobits per second.
    pub const fn kbps(kbps: u64) -> Self {
        Self::new(kbps * 10_u64.pow(3))
    }

    /// Bitrate from megabits per second.
    pub const fn mbps(mbps: u64) -> Self {
        Self::new(mbps * 10_u64.pow(6))
    }

    /// Bitrate from gigabits per second.
    pub const fn gbps(gbps: u64) -> Self {
        Self::new(gbps * 10_u64.pow(9))
    }

    /// Bits per second as float.
    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// Bits per second rounded up.
    pub fn as_u64(&self) -> u64 {
        self.0.max(0.0).ceil() as u64
    }

    /// Clamp between two values.
    pub fn clamp(&self, min: Self, max: Self) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }

    /// Smallest of the two.
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Largest of the two.
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Subtract, stopping at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self((self.0 - rhs.0).max(0.0))
    }

    /// Whether this is zero (or less).
    pub fn is_zero(&self) -> bool {
        self.0 <= 0.0
    }
}

impl From<u64> for Bitrate {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<f64> for Bitrate {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl Mul<Duration> for Bitrate {
    type Output = DataSize;

    fn mul(self, rhs: Duration) -> Self::Output {
        let bits = self.0 * rhs.as_secs_f64();
        let bytes = bits / 8.0;

        DataSize::bytes(bytes.max(0.0).round() as u64)
    }
}

impl Mul<f64> for Bitrate {
    type Output = Bitrate;

    fn mul(self, rhs: f64) -> Self::Output {
        Bitrate(self.0 * rhs)
    }
}

impl Div<f64> for Bitrate {
    type Output = Bitrate;

    fn div(self, rhs: f64) -> Self::Output {
        Bitrate(self.0 / rhs)
    }
}

impl Add for Bitrate {
    type Output = Bitrate;

    fn add(self, rhs: Self) -> Self::Output {
        Bitrate(self.0 + rhs.0)
    }
}

impl Sub for Bitrate {
    type Output = Bitrate;

    fn sub(self, rhs: Self) -> Self::Output {
        Bitrate(self.0 - rhs.0)
    }
}

impl Sum for Bitrate {
    fn sum<I: Iterator<Item = Bitrate>>(iter: I) -> Self {
        iter.fold(Bitrate::ZERO, |acc, b| acc + b)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self.0;
        if rate < 1.0 {
            return write!(f, "{rate}bit/s");
        }
        let log = rate.log10().floor() as u64;

        match log {
            0..=2 => write!(f, "{rate}bit/s"),
            3..=5 => write!(f, "{:.3}kbit/s", rate / 10.0_f64.powf(3.0)),
            6..=8 => write!(f, "{:.3}Mbit/s", rate / 10.0_f64.powf(6.0)),
            _ => write!(f, "{:.3}Gbit/s", rate / 10.0_f64.powf(9.0)),
        }
    }
}

/// An amount of data in bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataSize(u64);

impl DataSize {
    /// No data.
    pub const ZERO: Self = DataSize::bytes(0);

    /// Size from a number of bytes.
    pub const fn bytes(bytes: u64) -> DataSize {
        Self(bytes)
    }

    /// Number of bytes.
    pub fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Number of bytes as float.
    pub fn as_bytes_f64(&self) -> f64 {
        self.0 as f64
    }

    /// Subtract, stopping at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl From<usize> for DataSize {
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}

impl Div<Duration> for DataSize {
    type Output = Bitrate;

    fn div(self, rhs: Duration) -> Self::Output {
        let secs = rhs.as_secs_f64();
        if secs == 0.0 {
            return Bitrate::ZERO;
        }
        let bps = (self.as_bytes_f64() * 8.0) / secs;

        bps.into()
    }
}

impl Div<Bitrate> for DataSize {
    type Output = Duration;

    fn div(self, rhs: Bitrate) -> Self::Output {
        if rhs.as_f64() <= 0.0 {
            return Duration::MAX;
        }
        let bits = self.as_bytes_f64() * 8.0;
        let seconds = bits / rhs.as_f64();

        Duration::from_secs_f64(seconds)
    }
}

impl AddAssign<DataSize> for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        self.0 += rhs.0;
    }
}

impl Add<DataSize> for DataSize {
    type Output = DataSize;

    fn add(self, rhs: DataSize) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sum<DataSize> for DataSize {
    fn sum<I: Iterator<Item = DataSize>>(iter: I) -> Self {
        iter.fold(DataSize::ZERO, |acc, s| acc + s)
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.0 as f64;
        if size < 1000.0 {
            return write!(f, "{size}B");
        }
        let log = size.log10().floor() as u64;

        match log {
            3..=5 => write!(f, "{:.3}kB", size / 10.0_f64.powf(3.0)),
            _ => write!(f, "{:.3}MB", size / 10.0_f64.powf(6.0)),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{Bitrate, DataSize};

    #[test]
    fn test_bitrate_display() {
        assert_eq!(Bitrate::new(0).to_string(), "0bit/s");
        assert_eq!(Bitrate::new(123).to_string(), "123bit/s");
        assert_eq!(Bitrate::new(1234).to_string(), "1.234kbit/s");
        assert_eq!(Bitrate::new(123456).to_string(), "123.456kbit/s");
        assert_eq!(Bitrate::new(1234567).to_string(), "1.235Mbit/s");
        assert_eq!(Bitrate::new(1234567898).to_string(), "1.235Gbit/s");
    }

    #[test]
    fn test_data_size_div_duration() {
        let size = DataSize::bytes(2_500_000);
        let rate = size / Duration::from_secs(1);

        assert_eq!(rate.as_u64(), 20_000_000);
        assert_eq!((size / Duration::ZERO).as_u64(), 0);
    }

    #[test]
    fn test_data_size_div_bitrate() {
        let size = DataSize::bytes(12_500);
        let rate = Bitrate::new(2_500_000);
        let duration = size / rate;

        assert_eq!(duration.as_millis(), 40);
    }

    #[test]
    fn test_bitrate_mul_duration() {
        let rate = Bitrate::kbps(800);
        assert_eq!(rate * Duration::from_millis(10), DataSize::bytes(1000));
    }

    #[test]
    fn test_saturating_sub() {
        let a = Bitrate::kbps(100);
        let b = Bitrate::kbps(150);
        assert_eq!(a.saturating_sub(b), Bitrate::ZERO);
        assert_eq!(b.saturating_sub(a).as_u64(), 50_000);
    }
}
