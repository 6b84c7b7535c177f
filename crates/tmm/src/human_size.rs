//! Human-readable size formatting for memory values.

use core::fmt;

/// Wraps a size in bytes and formats it with binary prefixes.
///
/// Each unit is 1024 times the previous one. Fractions are truncated (not rounded) to two
/// decimal places and trailing zeros are dropped. Only integer arithmetic is used, so the
/// type is safe to format before the FPU is set up.
///
/// # Examples
///
/// ```
/// use tmm::HumanSize;
///
/// assert_eq!(format!("{}", HumanSize(0)), "0B");
/// assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
/// assert_eq!(format!("{}", HumanSize(16 * 1024 * 1024)), "16MiB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HumanSize(pub u64);

impl HumanSize {
    /// Creates a size from a kibibyte count.
    #[inline]
    pub const fn from_kib(kib: u64) -> Self {
        Self(kib * 1024)
    }
}

impl From<u32> for HumanSize {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl From<u64> for HumanSize {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<usize> for HumanSize {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

        let mut unit = 0;
        let mut scale: u64 = 1;
        while unit < UNITS.len() - 1 && self.0 / scale >= 1024 {
            scale *= 1024;
            unit += 1;
        }

        let whole = self.0 / scale;
        let hundredths = ((self.0 % scale) as u128 * 100 / scale as u128) as u64;

        if hundredths == 0 {
            write!(f, "{}{}", whole, UNITS[unit])
        } else if hundredths % 10 == 0 {
            write!(f, "{}.{}{}", whole, hundredths / 10, UNITS[unit])
        } else {
            write!(f, "{}.{:02}{}", whole, hundredths, UNITS[unit])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes() {
        assert_eq!(format!("{}", HumanSize(0)), "0B");
        assert_eq!(format!("{}", HumanSize(512)), "512B");
        assert_eq!(format!("{}", HumanSize(1023)), "1023B");
    }

    #[test]
    fn formats_whole_units() {
        assert_eq!(format!("{}", HumanSize(1024)), "1KiB");
        assert_eq!(format!("{}", HumanSize(16 * 1024 * 1024)), "16MiB");
        assert_eq!(format!("{}", HumanSize(1 << 32)), "4GiB");
        assert_eq!(format!("{}", HumanSize(1 << 40)), "1TiB");
    }

    #[test]
    fn formats_fractions() {
        assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
        assert_eq!(format!("{}", HumanSize(1_572_864)), "1.5MiB");
        assert_eq!(format!("{}", HumanSize(1280)), "1.25KiB");
        assert_eq!(format!("{}", HumanSize(1075)), "1.04KiB");
    }

    #[test]
    fn truncates_below_a_hundredth() {
        assert_eq!(format!("{}", HumanSize(1025)), "1KiB");
    }

    #[test]
    fn converts_from_kib() {
        assert_eq!(format!("{}", HumanSize::from_kib(640)), "640KiB");
    }
}
