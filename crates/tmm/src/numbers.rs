//! Physical frame numbers.
//!
//! The frame allocator works in frame indices rather than byte addresses: frame `n` covers
//! the physical bytes `n * PAGE_SIZE .. (n + 1) * PAGE_SIZE`.

use crate::{address::PhysicalAddress, arch};
use core::fmt;

/// A physical memory frame number.
///
/// Frame numbers are zero-indexed and correspond to PAGE_SIZE-aligned physical addresses.
/// They double as bit indices into the frame bitmap.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    /// Creates a new frame number.
    #[inline]
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    /// Returns the raw frame number.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new((self.0 * arch::PAGE_SIZE) as u32)
    }

    /// Returns the first frame that starts at or after the 64-bit byte offset `end`.
    ///
    /// Used to turn an exclusive byte bound into an exclusive frame bound, so that a
    /// partially covered trailing frame is included.
    #[inline]
    pub const fn containing_end(end: u64) -> Self {
        Self(end.div_ceil(arch::PAGE_SIZE as u64) as usize)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        Self::new(addr.as_usize() / arch::PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_address() {
        assert_eq!(FrameNumber::new(1).start(), PhysicalAddress::new(0x1000));
        assert_eq!(FrameNumber::new(256).start(), PhysicalAddress::new(0x0010_0000));
    }

    #[test]
    fn from_unaligned_address_rounds_down() {
        let addr = PhysicalAddress::new(arch::PAGE_SIZE as u32 * 3 + 10);
        assert_eq!(FrameNumber::from(addr), FrameNumber::new(3));
    }

    #[test]
    fn containing_end_rounds_up() {
        assert_eq!(FrameNumber::containing_end(0), FrameNumber::new(0));
        assert_eq!(FrameNumber::containing_end(4096), FrameNumber::new(1));
        assert_eq!(FrameNumber::containing_end(4097), FrameNumber::new(2));
        assert_eq!(
            FrameNumber::containing_end(1 << 32),
            FrameNumber::new(1 << 20)
        );
    }
}
