//! Address types for physical and virtual memory management.
//!
//! Both address spaces are 32 bits wide on the protected-mode kernel. The newtypes keep
//! physical and virtual values from being mixed up and carry the index arithmetic used by
//! the two-level page tables.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, arch};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Translates physical addresses into pointers the running code can dereference.
///
/// This enum supports two modes:
/// - Hardware: physical memory is reachable at a fixed offset (zero while identity mapped)
/// - Emulated: physical memory is a host buffer (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a fixed offset.
    Hardware { offset: usize },
    /// Emulated translation using a simulated memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a hardware translator that adds `offset` to every physical address.
    pub const fn hardware(offset: usize) -> Self {
        Self::Hardware { offset }
    }

    /// Creates a hardware translator for identity-mapped physical memory.
    pub const fn identity() -> Self {
        Self::hardware(0)
    }

    /// Creates a new emulated translator backed by `size` bytes of zeroed host memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Returns a pointer to `len` bytes of physical memory starting at `phys`.
    ///
    /// # Panics
    ///
    /// In emulation, panics if the range falls outside the emulated memory.
    pub fn phys_range_to_ptr(&self, phys: PhysicalAddress, len: usize) -> *mut u8 {
        match self {
            Self::Hardware { offset } => {
                let _ = len;
                phys.as_usize().wrapping_add(*offset) as *mut u8
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.translate(phys.as_usize(), len),
        }
    }

    /// Returns a typed pointer to the physical memory at `phys`.
    pub fn phys_to_ptr<T>(&self, phys: PhysicalAddress) -> *mut T {
        self.phys_range_to_ptr(phys, core::mem::size_of::<T>()).cast()
    }

    /// Fills the frame starting at `frame` with zeroes.
    ///
    /// # Safety
    ///
    /// The frame must be owned by the caller and must not be referenced by any live Rust
    /// reference.
    pub unsafe fn zero_frame(&self, frame: PhysicalAddress) {
        debug_assert!(frame.is_aligned(arch::PAGE_SIZE as u32));
        let ptr = self.phys_range_to_ptr(frame, arch::PAGE_SIZE);
        // SAFETY: The caller owns the frame and nothing else refers to it.
        unsafe { core::ptr::write_bytes(ptr, 0, arch::PAGE_SIZE) };
    }
}

macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: u32) -> Self {
                Self(addr)
            }

            /// Returns the zero address.
            #[inline]
            pub const fn zero() -> Self {
                Self(0)
            }

            /// Returns true if this is the zero address.
            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Returns the raw address value widened to `usize`.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Returns the offset of this address within its 4 KiB page.
            #[inline]
            pub const fn page_offset(self) -> u32 {
                self.0 & (arch::PAGE_SIZE as u32 - 1)
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: u32) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: u32) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two or the result does not fit in 32 bits.
            #[inline]
            pub const fn align_up(self, align: u32) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self((self.0 + (align - 1)) & !(align - 1))
            }

            /// Adds `rhs` bytes, returning `None` on overflow.
            #[inline]
            pub const fn checked_add(self, rhs: u32) -> Option<Self> {
                match self.0.checked_add(rhs) {
                    Some(addr) => Some(Self(addr)),
                    None => None,
                }
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#010x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self::new(addr)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(addr: $name) -> Self {
                addr.0
            }
        }

        impl Add<u32> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: u32) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<u32> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: u32) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = u32;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A 32-bit physical memory address.\n\n\
     Frame-aligned physical addresses are what page table and page directory entries store\n\
     in their upper 20 bits."
);

impl PhysicalAddress {
    /// Returns the frame containing this address.
    #[inline]
    pub fn frame_number(self) -> FrameNumber {
        FrameNumber::from(self)
    }
}

impl_address_common!(
    VirtualAddress,
    "A 32-bit virtual memory address.\n\n\
     Bits 22-31 select the page directory entry, bits 12-21 select the page table entry and\n\
     bits 0-11 are the offset within the page."
);

impl VirtualAddress {
    /// Returns the page directory index for this address (bits 22-31).
    #[inline]
    pub const fn directory_index(self) -> usize {
        ((self.0 >> 22) & 0x3ff) as usize
    }

    /// Returns the page table index for this address (bits 12-21).
    #[inline]
    pub const fn table_index(self) -> usize {
        ((self.0 >> 12) & 0x3ff) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_virtual_address_into_indices() {
        let addr = VirtualAddress::new(0xC010_3ABC);
        assert_eq!(addr.directory_index(), 0x300);
        assert_eq!(addr.table_index(), 0x103);
        assert_eq!(addr.page_offset(), 0xABC);
    }

    #[test]
    fn top_of_address_space_uses_last_entries() {
        let addr = VirtualAddress::new(0xFFFF_FFFF);
        assert_eq!(addr.directory_index(), 1023);
        assert_eq!(addr.table_index(), 1023);
    }

    #[test]
    fn aligns_up_and_down() {
        let addr = PhysicalAddress::new(0x0010_0001);
        assert_eq!(addr.align_down(4096), PhysicalAddress::new(0x0010_0000));
        assert_eq!(addr.align_up(4096), PhysicalAddress::new(0x0010_1000));
        assert_eq!(
            PhysicalAddress::new(0x2000).align_up(4096),
            PhysicalAddress::new(0x2000)
        );
        assert!(PhysicalAddress::new(0x3000).is_aligned(4096));
        assert!(!PhysicalAddress::new(0x3004).is_aligned(4096));
    }

    #[test]
    fn checked_add_detects_overflow() {
        assert_eq!(
            PhysicalAddress::new(0xFFFF_F000).checked_add(0x1000),
            None
        );
        assert_eq!(
            PhysicalAddress::new(0x1000).checked_add(0x1000),
            Some(PhysicalAddress::new(0x2000))
        );
    }

    #[test]
    fn formats_addresses() {
        let addr = PhysicalAddress::new(0x1000);
        assert_eq!(format!("{addr}"), "0x00001000");
        assert_eq!(format!("{addr:?}"), "PhysicalAddress(0x00001000)");
    }

    #[test]
    fn emulated_translator_writes_through_to_buffer() {
        let memory = AddressTranslator::emulated(4 * arch::PAGE_SIZE);
        let frame = PhysicalAddress::new(0x2000);

        let ptr = memory.phys_to_ptr::<u32>(frame);
        unsafe {
            ptr.write(0xDEAD_BEEF);
            assert_eq!(memory.phys_to_ptr::<u32>(frame).read(), 0xDEAD_BEEF);
            memory.zero_frame(frame);
            assert_eq!(ptr.read(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn emulated_translator_rejects_out_of_range_access() {
        let memory = AddressTranslator::emulated(arch::PAGE_SIZE);
        memory.phys_range_to_ptr(PhysicalAddress::new(0x800), arch::PAGE_SIZE);
    }

    #[test]
    fn hardware_translator_applies_offset() {
        let memory = AddressTranslator::hardware(0xC000_0000);
        let ptr = memory.phys_range_to_ptr(PhysicalAddress::new(0x1000), 1);
        assert_eq!(ptr as usize, 0xC000_1000);
    }
}
