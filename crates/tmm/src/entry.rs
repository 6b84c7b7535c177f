//! Page table and page directory entries.
//!
//! Both entry kinds are a single `u32`: bits 12-31 hold the frame address and bits 0-11
//! hold flags. Every accessor touches only its own field, so updating flags never moves
//! the frame and updating the frame never changes flags.

use core::fmt;

use crate::{
    PhysicalAddress,
    flags::{PageDirectoryFlags, PageTableFlags},
};

/// Mask selecting the frame address bits of an entry.
pub const FRAME_MASK: u32 = 0xFFFF_F000;

/// Mask selecting the flag bits of an entry.
const FLAGS_MASK: u32 = !FRAME_MASK;

macro_rules! impl_entry_common {
    ($name:ident, $flags:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates an empty (not present) entry.
            #[inline]
            pub const fn new() -> Self {
                Self(0)
            }

            /// Creates an entry from its raw encoding.
            #[inline]
            pub const fn from_u32(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the raw encoding of this entry.
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Sets the given flag bits, leaving the frame untouched.
            #[inline]
            pub fn add_attribute(&mut self, flags: $flags) {
                self.0 |= flags.bits() & FLAGS_MASK;
            }

            /// Clears the given flag bits, leaving the frame untouched.
            #[inline]
            pub fn remove_attribute(&mut self, flags: $flags) {
                self.0 &= !(flags.bits() & FLAGS_MASK);
            }

            /// Replaces the frame address, keeping the flags.
            ///
            /// The low 12 bits of `frame` are discarded.
            #[inline]
            pub fn set_frame(&mut self, frame: PhysicalAddress) {
                self.0 = (self.0 & FLAGS_MASK) | (frame.as_u32() & FRAME_MASK);
            }

            /// Returns the frame address stored in this entry.
            #[inline]
            pub const fn physical_address(self) -> PhysicalAddress {
                PhysicalAddress::new(self.0 & FRAME_MASK)
            }

            /// Returns the flag bits of this entry, including bits with no named flag.
            #[inline]
            pub const fn flags(self) -> $flags {
                <$flags>::from_bits_retain(self.0 & FLAGS_MASK)
            }

            #[inline]
            pub const fn is_present(self) -> bool {
                self.0 & <$flags>::PRESENT.bits() != 0
            }

            #[inline]
            pub const fn is_writable(self) -> bool {
                self.0 & <$flags>::WRITABLE.bits() != 0
            }

            #[inline]
            pub const fn is_user(self) -> bool {
                self.0 & <$flags>::USER.bits() != 0
            }

            /// Returns true if no bit of the entry is set.
            #[inline]
            pub const fn is_unused(self) -> bool {
                self.0 == 0
            }

            /// Resets the entry to zero.
            #[inline]
            pub fn clear(&mut self) {
                self.0 = 0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("frame", &self.physical_address())
                    .field("flags", &self.flags())
                    .finish()
            }
        }
    };
}

impl_entry_common!(
    PageTableEntry,
    PageTableFlags,
    "An entry of a page table, mapping one 4 KiB page to a frame."
);

impl_entry_common!(
    PageDirectoryEntry,
    PageDirectoryFlags,
    "An entry of a page directory, referencing one page table (or one 4 MiB page)."
);

impl PageDirectoryEntry {
    /// Returns true if the entry maps a 4 MiB page rather than a page table.
    #[inline]
    pub const fn is_4mb(self) -> bool {
        self.0 & PageDirectoryFlags::HUGE_PAGE.bits() != 0
    }
}
