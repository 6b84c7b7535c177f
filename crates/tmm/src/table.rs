//! Page tables and page directories.
//!
//! Both structures are exactly one frame: 1024 four-byte entries, frame aligned. A page
//! table covers 4 MiB of virtual address space and a page directory covers all 4 GiB.

use crate::{
    VirtualAddress,
    arch::ENTRIES_PER_TABLE,
    entry::{PageDirectoryEntry, PageTableEntry},
};

macro_rules! impl_table_common {
    ($name:ident, $entry:ty, $index:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone)]
        #[repr(C, align(4096))]
        pub struct $name {
            entries: [$entry; ENTRIES_PER_TABLE],
        }

        impl $name {
            /// Creates a table with every entry empty.
            pub const fn new() -> Self {
                Self {
                    entries: [<$entry>::new(); ENTRIES_PER_TABLE],
                }
            }

            /// Returns the entry responsible for `addr`.
            #[inline]
            pub fn lookup(&self, addr: VirtualAddress) -> &$entry {
                &self.entries[addr.$index()]
            }

            /// Returns the entry responsible for `addr`, mutably.
            #[inline]
            pub fn lookup_mut(&mut self, addr: VirtualAddress) -> &mut $entry {
                &mut self.entries[addr.$index()]
            }

            /// Returns all entries in index order.
            #[inline]
            pub fn entries(&self) -> &[$entry; ENTRIES_PER_TABLE] {
                &self.entries
            }

            #[inline]
            pub fn entries_mut(&mut self) -> &mut [$entry; ENTRIES_PER_TABLE] {
                &mut self.entries
            }

            /// Returns true if no entry is present.
            pub fn is_empty(&self) -> bool {
                self.entries.iter().all(|entry| !entry.is_present())
            }

            /// Resets every entry to zero.
            pub fn clear(&mut self) {
                self.entries.fill(<$entry>::new());
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

impl_table_common!(
    PageTable,
    PageTableEntry,
    table_index,
    "A page table: 1024 entries mapping consecutive 4 KiB pages."
);

impl_table_common!(
    PageDirectory,
    PageDirectoryEntry,
    directory_index,
    "A page directory: 1024 entries, each referencing one page table."
);
