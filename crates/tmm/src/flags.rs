//! Flag bits of page table and page directory entries.
//!
//! The low 12 bits of every entry hold flags; the two entry kinds share the same layout
//! except for bit 7, which is PAT in a page table entry and the 4 MiB page size bit in a
//! page directory entry.

bitflags::bitflags! {
    /// Flags of a page table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageTableFlags: u32 {
        /// The page is mapped.
        const PRESENT = 1 << 0;
        /// The page may be written.
        const WRITABLE = 1 << 1;
        /// The page is reachable from ring 3.
        const USER = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled.
        const CACHE_DISABLE = 1 << 4;
        /// Set by the processor on access.
        const ACCESSED = 1 << 5;
        /// Set by the processor on write.
        const DIRTY = 1 << 6;
        /// Page attribute table index bit.
        const PAT = 1 << 7;
        /// Translation survives CR3 reloads.
        const GLOBAL = 1 << 8;
        const LV4_GLOBAL = 1 << 9;
    }
}

bitflags::bitflags! {
    /// Flags of a page directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageDirectoryFlags: u32 {
        /// The page table (or 4 MiB page) is mapped.
        const PRESENT = 1 << 0;
        /// Pages below this entry may be written.
        const WRITABLE = 1 << 1;
        /// Pages below this entry are reachable from ring 3.
        const USER = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled.
        const CACHE_DISABLE = 1 << 4;
        /// Set by the processor on access.
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        /// The entry maps a 4 MiB page instead of a page table.
        const HUGE_PAGE = 1 << 7;
        const GLOBAL = 1 << 8;
        const LV4_GLOBAL = 1 << 9;
    }
}
