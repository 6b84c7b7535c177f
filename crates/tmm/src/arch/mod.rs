//! Architecture-specific implementations for memory management.
//!
//! This module conditionally imports either the i386 hardware implementation or software
//! emulation based on the target architecture and features. Both provide a [`Cpu`] (paging
//! control registers and TLB maintenance) and an [`InterruptGuard`].

// The hardware module is compiled on every x86 host so that it is type-checked, but it is
// only used when we're neither testing nor emulating.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86;
#[cfg(all(
    any(target_arch = "x86", target_arch = "x86_64"),
    not(test),
    not(feature = "software-emulation")
))]
pub use x86::*;

// Use software emulation ONLY when:
// - Running tests, OR
// - software-emulation feature is explicitly enabled
#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::*;

/// Size of a page and of a physical frame in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of entries in a page table or page directory.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes of virtual address space covered by one page table (4 MiB).
pub const TABLE_SPAN: usize = PAGE_SIZE * ENTRIES_PER_TABLE;
