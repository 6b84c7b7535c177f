#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Tessera Memory Manager (TMM)
//!
//! The Tessera Memory Manager (TMM) is the memory management core of the Tessera 32-bit
//! protected-mode kernel. It provides:
//!
//! - A bitmap physical frame allocator fed from the boot loader's memory map.
//! - Two-level i386 paging: page directory and page table entries, tables, and a virtual
//!   memory manager that installs translations on demand.
//! - Construction of the bootstrap address space (identity map plus higher-half kernel).
//! - Software emulation of the processor and physical memory for testing in non-kernel
//!   environments.

mod address;
mod address_space;
mod arch;
mod bitmap;
mod bootstrap;
mod entry;
mod flags;
mod human_size;
mod memmap;
mod numbers;
mod physical_memory_manager;
mod table;
mod virtual_memory_manager;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use bitmap::FrameBitmap;
pub use bootstrap::BootstrapLayout;
pub use entry::{FRAME_MASK, PageDirectoryEntry, PageTableEntry};
pub use flags::{PageDirectoryFlags, PageTableFlags};
pub use human_size::HumanSize;
pub use memmap::{BootMemoryMap, BootMemoryRegion, MemoryRegion, MemoryRegionType};
pub use numbers::FrameNumber;
pub use physical_memory_manager::{AllocError, FreeError, InitError, PhysicalMemoryManager};
pub use table::{PageDirectory, PageTable};
pub use virtual_memory_manager::{PagingError, VirtualMemoryManager};

pub use arch::{Cpu, ENTRIES_PER_TABLE, InterruptGuard, PAGE_SIZE, TABLE_SPAN};

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{EmulatedMemory, interrupts_enabled};
