//! Information handed over by the boot loader.

use tmm::{BootMemoryMap, MemoryRegion};

/// The structure the second-stage boot loader passes to the kernel entry point.
#[derive(Debug)]
#[repr(C)]
pub struct BootInfo {
    /// Top of the stack the boot loader ran the kernel on.
    pub stack_top: u32,
    /// Size of the loaded kernel image in bytes.
    pub kernel_size: u32,
    /// Terminated array of memory map records.
    pub memory_regions: *const MemoryRegion,
    /// BIOS drive number the kernel was loaded from.
    pub boot_device: u8,
}

impl BootInfo {
    /// Returns the memory map the boot loader collected.
    ///
    /// # Safety
    ///
    /// `memory_regions` must be null or point to a terminated record array that stays
    /// untouched while the returned map is in use.
    pub unsafe fn memory_map(&self) -> BootMemoryMap<'_> {
        // SAFETY: Upheld by the caller.
        unsafe { BootMemoryMap::from_raw(self.memory_regions) }
    }
}

// SAFETY: The record array is written once by the boot loader and only read afterwards.
unsafe impl Sync for BootInfo {}
