//! Memory management bring-up.
//!
//! The boot loader leaves the kernel running identity mapped with paging off. This module
//! builds the frame allocator from the boot memory map, fences off everything the kernel is
//! already using, and then turns on paging with the bootstrap address space.

use spin::Mutex;
use tmm::{
    AddressTranslator, Cpu, HumanSize, InitError, InterruptGuard, PAGE_SIZE, PhysicalAddress,
    PhysicalMemoryManager, VirtualMemoryManager,
};

use crate::boot_info::BootInfo;

/// Physical address the boot loader loads the kernel image at.
pub const KERNEL_PHYSICAL_BASE: PhysicalAddress = PhysicalAddress::new(0x0010_0000);

/// Top of the kernel stack set up during early boot.
pub const KERNEL_STACK_TOP: PhysicalAddress = PhysicalAddress::new(0x0008_0000);

/// Size of each boot-time stack, in frames.
pub const STACK_BLOCKS: u32 = 2;

const STACK_SIZE: u32 = STACK_BLOCKS * PAGE_SIZE as u32;

/// Physical memory is identity mapped for the whole of early boot.
static PHYSICAL_MEMORY: AddressTranslator = AddressTranslator::identity();

static KERNEL_MEMORY: Mutex<Option<KernelMemory<'static>>> = Mutex::new(None);

/// The kernel's frame allocator and virtual memory manager.
pub struct KernelMemory<'m> {
    pub pmm: PhysicalMemoryManager<'m>,
    pub vmm: VirtualMemoryManager<'m>,
}

/// Brings up physical and virtual memory management.
///
/// # Panics
///
/// Panics if the boot memory map is unusable or paging cannot be enabled; the kernel
/// cannot continue without either.
pub fn init(boot_info: &BootInfo) {
    let mut pmm = match init_physical_memory(&PHYSICAL_MEMORY, boot_info) {
        Ok(pmm) => pmm,
        Err(err) => panic!("failed to initialise physical memory: {err}"),
    };

    // SAFETY: This is the only processor handle the kernel creates.
    let cpu = unsafe { Cpu::new() };
    let vmm = init_paging(&PHYSICAL_MEMORY, cpu, &mut pmm);

    let _guard = InterruptGuard::new();
    *KERNEL_MEMORY.lock() = Some(KernelMemory { pmm, vmm });
}

/// Runs `f` with the kernel's memory managers, interrupts masked.
///
/// Returns `None` before [`init`] has run.
pub fn with_memory<R>(f: impl FnOnce(&mut KernelMemory<'static>) -> R) -> Option<R> {
    let _guard = InterruptGuard::new();
    KERNEL_MEMORY.lock().as_mut().map(f)
}

/// Creates the frame allocator and reserves the memory the kernel already occupies.
///
/// The bitmap goes in the first frame after the kernel image. Reserved on top of what the
/// memory map marks unusable: the null page, the kernel image, the bitmap, the boot
/// loader's stack and the kernel stack.
pub fn init_physical_memory<'m>(
    memory: &'m AddressTranslator,
    boot_info: &BootInfo,
) -> Result<PhysicalMemoryManager<'m>, InitError> {
    // SAFETY: The boot loader guarantees the memory map is terminated.
    let memory_map = unsafe { boot_info.memory_map() };
    for region in memory_map {
        log::debug!("boot memory map: {:?}", region);
    }

    let kernel_end = KERNEL_PHYSICAL_BASE + boot_info.kernel_size;
    // SAFETY: The frames right after the kernel image are free RAM nobody else uses yet.
    let mut pmm = unsafe {
        PhysicalMemoryManager::initialise(memory, memory_map.regions(), kernel_end)?
    };

    pmm.mark_region_as_unavailable(PhysicalAddress::zero(), PAGE_SIZE as u64);
    pmm.mark_region_as_unavailable(KERNEL_PHYSICAL_BASE, boot_info.kernel_size as u64);
    pmm.mark_region_as_unavailable(pmm.memory_map(), pmm.memory_map_size() as u64);
    pmm.mark_region_as_unavailable(
        PhysicalAddress::new(boot_info.stack_top.saturating_sub(STACK_SIZE)),
        STACK_SIZE as u64,
    );
    pmm.mark_region_as_unavailable(
        PhysicalAddress::new(KERNEL_STACK_TOP.as_u32() - STACK_SIZE),
        STACK_SIZE as u64,
    );

    log::info!(
        "physical memory ready: {} in {} frames, {} free ({})",
        HumanSize::from_kib(pmm.available_memory_size()),
        pmm.available_block_count(),
        pmm.free_block_count(),
        HumanSize::from(pmm.free_block_count() * pmm.block_size())
    );

    Ok(pmm)
}

/// Builds the bootstrap address space and enables paging.
///
/// # Panics
///
/// Panics if the page tables cannot be allocated.
pub fn init_paging<'m>(
    memory: &'m AddressTranslator,
    cpu: Cpu,
    pmm: &mut PhysicalMemoryManager<'_>,
) -> VirtualMemoryManager<'m> {
    let mut vmm = VirtualMemoryManager::new(memory, cpu);
    if let Err(err) = vmm.initialise(pmm) {
        panic!("failed to enable paging: {err}");
    }
    vmm
}
