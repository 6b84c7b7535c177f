//! Construction of the initial address space.
//!
//! Before paging is turned on the kernel needs a directory that maps both the low memory it
//! is currently running from (identity) and the higher-half addresses it is linked at.
//! Each of the two regions gets exactly one page table, so each covers 4 MiB.

use core::ops::Range;

use crate::{
    PhysicalAddress, VirtualAddress, VirtualMemoryManager,
    arch::{PAGE_SIZE, TABLE_SPAN},
    flags::{PageDirectoryFlags, PageTableFlags},
    physical_memory_manager::{AllocError, PhysicalMemoryManager},
    table::{PageDirectory, PageTable},
    virtual_memory_manager::PagingError,
};

/// Placement of the two regions mapped by the bootstrap directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapLayout {
    /// Start of the identity-mapped region. Must be 4 MiB aligned.
    pub identity_base: VirtualAddress,
    /// Virtual address the kernel is linked at. Must be 4 MiB aligned.
    pub kernel_virtual_base: VirtualAddress,
    /// Physical address the kernel was loaded at.
    pub kernel_physical_base: PhysicalAddress,
    /// Pages of the identity region that stay supervisor only (VGA memory).
    pub video_hole: Range<VirtualAddress>,
}

impl Default for BootstrapLayout {
    fn default() -> Self {
        Self {
            identity_base: VirtualAddress::zero(),
            kernel_virtual_base: VirtualAddress::new(0xC000_0000),
            kernel_physical_base: PhysicalAddress::new(0x0010_0000),
            video_hole: VirtualAddress::new(0x000A_0000)..VirtualAddress::new(0x000B_0000),
        }
    }
}

impl<'m> VirtualMemoryManager<'m> {
    /// Builds the bootstrap address space with the default layout and enables paging.
    pub fn initialise(&mut self, pmm: &mut PhysicalMemoryManager<'_>) -> Result<(), PagingError> {
        self.initialise_with(pmm, &BootstrapLayout::default())
    }

    /// Builds the bootstrap address space described by `layout` and enables paging.
    ///
    /// Allocates two page tables and the directory. If any allocation fails, the frames
    /// already taken are returned and paging stays off.
    pub fn initialise_with(
        &mut self,
        pmm: &mut PhysicalMemoryManager<'_>,
        layout: &BootstrapLayout,
    ) -> Result<(), PagingError> {
        debug_assert!(layout.identity_base.is_aligned(TABLE_SPAN as u32));
        debug_assert!(layout.kernel_virtual_base.is_aligned(TABLE_SPAN as u32));
        debug_assert_ne!(
            layout.identity_base.directory_index(),
            layout.kernel_virtual_base.directory_index()
        );

        let [identity_table, kernel_table, directory] = allocate_frames::<3>(pmm)?;
        for frame in [identity_table, kernel_table, directory] {
            // SAFETY: The frames were just allocated and nothing references them yet.
            unsafe { self.memory.zero_frame(frame) };
        }

        // SAFETY: Each frame is exclusively ours and was zeroed above, which is a valid
        // empty table.
        let table = unsafe { &mut *self.memory.phys_to_ptr::<PageTable>(identity_table) };
        for (index, entry) in table.entries_mut().iter_mut().enumerate() {
            let page = layout.identity_base + (index * PAGE_SIZE) as u32;
            entry.set_frame(PhysicalAddress::new(page.as_u32()));
            entry.add_attribute(PageTableFlags::PRESENT | PageTableFlags::WRITABLE);
            if !layout.video_hole.contains(&page) {
                entry.add_attribute(PageTableFlags::USER);
            }
        }

        // SAFETY: As above.
        let table = unsafe { &mut *self.memory.phys_to_ptr::<PageTable>(kernel_table) };
        for (index, entry) in table.entries_mut().iter_mut().enumerate() {
            entry.set_frame(layout.kernel_physical_base + (index * PAGE_SIZE) as u32);
            entry.add_attribute(
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER,
            );
        }

        // SAFETY: As above.
        let page_directory = unsafe { &mut *self.memory.phys_to_ptr::<PageDirectory>(directory) };
        for (base, table) in [
            (layout.identity_base, identity_table),
            (layout.kernel_virtual_base, kernel_table),
        ] {
            let entry = page_directory.lookup_mut(base);
            entry.set_frame(table);
            entry.add_attribute(
                PageDirectoryFlags::PRESENT | PageDirectoryFlags::WRITABLE | PageDirectoryFlags::USER,
            );
        }

        // SAFETY: The directory is fully built and maps the low 4 MiB the kernel runs from.
        unsafe {
            self.switch_page_directory(directory)?;
            self.cpu.enable_paging();
        }

        log::info!(
            "paging enabled: directory {}, identity {}..{}, kernel {} -> {}",
            directory,
            layout.identity_base,
            layout.identity_base + TABLE_SPAN as u32,
            layout.kernel_virtual_base,
            layout.kernel_physical_base
        );
        Ok(())
    }
}

/// Allocates `N` frames, giving back the ones already taken if any allocation fails.
fn allocate_frames<const N: usize>(
    pmm: &mut PhysicalMemoryManager<'_>,
) -> Result<[PhysicalAddress; N], AllocError> {
    let mut frames = [PhysicalAddress::zero(); N];
    for index in 0..N {
        match pmm.allocate_block() {
            Ok(frame) => frames[index] = frame,
            Err(err) => {
                for &frame in &frames[..index] {
                    if let Err(free_err) = pmm.free_block(frame) {
                        log::error!("could not return bootstrap frame {}: {}", frame, free_err);
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(frames)
}
