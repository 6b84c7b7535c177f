//! Virtual memory manager.
//!
//! The manager owns the processor's paging registers and the current address space. Page
//! tables are allocated from the physical memory manager on first use and handed back once
//! their last mapping is removed.

use crate::{
    AddressSpace, AddressTranslator, PhysicalAddress, VirtualAddress,
    arch::{Cpu, InterruptGuard},
    entry::{PageDirectoryEntry, PageTableEntry},
    flags::{PageDirectoryFlags, PageTableFlags},
    physical_memory_manager::{AllocError, FreeError, PhysicalMemoryManager},
    table::{PageDirectory, PageTable},
};

/// Errors that can occur while manipulating page tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    /// No page directory has been switched to yet.
    #[error("no page directory is active")]
    NoDirectory,
    /// The zero address was given as a page directory.
    #[error("page directory address must not be null")]
    NullDirectory,
    /// The address lies inside a 4 MiB page, which has no page table to hold the mapping.
    #[error("{0} is covered by a 4 MiB page")]
    HugePage(VirtualAddress),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Free(#[from] FreeError),
}

/// Owner of the paging hardware and the current address space.
pub struct VirtualMemoryManager<'m> {
    pub(crate) memory: &'m AddressTranslator,
    pub(crate) cpu: Cpu,
    current: Option<AddressSpace<'m>>,
    pdbr: PhysicalAddress,
}

impl<'m> VirtualMemoryManager<'m> {
    /// Creates a manager with no directory and paging left as it is on `cpu`.
    pub fn new(memory: &'m AddressTranslator, cpu: Cpu) -> Self {
        Self {
            memory,
            cpu,
            current: None,
            pdbr: PhysicalAddress::zero(),
        }
    }

    /// Returns the physical address of the current page directory.
    pub fn directory(&self) -> Option<PhysicalAddress> {
        self.current.as_ref().map(AddressSpace::directory_address)
    }

    /// Returns the value most recently written to the page directory base register.
    pub fn page_directory_base(&self) -> PhysicalAddress {
        self.pdbr
    }

    /// Returns the current page directory.
    pub fn directory_mut(&mut self) -> Option<&mut PageDirectory> {
        self.current.as_mut().map(AddressSpace::directory_mut)
    }

    /// Returns the page table covering `addr` in the current address space.
    pub fn page_table_mut(&mut self, addr: VirtualAddress) -> Option<&mut PageTable> {
        self.current.as_mut()?.table_mut(addr)
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn is_paging_enabled(&self) -> bool {
        self.cpu.is_paging_enabled()
    }

    /// Allocates and zero-fills a new page directory.
    pub fn create_directory(
        &self,
        pmm: &mut PhysicalMemoryManager<'_>,
    ) -> Result<PhysicalAddress, PagingError> {
        let directory = pmm.allocate_block()?;
        // SAFETY: The frame was just allocated and nothing references it yet.
        unsafe { self.memory.zero_frame(directory) };
        log::debug!("created page directory at {}", directory);
        Ok(directory)
    }

    /// Makes `directory` the current page directory and loads it into the PDBR.
    ///
    /// # Safety
    ///
    /// `directory` must hold a valid page directory that nothing else accesses. If paging
    /// is enabled it must map the code and data currently in use.
    pub unsafe fn switch_page_directory(
        &mut self,
        directory: PhysicalAddress,
    ) -> Result<(), PagingError> {
        if directory.is_null() {
            return Err(PagingError::NullDirectory);
        }

        let _guard = InterruptGuard::new();
        // SAFETY: The caller guarantees the directory is valid and exclusive to us.
        self.current = Some(unsafe { AddressSpace::from_directory(self.memory, directory) });
        self.pdbr = directory;
        // SAFETY: As above.
        unsafe { self.cpu.load_page_directory_base(directory) };

        log::debug!("switched to page directory {}", directory);
        Ok(())
    }

    /// Maps the page containing `virt` to the frame containing `phys`, present only.
    pub fn map_page(
        &mut self,
        pmm: &mut PhysicalMemoryManager<'_>,
        phys: PhysicalAddress,
        virt: VirtualAddress,
    ) -> Result<(), PagingError> {
        self.map_page_with(pmm, phys, virt, PageTableFlags::PRESENT)
    }

    /// Maps the page containing `virt` to the frame containing `phys` with `flags` set.
    ///
    /// A missing page table is allocated from `pmm`, zero-filled and installed present and
    /// writable. Replacing an existing translation flushes its TLB entry. Addresses inside a
    /// 4 MiB page are rejected with [`PagingError::HugePage`].
    pub fn map_page_with(
        &mut self,
        pmm: &mut PhysicalMemoryManager<'_>,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        flags: PageTableFlags,
    ) -> Result<(), PagingError> {
        let memory = self.memory;
        let space = self.current.as_mut().ok_or(PagingError::NoDirectory)?;
        let _guard = InterruptGuard::new();

        let table_address = {
            let directory_entry = space.directory_mut().lookup_mut(virt);
            if directory_entry.is_present() && directory_entry.is_4mb() {
                return Err(PagingError::HugePage(virt));
            }
            if !directory_entry.is_present() {
                let table = pmm.allocate_block()?;
                // SAFETY: The frame was just allocated and nothing references it yet.
                unsafe { memory.zero_frame(table) };

                directory_entry.set_frame(table);
                directory_entry
                    .add_attribute(PageDirectoryFlags::PRESENT | PageDirectoryFlags::WRITABLE);
                log::trace!(
                    "installed page table {} for directory slot {}",
                    table,
                    virt.directory_index()
                );
            }
            directory_entry.physical_address()
        };

        // SAFETY: The directory entry is present, so it references one of our tables.
        let table = unsafe { space.table_at_mut(table_address) };
        let entry = table.lookup_mut(virt);
        let remapped = entry.is_present();
        entry.set_frame(phys);
        entry.add_attribute(PageTableFlags::PRESENT | flags);

        log::debug!("mapped {} -> {}", virt, phys);
        if remapped {
            self.flush_tlb_entry(virt);
        }
        Ok(())
    }

    /// Removes the translation of the page containing `virt`.
    ///
    /// Returns the frame that was mapped, which stays allocated. A page table left with no
    /// present entries goes back to `pmm`; if `pmm` refuses it the table is leaked and the
    /// unmap still succeeds.
    pub fn unmap_page(
        &mut self,
        pmm: &mut PhysicalMemoryManager<'_>,
        virt: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, PagingError> {
        let space = self.current.as_mut().ok_or(PagingError::NoDirectory)?;
        let _guard = InterruptGuard::new();

        let directory_entry = *space.directory().lookup(virt);
        if !directory_entry.is_present() || directory_entry.is_4mb() {
            return Ok(None);
        }

        let table_address = directory_entry.physical_address();
        // SAFETY: The directory entry is present, so it references one of our tables.
        let table = unsafe { space.table_at_mut(table_address) };
        let entry = table.lookup_mut(virt);
        if !entry.is_present() {
            return Ok(None);
        }

        let frame = entry.physical_address();
        entry.clear();

        let released = table.is_empty();
        if released {
            space.directory_mut().lookup_mut(virt).clear();
        }

        self.flush_tlb_entry(virt);
        log::debug!("unmapped {} (was {})", virt, frame);

        if released {
            match pmm.free_block(table_address) {
                Ok(()) => log::trace!("released page table {}", table_address),
                Err(err) => log::error!("leaking page table {}: {}", table_address, err),
            }
        }
        Ok(Some(frame))
    }

    /// Translates `virt` through the current address space.
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.current.as_ref()?.translate(virt)
    }

    /// Drops the cached translation of the page containing `addr`.
    pub fn flush_tlb_entry(&mut self, addr: VirtualAddress) {
        let _guard = InterruptGuard::new();
        self.cpu.invalidate_page(addr);
    }

    /// Backs `entry` with a freshly allocated frame and marks it present.
    ///
    /// The entry is left untouched if no frame is available.
    pub fn allocate_page(
        pmm: &mut PhysicalMemoryManager<'_>,
        entry: &mut PageTableEntry,
    ) -> Result<(), AllocError> {
        let _guard = InterruptGuard::new();

        let frame = pmm.allocate_block()?;
        entry.set_frame(frame);
        entry.add_attribute(PageTableFlags::PRESENT);
        Ok(())
    }

    /// Returns the frame behind `entry` to `pmm` and marks the entry not present.
    ///
    /// An entry without a frame is only marked not present. If `pmm` rejects the frame the
    /// entry is left untouched.
    pub fn free_page(
        pmm: &mut PhysicalMemoryManager<'_>,
        entry: &mut PageTableEntry,
    ) -> Result<(), FreeError> {
        let _guard = InterruptGuard::new();

        let frame = entry.physical_address();
        if !frame.is_null() {
            pmm.free_block(frame)?;
        }
        entry.remove_attribute(PageTableFlags::PRESENT);
        Ok(())
    }

    /// Returns the entry of `table` responsible for `addr`.
    pub fn lookup_page_table_entry(
        table: Option<&mut PageTable>,
        addr: VirtualAddress,
    ) -> Option<&mut PageTableEntry> {
        table.map(|table| table.lookup_mut(addr))
    }

    /// Returns the entry of `directory` responsible for `addr`.
    pub fn lookup_page_directory_entry(
        directory: Option<&mut PageDirectory>,
        addr: VirtualAddress,
    ) -> Option<&mut PageDirectoryEntry> {
        directory.map(|directory| directory.lookup_mut(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::PAGE_SIZE,
        memmap::{MemoryRegion, MemoryRegionType},
    };

    const MEMORY_SIZE: usize = 2 * 1024 * 1024;

    fn setup(memory: &AddressTranslator) -> PhysicalMemoryManager<'_> {
        let regions = [MemoryRegion::new(
            0,
            MEMORY_SIZE as u64,
            MemoryRegionType::Available,
        )];
        let mut pmm = unsafe {
            PhysicalMemoryManager::initialise(memory, &regions, PhysicalAddress::new(0x1000))
        }
        .unwrap();
        pmm.mark_region_as_unavailable(PhysicalAddress::zero(), 2 * PAGE_SIZE as u64);
        pmm
    }

    fn vmm_with_directory<'m>(
        memory: &'m AddressTranslator,
        pmm: &mut PhysicalMemoryManager<'_>,
    ) -> VirtualMemoryManager<'m> {
        let mut vmm = VirtualMemoryManager::new(memory, unsafe { Cpu::new() });
        let directory = vmm.create_directory(pmm).unwrap();
        unsafe { vmm.switch_page_directory(directory) }.unwrap();
        vmm
    }

    #[test]
    fn mapping_requires_a_directory() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = VirtualMemoryManager::new(&memory, unsafe { Cpu::new() });

        assert_eq!(vmm.directory(), None);
        assert_eq!(
            vmm.map_page(&mut pmm, PhysicalAddress::new(0x5000), VirtualAddress::new(0x5000)),
            Err(PagingError::NoDirectory)
        );
        assert_eq!(
            vmm.unmap_page(&mut pmm, VirtualAddress::new(0x5000)),
            Err(PagingError::NoDirectory)
        );
    }

    #[test]
    fn switching_to_null_directory_is_rejected() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut vmm = VirtualMemoryManager::new(&memory, unsafe { Cpu::new() });

        let result = unsafe { vmm.switch_page_directory(PhysicalAddress::zero()) };
        assert_eq!(result, Err(PagingError::NullDirectory));
        assert_eq!(vmm.directory(), None);
        assert_eq!(vmm.cpu().page_directory_base(), PhysicalAddress::zero());
    }

    #[test]
    fn switching_loads_the_new_directory() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);

        let second = vmm.create_directory(&mut pmm).unwrap();
        unsafe { vmm.switch_page_directory(second) }.unwrap();

        assert_eq!(vmm.directory(), Some(second));
        assert_eq!(vmm.page_directory_base(), second);
        assert_eq!(vmm.cpu().page_directory_base(), second);
    }

    #[test]
    fn maps_page_and_translates() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);

        let phys = PhysicalAddress::new(0x0012_3000);
        let virt = VirtualAddress::new(0x4000_0000);
        vmm.map_page(&mut pmm, phys, virt).unwrap();

        assert_eq!(vmm.translate(virt), Some(phys));
        assert_eq!(
            vmm.translate(VirtualAddress::new(0x4000_0ABC)),
            Some(PhysicalAddress::new(0x0012_3ABC))
        );

        let table = vmm.page_table_mut(virt).unwrap();
        let entry = *table.lookup(virt);
        assert!(entry.is_present());
        assert!(!entry.is_writable());

        let directory_entry = *vmm.directory_mut().unwrap().lookup(virt);
        assert!(directory_entry.is_present());
        assert!(directory_entry.is_writable());
        assert!(!directory_entry.is_user());
    }

    #[test]
    fn pages_in_one_table_share_it() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);

        let used = pmm.used_block_count();
        vmm.map_page(&mut pmm, PhysicalAddress::new(0x8000), VirtualAddress::new(0x0040_0000))
            .unwrap();
        assert_eq!(pmm.used_block_count(), used + 1);

        vmm.map_page(&mut pmm, PhysicalAddress::new(0x9000), VirtualAddress::new(0x0040_1000))
            .unwrap();
        assert_eq!(pmm.used_block_count(), used + 1);

        vmm.map_page(&mut pmm, PhysicalAddress::new(0xA000), VirtualAddress::new(0x0080_0000))
            .unwrap();
        assert_eq!(pmm.used_block_count(), used + 2);
    }

    #[test]
    fn new_tables_start_empty() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);

        vmm.map_page(&mut pmm, PhysicalAddress::new(0x8000), VirtualAddress::new(0x0040_0000))
            .unwrap();
        assert_eq!(vmm.translate(VirtualAddress::new(0x0040_1000)), None);
        assert_eq!(vmm.translate(VirtualAddress::new(0x007F_F000)), None);
    }

    #[test]
    fn remapping_flushes_the_tlb_entry() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);
        let virt = VirtualAddress::new(0x0040_0000);

        vmm.map_page(&mut pmm, PhysicalAddress::new(0x8000), virt).unwrap();
        assert!(vmm.cpu().invalidated_pages().is_empty());

        vmm.map_page(&mut pmm, PhysicalAddress::new(0x9000), virt).unwrap();
        assert_eq!(vmm.cpu().invalidated_pages(), &[virt]);
        assert_eq!(vmm.translate(virt), Some(PhysicalAddress::new(0x9000)));
    }

    #[test]
    fn map_page_with_sets_extra_flags() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);
        let virt = VirtualAddress::new(0x0040_0000);

        vmm.map_page_with(
            &mut pmm,
            PhysicalAddress::new(0x8000),
            virt,
            PageTableFlags::WRITABLE | PageTableFlags::USER,
        )
        .unwrap();

        let entry = *vmm.page_table_mut(virt).unwrap().lookup(virt);
        assert!(entry.is_present());
        assert!(entry.is_writable());
        assert!(entry.is_user());
    }

    #[test]
    fn table_allocation_failure_is_reported() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);

        while pmm.allocate_block().is_ok() {}
        assert_eq!(
            vmm.map_page(&mut pmm, PhysicalAddress::new(0x8000), VirtualAddress::new(0x0040_0000)),
            Err(PagingError::Alloc(AllocError::OutOfMemory))
        );
        assert_eq!(vmm.translate(VirtualAddress::new(0x0040_0000)), None);
    }

    #[test]
    fn unmapping_last_page_releases_the_table() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);
        let first = VirtualAddress::new(0x0040_0000);
        let second = VirtualAddress::new(0x0040_1000);

        let used = pmm.used_block_count();
        vmm.map_page(&mut pmm, PhysicalAddress::new(0x8000), first).unwrap();
        vmm.map_page(&mut pmm, PhysicalAddress::new(0x9000), second).unwrap();

        assert_eq!(
            vmm.unmap_page(&mut pmm, first),
            Ok(Some(PhysicalAddress::new(0x8000)))
        );
        assert_eq!(pmm.used_block_count(), used + 1);
        assert!(vmm.page_table_mut(second).is_some());

        assert_eq!(
            vmm.unmap_page(&mut pmm, second),
            Ok(Some(PhysicalAddress::new(0x9000)))
        );
        assert_eq!(pmm.used_block_count(), used);
        assert!(vmm.page_table_mut(second).is_none());
        assert_eq!(vmm.cpu().invalidated_pages(), &[first, second]);

        assert_eq!(vmm.unmap_page(&mut pmm, second), Ok(None));
    }

    #[test]
    fn mapping_inside_a_4mb_page_is_rejected() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);
        let virt = VirtualAddress::new(0x0080_5000);

        let directory_entry = vmm.directory_mut().unwrap().lookup_mut(virt);
        directory_entry.set_frame(PhysicalAddress::zero());
        directory_entry.add_attribute(PageDirectoryFlags::PRESENT | PageDirectoryFlags::HUGE_PAGE);

        // The word a page table entry for `virt` would land on if the page were a table.
        let word = memory.phys_to_ptr::<u32>(PhysicalAddress::new(5 * 4));
        unsafe { word.write(0xDEAD_BEEF) };
        let used = pmm.used_block_count();

        assert_eq!(
            vmm.map_page(&mut pmm, PhysicalAddress::new(0x0020_0000), virt),
            Err(PagingError::HugePage(virt))
        );
        assert_eq!(unsafe { word.read() }, 0xDEAD_BEEF);
        assert_eq!(pmm.used_block_count(), used);
        assert_eq!(vmm.translate(virt), Some(PhysicalAddress::new(0x0000_5000)));
        assert!(vmm.cpu().invalidated_pages().is_empty());
    }

    #[test]
    fn unmap_reports_frame_when_table_cannot_be_released() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        let mut vmm = vmm_with_directory(&memory, &mut pmm);
        let virt = VirtualAddress::new(0x0040_0000);

        vmm.map_page(&mut pmm, PhysicalAddress::new(0x8000), virt).unwrap();
        let table = vmm.directory_mut().unwrap().lookup(virt).physical_address();
        pmm.free_block(table).unwrap();
        let free = pmm.free_block_count();

        assert_eq!(
            vmm.unmap_page(&mut pmm, virt),
            Ok(Some(PhysicalAddress::new(0x8000)))
        );
        assert_eq!(vmm.translate(virt), None);
        assert!(!vmm.directory_mut().unwrap().lookup(virt).is_present());
        assert_eq!(pmm.free_block_count(), free);
    }

    #[test]
    fn allocate_and_free_page_back_an_entry() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);

        let mut entry = PageTableEntry::new();
        let used = pmm.used_block_count();
        VirtualMemoryManager::allocate_page(&mut pmm, &mut entry).unwrap();
        assert!(entry.is_present());
        assert!(pmm.is_block_used(entry.physical_address()));
        assert!(crate::arch::interrupts_enabled());
        assert_eq!(pmm.used_block_count(), used + 1);

        VirtualMemoryManager::free_page(&mut pmm, &mut entry).unwrap();
        assert!(!entry.is_present());
        assert_eq!(pmm.used_block_count(), used);
    }

    #[test]
    fn failed_allocation_leaves_entry_untouched() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);
        while pmm.allocate_block().is_ok() {}

        let mut entry = PageTableEntry::new();
        let outer = InterruptGuard::new();
        assert_eq!(
            VirtualMemoryManager::allocate_page(&mut pmm, &mut entry),
            Err(AllocError::OutOfMemory)
        );
        assert!(!crate::arch::interrupts_enabled());
        drop(outer);
        assert!(crate::arch::interrupts_enabled());
        assert!(entry.is_unused());
    }

    #[test]
    fn rejected_free_leaves_entry_untouched() {
        let memory = AddressTranslator::emulated(MEMORY_SIZE);
        let mut pmm = setup(&memory);

        let mut entry = PageTableEntry::new();
        VirtualMemoryManager::allocate_page(&mut pmm, &mut entry).unwrap();
        let frame = entry.physical_address();
        pmm.free_block(frame).unwrap();

        assert_eq!(
            VirtualMemoryManager::free_page(&mut pmm, &mut entry),
            Err(FreeError::NotAllocated(frame))
        );
        assert!(entry.is_present());
    }

    #[test]
    fn lookups_handle_missing_structures() {
        let addr = VirtualAddress::new(0xC000_1000);
        assert!(VirtualMemoryManager::lookup_page_table_entry(None, addr).is_none());
        assert!(VirtualMemoryManager::lookup_page_directory_entry(None, addr).is_none());

        let mut table = PageTable::new();
        let entry = VirtualMemoryManager::lookup_page_table_entry(Some(&mut table), addr).unwrap();
        entry.add_attribute(PageTableFlags::PRESENT);
        assert!(table.entries()[1].is_present());

        let mut directory = PageDirectory::new();
        let entry =
            VirtualMemoryManager::lookup_page_directory_entry(Some(&mut directory), addr).unwrap();
        entry.add_attribute(PageDirectoryFlags::PRESENT);
        assert!(directory.entries()[768].is_present());
    }
}
