//! Address space management.
//!
//! An address space is a page directory together with the page tables it references. The
//! structures live in physical frames; [`AddressSpace`] reaches them through the
//! [`AddressTranslator`] so the same code runs on hardware and in emulation.

use crate::{
    AddressTranslator, PhysicalAddress, VirtualAddress,
    arch::TABLE_SPAN,
    table::{PageDirectory, PageTable},
};

/// A page directory and the page tables it references.
pub struct AddressSpace<'m> {
    memory: &'m AddressTranslator,
    directory: PhysicalAddress,
}

impl<'m> AddressSpace<'m> {
    /// Wraps the page directory stored in the frame at `directory`.
    ///
    /// # Safety
    ///
    /// The frame must hold a valid page directory whose present entries reference valid
    /// page tables. No other `AddressSpace` or reference may access these frames while the
    /// returned value is alive.
    pub unsafe fn from_directory(memory: &'m AddressTranslator, directory: PhysicalAddress) -> Self {
        Self { memory, directory }
    }

    /// Returns the physical address of the page directory.
    pub fn directory_address(&self) -> PhysicalAddress {
        self.directory
    }

    pub fn directory(&self) -> &PageDirectory {
        // SAFETY: Guaranteed by `from_directory`.
        unsafe { &*self.memory.phys_to_ptr::<PageDirectory>(self.directory) }
    }

    pub fn directory_mut(&mut self) -> &mut PageDirectory {
        // SAFETY: Guaranteed by `from_directory`; `&mut self` makes the access exclusive.
        unsafe { &mut *self.memory.phys_to_ptr::<PageDirectory>(self.directory) }
    }

    /// Returns the page table covering `addr`, if one is installed.
    pub fn table(&self, addr: VirtualAddress) -> Option<&PageTable> {
        let entry = self.directory().lookup(addr);
        if !entry.is_present() || entry.is_4mb() {
            return None;
        }
        // SAFETY: Present directory entries reference valid page tables.
        Some(unsafe { &*self.memory.phys_to_ptr::<PageTable>(entry.physical_address()) })
    }

    /// Returns the page table covering `addr` mutably, if one is installed.
    pub fn table_mut(&mut self, addr: VirtualAddress) -> Option<&mut PageTable> {
        let entry = *self.directory().lookup(addr);
        if !entry.is_present() || entry.is_4mb() {
            return None;
        }
        // SAFETY: Present directory entries reference valid page tables.
        Some(unsafe { self.table_at_mut(entry.physical_address()) })
    }

    /// Returns the page table stored in the frame at `table`.
    ///
    /// # Safety
    ///
    /// `table` must be a page table frame owned by this address space.
    pub(crate) unsafe fn table_at_mut(&mut self, table: PhysicalAddress) -> &mut PageTable {
        // SAFETY: Upheld by the caller; `&mut self` makes the access exclusive.
        unsafe { &mut *self.memory.phys_to_ptr::<PageTable>(table) }
    }

    /// Translates `addr` through the directory and its tables.
    ///
    /// Returns `None` when either level is not present.
    pub fn translate(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        let directory_entry = self.directory().lookup(addr);
        if !directory_entry.is_present() {
            return None;
        }

        if directory_entry.is_4mb() {
            let offset = addr.as_u32() & (TABLE_SPAN as u32 - 1);
            let base = directory_entry.physical_address().align_down(TABLE_SPAN as u32);
            return Some(base + offset);
        }

        let entry = self.table(addr)?.lookup(addr);
        entry
            .is_present()
            .then(|| entry.physical_address() + addr.page_offset())
    }
}
