//! Software emulation implementation for testing and development.
//!
//! This module provides a software-emulated processor and physical memory that can run on
//! any host. Register writes are recorded instead of executed, so tests can assert on what
//! the hardware would have seen: the directory loaded into CR3, whether paging was turned
//! on, and which pages had their TLB entries invalidated.

mod memory;

use std::cell::Cell;

use crate::{PhysicalAddress, VirtualAddress};

pub use memory::EmulatedMemory;

/// Emulated paging control registers.
#[derive(Debug, Default)]
pub struct Cpu {
    directory_base: PhysicalAddress,
    paging: bool,
    invalidated: Vec<VirtualAddress>,
}

impl Cpu {
    /// Creates an emulated processor with paging disabled and CR3 zero.
    ///
    /// # Safety
    ///
    /// Always safe in emulation; the signature matches the hardware backend.
    pub const unsafe fn new() -> Self {
        Self {
            directory_base: PhysicalAddress::zero(),
            paging: false,
            invalidated: Vec::new(),
        }
    }

    /// Records `directory` as the value of CR3.
    ///
    /// # Safety
    ///
    /// Always safe in emulation; the signature matches the hardware backend.
    pub unsafe fn load_page_directory_base(&mut self, directory: PhysicalAddress) {
        self.directory_base = directory;
    }

    pub fn page_directory_base(&self) -> PhysicalAddress {
        self.directory_base
    }

    /// # Safety
    ///
    /// Always safe in emulation; the signature matches the hardware backend.
    pub unsafe fn enable_paging(&mut self) {
        self.paging = true;
    }

    /// # Safety
    ///
    /// Always safe in emulation; the signature matches the hardware backend.
    pub unsafe fn disable_paging(&mut self) {
        self.paging = false;
    }

    pub fn is_paging_enabled(&self) -> bool {
        self.paging
    }

    /// Records that the translation for `addr` was invalidated.
    pub fn invalidate_page(&mut self, addr: VirtualAddress) {
        self.invalidated.push(addr);
    }

    /// Returns every address passed to [`Cpu::invalidate_page`], oldest first.
    pub fn invalidated_pages(&self) -> &[VirtualAddress] {
        &self.invalidated
    }
}

std::thread_local! {
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns true if the emulated interrupt flag of the current thread is set.
pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.with(Cell::get)
}

/// Clears the emulated interrupt flag for as long as it is alive.
///
/// Each test thread has its own flag, so tests running in parallel do not interfere.
pub struct InterruptGuard {
    was_enabled: bool,
}

impl InterruptGuard {
    pub fn new() -> Self {
        let was_enabled = INTERRUPTS_ENABLED.with(|flag| flag.replace(false));
        Self { was_enabled }
    }

    /// Returns true if interrupts were enabled when the guard was taken.
    pub fn were_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        INTERRUPTS_ENABLED.with(|flag| flag.set(self.was_enabled));
    }
}
