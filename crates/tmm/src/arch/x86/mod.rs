//! i386 hardware implementation.
//!
//! Paging is controlled through CR0 (bit 31 enables translation) and CR3 (physical address
//! of the current page directory). Register operands are pointer sized so that the module
//! also assembles when type-checked on an x86_64 host.
#![cfg_attr(any(test, feature = "software-emulation"), allow(dead_code))]

use core::arch::asm;

use crate::{PhysicalAddress, VirtualAddress};

/// CR0.PG: translation through the page directory in CR3 is enabled.
const CR0_PAGING: usize = 1 << 31;

/// EFLAGS.IF: maskable interrupts are delivered.
const EFLAGS_INTERRUPT: usize = 1 << 9;

/// Handle to the processor's paging control registers.
pub struct Cpu {
    _private: (),
}

impl Cpu {
    /// Creates a handle to the processor.
    ///
    /// # Safety
    ///
    /// Must run in ring 0. Only one handle may exist, since it is the sole writer of CR0
    /// and CR3.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    /// Loads CR3 with the physical address of a page directory.
    ///
    /// # Safety
    ///
    /// `directory` must hold a valid page directory. If paging is enabled it must map the
    /// code and data currently in use.
    pub unsafe fn load_page_directory_base(&mut self, directory: PhysicalAddress) {
        // SAFETY: The caller guarantees the directory is valid.
        unsafe {
            asm!("mov cr3, {}", in(reg) directory.as_usize(), options(nostack, preserves_flags));
        }
    }

    /// Returns the physical address currently held in CR3.
    pub fn page_directory_base(&self) -> PhysicalAddress {
        let value: usize;
        // SAFETY: Reading CR3 has no side effects.
        unsafe {
            asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
        }
        PhysicalAddress::new(value as u32)
    }

    /// Sets CR0.PG.
    ///
    /// # Safety
    ///
    /// CR3 must reference a directory that maps the currently executing code at its
    /// current address.
    pub unsafe fn enable_paging(&mut self) {
        // SAFETY: The caller guarantees the active directory maps the running code.
        unsafe { write_cr0(read_cr0() | CR0_PAGING) };
    }

    /// Clears CR0.PG.
    ///
    /// # Safety
    ///
    /// The currently executing code must be identity mapped.
    pub unsafe fn disable_paging(&mut self) {
        // SAFETY: The caller guarantees the running code is identity mapped.
        unsafe { write_cr0(read_cr0() & !CR0_PAGING) };
    }

    /// Returns true if CR0.PG is set.
    pub fn is_paging_enabled(&self) -> bool {
        read_cr0() & CR0_PAGING != 0
    }

    /// Drops any cached translation for the page containing `addr`.
    pub fn invalidate_page(&mut self, addr: VirtualAddress) {
        // SAFETY: invlpg only discards a TLB entry.
        unsafe {
            asm!("invlpg [{}]", in(reg) addr.as_usize(), options(nostack, preserves_flags));
        }
    }
}

fn read_cr0() -> usize {
    let value: usize;
    // SAFETY: Reading CR0 has no side effects.
    unsafe {
        asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

unsafe fn write_cr0(value: usize) {
    // SAFETY: Upheld by the callers.
    unsafe {
        asm!("mov cr0, {}", in(reg) value, options(nostack, preserves_flags));
    }
}

/// Masks maskable interrupts for as long as it is alive.
///
/// Dropping the guard re-enables interrupts only if they were enabled when it was
/// created, so guards nest.
pub struct InterruptGuard {
    was_enabled: bool,
}

impl InterruptGuard {
    pub fn new() -> Self {
        let flags: usize;
        // SAFETY: pushf/pop only reads EFLAGS through the stack.
        unsafe {
            asm!("pushf", "pop {}", out(reg) flags, options(preserves_flags));
        }

        let was_enabled = flags & EFLAGS_INTERRUPT != 0;
        if was_enabled {
            // SAFETY: The kernel runs in ring 0 where cli is permitted.
            unsafe { asm!("cli", options(nomem, nostack)) };
        }

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
        if self.was_enabled {
            // SAFETY: Restores the state observed in `new`.
            unsafe { asm!("sti", options(nomem, nostack)) };
        }
    }
}
