//! Emulated physical memory.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::arch::PAGE_SIZE;

/// A zero-initialised host buffer standing in for physical memory.
///
/// Physical address `n` is byte `n` of the buffer. The buffer is page aligned so that
/// page tables placed in it have the alignment the hardware requires.
pub struct EmulatedMemory {
    base: NonNull<u8>,
    layout: Layout,
}

// SAFETY: The buffer is plain bytes owned by this value; every access goes through raw
// pointers whose use is governed by the same rules as real physical memory.
unsafe impl Send for EmulatedMemory {}
// SAFETY: See above.
unsafe impl Sync for EmulatedMemory {}

impl EmulatedMemory {
    /// Creates a new emulated memory region of the specified size.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "emulated memory must not be empty");
        let layout = Layout::from_size_align(size, PAGE_SIZE).expect("invalid emulated memory size");

        // SAFETY: The layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout));

        Self { base, layout }
    }

    /// Translates a physical range to a pointer into the buffer.
    ///
    /// # Panics
    ///
    /// Panics if any byte of `phys..phys + len` lies outside the buffer.
    pub fn translate(&self, phys: usize, len: usize) -> *mut u8 {
        assert!(
            phys.checked_add(len).is_some_and(|end| end <= self.size()),
            "physical range {phys:#x}+{len:#x} out of bounds"
        );
        // SAFETY: The range was checked against the allocation.
        unsafe { self.base.as_ptr().add(phys) }
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated with `layout` in `new`.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}
