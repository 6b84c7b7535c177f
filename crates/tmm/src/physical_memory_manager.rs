//! Physical memory manager using a frame bitmap.
//!
//! Every physical frame below the highest usable address gets one bit: set while the frame
//! is in use (or does not exist), clear while it can be handed out. The bitmap itself lives
//! in physical memory at an address chosen by the caller, usually just past the kernel
//! image.
//!
//! Frames start out used. Usable regions of the boot memory map are then cleared, and the
//! caller marks its own reservations (kernel image, stacks, the bitmap) used again.

use core::ops::Range;

use crate::{
    AddressTranslator, FrameNumber, HumanSize, PhysicalAddress,
    arch::{InterruptGuard, PAGE_SIZE},
    bitmap::{BITS_PER_WORD, FrameBitmap},
    memmap::BootMemoryRegion,
};

/// Errors that can occur during physical memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Not enough free frames to satisfy the request.
    #[error("out of physical memory")]
    OutOfMemory,
    /// A multi-frame allocation asked for zero frames.
    #[error("allocation size must be at least one frame")]
    InvalidSize,
    /// The free count says a frame is available but the bitmap has none.
    #[error("frame bitmap disagrees with the used frame count")]
    InconsistentState,
}

/// Errors that can occur when returning frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    /// The frame is already free.
    #[error("frame {0} is not allocated")]
    NotAllocated(PhysicalAddress),
    /// The frame lies outside the memory covered by the bitmap.
    #[error("frame {0} is outside managed memory")]
    OutOfRange(PhysicalAddress),
}

/// Errors that can occur while setting up the physical memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    /// The boot memory map contains no usable memory.
    #[error("boot memory map contains no available memory")]
    NoAvailableMemory,
}

/// Physical memory manager using a frame bitmap.
///
/// Allocation is first fit: the lowest free frame (or lowest free run of frames) wins.
/// The manager keeps `used_block_count` equal to the number of set bits at all times, so
/// `used_block_count() + free_block_count() == available_block_count()`.
pub struct PhysicalMemoryManager<'m> {
    bitmap: FrameBitmap<'m>,
    bitmap_address: PhysicalAddress,
    bitmap_size: usize,
    memory_size_kib: u64,
    used_blocks: usize,
}

impl<'m> PhysicalMemoryManager<'m> {
    /// Builds the frame bitmap for the given boot memory map.
    ///
    /// `bitmap_address` is rounded up to the next frame boundary. The bitmap's own frames
    /// are not reserved here; callers mark [`Self::memory_map`] unavailable once the
    /// manager is set up.
    ///
    /// # Safety
    ///
    /// The `memory_map_size()` bytes at the rounded `bitmap_address` must be reachable
    /// through `memory` and owned by the manager for its lifetime.
    pub unsafe fn initialise<R: BootMemoryRegion>(
        memory: &'m AddressTranslator,
        regions: &[R],
        bitmap_address: PhysicalAddress,
    ) -> Result<Self, InitError> {
        let mut available_bytes: u64 = 0;
        let mut addressable_end: u64 = 0;
        for region in regions.iter().filter(|region| region.is_usable()) {
            available_bytes += region.size();
            addressable_end = addressable_end.max(region.end());
        }

        let block_count = (addressable_end / PAGE_SIZE as u64) as usize;
        if available_bytes == 0 || block_count == 0 {
            return Err(InitError::NoAvailableMemory);
        }

        let bitmap_address = bitmap_address.align_up(PAGE_SIZE as u32);
        let word_count = FrameBitmap::words_for(block_count);
        let bitmap_size = word_count * (BITS_PER_WORD / 8);

        let ptr = memory.phys_range_to_ptr(bitmap_address, bitmap_size);
        // SAFETY: The caller hands the bitmap storage to the manager. It is frame aligned,
        // so it is aligned for u32.
        let words = unsafe { core::slice::from_raw_parts_mut(ptr.cast::<u32>(), word_count) };

        let mut bitmap = FrameBitmap::new(words, block_count);
        bitmap.fill(true);

        let mut pmm = Self {
            bitmap,
            bitmap_address,
            bitmap_size,
            memory_size_kib: available_bytes / 1024,
            used_blocks: block_count,
        };

        for region in regions.iter().filter(|region| region.is_usable()) {
            pmm.mark_region_as_available(region.base(), region.size());
        }

        log::info!(
            "physical memory: {} available, {} frames tracked, {} free, bitmap at {} ({} bytes)",
            HumanSize::from_kib(pmm.memory_size_kib),
            block_count,
            pmm.free_block_count(),
            bitmap_address,
            bitmap_size
        );

        Ok(pmm)
    }

    /// Marks every frame touched by `base..base + size` as free.
    pub fn mark_region_as_available(&mut self, base: PhysicalAddress, size: u64) {
        let frames = self.frames_for_region(base, size);
        log::trace!(
            "marking {} ({} bytes) available: frames {}..{}",
            base,
            size,
            frames.start,
            frames.end
        );
        self.mark_frames(frames, false);
    }

    /// Marks every frame touched by `base..base + size` as used.
    pub fn mark_region_as_unavailable(&mut self, base: PhysicalAddress, size: u64) {
        let frames = self.frames_for_region(base, size);
        log::trace!(
            "marking {} ({} bytes) unavailable: frames {}..{}",
            base,
            size,
            frames.start,
            frames.end
        );
        self.mark_frames(frames, true);
    }

    /// Allocates a single frame.
    pub fn allocate_block(&mut self) -> Result<PhysicalAddress, AllocError> {
        let _guard = InterruptGuard::new();

        if self.free_block_count() == 0 {
            log::warn!("frame allocation failed: no free frames");
            return Err(AllocError::OutOfMemory);
        }

        let Some(frame) = self.bitmap.first_clear() else {
            log::error!(
                "frame bitmap has no clear bit but {} frames are counted free",
                self.free_block_count()
            );
            return Err(AllocError::InconsistentState);
        };

        self.bitmap.set(frame);
        self.used_blocks += 1;

        let addr = FrameNumber::new(frame).start();
        log::trace!("allocated frame {}", addr);
        Ok(addr)
    }

    /// Allocates `count` physically contiguous frames and returns the first.
    ///
    /// The request fails unless strictly more than `count` frames are free.
    pub fn allocate_blocks(&mut self, count: usize) -> Result<PhysicalAddress, AllocError> {
        if count == 0 {
            return Err(AllocError::InvalidSize);
        }

        let _guard = InterruptGuard::new();

        if self.free_block_count() <= count {
            log::warn!(
                "allocation of {} frames failed: only {} free",
                count,
                self.free_block_count()
            );
            return Err(AllocError::OutOfMemory);
        }

        let Some(start) = self.bitmap.find_clear_run(count) else {
            log::warn!("allocation of {} frames failed: no contiguous run", count);
            return Err(AllocError::OutOfMemory);
        };

        self.bitmap.set_range(start, count);
        self.used_blocks += count;

        let addr = FrameNumber::new(start).start();
        log::trace!("allocated {} frames at {}", count, addr);
        Ok(addr)
    }

    /// Returns the frame containing `addr` to the free pool.
    pub fn free_block(&mut self, addr: PhysicalAddress) -> Result<(), FreeError> {
        self.free_blocks(addr, 1)
    }

    /// Returns `count` frames starting at the frame containing `addr`.
    ///
    /// Either all frames are freed or, on error, none are.
    pub fn free_blocks(&mut self, addr: PhysicalAddress, count: usize) -> Result<(), FreeError> {
        let _guard = InterruptGuard::new();

        let first = addr.frame_number().as_usize();
        let frames = first..first.saturating_add(count);
        if frames.end > self.bitmap.len() {
            log::warn!("rejected free of {} frames at {}: out of range", count, addr);
            return Err(FreeError::OutOfRange(addr));
        }

        if let Some(frame) = frames.clone().find(|&frame| !self.bitmap.test(frame)) {
            let frame = FrameNumber::new(frame).start();
            log::warn!("rejected free of {}: frame {} is not allocated", addr, frame);
            return Err(FreeError::NotAllocated(frame));
        }

        for frame in frames {
            self.bitmap.clear(frame);
        }
        self.used_blocks -= count;

        log::trace!("freed {} frames at {}", count, addr);
        Ok(())
    }

    /// Returns true if the frame containing `addr` is in use.
    ///
    /// Frames outside the bitmap cannot be allocated and count as used.
    pub fn is_block_used(&self, addr: PhysicalAddress) -> bool {
        let frame = addr.frame_number().as_usize();
        frame >= self.bitmap.len() || self.bitmap.test(frame)
    }

    /// Returns the amount of usable memory reported by the boot map, in KiB.
    pub fn available_memory_size(&self) -> u64 {
        self.memory_size_kib
    }

    /// Returns the number of frames tracked by the bitmap.
    pub fn available_block_count(&self) -> usize {
        self.bitmap.len()
    }

    pub fn used_block_count(&self) -> usize {
        self.used_blocks
    }

    pub fn free_block_count(&self) -> usize {
        self.bitmap.len() - self.used_blocks
    }

    pub fn block_size(&self) -> usize {
        PAGE_SIZE
    }

    /// Returns the physical address of the bitmap storage.
    pub fn memory_map(&self) -> PhysicalAddress {
        self.bitmap_address
    }

    /// Returns the size of the bitmap storage in bytes.
    pub fn memory_map_size(&self) -> usize {
        self.bitmap_size
    }

    /// Converts a byte range into the enclosing frame range, clipped to the bitmap.
    fn frames_for_region(&self, base: PhysicalAddress, size: u64) -> Range<usize> {
        let start = base.frame_number().as_usize();
        let end = FrameNumber::containing_end(base.as_u32() as u64 + size).as_usize();

        let limit = self.bitmap.len();
        if end > limit {
            log::trace!(
                "region {}+{:#x} extends past the last tracked frame {}",
                base,
                size,
                limit
            );
        }
        start.min(limit)..end.min(limit)
    }

    /// Sets or clears the bits of `frames`, counting only bits that change.
    fn mark_frames(&mut self, frames: Range<usize>, used: bool) {
        let _guard = InterruptGuard::new();

        for frame in frames {
            if self.bitmap.test(frame) == used {
                continue;
            }
            if used {
                self.bitmap.set(frame);
                self.used_blocks += 1;
            } else {
                self.bitmap.clear(frame);
                self.used_blocks -= 1;
            }
        }
    }
}
