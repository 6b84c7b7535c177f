//! The boot loader's physical memory map.
//!
//! The boot loader hands over a list of BIOS E820-style records. The list has no length
//! field: it ends at the first record after the first one whose low start word is zero.
//!
//! The frame allocator accepts any record type through the [`BootMemoryRegion`] trait:
//!
//! ```ignore
//! struct MyBootEntry { /* ... */ }
//!
//! impl BootMemoryRegion for MyBootEntry {
//!     fn base(&self) -> PhysicalAddress { /* ... */ }
//!     fn size(&self) -> u64 { /* ... */ }
//!     fn is_usable(&self) -> bool { /* ... */ }
//! }
//! ```

use core::fmt;

use crate::PhysicalAddress;

/// The first byte a 32-bit physical address cannot reach.
const ADDRESS_LIMIT: u64 = 1 << 32;

/// Represents a single entry in a boot-time memory map.
///
/// Implement this trait on boot-loader-specific memory map entry types to let the frame
/// allocator consume them.
pub trait BootMemoryRegion {
    /// Returns the base physical address of this region.
    fn base(&self) -> PhysicalAddress;

    /// Returns the size of this region in bytes.
    fn size(&self) -> u64;

    /// Returns whether this region contains memory the kernel may allocate from.
    fn is_usable(&self) -> bool;

    /// Returns the exclusive end of this region.
    fn end(&self) -> u64 {
        self.base().as_u32() as u64 + self.size()
    }
}

/// Classification of a memory map record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionType {
    /// Free RAM.
    Available,
    /// Reserved by firmware or hardware.
    NotAvailable,
    /// ACPI tables; reclaimable once they have been parsed.
    AcpiReclaim,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// A type code this kernel does not know.
    Unknown(u32),
}

impl From<u32> for MemoryRegionType {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Available,
            2 => Self::NotAvailable,
            3 => Self::AcpiReclaim,
            4 => Self::AcpiNvs,
            other => Self::Unknown(other),
        }
    }
}

impl From<MemoryRegionType> for u32 {
    fn from(value: MemoryRegionType) -> Self {
        match value {
            MemoryRegionType::Available => 1,
            MemoryRegionType::NotAvailable => 2,
            MemoryRegionType::AcpiReclaim => 3,
            MemoryRegionType::AcpiNvs => 4,
            MemoryRegionType::Unknown(other) => other,
        }
    }
}

/// One record of the boot memory map, laid out as the boot loader writes it.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct MemoryRegion {
    pub start_low: u32,
    pub start_high: u32,
    pub size_low: u32,
    pub size_high: u32,
    pub region_type: u32,
    pub acpi_info: u32,
}

impl MemoryRegion {
    /// Creates a record from 64-bit start and size values.
    pub const fn new(start: u64, size: u64, region_type: MemoryRegionType) -> Self {
        let region_type = match region_type {
            MemoryRegionType::Available => 1,
            MemoryRegionType::NotAvailable => 2,
            MemoryRegionType::AcpiReclaim => 3,
            MemoryRegionType::AcpiNvs => 4,
            MemoryRegionType::Unknown(other) => other,
        };
        Self {
            start_low: start as u32,
            start_high: (start >> 32) as u32,
            size_low: size as u32,
            size_high: (size >> 32) as u32,
            region_type,
            acpi_info: 0,
        }
    }

    /// Returns the full 64-bit start address.
    pub const fn start(&self) -> u64 {
        (self.start_high as u64) << 32 | self.start_low as u64
    }

    /// Returns the full 64-bit length.
    pub const fn length(&self) -> u64 {
        (self.size_high as u64) << 32 | self.size_low as u64
    }

    pub fn region_type(&self) -> MemoryRegionType {
        MemoryRegionType::from(self.region_type)
    }

    /// Returns true if the region starts below 4 GiB.
    pub const fn is_addressable(&self) -> bool {
        self.start_high == 0
    }
}

impl BootMemoryRegion for MemoryRegion {
    fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start_low)
    }

    /// Returns the part of the region below 4 GiB.
    fn size(&self) -> u64 {
        if !self.is_addressable() {
            return 0;
        }
        self.length().min(ADDRESS_LIMIT - self.start_low as u64)
    }

    fn is_usable(&self) -> bool {
        self.is_addressable() && self.region_type() == MemoryRegionType::Available
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryRegion({:#011x}..{:#011x}, {:?})",
            self.start(),
            self.start().saturating_add(self.length()),
            self.region_type()
        )
    }
}

/// The records of a boot memory map, up to (excluding) the terminator.
#[derive(Debug, Clone, Copy)]
pub struct BootMemoryMap<'a> {
    regions: &'a [MemoryRegion],
}

impl<'a> BootMemoryMap<'a> {
    /// Applies the terminator rule to `records`.
    ///
    /// The first record is always part of the map, even if it starts at zero. Every later
    /// record starting at (low word) zero ends the map.
    pub fn new(records: &'a [MemoryRegion]) -> Self {
        let len = records
            .iter()
            .skip(1)
            .position(|record| record.start_low == 0)
            .map_or(records.len(), |index| index + 1);
        Self {
            regions: &records[..len],
        }
    }

    /// Reads a terminated map directly from boot loader memory.
    ///
    /// A null pointer yields an empty map.
    ///
    /// # Safety
    ///
    /// `records` must point to a readable array of records that contains a terminator
    /// after its first element, and the memory must stay untouched for `'a`.
    pub unsafe fn from_raw(records: *const MemoryRegion) -> Self {
        if records.is_null() {
            return Self { regions: &[] };
        }

        let mut len = 1;
        // SAFETY: The caller guarantees the array extends to its terminator.
        while unsafe { (*records.add(len)).start_low } != 0 {
            len += 1;
        }

        Self {
            // SAFETY: The first `len` records were just read.
            regions: unsafe { core::slice::from_raw_parts(records, len) },
        }
    }

    pub fn regions(&self) -> &'a [MemoryRegion] {
        self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'a, MemoryRegion> {
        self.regions.iter()
    }

    /// Returns the regions the kernel may allocate from.
    pub fn usable(&self) -> impl Iterator<Item = &'a MemoryRegion> + 'a {
        self.regions.iter().filter(|region| region.is_usable())
    }
}

impl<'a> IntoIterator for BootMemoryMap<'a> {
    type Item = &'a MemoryRegion;
    type IntoIter = core::slice::Iter<'a, MemoryRegion>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available(start: u64, size: u64) -> MemoryRegion {
        MemoryRegion::new(start, size, MemoryRegionType::Available)
    }

    #[test]
    fn record_layout_matches_boot_loader() {
        assert_eq!(core::mem::size_of::<MemoryRegion>(), 24);
        let region = MemoryRegion {
            start_low: 0x0010_0000,
            start_high: 0,
            size_low: 0x0070_0000,
            size_high: 0,
            region_type: 1,
            acpi_info: 0,
        };
        assert_eq!(region, available(0x0010_0000, 0x0070_0000));
    }

    #[test]
    fn decodes_region_types() {
        assert_eq!(MemoryRegionType::from(1), MemoryRegionType::Available);
        assert_eq!(MemoryRegionType::from(2), MemoryRegionType::NotAvailable);
        assert_eq!(MemoryRegionType::from(3), MemoryRegionType::AcpiReclaim);
        assert_eq!(MemoryRegionType::from(4), MemoryRegionType::AcpiNvs);
        assert_eq!(MemoryRegionType::from(9), MemoryRegionType::Unknown(9));
        assert_eq!(u32::from(MemoryRegionType::AcpiNvs), 4);
    }

    #[test]
    fn map_ends_at_first_later_zero_start() {
        let records = [
            available(0, 0x9F000),
            MemoryRegion::new(0x9F000, 0x1000, MemoryRegionType::NotAvailable),
            available(0x0010_0000, 0x00F0_0000),
            MemoryRegion::default(),
            available(0x0100_0000, 0x0100_0000),
        ];

        let map = BootMemoryMap::new(&records);
        assert_eq!(map.len(), 3);
        assert_eq!(map.usable().count(), 2);
    }

    #[test]
    fn first_record_is_kept_even_when_it_starts_at_zero() {
        let records = [available(0, 0x1000), MemoryRegion::default()];
        assert_eq!(BootMemoryMap::new(&records).len(), 1);
    }

    #[test]
    fn unterminated_slice_is_used_whole() {
        let records = [available(0x1000, 0x1000), available(0x4000, 0x1000)];
        assert_eq!(BootMemoryMap::new(&records).len(), 2);
    }

    #[test]
    fn reads_terminated_map_from_pointer() {
        let records = [
            available(0, 0x0010_0000),
            available(0x0010_0000, 0x0010_0000),
            MemoryRegion::default(),
        ];
        let map = unsafe { BootMemoryMap::from_raw(records.as_ptr()) };
        assert_eq!(map.len(), 2);
        assert_eq!(map.regions()[1].base(), PhysicalAddress::new(0x0010_0000));

        let empty = unsafe { BootMemoryMap::from_raw(core::ptr::null()) };
        assert!(empty.is_empty());
    }

    #[test]
    fn memory_above_4gib_is_not_usable() {
        let high = available(0x1_0000_0000, 0x1000_0000);
        assert!(!high.is_usable());
        assert_eq!(high.size(), 0);

        let straddling = available(0xFFF0_0000, 0x0020_0000);
        assert!(straddling.is_usable());
        assert_eq!(straddling.size(), 0x0010_0000);
        assert_eq!(straddling.end(), 1 << 32);
    }
}
