//! Memory region arithmetic for statically laid out DMA memory.
//!
//! Bare-metal DMA setups hand the driver a handful of fixed physical windows
//! (descriptor spaces, buffer pools). This crate describes those windows and
//! answers the questions a driver asks before touching them: how big is it,
//! is it aligned, does it collide with its neighbour, how many fixed-size
//! slots fit inside.
//!
//! # Addressing
//!
//! Regions are expressed as `base..=high`, the same inclusive form the
//! hardware configuration records use (`high = base + size - 1`). All
//! addresses are identity mapped (physical = virtual).
//!
//! # Usage
//!
//! ```ignore
//! use dma_pool::{MemoryRegion, check_ordered};
//!
//! let bds = MemoryRegion::new(0x0100_0000, 0x0100_0FFF);
//! let bufs = MemoryRegion::with_len(0x0100_1000, 0x2000).unwrap();
//! check_ordered(&[bds, bufs])?;
//! assert_eq!(bufs.slot_count(4096), 2);
//! ```

#![no_std]

use core::fmt;

use thiserror::Error;

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

// ============================================================================
// Utility functions
// ============================================================================

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment.
#[inline]
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Check whether a value is a multiple of `align` (power of two).
#[inline]
pub const fn is_aligned(val: usize, align: usize) -> bool {
    val & (align - 1) == 0
}

// ============================================================================
// Error types
// ============================================================================

/// Region validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegionError {
    /// `high` does not lie above `base`.
    #[error("region {index}: high address {high:#x} is not above base {base:#x}")]
    Inverted { index: usize, base: usize, high: usize },
    /// Two regions share at least one byte.
    #[error("regions {first} and {second} overlap")]
    Overlap { first: usize, second: usize },
    /// A region starts below the end of the region listed before it.
    #[error("region {index} is not laid out after region {previous}")]
    OutOfOrder { previous: usize, index: usize },
}

/// Result type for region checks.
pub type Result<T> = core::result::Result<T, RegionError>;

// ============================================================================
// MemoryRegion
// ============================================================================

/// An inclusive window of identity-mapped memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    /// First byte of the region.
    pub base: usize,
    /// Last byte of the region (inclusive).
    pub high: usize,
}

impl MemoryRegion {
    /// Create a region from its first and last byte addresses.
    pub const fn new(base: usize, high: usize) -> Self {
        Self { base, high }
    }

    /// Create a region from a base address and a byte length.
    ///
    /// Returns `None` for zero-length or address-space-overflowing regions.
    pub const fn with_len(base: usize, len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        match base.checked_add(len - 1) {
            Some(high) => Some(Self { base, high }),
            None => None,
        }
    }

    /// `high > base`.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.high > self.base
    }

    /// Size in bytes. Zero for an invalid region.
    #[inline]
    pub const fn len(&self) -> usize {
        if self.is_valid() {
            self.high - self.base + 1
        } else {
            0
        }
    }

    /// True when the region holds no bytes.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One past the last byte.
    #[inline]
    pub const fn end(&self) -> usize {
        self.high.wrapping_add(1)
    }

    /// Check whether `addr` lies inside the region.
    #[inline]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr <= self.high
    }

    /// Check whether `addr..addr + len` lies entirely inside the region.
    pub const fn contains_span(&self, addr: usize, len: usize) -> bool {
        if len == 0 {
            return self.contains(addr);
        }
        match addr.checked_add(len - 1) {
            Some(last) => self.contains(addr) && last <= self.high,
            None => false,
        }
    }

    /// Check whether the two regions share any byte.
    #[inline]
    pub const fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.base <= other.high && other.base <= self.high
    }

    /// Check base alignment.
    #[inline]
    pub const fn is_base_aligned(&self, align: usize) -> bool {
        is_aligned(self.base, align)
    }

    /// Number of whole `slot_size` slots that fit in the region.
    #[inline]
    pub const fn slot_count(&self, slot_size: usize) -> usize {
        if slot_size == 0 {
            0
        } else {
            self.len() / slot_size
        }
    }

    /// Address of slot `index` when the region is cut into `slot_size` slots.
    pub const fn slot_addr(&self, slot_size: usize, index: usize) -> Option<usize> {
        if index >= self.slot_count(slot_size) {
            return None;
        }
        Some(self.base + index * slot_size)
    }

    /// Inverse of [`slot_addr`](Self::slot_addr): which slot starts at `addr`.
    ///
    /// Addresses inside a slot but not at its start are rejected.
    pub const fn slot_of(&self, slot_size: usize, addr: usize) -> Option<usize> {
        if slot_size == 0 || !self.contains(addr) {
            return None;
        }
        let offset = addr - self.base;
        if offset % slot_size != 0 {
            return None;
        }
        let index = offset / slot_size;
        if index >= self.slot_count(slot_size) {
            return None;
        }
        Some(index)
    }

    /// Fill the whole region with zeros.
    ///
    /// # Safety
    ///
    /// - The region must be valid, writable, identity-mapped memory.
    /// - Nothing else (CPU or device) may be accessing it.
    pub unsafe fn zero(&self) {
        if self.is_valid() {
            core::ptr::write_bytes(self.base as *mut u8, 0, self.len());
        }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}..={:#010x} ({} bytes)", self.base, self.high, self.len())
    }
}

// ============================================================================
// Layout checks
// ============================================================================

/// Check that every region is valid and that they are strictly ascending
/// and pairwise disjoint, in slice order.
///
/// Error indices refer to positions in `regions`.
pub fn check_ordered(regions: &[MemoryRegion]) -> Result<()> {
    for (index, region) in regions.iter().enumerate() {
        if !region.is_valid() {
            return Err(RegionError::Inverted {
                index,
                base: region.base,
                high: region.high,
            });
        }
    }

    for (first, a) in regions.iter().enumerate() {
        for (offset, b) in regions[first + 1..].iter().enumerate() {
            if a.overlaps(b) {
                return Err(RegionError::Overlap {
                    first,
                    second: first + 1 + offset,
                });
            }
        }
    }

    for index in 1..regions.len() {
        if regions[index].base <= regions[index - 1].high {
            return Err(RegionError::OutOfOrder {
                previous: index - 1,
                index,
            });
        }
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_functions() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_down(4097, 4096), 4096);
        assert!(is_aligned(0x40, 64));
        assert!(!is_aligned(0x41, 64));
    }

    #[test]
    fn test_region_len_is_inclusive() {
        let region = MemoryRegion::new(0x1000, 0x1FFF);
        assert_eq!(region.len(), 0x1000);
        assert_eq!(region.end(), 0x2000);
        assert_eq!(MemoryRegion::with_len(0x1000, 0x1000), Some(region));
        assert_eq!(MemoryRegion::with_len(0x1000, 0), None);
        assert!(MemoryRegion::new(0x2000, 0x1000).is_empty());
    }

    #[test]
    fn test_slots() {
        let region = MemoryRegion::new(0x1000, 0x2FFF);
        assert_eq!(region.slot_count(4096), 2);
        assert_eq!(region.slot_count(3000), 2);
        assert_eq!(region.slot_addr(4096, 1), Some(0x2000));
        assert_eq!(region.slot_addr(4096, 2), None);
        assert_eq!(region.slot_of(4096, 0x2000), Some(1));
        assert_eq!(region.slot_of(4096, 0x2004), None);
        assert_eq!(region.slot_of(4096, 0x3000), None);
    }

    #[test]
    fn test_contains_span() {
        let region = MemoryRegion::new(0x1000, 0x1FFF);
        assert!(region.contains_span(0x1000, 0x1000));
        assert!(!region.contains_span(0x1001, 0x1000));
        assert!(!region.contains_span(usize::MAX, 2));
    }

    #[test]
    fn test_check_ordered() {
        let a = MemoryRegion::new(0x1000, 0x1FFF);
        let b = MemoryRegion::new(0x2000, 0x2FFF);
        let c = MemoryRegion::new(0x2800, 0x3FFF);
        assert_eq!(check_ordered(&[a, b]), Ok(()));
        assert_eq!(
            check_ordered(&[a, b, c]),
            Err(RegionError::Overlap { first: 1, second: 2 })
        );
        assert_eq!(
            check_ordered(&[b, a]),
            Err(RegionError::OutOfOrder { previous: 0, index: 1 })
        );
        assert_eq!(
            check_ordered(&[a, MemoryRegion::new(0x5000, 0x5000)]),
            Err(RegionError::Inverted { index: 1, base: 0x5000, high: 0x5000 })
        );
    }

    #[test]
    fn test_zero_region() {
        let mut backing = [0xAAu8; 64];
        let region = MemoryRegion::with_len(backing.as_mut_ptr() as usize, 32).unwrap();
        unsafe { region.zero() };
        assert!(backing[..32].iter().all(|&b| b == 0));
        assert!(backing[32..].iter().all(|&b| b == 0xAA));
    }
}
