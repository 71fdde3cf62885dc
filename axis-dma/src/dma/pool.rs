//! Slot pool management.

use alloc::vec::Vec;

use dma_pool::MemoryRegion;

use super::buffer::DmaSlot;

/// Fixed set of equally sized slots carved out of one buffer region.
///
/// Slots are addressed by index; a device address coming back from the
/// engine is translated with [`index_of`](Self::index_of), which rejects
/// anything that is not the start of a slot in this region.
pub struct SlotPool {
    /// Region the slots live in.
    region: MemoryRegion,
    /// Slot storage, index = position.
    slots: Vec<DmaSlot>,
    /// Free list (indices of free slots), used as a stack.
    free_list: Vec<u16>,
    /// Size of each slot.
    slot_size: usize,
}

impl SlotPool {
    /// Cut `count` slots of `slot_size` bytes from the start of `region`.
    ///
    /// # Safety
    /// - `region` must be valid, writable, identity-mapped DMA memory
    ///   that outlives the pool
    /// - nothing else may write to the region except the DMA engine
    ///
    /// # Panics
    /// Panics if the slots do not fit the region or `count` exceeds `u16`.
    pub unsafe fn new(region: MemoryRegion, slot_size: usize, count: usize) -> Self {
        assert!(slot_size > 0, "Slot size must be positive");
        assert!(count <= region.slot_count(slot_size), "Slots exceed region");
        assert!(count <= u16::MAX as usize, "Pool size exceeds maximum");

        let mut slots = Vec::with_capacity(count);
        let mut free_list = Vec::with_capacity(count);

        // Reverse order so the first allocation hands out slot 0.
        for i in 0..count {
            slots.push(DmaSlot::new(region.base + i * slot_size, slot_size, i as u16));
            free_list.push((count - 1 - i) as u16);
        }

        Self {
            region,
            slots,
            free_list,
            slot_size,
        }
    }

    /// Allocate a slot, returning its index.
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn alloc(&mut self) -> Option<u16> {
        let index = self.free_list.pop()?;
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.is_free(), "Allocated slot must be free");
        slot.mark_allocated();
        Some(index)
    }

    /// Return a driver-owned slot to the pool.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn free(&mut self, index: u16) {
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.is_driver_owned(), "Can only free driver-owned slots");
        slot.mark_free();
        self.free_list.push(index);
    }

    /// Translate a device address back to the slot that starts there.
    pub fn index_of(&self, addr: usize) -> Option<u16> {
        let index = self.region.slot_of(self.slot_size, addr)?;
        if index < self.slots.len() {
            Some(index as u16)
        } else {
            None
        }
    }

    pub fn get(&self, index: u16) -> Option<&DmaSlot> {
        self.slots.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u16) -> Option<&mut DmaSlot> {
        self.slots.get_mut(index as usize)
    }

    /// Slot at an index the pool handed out.
    ///
    /// # Panics
    /// If `index` is outside the pool.
    pub fn slot_mut(&mut self, index: u16) -> &mut DmaSlot {
        &mut self.slots[index as usize]
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// Total number of slots.
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently allocated or device-owned.
    pub fn in_use(&self) -> usize {
        self.total() - self.available()
    }

    /// No free slots.
    pub fn is_empty(&self) -> bool {
        self.free_list.is_empty()
    }

    /// All slots free.
    pub fn is_full(&self) -> bool {
        self.available() == self.total()
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Bytes one packet may occupy when spread over every slot.
    pub fn capacity_bytes(&self) -> usize {
        self.slot_size * self.total()
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Mark every slot free again after an engine reset dropped all
    /// in-flight descriptors, then zero the region.
    pub fn reclaim_all(&mut self) {
        self.free_list.clear();
        for (i, slot) in self.slots.iter_mut().enumerate().rev() {
            slot.reset();
            self.free_list.push(i as u16);
        }
        // SAFETY: the constructor contract covers the region and no slot is
        // device-owned any more.
        unsafe { self.region.zero() };
    }

    /// Iterate over all slots (for debugging).
    pub fn iter(&self) -> impl Iterator<Item = &DmaSlot> {
        self.slots.iter()
    }
}
