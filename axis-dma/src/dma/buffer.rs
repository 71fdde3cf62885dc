//! DMA buffer slot with ownership tracking.

use super::ownership::BufferOwnership;

/// One `bd_buffer_size` slot of a buffer region.
///
/// Memory is identity mapped, so the address the device sees is the address
/// the CPU dereferences.
pub struct DmaSlot {
    /// Device-visible (and CPU) address of the first byte.
    addr: usize,
    /// Slot capacity in bytes.
    capacity: usize,
    /// Current ownership state.
    ownership: BufferOwnership,
    /// Slot index within the pool.
    index: u16,
}

impl DmaSlot {
    /// Create a new slot.
    ///
    /// # Safety
    /// `addr..addr + capacity` must be valid, writable DMA memory that
    /// outlives the slot.
    pub unsafe fn new(addr: usize, capacity: usize, index: u16) -> Self {
        Self {
            addr,
            capacity,
            ownership: BufferOwnership::Free,
            index,
        }
    }

    /// Get slot data as slice.
    ///
    /// # Panics
    /// Panics if slot is not DriverOwned.
    pub fn as_slice(&self) -> &[u8] {
        assert!(
            self.ownership.can_access(),
            "BUG: Cannot access slot not owned by driver (state: {:?})",
            self.ownership
        );
        unsafe { core::slice::from_raw_parts(self.addr as *const u8, self.capacity) }
    }

    /// Get slot data as mutable slice.
    ///
    /// # Panics
    /// Panics if slot is not DriverOwned.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(
            self.ownership.can_access(),
            "BUG: Cannot access slot not owned by driver (state: {:?})",
            self.ownership
        );
        unsafe { core::slice::from_raw_parts_mut(self.addr as *mut u8, self.capacity) }
    }

    /// Zero the first `len` bytes (clamped to capacity).
    pub fn clear(&mut self, len: usize) {
        let len = len.min(self.capacity);
        self.as_mut_slice()[..len].fill(0);
    }

    /// Get the device-visible address.
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Get slot index.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Get slot capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get current ownership state.
    pub fn ownership(&self) -> BufferOwnership {
        self.ownership
    }

    pub fn is_free(&self) -> bool {
        self.ownership.is_free()
    }

    pub fn is_driver_owned(&self) -> bool {
        self.ownership.can_access()
    }

    pub fn is_device_owned(&self) -> bool {
        self.ownership.is_device_owned()
    }

    /// Free -> DriverOwned. Pool allocation only.
    pub(crate) fn mark_allocated(&mut self) {
        debug_assert!(self.ownership.is_free(), "Slot must be free to allocate");
        self.ownership = BufferOwnership::DriverOwned;
    }

    /// DriverOwned -> DeviceOwned.
    ///
    /// # Safety
    /// Only call immediately before handing the slot to the engine.
    pub unsafe fn mark_device_owned(&mut self) {
        debug_assert!(
            self.ownership == BufferOwnership::DriverOwned,
            "Slot must be driver-owned before device transfer"
        );
        self.ownership = BufferOwnership::DeviceOwned;
    }

    /// DeviceOwned -> DriverOwned.
    ///
    /// # Safety
    /// Only call after the engine has returned the descriptor (reap).
    pub unsafe fn mark_driver_owned(&mut self) {
        debug_assert!(
            self.ownership == BufferOwnership::DeviceOwned,
            "Slot must be device-owned before reclaim"
        );
        self.ownership = BufferOwnership::DriverOwned;
    }

    /// DriverOwned -> Free. Pool return only.
    pub(crate) fn mark_free(&mut self) {
        debug_assert!(
            self.ownership == BufferOwnership::DriverOwned,
            "Slot must be driver-owned before freeing"
        );
        self.ownership = BufferOwnership::Free;
    }

    /// Force back to Free after an engine reset discarded the descriptor.
    pub(crate) fn reset(&mut self) {
        self.ownership = BufferOwnership::Free;
    }
}

// Slots only hold an address; the pool serialises access.
unsafe impl Send for DmaSlot {}
unsafe impl Sync for DmaSlot {}
