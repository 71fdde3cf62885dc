//! TX fragmentation.
//!
//! Fire-and-forget transmit: a packet is cut into `bd_buffer_size` fragments,
//! copied into TX slots and handed to the MM2S ring as one transaction.
//! Completions are collected later by the dispatcher, one per descriptor.

use alloc::vec::Vec;

use dma_pool::MemoryRegion;

use super::traits::{BdFlags, BufferDescriptor, Direction, DmaEngine, HalError};
use crate::dma::SlotPool;
use crate::error::{Error, Result};

/// Split `packet` into descriptor-sized fragments with SOF on the first and
/// EOF on the last.
pub fn fragments(
    packet: &[u8],
    bd_buffer_size: usize,
) -> impl ExactSizeIterator<Item = (&[u8], BdFlags)> {
    let last = packet.len().div_ceil(bd_buffer_size).saturating_sub(1);
    packet
        .chunks(bd_buffer_size)
        .enumerate()
        .map(move |(i, chunk)| {
            let mut flags = BdFlags::empty();
            flags.set(BdFlags::SOF, i == 0);
            flags.set(BdFlags::EOF, i == last);
            (chunk, flags)
        })
}

/// TX side state: the slot pool plus scratch space for building a chain.
pub struct TxPath {
    pool: SlotPool,
    /// Descriptor chain under construction. Capacity fixed at init.
    chain: Vec<BufferDescriptor>,
    /// Slots taken by the chain under construction.
    claimed: Vec<u16>,
}

impl TxPath {
    /// # Safety
    /// Same contract as [`SlotPool::new`].
    pub unsafe fn new(region: MemoryRegion, bd_buffer_size: usize, bd_count: usize) -> Self {
        Self {
            pool: SlotPool::new(region, bd_buffer_size, bd_count),
            chain: Vec::with_capacity(bd_count),
            claimed: Vec::with_capacity(bd_count),
        }
    }

    /// Largest packet that fits the TX pool.
    pub fn capacity(&self) -> usize {
        self.pool.capacity_bytes()
    }

    /// Free TX slots.
    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// Descriptors a packet of `len` bytes needs.
    pub fn fragments_for(&self, len: usize) -> usize {
        len.div_ceil(self.pool.slot_size())
    }

    /// Queue one packet.
    ///
    /// # Returns
    /// - `Ok(n)`: `n` descriptors submitted
    /// - `Err(Error::InsufficientDescriptors)`: ring or pool too full, nothing
    ///   submitted
    ///
    /// # Contract
    /// - MUST return immediately (no completion wait)
    /// - all-or-nothing: on error every slot taken here is back in the pool
    pub fn send<E: DmaEngine>(&mut self, engine: &mut E, packet: &[u8]) -> Result<usize> {
        if packet.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let capacity = self.capacity();
        if packet.len() > capacity {
            return Err(Error::PacketTooLarge {
                len: packet.len(),
                capacity,
            });
        }

        let needed = self.fragments_for(packet.len());
        let available = engine.free_bds(Direction::Tx).min(self.pool.available());
        if available < needed {
            return Err(Error::InsufficientDescriptors { needed, available });
        }

        self.chain.clear();
        self.claimed.clear();

        for (chunk, flags) in fragments(packet, self.pool.slot_size()) {
            let Some(index) = self.pool.alloc() else {
                self.release_claimed();
                return Err(Error::InsufficientDescriptors { needed, available: 0 });
            };
            self.claimed.push(index);

            let slot = self.pool.slot_mut(index);
            slot.as_mut_slice()[..chunk.len()].copy_from_slice(chunk);
            self.chain
                .push(BufferDescriptor::new(slot.addr(), chunk.len(), flags));
        }

        // Mark device-owned BEFORE submit
        for &index in self.claimed.iter() {
            unsafe { self.pool.slot_mut(index).mark_device_owned() };
        }

        match engine.submit(Direction::Tx, &self.chain) {
            Ok(()) => {
                log::trace!("tx: {} bytes in {} descriptors", packet.len(), needed);
                Ok(needed)
            }
            Err(HalError::RingFull) => {
                self.reclaim_claimed();
                // The engine refused the chain, so fewer than `needed` fit.
                let available = engine
                    .free_bds(Direction::Tx)
                    .min(self.pool.available())
                    .min(needed - 1);
                Err(Error::InsufficientDescriptors { needed, available })
            }
            Err(source) => {
                self.reclaim_claimed();
                Err(Error::EngineFault {
                    direction: Direction::Tx,
                    source,
                })
            }
        }
    }

    /// Return the slot behind a completed descriptor to the pool.
    ///
    /// Returns `false` if the address does not name a device-owned TX slot.
    pub fn complete(&mut self, bd: &BufferDescriptor) -> bool {
        let Some(index) = self.pool.index_of(bd.buffer_addr) else {
            return false;
        };
        match self.pool.get_mut(index) {
            Some(slot) if slot.is_device_owned() => {
                unsafe { slot.mark_driver_owned() };
                self.pool.free(index);
                true
            }
            _ => false,
        }
    }

    /// Engine was reset: every slot is ours again.
    pub fn reclaim_all(&mut self) {
        self.chain.clear();
        self.claimed.clear();
        self.pool.reclaim_all();
    }

    /// Submit failed after the chain was marked device-owned.
    fn reclaim_claimed(&mut self) {
        for &index in self.claimed.iter() {
            if let Some(slot) = self.pool.get_mut(index) {
                unsafe { slot.mark_driver_owned() };
            }
        }
        self.release_claimed();
    }

    /// Free every driver-owned slot of the chain under construction.
    fn release_claimed(&mut self) {
        for &index in self.claimed.iter() {
            self.pool.free(index);
        }
        self.claimed.clear();
        self.chain.clear();
    }
}
