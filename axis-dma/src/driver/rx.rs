//! RX reassembly.
//!
//! Every RX slot sits armed on the S2MM ring. When the engine retires one,
//! the fragment is handed to the RX callback, the packet state advances,
//! and the slot is zeroed and re-armed.
//!
//! The engine has no idea how long a packet is. Only the stream's TLAST
//! (EOF on the descriptor) marks the end; `max_packet_size` is a backstop
//! that closes runaway packets and is reported as such.

use alloc::vec::Vec;

use dma_pool::MemoryRegion;

use super::traits::{BdFlags, BufferDescriptor, Direction, DmaEngine, HalError};
use crate::dma::SlotPool;

/// Where a fragment sits relative to the end of its packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentBoundary {
    /// More fragments follow.
    Continues,
    /// Stream EOF: last fragment of the packet.
    EndOfFrame,
    /// No EOF, but `max_packet_size` bytes accumulated. The packet state was
    /// reset; this usually means a framing or configuration mismatch.
    LimitReached,
}

/// One received fragment, borrowed for the duration of the RX callback.
#[derive(Debug)]
pub struct RxFragment<'a> {
    /// Device address of the RX slot.
    pub buffer_addr: usize,
    /// Captured bytes.
    pub data: &'a [u8],
    /// Bytes of the same packet delivered before this fragment.
    pub packet_offset: usize,
    /// Engine flagged this as the first fragment of a packet.
    pub start_of_packet: bool,
    pub boundary: FragmentBoundary,
}

impl RxFragment<'_> {
    /// Captured byte count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Last fragment of its packet, however the packet ended.
    pub fn is_end_of_packet(&self) -> bool {
        self.boundary != FragmentBoundary::Continues
    }
}

/// Running byte count of the packet currently being received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFragmentState {
    bytes_accumulated: usize,
    complete: bool,
    max_packet_size: usize,
}

impl PacketFragmentState {
    pub const fn new(max_packet_size: usize) -> Self {
        Self {
            bytes_accumulated: 0,
            complete: true,
            max_packet_size,
        }
    }

    pub fn bytes_accumulated(&self) -> usize {
        self.bytes_accumulated
    }

    /// The last fragment seen closed its packet (true before any fragment).
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Account for one fragment; returns its offset in the packet and its
    /// boundary. EOF wins over the size limit.
    pub fn advance(&mut self, len: usize, end_of_frame: bool) -> (usize, FragmentBoundary) {
        let offset = self.bytes_accumulated;
        self.bytes_accumulated += len;

        let boundary = if end_of_frame {
            FragmentBoundary::EndOfFrame
        } else if self.bytes_accumulated >= self.max_packet_size {
            FragmentBoundary::LimitReached
        } else {
            FragmentBoundary::Continues
        };

        self.complete = boundary != FragmentBoundary::Continues;
        if self.complete {
            self.bytes_accumulated = 0;
        }
        (offset, boundary)
    }

    pub fn reset(&mut self) {
        self.bytes_accumulated = 0;
        self.complete = true;
    }
}

/// Result of handling one retired RX descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxDelivery {
    pub boundary: FragmentBoundary,
    /// Slot went straight back on the ring. If not, it waits in the pool for
    /// the next [`RxPath::arm`].
    pub rearmed: bool,
}

/// RX side state: slot pool plus packet reassembly state.
pub struct RxPath {
    pool: SlotPool,
    state: PacketFragmentState,
    /// Arming chain under construction. Capacity fixed at init.
    chain: Vec<BufferDescriptor>,
    claimed: Vec<u16>,
}

impl RxPath {
    /// # Safety
    /// Same contract as [`SlotPool::new`].
    pub unsafe fn new(
        region: MemoryRegion,
        bd_buffer_size: usize,
        bd_count: usize,
        max_packet_size: usize,
    ) -> Self {
        Self {
            pool: SlotPool::new(region, bd_buffer_size, bd_count),
            state: PacketFragmentState::new(max_packet_size),
            chain: Vec::with_capacity(bd_count),
            claimed: Vec::with_capacity(bd_count),
        }
    }

    pub fn state(&self) -> &PacketFragmentState {
        &self.state
    }

    /// Slots waiting in the pool rather than on the ring.
    pub fn unarmed(&self) -> usize {
        self.pool.available()
    }

    /// Put every free slot on the ring, as far as the ring has room.
    ///
    /// Returns the number of descriptors armed. On error nothing was armed.
    pub fn arm<E: DmaEngine>(&mut self, engine: &mut E) -> Result<usize, HalError> {
        let room = engine.free_bds(Direction::Rx);
        self.chain.clear();
        self.claimed.clear();

        while self.chain.len() < room {
            let Some(index) = self.pool.alloc() else {
                break;
            };
            self.claimed.push(index);
            let slot = self.pool.slot_mut(index);
            // Mark device-owned before submit
            unsafe { slot.mark_device_owned() };
            self.chain
                .push(BufferDescriptor::new(slot.addr(), slot.capacity(), BdFlags::empty()));
        }

        if self.chain.is_empty() {
            return Ok(0);
        }

        match engine.submit(Direction::Rx, &self.chain) {
            Ok(()) => Ok(self.chain.len()),
            Err(e) => {
                for &index in self.claimed.iter() {
                    unsafe { self.pool.slot_mut(index).mark_driver_owned() };
                    self.pool.free(index);
                }
                Err(e)
            }
        }
    }

    /// Handle one retired RX descriptor.
    ///
    /// `deliver` runs with the fragment borrowed; the slot is zeroed and
    /// re-armed after it returns. Returns `None` if `bd` does not name a
    /// device-owned RX slot (nothing is delivered).
    pub fn complete<E, F>(
        &mut self,
        engine: &mut E,
        bd: &BufferDescriptor,
        deliver: F,
    ) -> Option<RxDelivery>
    where
        E: DmaEngine,
        F: FnOnce(&RxFragment<'_>),
    {
        let index = self.pool.index_of(bd.buffer_addr)?;
        let slot = self.pool.get_mut(index)?;
        if !slot.is_device_owned() {
            return None;
        }
        unsafe { slot.mark_driver_owned() };

        let len = bd.length.min(slot.capacity());
        let (packet_offset, boundary) = self.state.advance(len, bd.is_end_of_packet());

        {
            let fragment = RxFragment {
                buffer_addr: slot.addr(),
                data: &slot.as_slice()[..len],
                packet_offset,
                start_of_packet: bd.is_start_of_packet(),
                boundary,
            };
            log::trace!(
                "rx: {} bytes at offset {} ({:?})",
                len,
                packet_offset,
                boundary
            );
            deliver(&fragment);
        }

        slot.clear(len);

        // Resubmit the slot on its own.
        unsafe { slot.mark_device_owned() };
        let rearm = BufferDescriptor::new(slot.addr(), slot.capacity(), BdFlags::empty());
        let rearmed = match engine.submit(Direction::Rx, core::slice::from_ref(&rearm)) {
            Ok(()) => true,
            Err(_) => {
                unsafe { slot.mark_driver_owned() };
                self.pool.free(index);
                false
            }
        };

        Some(RxDelivery { boundary, rearmed })
    }

    /// Engine was reset: every slot is ours again, packet state restarts.
    pub fn reclaim_all(&mut self) {
        self.chain.clear();
        self.claimed.clear();
        self.pool.reclaim_all();
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_closes_packet() {
        let mut state = PacketFragmentState::new(1 << 20);
        assert!(state.is_complete());
        assert_eq!(state.advance(4096, false), (0, FragmentBoundary::Continues));
        assert!(!state.is_complete());
        assert_eq!(state.advance(4096, false), (4096, FragmentBoundary::Continues));
        assert_eq!(state.advance(1808, true), (8192, FragmentBoundary::EndOfFrame));
        assert!(state.is_complete());
        assert_eq!(state.bytes_accumulated(), 0);
    }

    #[test]
    fn test_limit_closes_packet_without_eof() {
        let mut state = PacketFragmentState::new(6000);
        assert_eq!(state.advance(4096, false).1, FragmentBoundary::Continues);
        assert_eq!(state.advance(4096, false), (4096, FragmentBoundary::LimitReached));
        assert!(state.is_complete());
        assert_eq!(state.advance(10, true), (0, FragmentBoundary::EndOfFrame));
    }

    #[test]
    fn test_eof_wins_over_limit() {
        let mut state = PacketFragmentState::new(100);
        assert_eq!(state.advance(100, true).1, FragmentBoundary::EndOfFrame);
    }

    #[test]
    fn test_fragment_end_of_packet() {
        let data = [0u8; 4];
        let mut fragment = RxFragment {
            buffer_addr: 0,
            data: &data,
            packet_offset: 0,
            start_of_packet: true,
            boundary: FragmentBoundary::Continues,
        };
        assert!(!fragment.is_end_of_packet());
        fragment.boundary = FragmentBoundary::LimitReached;
        assert!(fragment.is_end_of_packet());
        assert_eq!(fragment.len(), 4);
    }
}
