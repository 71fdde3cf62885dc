//! DMA buffer management.
//!
//! TX and RX buffer regions are cut into `bd_buffer_size` slots, one per ring
//! descriptor. Slots are handed out by index and their ownership is tracked
//! so a device-owned buffer is never read by the CPU.

pub mod ownership;
pub mod buffer;
pub mod pool;

pub use ownership::BufferOwnership;
pub use buffer::DmaSlot;
pub use pool::SlotPool;
