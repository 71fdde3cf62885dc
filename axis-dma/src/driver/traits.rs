//! Hardware collaborator interfaces.
//!
//! The transport never pokes registers itself. Everything it needs from the
//! platform goes through the three traits below: the SG DMA engine, the
//! interrupt controller, and the MMU cache-attribute hook.

use alloc::sync::Arc;

use bitflags::bitflags;
use dma_pool::MemoryRegion;
use thiserror::Error;

/// Size of one hardware buffer descriptor in BD space.
pub const BD_SIZE: usize = 64;

/// Required alignment of a BD space base address.
pub const BD_ALIGNMENT: usize = 64;

/// Largest byte count one descriptor can move (23-bit length field).
pub const MAX_TRANSFER_LEN: usize = (1 << 23) - 1;

/// DMA channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Memory to stream (MM2S).
    Tx,
    /// Stream to memory (S2MM).
    Rx,
}

impl Direction {
    /// Both channels, TX first.
    pub const ALL: [Direction; 2] = [Direction::Tx, Direction::Rx];

    /// Array index for per-direction tables.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Direction::Tx => 0,
            Direction::Rx => 1,
        }
    }
}

bitflags! {
    /// Descriptor control/status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BdFlags: u8 {
        /// First segment of a packet (TXSOF / RXSOF).
        const SOF = 1 << 0;
        /// Last segment of a packet (TXEOF / RXEOF, TLAST on the stream).
        const EOF = 1 << 1;
    }
}

bitflags! {
    /// Per-channel interrupt status, read-and-acknowledge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IrqStatus: u8 {
        /// Coalescing threshold reached.
        const IOC = 1 << 0;
        /// Delay timer expired with completions pending.
        const DELAY = 1 << 1;
        /// Engine halted on an error.
        const ERROR = 1 << 2;
    }
}

/// One DMA transfer segment.
///
/// On submit, `length` is the byte count to move (TX) or the buffer capacity
/// (RX). On completion, RX descriptors report the captured byte count and the
/// stream boundary flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub buffer_addr: usize,
    pub length: usize,
    pub flags: BdFlags,
}

impl BufferDescriptor {
    pub const fn new(buffer_addr: usize, length: usize, flags: BdFlags) -> Self {
        Self {
            buffer_addr,
            length,
            flags,
        }
    }

    /// An all-zero descriptor, used to size scratch arrays.
    pub const fn empty() -> Self {
        Self::new(0, 0, BdFlags::empty())
    }

    #[inline]
    pub fn is_start_of_packet(&self) -> bool {
        self.flags.contains(BdFlags::SOF)
    }

    #[inline]
    pub fn is_end_of_packet(&self) -> bool {
        self.flags.contains(BdFlags::EOF)
    }
}

/// Interrupt line binding: controller id plus priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrqLine {
    pub id: u16,
    pub priority: u8,
}

impl IrqLine {
    pub const fn new(id: u16, priority: u8) -> Self {
        Self { id, priority }
    }
}

/// Handler invoked in interrupt context. Must not block or allocate.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Errors reported by hardware collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HalError {
    /// No device with the requested id.
    #[error("device {0} not found")]
    DeviceNotFound(u16),
    /// Device exists but lacks a required capability.
    #[error("unsupported device configuration")]
    Unsupported,
    /// Ring has fewer free descriptors than the transaction needs.
    #[error("descriptor ring full")]
    RingFull,
    /// Ring not set up or engine not running.
    #[error("device not ready")]
    NotReady,
    /// Descriptor rejected (bad address or length).
    #[error("invalid descriptor")]
    InvalidDescriptor,
    /// Engine halted with an internal, slave or decode error.
    #[error("engine halted on DMA error")]
    DmaError,
    /// Interrupt line already has a handler.
    #[error("irq {0} already registered")]
    IrqInUse(u16),
    /// Interrupt id outside the controller's range.
    #[error("irq {0} out of range")]
    InvalidIrq(u16),
    /// Memory attribute change rejected.
    #[error("memory attribute update failed")]
    Mmu,
}

/// Scatter-gather DMA engine.
///
/// Ring ownership rules: a descriptor handed to [`submit`](Self::submit) is
/// device-owned until it comes back from
/// [`reap_completed`](Self::reap_completed). Completed-but-unreaped
/// descriptors still count against ring capacity.
pub trait DmaEngine {
    /// Device id this engine was looked up with.
    fn device_id(&self) -> u16;

    /// Whether the engine was synthesised with the SG interface.
    fn has_scatter_gather(&self) -> bool;

    /// Reset both channels, discarding every in-flight descriptor.
    fn reset(&mut self) -> Result<(), HalError>;

    /// Create a ring of `bd_count` descriptors in `bd_space`.
    fn ring_setup(
        &mut self,
        direction: Direction,
        bd_space: MemoryRegion,
        bd_count: usize,
    ) -> Result<(), HalError>;

    /// Interrupt after `count` completions (delay timer covers stragglers).
    fn set_coalescing(&mut self, direction: Direction, count: u8) -> Result<(), HalError>;

    /// Descriptors available for a new transaction.
    fn free_bds(&self, direction: Direction) -> usize;

    /// Append a descriptor chain as one transaction: all of it or none of it.
    fn submit(&mut self, direction: Direction, bds: &[BufferDescriptor]) -> Result<(), HalError>;

    /// Move up to `out.len()` completed descriptors into `out`, oldest first.
    ///
    /// Returns how many were written. Reaped descriptors are free again.
    fn reap_completed(&mut self, direction: Direction, out: &mut [BufferDescriptor]) -> usize;

    /// Read and acknowledge the channel interrupt status.
    fn take_irq_status(&mut self, direction: Direction) -> IrqStatus;

    /// Start both channels.
    fn start(&mut self) -> Result<(), HalError>;
}

/// Interrupt controller (GIC or equivalent).
pub trait InterruptController {
    /// Device id this controller was looked up with.
    fn device_id(&self) -> u16;

    /// Connect `handler` to `line` at `line.priority`. The line stays masked.
    fn register(&mut self, line: IrqLine, handler: IrqHandler) -> Result<(), HalError>;

    /// Disconnect the handler for `irq_id`.
    fn unregister(&mut self, irq_id: u16);

    /// Unmask `irq_id`.
    fn enable(&mut self, irq_id: u16);

    /// Mask `irq_id`.
    fn disable(&mut self, irq_id: u16);
}

/// Memory attribute control.
pub trait CacheControl {
    /// Map `region` as device (non-cacheable) memory.
    fn set_uncached(&mut self, region: MemoryRegion) -> Result<(), HalError>;
}
