//! Transport error types

use thiserror::Error;

use crate::driver::traits::{Direction, HalError};
use crate::layout::LayoutError;

pub type Result<T> = core::result::Result<T, Error>;

/// Step of [`AxisDma::init`](crate::AxisDma::init) that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Engine or controller device id does not match the configuration.
    DeviceLookup,
    /// Engine is not synthesised in scatter-gather mode.
    ScatterGather,
    /// Marking a region uncached failed.
    CacheAttributes,
    /// Engine reset.
    EngineReset,
    /// TX or RX ring setup / coalescing configuration.
    RingSetup,
    /// Initial RX ring arming.
    RxArm,
    /// Interrupt line registration.
    IrqRegistration,
    /// Engine start.
    EngineStart,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Configuration rejected before any hardware was touched.
    #[error("invalid memory layout: {0}")]
    InvalidLayout(#[from] LayoutError),
    /// Not enough free descriptors for the whole packet. Nothing was submitted.
    #[error("insufficient descriptors: need {needed}, {available} free")]
    InsufficientDescriptors { needed: usize, available: usize },
    /// Engine or interrupt controller setup failed; nothing is left registered.
    #[error("init failed during {stage:?}: {source}")]
    InitFailure {
        stage: InitStage,
        #[source]
        source: HalError,
    },
    /// Empty packet.
    #[error("invalid argument")]
    InvalidArgument,
    /// Packet larger than the TX buffer pool.
    #[error("packet of {len} bytes exceeds {capacity} byte TX capacity")]
    PacketTooLarge { len: usize, capacity: usize },
    /// Operation on an instance that has been disabled.
    #[error("transport is disabled")]
    Disabled,
    /// Engine reported an error interrupt or rejected a ring transaction.
    #[error("{direction:?} engine fault: {source}")]
    EngineFault {
        direction: Direction,
        #[source]
        source: HalError,
    },
}

impl Error {
    /// Transient errors the caller may retry after servicing completions.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::InsufficientDescriptors { .. })
    }
}
