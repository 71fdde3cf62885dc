//! Hardware seams and the two data paths.
//!
//! - `traits`: engine, interrupt controller and cache collaborators
//! - `tx`: packet fragmentation onto the MM2S ring
//! - `rx`: fragment delivery and reassembly from the S2MM ring

pub mod traits;
pub mod tx;
pub mod rx;

pub use traits::{
    BdFlags, BufferDescriptor, CacheControl, Direction, DmaEngine, HalError, InterruptController,
    IrqHandler, IrqLine, IrqStatus,
};
pub use rx::{FragmentBoundary, PacketFragmentState, RxDelivery, RxFragment, RxPath};
pub use tx::{fragments, TxPath};
