//! MorpheusX AXI-Stream DMA transport
//!
//! Packet transport over a scatter-gather DMA engine bridging memory and an
//! AXI-Stream peripheral. TX packets are cut into descriptor-sized fragments
//! and queued on the MM2S ring; RX fragments are delivered per descriptor
//! from the S2MM ring with packet boundaries taken from the stream's TLAST.
//!
//! Interrupt handlers only record which channel fired. Completions are
//! reaped and callbacks run from [`AxisDma::service`], in foreground context.

#![no_std]

extern crate alloc;

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod dma;
pub mod driver;
pub mod error;
pub mod irq;
pub mod layout;
pub mod loopback;
pub mod selftest;

pub use config::{print_config, DmaConfig};
pub use controller::{AxisDma, DmaResources};
pub use dispatch::{DispatchReport, DmaStats, RxCallback, TxCallback};
pub use driver::rx::{FragmentBoundary, RxFragment};
pub use driver::traits::IrqLine;
pub use error::{Error, InitStage, Result};
pub use layout::{LayoutError, RingGeometry};
