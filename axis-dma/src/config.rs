//! Transport configuration.

use alloc::string::ToString;
use core::fmt;

use dma_pool::MemoryRegion;

use crate::driver::traits::IrqLine;

/// Everything [`AxisDma::init`](crate::AxisDma::init) needs to know about
/// the board. Built once by the caller; every field is required.
///
/// The sample layout places the four regions back to back:
/// RX BD space, TX BD space, TX buffers, RX buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaConfig {
    /// Descriptor space for the S2MM ring.
    pub rx_bd_space: MemoryRegion,
    /// Descriptor space for the MM2S ring.
    pub tx_bd_space: MemoryRegion,
    /// TX data buffers, cut into `bd_buffer_size` slots.
    pub tx_buffer: MemoryRegion,
    /// RX data buffers, cut into `bd_buffer_size` slots.
    pub rx_buffer: MemoryRegion,
    /// Payload bytes per descriptor.
    pub bd_buffer_size: usize,
    /// Completions per interrupt (1..=255).
    pub coalesce_count: u8,
    /// RX bytes after which a packet is closed even without EOF.
    pub max_packet_size: usize,
    /// MM2S completion interrupt.
    pub tx_irq: IrqLine,
    /// S2MM completion interrupt.
    pub rx_irq: IrqLine,
    /// DMA engine device id.
    pub dma_device_id: u16,
    /// Interrupt controller device id.
    pub intc_device_id: u16,
}

impl fmt::Display for DmaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rx_bd_space      : {}", self.rx_bd_space)?;
        writeln!(f, "tx_bd_space      : {}", self.tx_bd_space)?;
        writeln!(f, "tx_buffer        : {}", self.tx_buffer)?;
        writeln!(f, "rx_buffer        : {}", self.rx_buffer)?;
        writeln!(f, "bd_buffer_size   : {}", self.bd_buffer_size)?;
        writeln!(f, "coalesce_count   : {}", self.coalesce_count)?;
        writeln!(f, "max_packet_size  : {}", self.max_packet_size)?;
        writeln!(f, "tx_irq           : id {} prio {:#04x}", self.tx_irq.id, self.tx_irq.priority)?;
        writeln!(f, "rx_irq           : id {} prio {:#04x}", self.rx_irq.id, self.rx_irq.priority)?;
        writeln!(f, "dma_device_id    : {}", self.dma_device_id)?;
        write!(f, "intc_device_id   : {}", self.intc_device_id)
    }
}

/// Log every configuration field at info level, one line per field.
pub fn print_config(config: &DmaConfig) {
    let text = config.to_string();
    for line in text.lines() {
        log::info!("{}", line);
    }
}
