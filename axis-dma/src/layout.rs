//! Memory layout validation.
//!
//! Runs before any hardware is touched. A configuration that passes here
//! yields the ring geometry the rest of the transport is built from.

use dma_pool::{check_ordered, RegionError};
use thiserror::Error;

use crate::config::DmaConfig;
use crate::driver::traits::{Direction, BD_ALIGNMENT, BD_SIZE, MAX_TRANSFER_LEN};

/// Region names in validation order, for log output.
pub const REGION_NAMES: [&str; 4] = ["rx_bd_space", "tx_bd_space", "tx_buffer", "rx_buffer"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Regions are inverted, overlapping or out of order.
    /// Indices follow [`REGION_NAMES`].
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error("bd_buffer_size is zero")]
    ZeroBufferSize,
    #[error("bd_buffer_size {size} exceeds engine limit {max}")]
    BufferSizeTooLarge { size: usize, max: usize },
    #[error("{direction:?} BD space base {base:#x} is not 64-byte aligned")]
    BdSpaceMisaligned { direction: Direction, base: usize },
    #[error("{direction:?} buffer region holds no {bd_buffer_size}-byte slot")]
    NoBufferSlots { direction: Direction, bd_buffer_size: usize },
    #[error("{direction:?} BD space holds {available} descriptors, {needed} needed")]
    BdSpaceTooSmall { direction: Direction, needed: usize, available: usize },
    #[error("{direction:?} ring of {count} descriptors is too large")]
    TooManyDescriptors { direction: Direction, count: usize },
    #[error("coalesce_count is zero")]
    ZeroCoalesce,
    #[error("max_packet_size is zero")]
    ZeroMaxPacket,
    #[error("TX and RX share irq {0}")]
    SharedIrqLine(u16),
}

/// Ring sizes derived from a valid layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    /// TX descriptors (= TX buffer slots).
    pub tx_bds: usize,
    /// RX descriptors (= RX buffer slots).
    pub rx_bds: usize,
    /// Payload bytes per descriptor.
    pub bd_buffer_size: usize,
}

impl RingGeometry {
    pub fn bds(&self, direction: Direction) -> usize {
        match direction {
            Direction::Tx => self.tx_bds,
            Direction::Rx => self.rx_bds,
        }
    }

    /// Largest packet `send` accepts.
    pub fn tx_capacity(&self) -> usize {
        self.tx_bds * self.bd_buffer_size
    }
}

/// Check a configuration and derive the ring geometry.
pub fn validate(config: &DmaConfig) -> Result<RingGeometry, LayoutError> {
    check_ordered(&[
        config.rx_bd_space,
        config.tx_bd_space,
        config.tx_buffer,
        config.rx_buffer,
    ])?;

    let bd_buffer_size = config.bd_buffer_size;
    if bd_buffer_size == 0 {
        return Err(LayoutError::ZeroBufferSize);
    }
    if bd_buffer_size > MAX_TRANSFER_LEN {
        return Err(LayoutError::BufferSizeTooLarge {
            size: bd_buffer_size,
            max: MAX_TRANSFER_LEN,
        });
    }
    if config.coalesce_count == 0 {
        return Err(LayoutError::ZeroCoalesce);
    }
    if config.max_packet_size == 0 {
        return Err(LayoutError::ZeroMaxPacket);
    }
    if config.tx_irq.id == config.rx_irq.id {
        return Err(LayoutError::SharedIrqLine(config.tx_irq.id));
    }

    let tx_bds = ring_size(config, Direction::Tx)?;
    let rx_bds = ring_size(config, Direction::Rx)?;

    Ok(RingGeometry {
        tx_bds,
        rx_bds,
        bd_buffer_size,
    })
}

/// One descriptor per buffer slot; the BD space must hold all of them.
fn ring_size(config: &DmaConfig, direction: Direction) -> Result<usize, LayoutError> {
    let (bd_space, buffer) = match direction {
        Direction::Tx => (config.tx_bd_space, config.tx_buffer),
        Direction::Rx => (config.rx_bd_space, config.rx_buffer),
    };

    if !bd_space.is_base_aligned(BD_ALIGNMENT) {
        return Err(LayoutError::BdSpaceMisaligned {
            direction,
            base: bd_space.base,
        });
    }

    let needed = buffer.slot_count(config.bd_buffer_size);
    if needed == 0 {
        return Err(LayoutError::NoBufferSlots {
            direction,
            bd_buffer_size: config.bd_buffer_size,
        });
    }
    if needed > u16::MAX as usize {
        return Err(LayoutError::TooManyDescriptors {
            direction,
            count: needed,
        });
    }

    let available = bd_space.slot_count(BD_SIZE);
    if available < needed {
        return Err(LayoutError::BdSpaceTooSmall {
            direction,
            needed,
            available,
        });
    }

    Ok(needed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::traits::IrqLine;
    use dma_pool::MemoryRegion;

    const BASE: usize = 0x0110_0000;
    const BD_REGION: usize = 0x1000;
    const BUF_REGION: usize = 0x2000;

    /// Contiguous sample layout: RX BDs, TX BDs, TX buffers, RX buffers.
    fn sample() -> DmaConfig {
        let rx_bd_space = MemoryRegion::with_len(BASE, BD_REGION).unwrap();
        let tx_bd_space = MemoryRegion::with_len(rx_bd_space.end(), BD_REGION).unwrap();
        let tx_buffer = MemoryRegion::with_len(tx_bd_space.end(), BUF_REGION).unwrap();
        let rx_buffer = MemoryRegion::with_len(tx_buffer.end(), BUF_REGION).unwrap();
        DmaConfig {
            rx_bd_space,
            tx_bd_space,
            tx_buffer,
            rx_buffer,
            bd_buffer_size: 1024,
            coalesce_count: 1,
            max_packet_size: 4096,
            tx_irq: IrqLine::new(61, 0xA0),
            rx_irq: IrqLine::new(62, 0xA0),
            dma_device_id: 0,
            intc_device_id: 0,
        }
    }

    #[test]
    fn test_sample_layout_geometry() {
        let geometry = validate(&sample()).unwrap();
        assert_eq!(geometry.tx_bds, 8);
        assert_eq!(geometry.rx_bds, 8);
        assert_eq!(geometry.tx_capacity(), BUF_REGION);
    }

    #[test]
    fn test_overlap_rejected() {
        let mut config = sample();
        config.tx_buffer.base -= 0x10;
        assert_eq!(
            validate(&config),
            Err(LayoutError::Region(RegionError::Overlap { first: 1, second: 2 }))
        );
    }

    #[test]
    fn test_inverted_region_rejected() {
        let mut config = sample();
        config.rx_buffer = MemoryRegion::new(config.rx_buffer.high, config.rx_buffer.base);
        assert!(matches!(
            validate(&config),
            Err(LayoutError::Region(RegionError::Inverted { index: 3, .. }))
        ));
    }

    #[test]
    fn test_order_enforced() {
        let mut config = sample();
        core::mem::swap(&mut config.tx_buffer, &mut config.rx_buffer);
        assert!(matches!(
            validate(&config),
            Err(LayoutError::Region(RegionError::OutOfOrder { previous: 2, index: 3 }))
        ));
    }

    #[test]
    fn test_buffer_size_bounds() {
        let mut config = sample();
        config.bd_buffer_size = 0;
        assert_eq!(validate(&config), Err(LayoutError::ZeroBufferSize));

        config.bd_buffer_size = MAX_TRANSFER_LEN + 1;
        assert!(matches!(
            validate(&config),
            Err(LayoutError::BufferSizeTooLarge { .. })
        ));

        config.bd_buffer_size = BUF_REGION + 1;
        assert_eq!(
            validate(&config),
            Err(LayoutError::NoBufferSlots {
                direction: Direction::Tx,
                bd_buffer_size: BUF_REGION + 1,
            })
        );
    }

    #[test]
    fn test_bd_space_must_cover_slots() {
        let mut config = sample();
        // 0x2000 / 16 = 512 slots, 0x1000 / 64 = 64 descriptors.
        config.bd_buffer_size = 16;
        assert_eq!(
            validate(&config),
            Err(LayoutError::BdSpaceTooSmall {
                direction: Direction::Tx,
                needed: 512,
                available: 64,
            })
        );
    }

    #[test]
    fn test_bd_space_alignment() {
        let mut config = sample();
        config.tx_bd_space.base += 8;
        assert_eq!(
            validate(&config),
            Err(LayoutError::BdSpaceMisaligned {
                direction: Direction::Tx,
                base: config.tx_bd_space.base,
            })
        );
    }

    #[test]
    fn test_scalar_fields() {
        let mut config = sample();
        config.coalesce_count = 0;
        assert_eq!(validate(&config), Err(LayoutError::ZeroCoalesce));

        let mut config = sample();
        config.max_packet_size = 0;
        assert_eq!(validate(&config), Err(LayoutError::ZeroMaxPacket));

        let mut config = sample();
        config.rx_irq.id = config.tx_irq.id;
        assert_eq!(validate(&config), Err(LayoutError::SharedIrqLine(61)));
    }
}
