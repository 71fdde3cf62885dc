//! Transport lifecycle and foreground API.

use alloc::sync::Arc;

use crate::config::DmaConfig;
use crate::dispatch::{CallbackTable, DispatchReport, DmaStats, RxCallback, TxCallback};
use crate::driver::rx::{FragmentBoundary, PacketFragmentState, RxPath};
use crate::driver::traits::{
    BufferDescriptor, CacheControl, Direction, DmaEngine, HalError, InterruptController, IrqStatus,
};
use crate::driver::tx::TxPath;
use crate::error::{Error, InitStage, Result};
use crate::irq::{line_handler, IrqEvents, EVENT_QUEUE_DEPTH};
use crate::layout::{self, LayoutError, RingGeometry, REGION_NAMES};

/// Descriptors pulled from the engine per `reap_completed` call.
const REAP_BATCH: usize = 16;

/// Hardware handed to [`AxisDma::init`].
pub struct DmaResources<E, C> {
    pub engine: E,
    pub intc: C,
}

/// AXI-Stream SG DMA packet transport.
///
/// Foreground code calls [`send`](Self::send) and, whenever convenient,
/// [`service`](Self::service) to dispatch completions the interrupt handlers
/// recorded. Callbacks run inside `service`.
pub struct AxisDma<E: DmaEngine, C: InterruptController> {
    config: DmaConfig,
    geometry: RingGeometry,
    engine: E,
    intc: C,
    tx: TxPath,
    rx: RxPath,
    events: Arc<IrqEvents>,
    callbacks: CallbackTable,
    stats: DmaStats,
    enabled: bool,
}

impl<E: DmaEngine, C: InterruptController> AxisDma<E, C> {
    /// Bring the transport up.
    ///
    /// Validates the layout, marks the regions uncached, sets up both rings,
    /// arms every RX slot, registers and unmasks both interrupt lines and
    /// starts the engine. On failure everything registered so far is undone.
    ///
    /// # Safety
    /// - the four regions in `config` must be valid, identity-mapped memory
    ///   reserved for this transport for as long as it lives
    /// - `engine` and `intc` must be the devices named by the configured ids
    pub unsafe fn init<M: CacheControl>(
        config: DmaConfig,
        resources: DmaResources<E, C>,
        mmu: &mut M,
        rx_cb: RxCallback,
        tx_cb: TxCallback,
    ) -> Result<Self> {
        let geometry = layout::validate(&config).map_err(|e| {
            log_layout_error(&e);
            Error::InvalidLayout(e)
        })?;

        let DmaResources {
            mut engine,
            mut intc,
        } = resources;

        if engine.device_id() != config.dma_device_id {
            return Err(init_failure(
                InitStage::DeviceLookup,
                HalError::DeviceNotFound(config.dma_device_id),
            ));
        }
        if intc.device_id() != config.intc_device_id {
            return Err(init_failure(
                InitStage::DeviceLookup,
                HalError::DeviceNotFound(config.intc_device_id),
            ));
        }
        if !engine.has_scatter_gather() {
            return Err(init_failure(InitStage::ScatterGather, HalError::Unsupported));
        }

        for region in [
            config.rx_bd_space,
            config.tx_bd_space,
            config.tx_buffer,
            config.rx_buffer,
        ] {
            mmu.set_uncached(region)
                .map_err(|e| init_failure(InitStage::CacheAttributes, e))?;
        }

        engine
            .reset()
            .map_err(|e| init_failure(InitStage::EngineReset, e))?;

        if let Err(e) = setup_rings(&mut engine, &config, &geometry) {
            rollback_reset(&mut engine);
            return Err(init_failure(InitStage::RingSetup, e));
        }
        log::debug!(
            "rings up: {} TX / {} RX descriptors of {} bytes",
            geometry.tx_bds,
            geometry.rx_bds,
            geometry.bd_buffer_size
        );

        let tx = TxPath::new(config.tx_buffer, geometry.bd_buffer_size, geometry.tx_bds);
        let mut rx = RxPath::new(
            config.rx_buffer,
            geometry.bd_buffer_size,
            geometry.rx_bds,
            config.max_packet_size,
        );

        match rx.arm(&mut engine) {
            Ok(armed) if armed < geometry.rx_bds => {
                log::warn!("only {} of {} RX descriptors armed", armed, geometry.rx_bds);
            }
            Ok(_) => {}
            Err(e) => {
                rollback_reset(&mut engine);
                return Err(init_failure(InitStage::RxArm, e));
            }
        }

        let events = Arc::new(IrqEvents::new());

        if let Err(e) = intc.register(config.tx_irq, line_handler(&events, Direction::Tx)) {
            rollback_reset(&mut engine);
            return Err(init_failure(InitStage::IrqRegistration, e));
        }
        if let Err(e) = intc.register(config.rx_irq, line_handler(&events, Direction::Rx)) {
            intc.unregister(config.tx_irq.id);
            rollback_reset(&mut engine);
            return Err(init_failure(InitStage::IrqRegistration, e));
        }

        if let Err(e) = engine.start() {
            intc.unregister(config.tx_irq.id);
            intc.unregister(config.rx_irq.id);
            rollback_reset(&mut engine);
            return Err(init_failure(InitStage::EngineStart, e));
        }

        intc.enable(config.tx_irq.id);
        intc.enable(config.rx_irq.id);
        log::debug!(
            "irq {} (TX) / {} (RX) enabled, coalescing {}",
            config.tx_irq.id,
            config.rx_irq.id,
            config.coalesce_count
        );

        Ok(Self {
            config,
            geometry,
            engine,
            intc,
            tx,
            rx,
            events,
            callbacks: CallbackTable::new(rx_cb, tx_cb),
            stats: DmaStats::default(),
            enabled: true,
        })
    }

    /// Replace the TX-complete callback.
    pub fn register_tx_callback(&mut self, cb: TxCallback) -> Result<()> {
        if !self.enabled {
            return Err(Error::Disabled);
        }
        self.callbacks.set_tx(cb);
        Ok(())
    }

    /// Replace the RX-complete callback.
    pub fn register_rx_callback(&mut self, cb: RxCallback) -> Result<()> {
        if !self.enabled {
            return Err(Error::Disabled);
        }
        self.callbacks.set_rx(cb);
        Ok(())
    }

    /// Queue one packet; the last descriptor carries TLAST.
    ///
    /// # Returns
    /// - `Ok(n)`: submitted as `n` descriptors
    /// - `Err(Error::InsufficientDescriptors)`: nothing submitted, call
    ///   [`service`](Self::service) and retry
    pub fn send(&mut self, packet: &[u8]) -> Result<usize> {
        if !self.enabled {
            return Err(Error::Disabled);
        }
        self.tx.send(&mut self.engine, packet)
    }

    /// Dispatch the completion events recorded since the last call.
    ///
    /// Each event reaps at most `coalesce_count` descriptors from its ring;
    /// callbacks run here, in the caller's context. An event whose status
    /// carries an engine error still has its completed descriptors delivered,
    /// and the rest of the batch is dispatched; the first fault is then
    /// returned as [`Error::EngineFault`] and the transport should be
    /// disabled.
    pub fn service(&mut self) -> Result<DispatchReport> {
        if !self.enabled {
            return Err(Error::Disabled);
        }

        let mut batch = heapless::Vec::<Direction, EVENT_QUEUE_DEPTH>::new();
        self.mask_lines();
        self.events.drain(&mut batch);
        self.unmask_lines();
        self.stats.missed_events = self.events.missed_total() as u64;

        let mut report = DispatchReport::default();
        let mut fault = None;
        for direction in batch {
            report.events += 1;
            self.stats.events_dispatched += 1;

            let status = self.engine.take_irq_status(direction);
            if status.contains(IrqStatus::ERROR) {
                self.stats.engine_faults += 1;
                log::error!("{:?} channel halted on DMA error", direction);
                fault.get_or_insert(direction);
            }

            // Descriptors retired before a halt are still valid.
            let reaped = self.reap(direction, &mut report);
            self.stats.max_reaped_per_event = self.stats.max_reaped_per_event.max(reaped);
        }

        if self.rx.unarmed() > 0 {
            match self.rx.arm(&mut self.engine) {
                Ok(n) if n > 0 => log::debug!("re-armed {} RX descriptors", n),
                Ok(_) => {}
                Err(e) => log::warn!("RX re-arm failed: {}", e),
            }
        }

        match fault {
            Some(direction) => Err(Error::EngineFault {
                direction,
                source: HalError::DmaError,
            }),
            None => Ok(report),
        }
    }

    /// Tear down: mask and unregister both lines, reset the engine, drop
    /// callbacks and queued events, zero the buffer regions.
    ///
    /// Calling it again is a no-op.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;

        self.mask_lines();
        self.intc.unregister(self.config.tx_irq.id);
        self.intc.unregister(self.config.rx_irq.id);

        if let Err(e) = self.engine.reset() {
            log::error!("engine reset during disable failed: {}", e);
        }

        self.events.clear();
        self.callbacks.clear();
        self.tx.reclaim_all();
        self.rx.reclaim_all();
        log::debug!("axis-dma disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &DmaConfig {
        &self.config
    }

    pub fn geometry(&self) -> &RingGeometry {
        &self.geometry
    }

    pub fn stats(&self) -> DmaStats {
        self.stats
    }

    /// Packet state of the RX side.
    pub fn rx_state(&self) -> &PacketFragmentState {
        self.rx.state()
    }

    /// Descriptors a new `send` could use right now.
    pub fn tx_free(&self) -> usize {
        self.engine.free_bds(Direction::Tx).min(self.tx.available())
    }

    /// Completion events waiting for [`service`](Self::service).
    pub fn pending_events(&self) -> usize {
        self.events.pending()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn intc(&self) -> &C {
        &self.intc
    }

    fn mask_lines(&mut self) {
        self.intc.disable(self.config.tx_irq.id);
        self.intc.disable(self.config.rx_irq.id);
    }

    fn unmask_lines(&mut self) {
        self.intc.enable(self.config.tx_irq.id);
        self.intc.enable(self.config.rx_irq.id);
    }

    /// Reap up to `coalesce_count` descriptors from one ring.
    fn reap(&mut self, direction: Direction, report: &mut DispatchReport) -> usize {
        let limit = self.config.coalesce_count as usize;
        let mut scratch = [BufferDescriptor::empty(); REAP_BATCH];
        let mut total = 0;

        while total < limit {
            let want = (limit - total).min(REAP_BATCH);
            let n = self.engine.reap_completed(direction, &mut scratch[..want]);
            for bd in &scratch[..n] {
                match direction {
                    Direction::Tx => self.retire_tx(bd),
                    Direction::Rx => self.retire_rx(bd, report),
                }
            }
            total += n;
            if n < want {
                break;
            }
        }

        match direction {
            Direction::Tx => report.tx_reaped += total,
            Direction::Rx => report.rx_reaped += total,
        }
        total
    }

    fn retire_tx(&mut self, bd: &BufferDescriptor) {
        if self.tx.complete(bd) {
            self.stats.tx_bds += 1;
            self.callbacks.on_tx();
        } else {
            self.stats.stray_completions += 1;
            log::error!("stray TX completion at {:#x}", bd.buffer_addr);
        }
    }

    fn retire_rx(&mut self, bd: &BufferDescriptor, report: &mut DispatchReport) {
        let callbacks = &mut self.callbacks;
        let Some(delivery) = self
            .rx
            .complete(&mut self.engine, bd, |fragment| callbacks.on_rx(fragment))
        else {
            self.stats.stray_completions += 1;
            log::error!("stray RX completion at {:#x}", bd.buffer_addr);
            return;
        };

        self.stats.rx_bds += 1;
        match delivery.boundary {
            FragmentBoundary::Continues => {}
            FragmentBoundary::EndOfFrame => {
                self.stats.rx_packets += 1;
                report.rx_packets += 1;
            }
            FragmentBoundary::LimitReached => {
                self.stats.rx_packets += 1;
                self.stats.limit_completions += 1;
                report.rx_packets += 1;
                log::warn!(
                    "RX packet closed at max_packet_size {} without EOF",
                    self.config.max_packet_size
                );
            }
        }
        if !delivery.rearmed {
            self.stats.rearm_failures += 1;
        }
    }
}

impl<E: DmaEngine, C: InterruptController> Drop for AxisDma<E, C> {
    fn drop(&mut self) {
        self.disable();
    }
}

fn setup_rings<E: DmaEngine>(
    engine: &mut E,
    config: &DmaConfig,
    geometry: &RingGeometry,
) -> core::result::Result<(), HalError> {
    engine.ring_setup(Direction::Tx, config.tx_bd_space, geometry.tx_bds)?;
    engine.ring_setup(Direction::Rx, config.rx_bd_space, geometry.rx_bds)?;
    engine.set_coalescing(Direction::Tx, config.coalesce_count)?;
    engine.set_coalescing(Direction::Rx, config.coalesce_count)?;
    Ok(())
}

/// Put the engine back in reset after a failed init step.
fn rollback_reset<E: DmaEngine>(engine: &mut E) {
    if let Err(e) = engine.reset() {
        log::error!("engine reset during init rollback failed: {}", e);
    }
}

fn init_failure(stage: InitStage, source: HalError) -> Error {
    log::error!("axis-dma init failed at {:?}: {}", stage, source);
    Error::InitFailure { stage, source }
}

fn log_layout_error(err: &LayoutError) {
    use dma_pool::RegionError;

    match err {
        LayoutError::Region(RegionError::Overlap { first, second }) => log::error!(
            "{} overlaps {}",
            REGION_NAMES[*first],
            REGION_NAMES[*second]
        ),
        LayoutError::Region(RegionError::OutOfOrder { previous, index }) => log::error!(
            "{} must be placed after {}",
            REGION_NAMES[*index],
            REGION_NAMES[*previous]
        ),
        LayoutError::Region(RegionError::Inverted { index, .. }) => {
            log::error!("{} has high <= base", REGION_NAMES[*index])
        }
        other => log::error!("invalid layout: {}", other),
    }
}
