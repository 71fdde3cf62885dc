//! Software loopback board.
//!
//! Models a DMA engine whose MM2S stream is wired straight back into its
//! S2MM port, together with an interrupt controller and an MMU. Bytes are
//! really copied between the buffer addresses named by the descriptors, so
//! the transport can be exercised end to end on the host.
//!
//! Nothing runs on its own: [`LoopbackBoard::pump`] moves data and
//! [`LoopbackBoard::flush_timers`] fires the coalescing delay timers.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use dma_pool::{align_up, MemoryRegion};
use spin::Mutex;

use crate::config::DmaConfig;
use crate::controller::{AxisDma, DmaResources};
use crate::dispatch::{DispatchReport, RxCallback, TxCallback};
use crate::driver::traits::{
    BdFlags, BufferDescriptor, CacheControl, Direction, DmaEngine, HalError, InterruptController,
    IrqHandler, IrqLine, IrqStatus, BD_ALIGNMENT, BD_SIZE, MAX_TRANSFER_LEN,
};
use crate::error::{self, Error};

/// Engine operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Reset,
    RingSetup,
    Start,
    Submit(Direction),
}

#[derive(Default)]
struct Ring {
    /// Descriptors the ring was set up with; 0 = not set up.
    capacity: usize,
    coalesce: u8,
    /// Submitted, not yet processed. For RX the front one may be partly filled.
    pending: VecDeque<BufferDescriptor>,
    /// Processed, waiting to be reaped.
    completed: VecDeque<BufferDescriptor>,
    /// Completions since the last interrupt.
    unreported: usize,
    status: IrqStatus,
    submitted: u64,
}

impl Ring {
    fn free(&self) -> usize {
        self.capacity
            .saturating_sub(self.pending.len() + self.completed.len())
    }

    /// Record one completion; true when it crosses the coalescing threshold.
    fn retire(&mut self, bd: BufferDescriptor) -> bool {
        self.completed.push_back(bd);
        self.unreported += 1;
        if self.unreported >= self.coalesce.max(1) as usize {
            self.unreported = 0;
            self.status |= IrqStatus::IOC;
            true
        } else {
            false
        }
    }
}

struct EngineState {
    device_id: u16,
    scatter_gather: bool,
    running: bool,
    rings: [Ring; 2],
    /// Bytes of the front TX descriptor already streamed out.
    tx_progress: usize,
    /// Bytes written into the front RX descriptor.
    rx_fill: usize,
    /// A packet is mid-stream on the RX side.
    rx_in_packet: bool,
    failures: Vec<(FailPoint, HalError)>,
    resets: usize,
    starts: usize,
}

impl EngineState {
    fn take_failure(&mut self, point: FailPoint) -> Result<(), HalError> {
        match self.failures.iter().position(|(p, _)| *p == point) {
            Some(pos) => Err(self.failures.remove(pos).1),
            None => Ok(()),
        }
    }
}

/// Loopback DMA engine. Clones share the same device.
#[derive(Clone)]
pub struct LoopbackEngine {
    state: Arc<Mutex<EngineState>>,
}

impl LoopbackEngine {
    pub fn new(device_id: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                device_id,
                scatter_gather: true,
                running: false,
                rings: [Ring::default(), Ring::default()],
                tx_progress: 0,
                rx_fill: 0,
                rx_in_packet: false,
                failures: Vec::new(),
                resets: 0,
                starts: 0,
            })),
        }
    }

    /// Pretend the engine was built in simple (non-SG) mode.
    pub fn set_scatter_gather(&self, enabled: bool) {
        self.state.lock().scatter_gather = enabled;
    }

    /// Make the next `point` operation fail with `error`.
    pub fn fail_next(&self, point: FailPoint, error: HalError) {
        self.state.lock().failures.push((point, error));
    }

    /// Halt the engine with an error on `direction`'s channel.
    pub fn inject_fault(&self, direction: Direction) {
        let mut state = self.state.lock();
        state.running = false;
        state.rings[direction.index()].status |= IrqStatus::ERROR;
    }

    /// Place `bd` on `direction`'s completed queue as if the engine had
    /// retired it. True when this raises the channel's interrupt.
    pub fn inject_completion(&self, direction: Direction, bd: BufferDescriptor) -> bool {
        self.state.lock().rings[direction.index()].retire(bd)
    }

    /// Stream TX data into RX descriptors as far as both rings allow.
    ///
    /// Returns the bytes moved and the interrupts raised per channel
    /// (indexed by [`Direction::index`]).
    ///
    /// Every submitted descriptor must name memory that is still valid.
    pub fn pump(&self) -> (usize, [usize; 2]) {
        let mut state = self.state.lock();
        let mut moved = 0;
        let mut raised = [0usize; 2];
        if !state.running {
            return (0, raised);
        }

        loop {
            let tx_index = Direction::Tx.index();
            let rx_index = Direction::Rx.index();
            let (Some(&tx), Some(&rx)) = (
                state.rings[tx_index].pending.front(),
                state.rings[rx_index].pending.front(),
            ) else {
                break;
            };

            let n = (tx.length - state.tx_progress).min(rx.length - state.rx_fill);
            // SAFETY: descriptors passed submit() validation and name
            // driver-provided buffers; TX and RX regions never overlap.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    (tx.buffer_addr + state.tx_progress) as *const u8,
                    (rx.buffer_addr + state.rx_fill) as *mut u8,
                    n,
                );
            }
            moved += n;
            state.tx_progress += n;
            state.rx_fill += n;

            let tx_done = state.tx_progress == tx.length;
            let end_of_frame = tx_done && tx.is_end_of_packet();

            if tx_done {
                state.tx_progress = 0;
                let ring = &mut state.rings[tx_index];
                ring.pending.pop_front();
                if ring.retire(tx) {
                    raised[tx_index] += 1;
                }
            }

            if end_of_frame || state.rx_fill == rx.length {
                let mut flags = BdFlags::empty();
                flags.set(BdFlags::SOF, !state.rx_in_packet);
                flags.set(BdFlags::EOF, end_of_frame);
                let done = BufferDescriptor::new(rx.buffer_addr, state.rx_fill, flags);

                state.rx_fill = 0;
                state.rx_in_packet = !end_of_frame;
                let ring = &mut state.rings[rx_index];
                ring.pending.pop_front();
                if ring.retire(done) {
                    raised[rx_index] += 1;
                }
            }
        }

        (moved, raised)
    }

    /// Expire the delay timers: any ring holding unreported completions
    /// raises an interrupt.
    pub fn flush_timers(&self) -> [usize; 2] {
        let mut state = self.state.lock();
        let mut raised = [0usize; 2];
        for direction in Direction::ALL {
            let ring = &mut state.rings[direction.index()];
            if ring.unreported > 0 {
                ring.unreported = 0;
                ring.status |= IrqStatus::DELAY;
                raised[direction.index()] += 1;
            }
        }
        raised
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Number of `reset` calls that succeeded.
    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    pub fn starts(&self) -> usize {
        self.state.lock().starts
    }

    pub fn ring_capacity(&self, direction: Direction) -> usize {
        self.state.lock().rings[direction.index()].capacity
    }

    pub fn coalescing(&self, direction: Direction) -> u8 {
        self.state.lock().rings[direction.index()].coalesce
    }

    /// Descriptors submitted but not yet processed.
    pub fn in_flight(&self, direction: Direction) -> usize {
        self.state.lock().rings[direction.index()].pending.len()
    }

    /// Descriptors processed but not yet reaped.
    pub fn unreaped(&self, direction: Direction) -> usize {
        self.state.lock().rings[direction.index()].completed.len()
    }

    /// Descriptors submitted since the last reset.
    pub fn submitted(&self, direction: Direction) -> u64 {
        self.state.lock().rings[direction.index()].submitted
    }
}

impl DmaEngine for LoopbackEngine {
    fn device_id(&self) -> u16 {
        self.state.lock().device_id
    }

    fn has_scatter_gather(&self) -> bool {
        self.state.lock().scatter_gather
    }

    fn reset(&mut self) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.take_failure(FailPoint::Reset)?;
        state.running = false;
        state.rings = [Ring::default(), Ring::default()];
        state.tx_progress = 0;
        state.rx_fill = 0;
        state.rx_in_packet = false;
        state.resets += 1;
        Ok(())
    }

    fn ring_setup(
        &mut self,
        direction: Direction,
        bd_space: MemoryRegion,
        bd_count: usize,
    ) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.take_failure(FailPoint::RingSetup)?;
        if bd_count == 0
            || !bd_space.is_base_aligned(BD_ALIGNMENT)
            || bd_space.slot_count(BD_SIZE) < bd_count
        {
            return Err(HalError::Unsupported);
        }
        let ring = &mut state.rings[direction.index()];
        *ring = Ring::default();
        ring.capacity = bd_count;
        ring.coalesce = 1;
        Ok(())
    }

    fn set_coalescing(&mut self, direction: Direction, count: u8) -> Result<(), HalError> {
        if count == 0 {
            return Err(HalError::Unsupported);
        }
        let mut state = self.state.lock();
        let ring = &mut state.rings[direction.index()];
        if ring.capacity == 0 {
            return Err(HalError::NotReady);
        }
        ring.coalesce = count;
        Ok(())
    }

    fn free_bds(&self, direction: Direction) -> usize {
        self.state.lock().rings[direction.index()].free()
    }

    fn submit(&mut self, direction: Direction, bds: &[BufferDescriptor]) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.take_failure(FailPoint::Submit(direction))?;
        let ring = &mut state.rings[direction.index()];
        if ring.capacity == 0 {
            return Err(HalError::NotReady);
        }
        if bds.len() > ring.free() {
            return Err(HalError::RingFull);
        }
        if bds
            .iter()
            .any(|bd| bd.length == 0 || bd.length > MAX_TRANSFER_LEN || bd.buffer_addr == 0)
        {
            return Err(HalError::InvalidDescriptor);
        }
        ring.pending.extend(bds.iter().copied());
        ring.submitted += bds.len() as u64;
        Ok(())
    }

    fn reap_completed(&mut self, direction: Direction, out: &mut [BufferDescriptor]) -> usize {
        let mut state = self.state.lock();
        let ring = &mut state.rings[direction.index()];
        let mut n = 0;
        while n < out.len() {
            match ring.completed.pop_front() {
                Some(bd) => {
                    out[n] = bd;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn take_irq_status(&mut self, direction: Direction) -> IrqStatus {
        core::mem::take(&mut self.state.lock().rings[direction.index()].status)
    }

    fn start(&mut self) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.take_failure(FailPoint::Start)?;
        if state.rings.iter().any(|ring| ring.capacity == 0) {
            return Err(HalError::NotReady);
        }
        state.running = true;
        state.starts += 1;
        Ok(())
    }
}

struct IntcLine {
    line: IrqLine,
    handler: IrqHandler,
    enabled: bool,
    /// Raised while masked; delivered on enable.
    latched: usize,
}

#[derive(Default)]
struct IntcState {
    device_id: u16,
    lines: Vec<IntcLine>,
    max_irq: u16,
    registers: usize,
    unregisters: usize,
    spurious: usize,
}

impl IntcState {
    fn line_mut(&mut self, irq_id: u16) -> Option<&mut IntcLine> {
        self.lines.iter_mut().find(|l| l.line.id == irq_id)
    }
}

/// Loopback interrupt controller. Clones share the same device.
///
/// Handlers are always called with the controller unlocked.
#[derive(Clone)]
pub struct LoopbackIntc {
    state: Arc<Mutex<IntcState>>,
}

impl LoopbackIntc {
    /// Controller accepting interrupt ids up to `max_irq`.
    pub fn new(device_id: u16, max_irq: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(IntcState {
                device_id,
                max_irq,
                ..IntcState::default()
            })),
        }
    }

    /// Assert `irq_id`. Returns `true` if a handler ran.
    pub fn raise(&self, irq_id: u16) -> bool {
        let handler = {
            let mut state = self.state.lock();
            let Some(pos) = state.lines.iter().position(|l| l.line.id == irq_id) else {
                state.spurious += 1;
                return false;
            };
            let line = &mut state.lines[pos];
            if !line.enabled {
                line.latched += 1;
                return false;
            }
            Arc::clone(&line.handler)
        };
        handler();
        true
    }

    pub fn is_registered(&self, irq_id: u16) -> bool {
        self.state.lock().lines.iter().any(|l| l.line.id == irq_id)
    }

    pub fn is_enabled(&self, irq_id: u16) -> bool {
        self.state
            .lock()
            .lines
            .iter()
            .any(|l| l.line.id == irq_id && l.enabled)
    }

    /// Priority the line was registered with.
    pub fn priority(&self, irq_id: u16) -> Option<u8> {
        self.state
            .lock()
            .lines
            .iter()
            .find(|l| l.line.id == irq_id)
            .map(|l| l.line.priority)
    }

    pub fn registered(&self) -> usize {
        self.state.lock().lines.len()
    }

    /// Successful `register` calls.
    pub fn registers(&self) -> usize {
        self.state.lock().registers
    }

    /// `unregister` calls, including ones for unknown lines.
    pub fn unregisters(&self) -> usize {
        self.state.lock().unregisters
    }

    /// Raises on lines with no handler.
    pub fn spurious(&self) -> usize {
        self.state.lock().spurious
    }
}

impl InterruptController for LoopbackIntc {
    fn device_id(&self) -> u16 {
        self.state.lock().device_id
    }

    fn register(&mut self, line: IrqLine, handler: IrqHandler) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if line.id > state.max_irq {
            return Err(HalError::InvalidIrq(line.id));
        }
        if state.line_mut(line.id).is_some() {
            return Err(HalError::IrqInUse(line.id));
        }
        state.lines.push(IntcLine {
            line,
            handler,
            enabled: false,
            latched: 0,
        });
        state.registers += 1;
        Ok(())
    }

    fn unregister(&mut self, irq_id: u16) {
        let mut state = self.state.lock();
        state.unregisters += 1;
        state.lines.retain(|l| l.line.id != irq_id);
    }

    fn enable(&mut self, irq_id: u16) {
        let pending = {
            let mut state = self.state.lock();
            match state.line_mut(irq_id) {
                Some(line) => {
                    line.enabled = true;
                    let count = core::mem::take(&mut line.latched);
                    Some((Arc::clone(&line.handler), count))
                }
                None => None,
            }
        };
        if let Some((handler, count)) = pending {
            for _ in 0..count {
                handler();
            }
        }
    }

    fn disable(&mut self, irq_id: u16) {
        if let Some(line) = self.state.lock().line_mut(irq_id) {
            line.enabled = false;
        }
    }
}

/// Records which regions were made uncached.
#[derive(Debug, Default)]
pub struct LoopbackMmu {
    uncached: Vec<MemoryRegion>,
    fail: bool,
}

impl LoopbackMmu {
    pub fn new() -> Self {
        Self::default()
    }

    /// An MMU that rejects every attribute change.
    pub fn failing() -> Self {
        Self {
            uncached: Vec::new(),
            fail: true,
        }
    }

    pub fn uncached(&self) -> &[MemoryRegion] {
        &self.uncached
    }

    pub fn is_uncached(&self, region: &MemoryRegion) -> bool {
        self.uncached.contains(region)
    }
}

impl CacheControl for LoopbackMmu {
    fn set_uncached(&mut self, region: MemoryRegion) -> Result<(), HalError> {
        if self.fail {
            return Err(HalError::Mmu);
        }
        self.uncached.push(region);
        Ok(())
    }
}

/// Shape of a loopback board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardParams {
    pub bd_buffer_size: usize,
    /// TX buffer slots (= TX ring size).
    pub tx_slots: usize,
    /// RX buffer slots (= RX ring size).
    pub rx_slots: usize,
    pub coalesce_count: u8,
    pub max_packet_size: usize,
}

impl Default for BoardParams {
    fn default() -> Self {
        Self {
            bd_buffer_size: 1024,
            tx_slots: 8,
            rx_slots: 8,
            coalesce_count: 1,
            max_packet_size: 64 * 1024,
        }
    }
}

/// BD space per ring.
pub const BOARD_BD_SPACE: usize = 0x1000;
pub const BOARD_DMA_DEVICE_ID: u16 = 0;
pub const BOARD_INTC_DEVICE_ID: u16 = 0;
pub const BOARD_TX_IRQ: IrqLine = IrqLine::new(61, 0xA0);
pub const BOARD_RX_IRQ: IrqLine = IrqLine::new(62, 0xA0);
const BOARD_MAX_IRQ: u16 = 95;

/// Transport running on a loopback board.
pub type LoopbackDma = AxisDma<LoopbackEngine, LoopbackIntc>;

/// Loopback engine, interrupt controller and MMU plus the memory the
/// transport runs in.
///
/// Regions are laid out back to back: RX BD space, TX BD space, TX buffers,
/// RX buffers.
pub struct LoopbackBoard {
    /// Dropped before `memory`.
    dma: Option<LoopbackDma>,
    engine: LoopbackEngine,
    intc: LoopbackIntc,
    mmu: LoopbackMmu,
    config: DmaConfig,
    memory: Box<[u8]>,
}

impl LoopbackBoard {
    pub fn new(params: BoardParams) -> Self {
        let tx_len = params.tx_slots * params.bd_buffer_size;
        let rx_len = params.rx_slots * params.bd_buffer_size;
        let total = 2 * BOARD_BD_SPACE + tx_len + rx_len;

        let mut memory = vec![0u8; total + BD_ALIGNMENT].into_boxed_slice();
        let base = align_up(memory.as_mut_ptr() as usize, BD_ALIGNMENT);

        let region = |start: usize, len: usize| MemoryRegion::new(start, start + len.max(1) - 1);
        let rx_bd_space = region(base, BOARD_BD_SPACE);
        let tx_bd_space = region(rx_bd_space.end(), BOARD_BD_SPACE);
        let tx_buffer = region(tx_bd_space.end(), tx_len);
        let rx_buffer = region(tx_buffer.end(), rx_len);

        let config = DmaConfig {
            rx_bd_space,
            tx_bd_space,
            tx_buffer,
            rx_buffer,
            bd_buffer_size: params.bd_buffer_size,
            coalesce_count: params.coalesce_count,
            max_packet_size: params.max_packet_size,
            tx_irq: BOARD_TX_IRQ,
            rx_irq: BOARD_RX_IRQ,
            dma_device_id: BOARD_DMA_DEVICE_ID,
            intc_device_id: BOARD_INTC_DEVICE_ID,
        };

        Self {
            dma: None,
            engine: LoopbackEngine::new(BOARD_DMA_DEVICE_ID),
            intc: LoopbackIntc::new(BOARD_INTC_DEVICE_ID, BOARD_MAX_IRQ),
            mmu: LoopbackMmu::new(),
            config,
            memory,
        }
    }

    /// Configuration describing this board's memory.
    pub fn config(&self) -> DmaConfig {
        self.config
    }

    /// Handles to the board's engine and interrupt controller.
    pub fn resources(&self) -> DmaResources<LoopbackEngine, LoopbackIntc> {
        DmaResources {
            engine: self.engine.clone(),
            intc: self.intc.clone(),
        }
    }

    pub fn engine(&self) -> &LoopbackEngine {
        &self.engine
    }

    pub fn intc(&self) -> &LoopbackIntc {
        &self.intc
    }

    pub fn mmu(&self) -> &LoopbackMmu {
        &self.mmu
    }

    /// Replace the MMU used by the next [`start`](Self::start).
    pub fn set_mmu(&mut self, mmu: LoopbackMmu) {
        self.mmu = mmu;
    }

    /// Bring up a transport on the board's own layout.
    pub fn start(&mut self, rx_cb: RxCallback, tx_cb: TxCallback) -> error::Result<()> {
        let resources = self.resources();
        // SAFETY: the layout covers `self.memory`, which outlives `self.dma`.
        let dma = unsafe { AxisDma::init(self.config, resources, &mut self.mmu, rx_cb, tx_cb)? };
        self.dma = Some(dma);
        Ok(())
    }

    /// The running transport.
    pub fn dma(&mut self) -> error::Result<&mut LoopbackDma> {
        self.dma.as_mut().ok_or(Error::Disabled)
    }

    /// Drop the transport (disabling it).
    pub fn stop(&mut self) {
        self.dma = None;
    }

    /// Move data and deliver the resulting interrupts. Returns bytes moved.
    pub fn pump(&mut self) -> usize {
        let (moved, raised) = self.engine.pump();
        self.deliver(raised);
        moved
    }

    /// Fire the delay timers and deliver the resulting interrupts.
    pub fn flush_timers(&mut self) {
        let raised = self.engine.flush_timers();
        self.deliver(raised);
    }

    /// Halt `direction`'s channel with an error and raise its interrupt.
    pub fn inject_fault(&mut self, direction: Direction) {
        self.engine.inject_fault(direction);
        let mut raised = [0usize; 2];
        raised[direction.index()] = 1;
        self.deliver(raised);
    }

    /// Hand the transport a completion it never submitted.
    pub fn inject_completion(&mut self, direction: Direction, bd: BufferDescriptor) {
        let mut raised = [0usize; 2];
        if self.engine.inject_completion(direction, bd) {
            raised[direction.index()] = 1;
        }
        self.deliver(raised);
    }

    /// Pump, flush and service until nothing moves and no event is left.
    pub fn settle(&mut self) -> error::Result<DispatchReport> {
        const MAX_ROUNDS: usize = 4096;

        let mut total = DispatchReport::default();
        for _ in 0..MAX_ROUNDS {
            let moved = self.pump();
            self.flush_timers();
            let report = self.dma()?.service()?;
            total.merge(&report);
            if moved == 0 && report.is_idle() {
                break;
            }
        }
        Ok(total)
    }

    /// Bytes of the board's memory backing `region`, if it lies inside it.
    pub fn bytes(&self, region: &MemoryRegion) -> Option<&[u8]> {
        let start = self.memory.as_ptr() as usize;
        let offset = region.base.checked_sub(start)?;
        self.memory.get(offset..offset + region.len())
    }

    fn deliver(&self, raised: [usize; 2]) {
        for direction in Direction::ALL {
            let irq = match direction {
                Direction::Tx => self.config.tx_irq.id,
                Direction::Rx => self.config.rx_irq.id,
            };
            for _ in 0..raised[direction.index()] {
                self.intc.raise(irq);
            }
        }
    }
}
