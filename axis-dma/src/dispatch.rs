//! Callback table and dispatch accounting.

use alloc::boxed::Box;

use crate::driver::rx::RxFragment;

/// Called once per retired RX descriptor.
pub type RxCallback = Box<dyn FnMut(&RxFragment<'_>) + Send>;

/// Called once per retired TX descriptor.
pub type TxCallback = Box<dyn FnMut() + Send>;

/// The two single-slot callback bindings. Latest registration wins.
#[derive(Default)]
pub struct CallbackTable {
    rx: Option<RxCallback>,
    tx: Option<TxCallback>,
}

impl CallbackTable {
    pub fn new(rx: RxCallback, tx: TxCallback) -> Self {
        Self {
            rx: Some(rx),
            tx: Some(tx),
        }
    }

    pub fn set_rx(&mut self, cb: RxCallback) {
        self.rx = Some(cb);
    }

    pub fn set_tx(&mut self, cb: TxCallback) {
        self.tx = Some(cb);
    }

    pub fn on_rx(&mut self, fragment: &RxFragment<'_>) {
        if let Some(cb) = self.rx.as_mut() {
            cb(fragment);
        }
    }

    pub fn on_tx(&mut self) {
        if let Some(cb) = self.tx.as_mut() {
            cb();
        }
    }

    pub fn clear(&mut self) {
        self.rx = None;
        self.tx = None;
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_none() && self.tx.is_none()
    }
}

/// Running counters. Diagnostic only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaStats {
    /// TX descriptors retired.
    pub tx_bds: u64,
    /// RX descriptors retired and delivered.
    pub rx_bds: u64,
    /// RX packets closed (EOF or limit).
    pub rx_packets: u64,
    /// RX packets closed by `max_packet_size` instead of EOF.
    pub limit_completions: u64,
    /// Retired descriptors whose address named no in-flight slot.
    pub stray_completions: u64,
    /// Interrupts that could not be queued and were replayed.
    pub missed_events: u64,
    /// Events drained and dispatched.
    pub events_dispatched: u64,
    /// Largest number of descriptors reaped for a single event.
    pub max_reaped_per_event: usize,
    /// Error interrupts reported by the engine.
    pub engine_faults: u64,
    /// RX slots that could not go straight back on the ring.
    pub rearm_failures: u64,
}

/// What one [`AxisDma::service`](crate::AxisDma::service) call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub events: usize,
    pub tx_reaped: usize,
    pub rx_reaped: usize,
    /// Packets closed during this call.
    pub rx_packets: usize,
}

impl DispatchReport {
    pub fn is_idle(&self) -> bool {
        self.events == 0
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: &DispatchReport) {
        self.events += other.events;
        self.tx_reaped += other.tx_reaped;
        self.rx_reaped += other.rx_reaped;
        self.rx_packets += other.rx_packets;
    }
}
