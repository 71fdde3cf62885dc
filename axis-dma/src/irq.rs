//! Interrupt to foreground handoff.
//!
//! The handlers registered with the interrupt controller do one thing:
//! record which channel fired. [`AxisDma::service`](crate::AxisDma::service)
//! drains the record later and does the reaping.
//!
//! # Design Notes
//!
//! Handlers never spin. If the queue is locked (foreground mid-drain with the
//! line somehow unmasked) or full, the event is counted as missed instead;
//! the drain replays missed events so no completion batch is lost.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use heapless::{Deque, Vec};
use spin::Mutex;

use crate::driver::traits::{Direction, IrqHandler};

/// Events buffered between two drains.
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Completion events raised from interrupt context.
pub struct IrqEvents {
    queue: Mutex<Deque<Direction, EVENT_QUEUE_DEPTH>>,
    missed: [AtomicUsize; 2],
    missed_total: AtomicUsize,
}

impl IrqEvents {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(Deque::new()),
            missed: [AtomicUsize::new(0), AtomicUsize::new(0)],
            missed_total: AtomicUsize::new(0),
        }
    }

    /// Record a completion interrupt. Interrupt context: never blocks.
    pub fn raise(&self, direction: Direction) {
        let queued = match self.queue.try_lock() {
            Some(mut queue) => queue.push_back(direction).is_ok(),
            None => false,
        };
        if !queued {
            self.missed[direction.index()].fetch_add(1, Ordering::AcqRel);
            self.missed_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Move queued events into `out`, replaying missed ones first.
    ///
    /// Stops when `out` is full; anything left stays queued for the next
    /// drain. Call with both lines masked.
    pub fn drain(&self, out: &mut Vec<Direction, EVENT_QUEUE_DEPTH>) {
        for direction in Direction::ALL {
            let counter = &self.missed[direction.index()];
            while !out.is_full() {
                let pending = counter.load(Ordering::Acquire);
                if pending == 0 {
                    break;
                }
                if counter
                    .compare_exchange(pending, pending - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let _ = out.push(direction);
                }
            }
        }

        let mut queue = self.queue.lock();
        while !out.is_full() {
            match queue.pop_front() {
                Some(direction) => {
                    let _ = out.push(direction);
                }
                None => break,
            }
        }
    }

    /// Events waiting, including missed ones.
    pub fn pending(&self) -> usize {
        let missed: usize = self
            .missed
            .iter()
            .map(|m| m.load(Ordering::Acquire))
            .sum();
        self.queue.lock().len() + missed
    }

    /// Total events that could not be queued since creation.
    pub fn missed_total(&self) -> usize {
        self.missed_total.load(Ordering::Relaxed)
    }

    /// Drop everything. Used on teardown with both lines masked.
    pub fn clear(&self) {
        self.queue.lock().clear();
        for counter in &self.missed {
            counter.store(0, Ordering::Release);
        }
    }
}

impl Default for IrqEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the handler registered for one channel's interrupt line.
pub fn line_handler(events: &Arc<IrqEvents>, direction: Direction) -> IrqHandler {
    let events = Arc::clone(events);
    Arc::new(move || events.raise(direction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let events = IrqEvents::new();
        events.raise(Direction::Rx);
        events.raise(Direction::Tx);
        events.raise(Direction::Rx);

        let mut out = Vec::new();
        events.drain(&mut out);
        assert_eq!(out.as_slice(), &[Direction::Rx, Direction::Tx, Direction::Rx]);
        assert_eq!(events.pending(), 0);
    }

    #[test]
    fn test_overflow_is_replayed() {
        let events = IrqEvents::new();
        for _ in 0..EVENT_QUEUE_DEPTH + 3 {
            events.raise(Direction::Rx);
        }
        assert_eq!(events.missed_total(), 3);
        assert_eq!(events.pending(), EVENT_QUEUE_DEPTH + 3);

        let mut out = Vec::new();
        events.drain(&mut out);
        assert_eq!(out.len(), EVENT_QUEUE_DEPTH);

        out.clear();
        events.drain(&mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(events.pending(), 0);
    }

    #[test]
    fn test_contended_raise_is_counted() {
        let events = IrqEvents::new();
        {
            let _held = events.queue.lock();
            events.raise(Direction::Tx);
        }
        assert_eq!(events.missed_total(), 1);

        let mut out = Vec::new();
        events.drain(&mut out);
        assert_eq!(out.as_slice(), &[Direction::Tx]);
    }

    #[test]
    fn test_handler_raises_its_direction() {
        let events = Arc::new(IrqEvents::new());
        let handler = line_handler(&events, Direction::Tx);
        handler();
        handler();
        assert_eq!(events.pending(), 2);

        events.clear();
        assert_eq!(events.pending(), 0);
    }
}
