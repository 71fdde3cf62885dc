//! Common test utilities: callback recorders and board setup

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axis_dma::dispatch::{RxCallback, TxCallback};
use axis_dma::loopback::{BoardParams, LoopbackBoard};
use axis_dma::{FragmentBoundary, RxFragment};

/// Owned copy of one delivered RX fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub data: Vec<u8>,
    pub offset: usize,
    pub start_of_packet: bool,
    pub boundary: FragmentBoundary,
}

/// Records everything the transport hands to its callbacks.
#[derive(Clone, Default)]
pub struct Recorder {
    rx: Arc<Mutex<Vec<Captured>>>,
    tx: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rx_callback(&self) -> RxCallback {
        let rx = Arc::clone(&self.rx);
        Box::new(move |fragment: &RxFragment<'_>| {
            rx.lock().unwrap().push(Captured {
                data: fragment.data.to_vec(),
                offset: fragment.packet_offset,
                start_of_packet: fragment.start_of_packet,
                boundary: fragment.boundary,
            });
        })
    }

    pub fn tx_callback(&self) -> TxCallback {
        let tx = Arc::clone(&self.tx);
        Box::new(move || {
            tx.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn fragments(&self) -> Vec<Captured> {
        self.rx.lock().unwrap().clone()
    }

    pub fn tx_count(&self) -> usize {
        self.tx.load(Ordering::SeqCst)
    }

    /// Fragments joined into packets at each end-of-packet boundary.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let mut current = Vec::new();
        for fragment in self.fragments() {
            assert_eq!(fragment.offset, current.len(), "fragment out of place");
            current.extend_from_slice(&fragment.data);
            if fragment.boundary != FragmentBoundary::Continues {
                packets.push(std::mem::take(&mut current));
            }
        }
        packets
    }
}

/// Test packet: byte i is `i % 255`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 255) as u8).collect()
}

pub fn params(bd_buffer_size: usize, tx_slots: usize, rx_slots: usize, coalesce: u8) -> BoardParams {
    BoardParams {
        bd_buffer_size,
        tx_slots,
        rx_slots,
        coalesce_count: coalesce,
        ..BoardParams::default()
    }
}

/// Board with a running transport wired to a fresh recorder.
pub fn started_board(params: BoardParams) -> (LoopbackBoard, Recorder) {
    let mut board = LoopbackBoard::new(params);
    let recorder = Recorder::new();
    board
        .start(recorder.rx_callback(), recorder.tx_callback())
        .expect("transport should start on a valid board");
    (board, recorder)
}
