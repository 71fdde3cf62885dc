//! Loopback self-test.
//!
//! Sends a known pattern through a loopback board and checks every received
//! fragment against it at its packet offset.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;
use thiserror::Error;

use crate::config::print_config;
use crate::driver::rx::RxFragment;
use crate::error::Error;
use crate::loopback::{BoardParams, LoopbackBoard};

/// Rounds without any progress before the run is declared stalled.
const MAX_IDLE_ROUNDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelftestParams {
    /// Packets to send and receive.
    pub num_packets: usize,
    pub packet_size: usize,
    pub bd_buffer_size: usize,
    pub tx_slots: usize,
    pub rx_slots: usize,
    pub coalesce_count: u8,
    pub max_packet_size: usize,
}

impl Default for SelftestParams {
    fn default() -> Self {
        Self {
            num_packets: 16,
            packet_size: 10000,
            bd_buffer_size: 4096,
            tx_slots: 8,
            rx_slots: 8,
            coalesce_count: 1,
            max_packet_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelftestReport {
    pub packets_sent: usize,
    pub tx_bds: u64,
    pub rx_bds: u64,
    pub rx_packets: u64,
    pub bytes_received: usize,
    pub missed_events: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelftestError {
    #[error("self-test parameters are empty")]
    InvalidParams,
    #[error(transparent)]
    Transport(#[from] Error),
    #[error("packet {packet}: byte {offset} is {found:#04x}, expected {expected:#04x}")]
    Mismatch {
        packet: usize,
        offset: usize,
        expected: u8,
        found: u8,
    },
    #[error("packet {packet} closed after {len} bytes")]
    BadLength { packet: usize, len: usize },
    #[error("no progress after {received} packets")]
    Stalled { received: usize },
}

/// Pattern byte at `offset` of every test packet.
pub fn pattern_byte(offset: usize) -> u8 {
    (offset % 255) as u8
}

/// Receive-side bookkeeping shared with the RX callback.
#[derive(Default)]
struct RxCheck {
    packets: usize,
    bytes: usize,
    failure: Option<SelftestError>,
}

impl RxCheck {
    fn verify(&mut self, fragment: &RxFragment<'_>, packet_size: usize) {
        if self.failure.is_some() {
            return;
        }
        self.bytes += fragment.len();

        let wrong = fragment
            .data
            .iter()
            .enumerate()
            .map(|(i, &b)| (fragment.packet_offset + i, b))
            .find(|&(offset, b)| b != pattern_byte(offset));
        if let Some((offset, found)) = wrong {
            self.failure = Some(SelftestError::Mismatch {
                packet: self.packets,
                offset,
                expected: pattern_byte(offset),
                found,
            });
            return;
        }

        if fragment.is_end_of_packet() {
            let len = fragment.packet_offset + fragment.len();
            if len != packet_size {
                self.failure = Some(SelftestError::BadLength {
                    packet: self.packets,
                    len,
                });
                return;
            }
            self.packets += 1;
        }
    }
}

/// Run the loopback self-test.
pub fn run(params: &SelftestParams) -> Result<SelftestReport, SelftestError> {
    if params.num_packets == 0 || params.packet_size == 0 {
        return Err(SelftestError::InvalidParams);
    }

    let packet: Vec<u8> = (0..params.packet_size).map(pattern_byte).collect();
    let mut board = LoopbackBoard::new(BoardParams {
        bd_buffer_size: params.bd_buffer_size,
        tx_slots: params.tx_slots,
        rx_slots: params.rx_slots,
        coalesce_count: params.coalesce_count,
        max_packet_size: params.max_packet_size,
    });

    print_config(&board.config());

    let check = Arc::new(Mutex::new(RxCheck::default()));
    let rx_check = Arc::clone(&check);
    let packet_size = params.packet_size;
    board.start(
        Box::new(move |fragment: &RxFragment<'_>| {
            rx_check.lock().verify(fragment, packet_size);
        }),
        Box::new(|| {}),
    )?;

    let mut report = SelftestReport::default();
    let mut idle_rounds = 0;

    loop {
        let received = {
            let mut check = check.lock();
            if let Some(failure) = check.failure.take() {
                return Err(failure);
            }
            check.packets
        };
        if received >= params.num_packets {
            break;
        }

        let mut progressed = false;
        if report.packets_sent < params.num_packets {
            match board.dma()?.send(&packet) {
                Ok(_) => {
                    report.packets_sent += 1;
                    progressed = true;
                }
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let moved = board.pump();
        board.flush_timers();
        let dispatched = board.dma()?.service()?;

        if progressed || moved > 0 || !dispatched.is_idle() {
            idle_rounds = 0;
        } else {
            idle_rounds += 1;
            if idle_rounds > MAX_IDLE_ROUNDS {
                return Err(SelftestError::Stalled { received });
            }
        }
    }

    let dma = board.dma()?;
    let stats = dma.stats();
    report.tx_bds = stats.tx_bds;
    report.rx_bds = stats.rx_bds;
    report.rx_packets = stats.rx_packets;
    report.missed_events = stats.missed_events;
    report.bytes_received = check.lock().bytes;
    dma.disable();
    board.stop();

    log::info!(
        "selftest: {} packets of {} bytes, {} TX / {} RX descriptors, {} missed events",
        report.rx_packets,
        params.packet_size,
        report.tx_bds,
        report.rx_bds,
        report.missed_events
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::rx::FragmentBoundary;

    #[test]
    fn test_pattern_wraps_at_255() {
        assert_eq!(pattern_byte(0), 0);
        assert_eq!(pattern_byte(254), 254);
        assert_eq!(pattern_byte(255), 0);
        assert_eq!(pattern_byte(256), 1);
    }

    #[test]
    fn test_check_reports_first_bad_byte() {
        let mut data: Vec<u8> = (100..110).map(pattern_byte).collect();
        data[3] ^= 0xff;
        let fragment = RxFragment {
            buffer_addr: 0,
            data: &data,
            packet_offset: 100,
            start_of_packet: false,
            boundary: FragmentBoundary::Continues,
        };

        let mut check = RxCheck::default();
        check.verify(&fragment, 200);
        assert_eq!(
            check.failure,
            Some(SelftestError::Mismatch {
                packet: 0,
                offset: 103,
                expected: pattern_byte(103),
                found: pattern_byte(103) ^ 0xff,
            })
        );
    }

    #[test]
    fn test_check_rejects_short_packet() {
        let data: Vec<u8> = (0..10).map(pattern_byte).collect();
        let fragment = RxFragment {
            buffer_addr: 0,
            data: &data,
            packet_offset: 0,
            start_of_packet: true,
            boundary: FragmentBoundary::EndOfFrame,
        };

        let mut check = RxCheck::default();
        check.verify(&fragment, 20);
        assert_eq!(
            check.failure,
            Some(SelftestError::BadLength { packet: 0, len: 10 })
        );
        assert_eq!(check.packets, 0);
    }

    #[test]
    fn test_default_run_passes() {
        let params = SelftestParams::default();
        let report = run(&params).unwrap();
        assert_eq!(report.packets_sent, params.num_packets);
        assert_eq!(report.rx_packets, params.num_packets as u64);
        // 10000 bytes in 4096-byte descriptors: 3 per packet each way.
        assert_eq!(report.tx_bds, 3 * params.num_packets as u64);
        assert_eq!(report.rx_bds, 3 * params.num_packets as u64);
        assert_eq!(report.bytes_received, params.num_packets * params.packet_size);
    }

    #[test]
    fn test_empty_params_rejected() {
        let params = SelftestParams {
            num_packets: 0,
            ..SelftestParams::default()
        };
        assert_eq!(run(&params), Err(SelftestError::InvalidParams));
    }
}
