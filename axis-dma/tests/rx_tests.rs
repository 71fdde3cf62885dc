//! Receive path and reassembly tests

mod common;

use axis_dma::driver::{Direction, HalError};
use axis_dma::loopback::{BoardParams, FailPoint};
use axis_dma::FragmentBoundary;
use common::{params, pattern, started_board};

#[test]
fn test_round_trip_fragments() {
    let (mut board, recorder) = started_board(params(4096, 8, 8, 1));
    let packet = pattern(10000);

    board.dma().unwrap().send(&packet).unwrap();
    board.settle().unwrap();

    let fragments = recorder.fragments();
    let shape: Vec<_> = fragments
        .iter()
        .map(|f| (f.offset, f.data.len(), f.start_of_packet, f.boundary))
        .collect();
    assert_eq!(
        shape,
        vec![
            (0, 4096, true, FragmentBoundary::Continues),
            (4096, 4096, false, FragmentBoundary::Continues),
            (8192, 1808, false, FragmentBoundary::EndOfFrame),
        ]
    );
    assert_eq!(recorder.packets(), vec![packet]);
}

#[test]
fn test_one_callback_per_descriptor() {
    let bd = 512;
    for len in [1usize, 511, 512, 513, 1024, 3000, 4096] {
        let (mut board, recorder) = started_board(params(bd, 8, 8, 1));
        let packet = pattern(len);

        board.dma().unwrap().send(&packet).unwrap();
        board.settle().unwrap();

        let fragments = recorder.fragments();
        assert_eq!(fragments.len(), len.div_ceil(bd), "len {}", len);
        let terminal = fragments
            .iter()
            .filter(|f| f.boundary != FragmentBoundary::Continues)
            .count();
        assert_eq!(terminal, 1, "len {}", len);
        assert_eq!(recorder.packets(), vec![packet], "len {}", len);
    }
}

#[test]
fn test_back_to_back_packets_keep_boundaries() {
    let (mut board, recorder) = started_board(params(1024, 8, 16, 1));
    let first = pattern(1500);
    let second: Vec<u8> = pattern(2500).into_iter().rev().collect();

    board.dma().unwrap().send(&first).unwrap();
    board.dma().unwrap().send(&second).unwrap();
    board.settle().unwrap();

    assert_eq!(recorder.packets(), vec![first, second]);
    let sof: Vec<_> = recorder
        .fragments()
        .iter()
        .map(|f| f.start_of_packet)
        .collect();
    assert_eq!(sof, vec![true, false, true, false, false]);
    assert_eq!(board.dma().unwrap().stats().rx_packets, 2);
}

#[test]
fn test_rx_buffers_cleared_and_rearmed() {
    let (mut board, _recorder) = started_board(params(1024, 8, 8, 1));

    board.dma().unwrap().send(&pattern(5000)).unwrap();
    board.settle().unwrap();

    let rx_buffer = board.config().rx_buffer;
    assert!(board.bytes(&rx_buffer).unwrap().iter().all(|&b| b == 0));
    assert_eq!(board.engine().in_flight(Direction::Rx), 8);
    assert_eq!(board.dma().unwrap().stats().rearm_failures, 0);
    assert!(board.dma().unwrap().rx_state().is_complete());
}

#[test]
fn test_max_packet_size_closes_runaway_packet() {
    let (mut board, recorder) = started_board(BoardParams {
        max_packet_size: 2048,
        ..params(1024, 4, 8, 1)
    });

    board.dma().unwrap().send(&pattern(3000)).unwrap();
    board.settle().unwrap();

    let shape: Vec<_> = recorder
        .fragments()
        .iter()
        .map(|f| (f.offset, f.data.len(), f.boundary))
        .collect();
    assert_eq!(
        shape,
        vec![
            (0, 1024, FragmentBoundary::Continues),
            (1024, 1024, FragmentBoundary::LimitReached),
            (0, 952, FragmentBoundary::EndOfFrame),
        ]
    );

    let stats = board.dma().unwrap().stats();
    assert_eq!(stats.limit_completions, 1);
    assert_eq!(stats.rx_packets, 2);
}

#[test]
fn test_receive_stalls_without_rx_slots_then_resumes() {
    // Two RX slots for a four-descriptor packet: the stream stops until
    // delivered slots go back on the ring.
    let (mut board, recorder) = started_board(params(1024, 4, 2, 1));
    let packet = pattern(4000);

    board.dma().unwrap().send(&packet).unwrap();
    assert_eq!(board.pump(), 2048);
    assert!(recorder.fragments().is_empty());

    board.settle().unwrap();
    assert_eq!(recorder.packets(), vec![packet]);
}

#[test]
fn test_failed_rearm_is_retried_by_service() {
    let (mut board, recorder) = started_board(params(1024, 8, 2, 1));

    board.dma().unwrap().send(&pattern(1000)).unwrap();
    board.pump();
    board
        .engine()
        .fail_next(FailPoint::Submit(Direction::Rx), HalError::NotReady);

    let report = board.dma().unwrap().service().unwrap();
    assert_eq!(report.rx_packets, 1);
    assert_eq!(recorder.packets(), vec![pattern(1000)]);
    assert_eq!(board.dma().unwrap().stats().rearm_failures, 1);
    assert_eq!(board.engine().in_flight(Direction::Rx), 2);

    board.dma().unwrap().send(&pattern(1500)).unwrap();
    board.settle().unwrap();
    assert_eq!(recorder.packets(), vec![pattern(1000), pattern(1500)]);
}
