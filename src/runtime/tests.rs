use embassy_sync::blocking_mutex::raw::NoopRawMutex;

use sdfat::fat::FatFs;
use sdfat::MemDisk;

use crate::runtime::{
    process_request, DiagCode, DiagCommand, DiagQueue, DiagRequest, DiagResult, ReportSlot,
    PROGRAM_CAPACITY, REPORT_CAPACITY,
};
use crate::testutil::{battery_replies, probe_with_replies};

/// Concrete volume type for requests that run without storage attached.
fn no_volume() -> Option<&'static mut FatFs<MemDisk<8>>> {
    None
}

#[test]
fn queue_hands_back_overflow() {
    let queue: DiagQueue<NoopRawMutex, 2> = DiagQueue::new();
    let first = DiagRequest {
        id: 1,
        command: DiagCommand::Identify,
    };
    let second = DiagRequest {
        id: 2,
        command: DiagCommand::SafeReport,
    };
    let third = DiagRequest {
        id: 3,
        command: DiagCommand::FuzzScan,
    };
    assert_eq!(queue.try_submit(first), Ok(()));
    assert_eq!(queue.try_submit(second), Ok(()));
    assert_eq!(queue.try_submit(third), Err(third));
    assert_eq!(queue.try_next_request(), Some(first));
    assert_eq!(queue.try_submit(third), Ok(()));
    assert_eq!(queue.try_next_request(), Some(second));
    assert_eq!(queue.try_next_request(), Some(third));
    assert_eq!(queue.try_next_request(), None);
}

#[test]
fn result_queue_delivers_in_order() {
    let queue: DiagQueue<NoopRawMutex, 2> = DiagQueue::new();
    let first = DiagResult {
        id: 7,
        code: DiagCode::Ok,
        value: 1,
    };
    let second = DiagResult {
        id: 8,
        code: DiagCode::NoDevice,
        value: 0,
    };
    assert_eq!(queue.publish_result(first), Ok(()));
    assert_eq!(queue.publish_result(second), Ok(()));
    assert_eq!(queue.try_next_result(), Some(first));
    assert_eq!(queue.try_next_result(), Some(second));
    assert_eq!(queue.try_next_result(), None);
}

#[test]
fn slot_publish_replaces_and_numbers_reports() {
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    assert!(slot.is_empty());
    assert_eq!(slot.publish(b"one"), Some(1));
    assert_eq!(slot.publish(b"two!"), Some(2));
    slot.with_latest(|data, sequence| {
        assert_eq!(data, b"two!");
        assert_eq!(sequence, 2);
    });
    assert_eq!(slot.len(), 4);
    slot.clear();
    assert!(slot.is_empty());
    // Sequence numbers survive a clear.
    assert_eq!(slot.publish(b"three"), Some(3));
}

#[test]
fn slot_rejects_oversized_payload_and_keeps_previous() {
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    assert_eq!(slot.publish(b"keep"), Some(1));
    let big = [0u8; REPORT_CAPACITY + 1];
    assert_eq!(slot.publish(&big), None);
    slot.with_latest(|data, sequence| {
        assert_eq!(data, b"keep");
        assert_eq!(sequence, 1);
    });
}

#[test]
fn identify_request_reports_triple_in_value() {
    let (mut probe, _log) = probe_with_replies(&[0xEF, 0x40, 0x17], 0x00);
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    let request = DiagRequest {
        id: 11,
        command: DiagCommand::Identify,
    };
    let result = process_request(&request, &mut probe, &slot, no_volume());
    assert_eq!(
        result,
        DiagResult {
            id: 11,
            code: DiagCode::Ok,
            value: 0x00EF_4017,
        }
    );
}

#[test]
fn identify_sentinel_maps_to_no_device() {
    let (mut probe, _log) = probe_with_replies(&[0xFF, 0xFF, 0xFF], 0x00);
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    let request = DiagRequest {
        id: 12,
        command: DiagCommand::Identify,
    };
    let result = process_request(&request, &mut probe, &slot, no_volume());
    assert_eq!(result.code, DiagCode::NoDevice);
}

#[test]
fn safe_report_stages_rendered_json() {
    let (mut probe, _log) = probe_with_replies(&battery_replies(0xEF, 0x40, 0x17), 0x00);
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    let request = DiagRequest {
        id: 21,
        command: DiagCommand::SafeReport,
    };
    let result = process_request(&request, &mut probe, &slot, no_volume());
    assert_eq!(result.code, DiagCode::Ok);
    slot.with_latest(|data, sequence| {
        assert_eq!(sequence, 1);
        assert_eq!(data.len() as u32, result.value);
        let text = match core::str::from_utf8(data) {
            Ok(text) => text,
            Err(_) => panic!("report is not utf-8"),
        };
        assert!(text.contains("\"manufacturer_name\":\"Winbond\""));
        assert!(text.contains("\"capacity_bytes\":\"8388608\""));
    });
}

#[test]
fn oversized_read_is_rejected_before_traffic() {
    let (mut probe, log) = probe_with_replies(&[], 0x00);
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    let request = DiagRequest {
        id: 31,
        command: DiagCommand::ReadData {
            address: 0,
            len: 257,
        },
    };
    let result = process_request(&request, &mut probe, &slot, no_volume());
    assert_eq!(result.code, DiagCode::BadRequest);
    assert!(log.borrow().is_empty());
}

#[test]
fn empty_program_payload_is_rejected() {
    let (mut probe, log) = probe_with_replies(&[], 0x00);
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    let request = DiagRequest {
        id: 51,
        command: DiagCommand::ProgramData {
            address: 0x2000,
            data: [0u8; PROGRAM_CAPACITY],
            len: 0,
        },
    };
    let result = process_request(&request, &mut probe, &slot, no_volume());
    assert_eq!(result.code, DiagCode::BadRequest);
    assert!(log.borrow().is_empty());
}

#[test]
fn erase_request_reports_aligned_base() {
    let (mut probe, _log) = probe_with_replies(&[0x00], 0x00);
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    let request = DiagRequest {
        id: 41,
        command: DiagCommand::EraseSector { address: 0x1005 },
    };
    let result = process_request(&request, &mut probe, &slot, no_volume());
    assert_eq!(
        result,
        DiagResult {
            id: 41,
            code: DiagCode::Ok,
            value: 0x1000,
        }
    );
}

#[test]
fn persist_without_volume_reports_not_ready() {
    let (mut probe, _log) = probe_with_replies(&[], 0x00);
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    assert_eq!(slot.publish(b"{}"), Some(1));
    let request = DiagRequest {
        id: 61,
        command: DiagCommand::PersistReport,
    };
    let result = process_request(&request, &mut probe, &slot, no_volume());
    assert_eq!(result.code, DiagCode::NotReady);
}

#[test]
fn worker_loop_drains_requests_in_order() {
    let (mut probe, _log) = probe_with_replies(&[0xEF, 0x40, 0x17], 0x00);
    let slot: ReportSlot<NoopRawMutex> = ReportSlot::new();
    let queue: DiagQueue<NoopRawMutex, 4> = DiagQueue::new();
    let identify = DiagRequest {
        id: 1,
        command: DiagCommand::Identify,
    };
    let erase = DiagRequest {
        id: 2,
        command: DiagCommand::EraseSector { address: 0 },
    };
    assert_eq!(queue.try_submit(identify), Ok(()));
    assert_eq!(queue.try_submit(erase), Ok(()));

    while let Some(request) = queue.try_next_request() {
        let result = process_request(&request, &mut probe, &slot, no_volume());
        assert_eq!(queue.publish_result(result), Ok(()));
    }

    let first = match queue.try_next_result() {
        Some(result) => result,
        None => panic!("missing first result"),
    };
    assert_eq!(first.id, 1);
    assert_eq!(first.code, DiagCode::Ok);
    let second = match queue.try_next_result() {
        Some(result) => result,
        None => panic!("missing second result"),
    };
    assert_eq!(second.id, 2);
    assert_eq!(second.code, DiagCode::Ok);
    assert_eq!(queue.try_next_result(), None);
}
