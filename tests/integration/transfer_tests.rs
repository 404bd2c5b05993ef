//! Full transfers through `OtaService` and the Session Task.

use otalink::app::events::OtaEvent;
use otalink::ota::packet::SessionFlags;
use otalink::ota::{AbortReason, ErrorCode, Response, SessionState};

use crate::mocks::{ALICE, BOB, FlashCall, Harness, Sent, image};

fn state(size_received: u32, size_requested: u32) -> Response {
    Response::State {
        size_received,
        size_requested,
    }
}

#[test]
fn two_chunks_complete_the_update() {
    let h = Harness::new();
    h.start(&ALICE, 1024, 500, SessionFlags::default());

    h.chunk(&ALICE, &[0xA5; 512], false);
    h.chunk(&ALICE, &[0x5A; 512], true);

    assert!(eventually_completed(&h));
    assert!(crate::mocks::eventually(|| h.sink.to(&ALICE).len() == 3));

    // initial request, one progress packet, completion; the last chunk gets
    // no progress packet of its own
    assert_eq!(
        h.sink.to(&ALICE),
        vec![state(0, 1024), state(512, 512), state(1024, 0)]
    );

    let flash = h.flash();
    assert_eq!(
        flash.calls,
        vec![
            FlashCall::Begin(1024),
            FlashCall::Write(512),
            FlashCall::Write(512),
            FlashCall::End,
            FlashCall::SetBoot,
        ]
    );
    assert_eq!(flash.image.len(), 1024);
    drop(flash);

    assert!(h.wait_idle());
    assert!(h.service.update_pending_reboot());
}

fn eventually_completed(h: &Harness) -> bool {
    crate::mocks::eventually(|| {
        h.events()
            .iter()
            .any(|e| matches!(e, OtaEvent::Completed { total_size: 1024 }))
    })
}

#[test]
fn completion_is_broadcast_to_other_peers() {
    let h = Harness::new();
    h.start_ok(&ALICE, 300);
    h.chunk(&ALICE, &[1; 300], true);
    let done = Sent::Broadcast {
        except: Some(ALICE),
        response: state(300, 0),
    };
    assert!(crate::mocks::eventually(|| h.sink.all().contains(&done)));
    assert!(h.wait_idle());
    assert!(h.sink.to(&BOB).is_empty());
}

#[test]
fn progress_requests_follow_chunk_limit() {
    let h = Harness::new();
    let max = h.service.config().max_chunk_size;
    let total = max * 2 + 100;
    h.start_ok(&ALICE, total);

    h.chunk(&ALICE, &vec![0; max as usize], false);
    assert!(h.sink.wait_for(&ALICE, state(max, max)));
    h.chunk(&ALICE, &vec![0; max as usize], false);
    assert!(h.sink.wait_for(&ALICE, state(max * 2, 100)));
    h.chunk(&ALICE, &[0; 100], true);
    assert!(h.sink.wait_for(&ALICE, state(total, 0)));
    assert!(h.wait_idle());
}

#[test]
fn reported_progress_never_decreases() {
    let h = Harness::new();
    h.start_ok(&ALICE, 2000);
    for i in 0..10 {
        h.chunk(&ALICE, &[0; 200], i == 9);
        let received = (i + 1) * 200;
        assert!(h.sink.wait_for(&ALICE, state(received, 2000 - received)));
    }
    assert!(h.wait_idle());

    let received: Vec<u32> = h
        .sink
        .to(&ALICE)
        .into_iter()
        .filter_map(|r| match r {
            Response::State { size_received, .. } => Some(size_received),
            _ => None,
        })
        .collect();
    assert!(received.windows(2).all(|w| w[0] <= w[1]), "{received:?}");
}

#[test]
fn oversized_chunk_is_refused_but_session_continues() {
    let h = Harness::new();
    h.start_ok(&ALICE, 600);

    h.chunk(&ALICE, &[0; 512], false);
    assert!(h.sink.wait_for(&ALICE, state(512, 88)));

    h.chunk(&ALICE, &[0; 200], false);
    assert!(h.sink.wait_for(&ALICE, Response::Error(ErrorCode::PacketSizeError)));
    assert_eq!(h.service.status().state, SessionState::Receiving);

    h.chunk(&ALICE, &[0; 88], true);
    assert!(h.sink.wait_for(&ALICE, state(600, 0)));
    assert!(h.wait_idle());
    assert_eq!(h.flash().image.len(), 600);
}

#[test]
fn chunk_above_configured_limit_is_refused() {
    let h = Harness::new();
    let max = h.service.config().max_chunk_size as usize;
    h.start_ok(&ALICE, 64 * 1024);

    h.chunk(&ALICE, &vec![0; max + 1], false);
    assert!(h.sink.wait_for(&ALICE, Response::Error(ErrorCode::PacketSizeError)));
    assert_eq!(h.service.status().bytes_received, 0);

    h.abort(&ALICE);
    assert!(h.wait_idle());
}

#[test]
fn early_end_of_stream_aborts() {
    let h = Harness::new();
    h.start_ok(&ALICE, 1024);
    h.chunk(&ALICE, &[0; 512], true);

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::OtaEndError)));
    assert!(h.wait_idle());
    let flash = h.flash();
    assert!(flash.calls.contains(&FlashCall::Abort));
    assert!(!flash.calls.contains(&FlashCall::SetBoot));
}

#[test]
fn empty_final_chunk_finishes_a_complete_image() {
    let h = Harness::new();
    h.start_ok(&ALICE, 512);
    h.chunk(&ALICE, &[0; 512], false);
    assert!(crate::mocks::eventually(|| h.service.status().bytes_received == 512));
    h.chunk(&ALICE, &[], true);

    assert!(eventually_idle_with(&h, |e| matches!(e, OtaEvent::Completed { total_size: 512 })));
    assert_eq!(h.sink.to(&ALICE), vec![state(0, 512), state(512, 0)]);
}

fn eventually_idle_with(h: &Harness, pred: impl Fn(&OtaEvent) -> bool) -> bool {
    crate::mocks::eventually(|| h.events().iter().any(&pred)) && h.wait_idle()
}

#[test]
fn idle_timeout_aborts_without_client_request() {
    let h = Harness::new();
    h.start(&ALICE, 1024, 50, SessionFlags::default());

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::Timeout)));
    assert!(h.wait_idle());
    assert!(h.flash().calls.contains(&FlashCall::Abort));
}

#[test]
fn begin_failure_aborts_session() {
    let h = Harness::new();
    h.flash().fail_begin = Some(otalink::error::FlashError::Begin(-1));
    h.start(&ALICE, 1024, 500, SessionFlags::default());

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::OtaBeginError)));
    assert!(h.wait_idle());
}

#[test]
fn missing_partition_reports_partition_error() {
    let h = Harness::new();
    h.flash().fail_begin = Some(otalink::error::FlashError::NoPartition);
    h.start(&ALICE, 1024, 500, SessionFlags::default());

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::GetPartitionError)));
    assert!(h.wait_idle());
}

#[test]
fn write_failure_aborts_and_rolls_back() {
    let h = Harness::new();
    h.flash().fail_write_at = Some(1);
    h.start_ok(&ALICE, 1024);
    h.chunk(&ALICE, &[0; 512], false);
    h.chunk(&ALICE, &[0; 512], true);

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::OtaWriteError)));
    assert!(h.wait_idle());
    assert_eq!(h.flash().calls.last(), Some(&FlashCall::Abort));
}

#[test]
fn end_failure_reports_end_error() {
    let h = Harness::new();
    h.flash().fail_end = Some(otalink::error::FlashError::End(-1));
    h.start_ok(&ALICE, 256);
    h.chunk(&ALICE, &[0; 256], true);

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::OtaEndError)));
    assert!(h.wait_idle());
    assert!(!h.service.update_pending_reboot());
}

#[test]
fn failed_end_never_looks_like_completion() {
    let h = Harness::new();
    h.flash().fail_end = Some(otalink::error::FlashError::End(-1));
    h.start_ok(&ALICE, 256);
    h.chunk(&ALICE, &[0; 256], false);
    assert!(crate::mocks::eventually(|| h.service.status().bytes_received == 256));
    h.chunk(&ALICE, &[], true);

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::OtaEndError)));
    assert!(h.wait_idle());
    assert_eq!(
        h.sink.to(&ALICE),
        vec![state(0, 256), Response::Abort(AbortReason::OtaEndError)]
    );
    assert!(
        !h.sink.all().iter().any(|s| matches!(s, Sent::Broadcast { .. })),
        "nothing is announced for a failed update"
    );
}

#[test]
fn reset_after_success_restarts_device() {
    let h = Harness::new();
    let flags = SessionFlags {
        reset_after_success: true,
        ..SessionFlags::default()
    };
    h.start(&ALICE, 256, 500, flags);
    h.chunk(&ALICE, &[0; 256], true);

    assert!(h.sink.wait_for(&ALICE, state(256, 0)));
    assert!(crate::mocks::eventually(|| h.firmware.restarts() == 1));
}

// ── Version gating ────────────────────────────────────────────

const CHECK_RUNNING: SessionFlags = SessionFlags {
    reset_after_success: false,
    check_against_last_invalid: false,
    check_against_running_version: true,
};

const CHECK_LAST_INVALID: SessionFlags = SessionFlags {
    reset_after_success: false,
    check_against_last_invalid: true,
    check_against_running_version: false,
};

#[test]
fn same_version_is_refused() {
    let h = Harness::new();
    h.start(&ALICE, 512, 500, CHECK_RUNNING);
    h.chunk(&ALICE, &image("1.0.0", 512), true);

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::SameVersion)));
    assert!(h.wait_idle());
    assert!(
        !h.flash().calls.iter().any(|c| matches!(c, FlashCall::Write(_))),
        "refused image must not reach flash"
    );
}

#[test]
fn last_invalid_version_is_refused() {
    let h = Harness::with_firmware(otalink::adapters::firmware::EspFirmware::with_versions(
        Some("1.0.0"),
        Some("1.1.0"),
    ));
    h.start(&ALICE, 512, 500, CHECK_LAST_INVALID);
    h.chunk(&ALICE, &image("1.1.0", 512), true);

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::InvalidVersion)));
    assert!(h.wait_idle());
}

#[test]
fn unreadable_header_is_refused_when_checking() {
    let h = Harness::new();
    h.start(&ALICE, 512, 500, CHECK_RUNNING);
    h.chunk(&ALICE, &[0; 512], true);

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::InvalidVersion)));
    assert!(h.wait_idle());
}

#[test]
fn newer_version_passes_the_check() {
    let h = Harness::new();
    h.start(&ALICE, 512, 500, CHECK_RUNNING);
    h.chunk(&ALICE, &image("1.2.0", 512), true);

    assert!(h.sink.wait_for(&ALICE, state(512, 0)));
    assert!(h.wait_idle());
    assert!(h.flash().calls.contains(&FlashCall::SetBoot));
}
