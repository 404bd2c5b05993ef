//! Ownership, abort and disconnect handling.

use std::sync::Arc;

use otalink::app::events::OtaEvent;
use otalink::ota::packet::SessionFlags;
use otalink::ota::{AbortReason, ErrorCode, Response, SessionState};

use crate::mocks::{ALICE, BOB, FlashCall, Gate, Harness, eventually};

#[test]
fn abort_without_session_is_idempotent() {
    let h = Harness::new();
    for _ in 0..5 {
        h.abort(&ALICE);
    }

    assert_eq!(h.sink.to(&ALICE), vec![Response::Error(ErrorCode::NotRunning); 5]);
    let status = h.service.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.owner, None);
    assert!(h.flash().calls.is_empty());
}

#[test]
fn second_start_is_refused_and_session_untouched() {
    let h = Harness::new();
    h.start_ok(&ALICE, 1024);
    h.chunk(&ALICE, &[0; 512], false);
    assert!(h.sink.wait_for(
        &ALICE,
        Response::State {
            size_received: 512,
            size_requested: 512,
        }
    ));
    let before = h.service.status();

    h.start(&BOB, 4096, 100, SessionFlags::default());
    assert_eq!(h.sink.to(&BOB), vec![Response::Error(ErrorCode::AlreadyRunning)]);
    // the owner itself cannot restart mid-session either
    h.start(&ALICE, 4096, 100, SessionFlags::default());
    assert!(h.sink.wait_for(&ALICE, Response::Error(ErrorCode::AlreadyRunning)));

    let after = h.service.status();
    assert_eq!(after.owner, Some(ALICE));
    assert_eq!(after.total_size, before.total_size);
    assert_eq!(after.bytes_received, before.bytes_received);

    h.chunk(&ALICE, &[0; 512], true);
    assert!(eventually(|| h
        .events()
        .iter()
        .any(|e| matches!(e, OtaEvent::Completed { total_size: 1024 }))));
    assert!(h.wait_idle());
}

#[test]
fn non_owner_cannot_abort_or_send_data() {
    let h = Harness::new();
    h.start_ok(&ALICE, 512);

    h.abort(&BOB);
    h.chunk(&BOB, &[0; 16], false);
    assert_eq!(
        h.sink.to(&BOB),
        vec![
            Response::Error(ErrorCode::WrongUser),
            Response::Error(ErrorCode::WrongUser),
        ]
    );
    assert_eq!(h.service.status().state, SessionState::Receiving);

    h.chunk(&ALICE, &[0; 512], true);
    assert!(h.wait_idle());
    assert!(h.flash().calls.contains(&FlashCall::SetBoot));
}

#[test]
fn owner_abort_rolls_back_and_frees_the_slot() {
    let h = Harness::new();
    h.start_ok(&ALICE, 1024);
    h.chunk(&ALICE, &[0; 512], false);
    assert!(h.sink.wait_for(
        &ALICE,
        Response::State {
            size_received: 512,
            size_requested: 512,
        }
    ));

    h.abort(&ALICE);
    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::UserRequest)));
    assert!(h.wait_idle());
    assert_eq!(h.flash().calls.last(), Some(&FlashCall::Abort));
    assert!(h.events().contains(&OtaEvent::Aborted {
        reason: AbortReason::UserRequest,
        bytes_received: 512,
    }));

    // a different client can take over right away
    h.start_ok(&BOB, 256);
    assert_eq!(h.service.status().owner, Some(BOB));
    h.abort(&BOB);
    assert!(h.wait_idle());
}

#[test]
fn exactly_one_terminal_packet_per_abort() {
    let h = Harness::new();
    h.start_ok(&ALICE, 1024);
    h.abort(&ALICE);
    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::UserRequest)));
    assert!(h.wait_idle());
    // late duplicate abort after cleanup
    h.abort(&ALICE);

    let responses = h.sink.to(&ALICE);
    let aborts = responses
        .iter()
        .filter(|r| matches!(r, Response::Abort(_)))
        .count();
    assert_eq!(aborts, 1);
    assert_eq!(responses.last(), Some(&Response::Error(ErrorCode::NotRunning)));
}

#[test]
fn owner_disconnect_aborts_silently() {
    let h = Harness::new();
    h.start_ok(&ALICE, 1024);
    h.chunk(&ALICE, &[0; 512], false);
    assert!(h.sink.wait_for(
        &ALICE,
        Response::State {
            size_received: 512,
            size_requested: 512,
        }
    ));

    h.service.on_close(&ALICE);
    assert!(h.wait_idle());
    assert!(eventually(|| h.events().contains(&OtaEvent::Aborted {
        reason: AbortReason::UserDisconnect,
        bytes_received: 512,
    })));
    assert!(
        !h.sink.to(&ALICE).iter().any(|r| matches!(r, Response::Abort(_))),
        "no packet goes to a closed peer"
    );
    assert!(h.flash().calls.contains(&FlashCall::Abort));
}

#[test]
fn owner_disconnect_during_finalization_lets_it_complete() {
    let h = Harness::new();
    let gate = Gate::new();
    h.flash().end_gate = Some(Arc::clone(&gate));
    h.start_ok(&ALICE, 256);
    h.chunk(&ALICE, &[0; 256], true);
    assert!(gate.wait_entered());
    assert_eq!(h.service.status().state, SessionState::Finalizing);

    h.service.on_close(&ALICE);
    assert_eq!(h.service.status().state, SessionState::Finalizing);
    gate.release();

    assert!(h.wait_idle());
    assert!(h.events().contains(&OtaEvent::Completed { total_size: 256 }));
    assert!(h.service.update_pending_reboot());
    let flash = h.flash();
    assert!(flash.calls.contains(&FlashCall::SetBoot));
    assert!(!flash.calls.contains(&FlashCall::Abort));
}

#[test]
fn abort_during_blocked_write_wins_once_write_returns() {
    let h = Harness::new();
    let gate = Gate::new();
    h.start_ok(&ALICE, 1024);
    h.flash().write_gate = Some(Arc::clone(&gate));
    h.chunk(&ALICE, &[0; 512], false);
    assert!(gate.wait_entered());

    h.abort(&ALICE);
    gate.release();

    assert!(h.sink.wait_for(&ALICE, Response::Abort(AbortReason::UserRequest)));
    assert!(h.wait_idle());
    assert!(
        !h.sink.to(&ALICE).contains(&Response::State {
            size_received: 512,
            size_requested: 512,
        }),
        "the interrupted chunk is not acknowledged"
    );
    assert!(h.events().contains(&OtaEvent::Aborted {
        reason: AbortReason::UserRequest,
        bytes_received: 0,
    }));
    let flash = h.flash();
    assert!(flash.calls.contains(&FlashCall::Write(512)));
    assert_eq!(flash.calls.last(), Some(&FlashCall::Abort));
}

#[test]
fn other_peer_disconnect_is_ignored() {
    let h = Harness::new();
    h.start_ok(&ALICE, 256);
    h.service.on_close(&BOB);
    assert_eq!(h.service.status().state, SessionState::Receiving);

    h.chunk(&ALICE, &[0; 256], true);
    assert!(h.wait_idle());
    assert!(h.service.update_pending_reboot());
}

#[test]
fn data_without_session_is_not_running() {
    let h = Harness::new();
    h.chunk(&ALICE, &[1, 2, 3], false);
    assert_eq!(h.sink.to(&ALICE), vec![Response::Error(ErrorCode::NotRunning)]);
}

#[test]
fn zero_length_image_is_refused() {
    let h = Harness::new();
    h.start(&ALICE, 0, 100, SessionFlags::default());
    assert_eq!(h.sink.to(&ALICE), vec![Response::Error(ErrorCode::PacketSizeError)]);
    assert_eq!(h.service.status().owner, None);
}

#[test]
fn malformed_frames_are_reported() {
    let h = Harness::new();
    h.service.on_data(&ALICE, &[]);
    h.service.on_data(&ALICE, &[0x63, 0]);
    h.service.on_data(&ALICE, &[1, 0, 4]);
    h.service.on_data(&ALICE, &[4, 9]);

    assert_eq!(
        h.sink.to(&ALICE),
        vec![
            Response::Error(ErrorCode::PacketSizeError),
            Response::Error(ErrorCode::NoCommandFound),
            Response::Error(ErrorCode::PacketSizeError),
            Response::Error(ErrorCode::NoActionFound),
        ]
    );
    assert_eq!(h.service.status().state, SessionState::Idle);
}
