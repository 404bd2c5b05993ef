//! `action_request` handling: reset, validate and invalidate.

use otalink::app::events::OtaEvent;
use otalink::app::ports::FirmwarePort;
use otalink::ota::packet::SessionFlags;
use otalink::ota::{Action, ErrorCode, Response};

use crate::mocks::{ALICE, BOB, FlashCall, Harness, eventually};

fn done(action: Action) -> Response {
    Response::Action { action, result: 0 }
}

#[test]
fn reset_replies_then_restarts() {
    let h = Harness::new();
    h.action(&ALICE, Action::Reset);

    // the request handler returns before the delayed restart fires
    assert_eq!(h.sink.to(&ALICE), vec![done(Action::Reset)]);
    assert!(eventually(|| h.firmware.restarts() == 1));
    assert!(h.events().contains(&OtaEvent::ActionPerformed {
        action: Action::Reset,
        result: 0,
    }));
}

#[test]
fn validate_confirms_pending_image() {
    let h = Harness::new();
    h.firmware.set_pending_verify(true);

    h.action(&ALICE, Action::ValidateImage);
    assert_eq!(h.sink.to(&ALICE), vec![done(Action::ValidateImage)]);
    assert!(!h.firmware.pending_verify());
}

#[test]
fn validate_without_pending_image_is_wrong_time() {
    let h = Harness::new();
    h.action(&ALICE, Action::ValidateImage);
    h.action(&ALICE, Action::InvalidateImage);
    assert_eq!(
        h.sink.to(&ALICE),
        vec![
            Response::Error(ErrorCode::ActionWrongTime),
            Response::Error(ErrorCode::ActionWrongTime),
        ]
    );
    assert_eq!(h.firmware.restarts(), 0);
}

#[test]
fn invalidate_pending_image_rolls_back() {
    let h = Harness::with_firmware(otalink::adapters::firmware::EspFirmware::with_versions(
        Some("2.0.0"),
        None,
    ));
    h.firmware.set_pending_verify(true);

    h.action(&ALICE, Action::InvalidateImage);
    assert_eq!(h.sink.to(&ALICE), vec![done(Action::InvalidateImage)]);
    assert_eq!(h.firmware.restarts(), 1);
}

#[test]
fn invalidate_discards_completed_update() {
    let h = Harness::new();
    h.start_ok(&ALICE, 256);
    h.chunk(&ALICE, &[0; 256], true);
    assert!(h.wait_idle());
    assert!(h.service.update_pending_reboot());

    // any peer may run actions once the session is over
    h.action(&BOB, Action::InvalidateImage);
    assert_eq!(h.sink.to(&BOB), vec![done(Action::InvalidateImage)]);
    assert!(h.firmware.boot_reverted());
    assert!(!h.service.update_pending_reboot());

    // nothing left to discard
    h.action(&BOB, Action::InvalidateImage);
    assert_eq!(
        h.sink.to(&BOB).last(),
        Some(&Response::Error(ErrorCode::ActionWrongTime))
    );
}

#[test]
fn validate_after_completed_update_is_accepted() {
    let h = Harness::new();
    h.start_ok(&ALICE, 256);
    h.chunk(&ALICE, &[0; 256], true);
    assert!(h.wait_idle());

    h.action(&ALICE, Action::ValidateImage);
    assert_eq!(h.sink.to(&ALICE).last(), Some(&done(Action::ValidateImage)));
}

#[test]
fn actions_refused_during_session() {
    let h = Harness::new();
    h.start_ok(&ALICE, 1024);

    h.action(&ALICE, Action::Reset);
    h.action(&BOB, Action::Reset);

    assert_eq!(
        h.sink.to(&ALICE).last(),
        Some(&Response::Error(ErrorCode::ActionWrongTime))
    );
    assert_eq!(h.sink.to(&BOB), vec![Response::Error(ErrorCode::WrongUser)]);
    assert_eq!(h.firmware.restarts(), 0);

    h.abort(&ALICE);
    assert!(h.wait_idle());
}

#[test]
fn new_session_refused_while_completed_update_awaits_reboot() {
    let h = Harness::new();
    h.start_ok(&ALICE, 256);
    h.chunk(&ALICE, &[0; 256], true);
    assert!(h.wait_idle());

    // a second begin would erase the image selected for the next boot
    h.start(&BOB, 1024, 500, SessionFlags::default());
    assert_eq!(h.sink.to(&BOB), vec![Response::Error(ErrorCode::ActionWrongTime)]);
    assert_eq!(h.service.status().owner, None);
    assert_eq!(
        h.flash()
            .calls
            .iter()
            .filter(|c| matches!(c, FlashCall::Begin(_)))
            .count(),
        1
    );

    h.action(&ALICE, Action::ValidateImage);
    assert_eq!(h.sink.to(&ALICE).last(), Some(&done(Action::ValidateImage)));
    assert!(h.service.update_pending_reboot());
}

#[test]
fn aborted_session_after_discarded_update_leaves_nothing_to_validate() {
    let h = Harness::new();
    h.start_ok(&ALICE, 256);
    h.chunk(&ALICE, &[0; 256], true);
    assert!(h.wait_idle());

    h.action(&ALICE, Action::InvalidateImage);
    assert!(h.firmware.boot_reverted());

    h.start_ok(&BOB, 1024);
    h.chunk(&BOB, &[0; 512], false);
    assert!(h.sink.wait_for(
        &BOB,
        Response::State {
            size_received: 512,
            size_requested: 512,
        }
    ));
    h.abort(&BOB);
    assert!(h.wait_idle());

    assert!(!h.service.update_pending_reboot());
    h.action(&ALICE, Action::ValidateImage);
    h.action(&ALICE, Action::InvalidateImage);
    let replies = h.sink.to(&ALICE);
    assert_eq!(
        replies[replies.len() - 2..],
        [
            Response::Error(ErrorCode::ActionWrongTime),
            Response::Error(ErrorCode::ActionWrongTime),
        ]
    );
}
