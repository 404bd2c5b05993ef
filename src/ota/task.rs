//! Session Task: the blocking write loop.
//!
//! One thread per session. It takes the Flash Writer out of the shared slot,
//! drains its inbox in arrival order, and funnels every outcome through
//! [`finish`], which rolls back the partition on failure, releases the
//! registry, parks the writer again and only then returns the session to
//! `Idle`.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};

use log::{debug, error, info, warn};

use crate::app::events::OtaEvent;
use crate::app::ports::{EventSink, FirmwarePort, FlashWriter, FrameSink};
use crate::error::FlashError;

use super::image;
use super::packet::{AbortReason, ErrorCode, Response, SessionFlags};
use super::service::{Shared, TaskMessage};
use super::session::SessionState;

type Outcome = Result<(), AbortReason>;

pub(crate) fn run<F, P, S, E>(shared: Arc<Shared<F, P, S, E>>, inbox: Receiver<TaskMessage>)
where
    F: FlashWriter,
    P: FirmwarePort,
    S: FrameSink,
    E: EventSink,
{
    let parked = shared.lock().writer.take();
    let Some(mut writer) = parked else {
        error!("OTA task: flash writer missing");
        return finish(&shared, None, Err(AbortReason::OtaBeginError));
    };

    let outcome = transfer(&shared, &mut writer, &inbox);
    finish(&shared, Some(writer), outcome);
}

fn transfer<F, P, S, E>(
    shared: &Shared<F, P, S, E>,
    writer: &mut F,
    inbox: &Receiver<TaskMessage>,
) -> Outcome
where
    F: FlashWriter,
    P: FirmwarePort,
    S: FrameSink,
    E: EventSink,
{
    let max_chunk = shared.config.max_chunk_size;
    let (total_size, timeout, flags) = {
        let inner = shared.lock();
        (inner.session.total_size, inner.session.timeout, inner.session.flags)
    };

    writer.begin(total_size).map_err(|e| {
        warn!("OTA task: begin failed: {}", e);
        match e {
            FlashError::NoPartition => AbortReason::GetPartitionError,
            _ => AbortReason::OtaBeginError,
        }
    })?;
    checkpoint(shared)?;
    send_to_owner(
        shared,
        Response::State {
            size_received: 0,
            size_requested: total_size.min(max_chunk),
        },
    );

    let mut version_checked = !flags.needs_version_check();

    loop {
        let msg = match inbox.recv_timeout(timeout) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => {
                let mut inner = shared.lock();
                // An abort recorded just before the deadline keeps its reason.
                inner.session.mark_aborted(AbortReason::Timeout);
                return Err(inner.session.pending_abort().unwrap_or(AbortReason::Timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(shared.lock().session.pending_abort().unwrap_or(AbortReason::UserRequest));
            }
        };

        checkpoint(shared)?;
        let TaskMessage::Data { chunk, is_end } = msg else {
            continue;
        };

        if !chunk.is_empty() {
            if !shared.lock().session.fits(chunk.len()) {
                warn!("OTA task: {}-byte chunk overruns declared size, discarded", chunk.len());
                send_to_owner(shared, Response::Error(ErrorCode::PacketSizeError));
            } else {
                if !version_checked {
                    check_version(shared, &chunk, flags)?;
                    version_checked = true;
                }

                writer.write(&chunk).map_err(|e| {
                    warn!("OTA task: write failed: {}", e);
                    AbortReason::OtaWriteError
                })?;

                let (received, requested) = {
                    let mut inner = shared.lock();
                    if let Some(reason) = inner.session.pending_abort() {
                        return Err(reason);
                    }
                    let received = inner.session.advance(chunk.len() as u32);
                    (received, inner.session.next_request(max_chunk))
                };
                debug!("OTA task: {}/{} bytes", received, total_size);
                shared.lock().events.emit(&OtaEvent::Progress {
                    received,
                    total: total_size,
                });
                // `{total, 0}` is reserved for the completion packet.
                if received < total_size {
                    send_to_owner(
                        shared,
                        Response::State {
                            size_received: received,
                            size_requested: requested,
                        },
                    );
                }
            }
        }

        if is_end {
            return finalize(shared, writer);
        }
    }
}

/// Receiving → Finalizing → end + set boot partition.
fn finalize<F, P, S, E>(shared: &Shared<F, P, S, E>, writer: &mut F) -> Outcome
where
    F: FlashWriter,
    S: FrameSink,
    E: EventSink,
{
    {
        let mut inner = shared.lock();
        if let Some(reason) = inner.session.pending_abort() {
            return Err(reason);
        }
        if !inner.session.is_complete() {
            warn!(
                "OTA task: end of stream at {}/{} bytes",
                inner.session.bytes_received, inner.session.total_size
            );
            return Err(AbortReason::OtaEndError);
        }
        inner.session.state = SessionState::Finalizing;
    }

    writer.end().map_err(|e| {
        warn!("OTA task: end failed: {}", e);
        AbortReason::OtaEndError
    })?;
    writer.set_boot_partition().map_err(|e| {
        warn!("OTA task: set boot partition failed: {}", e);
        AbortReason::SetPartitionError
    })
}

fn check_version<F, P, S, E>(shared: &Shared<F, P, S, E>, head: &[u8], flags: SessionFlags) -> Outcome
where
    P: FirmwarePort,
{
    let running = shared.firmware.running_version();
    let last_invalid = shared.firmware.last_invalid_version();
    match image::check_version(head, flags, running.as_deref(), last_invalid.as_deref()) {
        Ok(incoming) => {
            info!("OTA task: incoming image version '{}'", incoming);
            Ok(())
        }
        Err(reason) => {
            warn!(
                "OTA task: image refused ({}), running={:?} last_invalid={:?}",
                reason, running, last_invalid
            );
            Err(reason)
        }
    }
}

/// Bail out with the recorded reason if an abort is pending.
fn checkpoint<F, P, S, E>(shared: &Shared<F, P, S, E>) -> Outcome
where
    S: FrameSink,
    E: EventSink,
{
    match shared.lock().session.pending_abort() {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}

fn send_to_owner<F, P, S, E>(shared: &Shared<F, P, S, E>, response: Response)
where
    S: FrameSink,
    E: EventSink,
{
    let owner = shared.lock().registry.owner();
    if let Some(owner) = owner {
        shared.send(&owner, response);
    }
}

/// Single cleanup funnel for every session outcome.
fn finish<F, P, S, E>(shared: &Shared<F, P, S, E>, writer: Option<F>, outcome: Outcome)
where
    F: FlashWriter,
    P: FirmwarePort,
    S: FrameSink,
    E: EventSink,
{
    let mut writer = writer;
    if outcome.is_err() {
        if let Some(w) = writer.as_mut() {
            w.abort();
        }
    }

    let mut inner = shared.lock();
    let owner = inner.registry.release();
    let total_size = inner.session.total_size;
    let bytes_received = inner.session.bytes_received;
    let flags = inner.session.flags;
    inner.session.reset();
    inner.inbox = None;
    if writer.is_some() {
        inner.writer = writer;
    }

    match outcome {
        Ok(()) => {
            info!("OTA task: update complete ({} bytes)", total_size);
            inner.update_pending_reboot = true;
            inner.events.emit(&OtaEvent::Completed { total_size });
        }
        Err(reason) => {
            warn!("OTA task: session aborted ({}) at {} bytes", reason, bytes_received);
            inner.events.emit(&OtaEvent::Aborted {
                reason,
                bytes_received,
            });
        }
    }
    drop(inner);

    match (outcome, owner) {
        (Ok(()), owner) => {
            let done = Response::State {
                size_received: total_size,
                size_requested: 0,
            };
            if let Some(owner) = owner.as_ref() {
                shared.send(owner, done);
            }
            shared.sink.broadcast(done.encode().as_bytes(), owner.as_ref());

            if flags.reset_after_success {
                info!("OTA task: restarting in {:?}", shared.config.reset_delay());
                std::thread::sleep(shared.config.reset_delay());
                shared.firmware.restart();
            }
        }
        (Err(AbortReason::UserDisconnect), _) | (Err(_), None) => {}
        (Err(reason), Some(owner)) => shared.send(&owner, Response::Abort(reason)),
    }
}
