//! Transfer State Machine, request-handling side.
//!
//! [`OtaService`] receives whole frames from the connection layer, decides
//! every transition that a client request can cause, and hands image data
//! to the Session Task through a bounded inbox. It never blocks on image
//! writes; the only blocking work done here is a short critical section on
//! the session lock and the boot-state calls of `action_request`, which run
//! outside that lock and are dispatched only while no session is bound.
//!
//! ```text
//!  WsHandler ──▶ OtaService ──try_send──▶ Session Task ──▶ FlashWriter
//!                    │                          │
//!                    └───────── FrameSink ◀─────┘
//! ```

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::adapters::log_sink::LogEventSink;
use crate::app::events::OtaEvent;
use crate::app::ports::{EventSink, FirmwarePort, FlashWriter, FrameSink};
use crate::config::OtaConfig;
use crate::drivers::task_pin::{Core, TaskSpec, spawn_on_core};
use crate::error::FlashError;

use super::packet::{AbortReason, Action, ErrorCode, Request, Response, StartRequest};
use super::registry::{ClientIdentity, ClientRegistry};
use super::session::{Session, SessionState, SessionStatus};
use super::task;

const TASK_NAME: &str = "ota-session\0";
const RESTART_TASK_NAME: &str = "ota-restart\0";
const RESTART_STACK_KB: usize = 3;

/// Message from the request handler to the Session Task.
#[derive(Debug)]
pub(crate) enum TaskMessage {
    Data { chunk: Vec<u8>, is_end: bool },
    /// Re-check the session state; sent after an abort was recorded.
    Wake,
}

/// State guarded by the session lock.
pub(crate) struct Inner<F, E> {
    pub(crate) registry: ClientRegistry,
    pub(crate) session: Session,
    /// Parked here between sessions; the Session Task holds it while running.
    pub(crate) writer: Option<F>,
    pub(crate) inbox: Option<SyncSender<TaskMessage>>,
    pub(crate) events: E,
    /// An update completed during this boot and has not been booted yet.
    pub(crate) update_pending_reboot: bool,
}

pub(crate) struct Shared<F, P, S, E> {
    pub(crate) config: OtaConfig,
    pub(crate) firmware: P,
    pub(crate) sink: S,
    inner: Mutex<Inner<F, E>>,
}

impl<F, P, S, E> Shared<F, P, S, E>
where
    S: FrameSink,
    E: EventSink,
{
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<F, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a response to one peer. Delivery failures are logged, not fatal.
    pub(crate) fn send(&self, to: &ClientIdentity, response: Response) {
        if let Err(e) = self.sink.send(to, response.encode().as_bytes()) {
            warn!("OTA: send {:?} to {} failed: {}", response, to, e);
        }
    }
}

/// The OTA session service. Cheap to clone; clones share one session.
pub struct OtaService<F, P, S, E = LogEventSink> {
    shared: Arc<Shared<F, P, S, E>>,
}

impl<F, P, S, E> Clone for OtaService<F, P, S, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F, P, S, E> OtaService<F, P, S, E>
where
    F: FlashWriter + 'static,
    P: FirmwarePort + 'static,
    S: FrameSink + 'static,
    E: EventSink + Send + 'static,
{
    pub fn new(config: OtaConfig, writer: F, firmware: P, sink: S, events: E) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                firmware,
                sink,
                inner: Mutex::new(Inner {
                    registry: ClientRegistry::new(),
                    session: Session::idle(),
                    writer: Some(writer),
                    inbox: None,
                    events,
                    update_pending_reboot: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &OtaConfig {
        &self.shared.config
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.shared.lock();
        SessionStatus {
            state: inner.session.state,
            owner: inner.registry.owner(),
            bytes_received: inner.session.bytes_received,
            total_size: inner.session.total_size,
        }
    }

    /// True once an update completed in this boot and was not reverted.
    pub fn update_pending_reboot(&self) -> bool {
        self.shared.lock().update_pending_reboot
    }

    // ── Inbound frames ────────────────────────────────────────

    /// Decode one whole frame from `client` and dispatch it.
    pub fn on_data(&self, client: &ClientIdentity, frame: &[u8]) {
        match Request::decode(frame) {
            Ok(Request::Start(req)) => self.start(client, req),
            Ok(Request::State { is_end, payload }) => self.data(client, is_end, payload),
            Ok(Request::Abort) => self.abort(client),
            Ok(Request::Action(action)) => self.action(client, action),
            Err(e) => {
                warn!("OTA: bad frame from {}: {}", client, e);
                self.reject(&mut self.shared.lock(), client, e.error_code());
            }
        }
    }

    /// Idle + `start_request`.
    pub fn start(&self, client: &ClientIdentity, req: StartRequest) {
        let mut inner = self.shared.lock();

        if inner.registry.is_bound() || !inner.session.is_idle() || inner.writer.is_none() {
            return self.reject(&mut inner, client, ErrorCode::AlreadyRunning);
        }
        if inner.update_pending_reboot {
            // begin would erase the image the boot partition now points at.
            info!("OTA: start from {} refused, completed update awaits reboot", client);
            return self.reject(&mut inner, client, ErrorCode::ActionWrongTime);
        }
        if req.total_size == 0 {
            return self.reject(&mut inner, client, ErrorCode::PacketSizeError);
        }
        if let Err(code) = inner.registry.bind(*client) {
            return self.reject(&mut inner, client, code);
        }

        let config = &self.shared.config;
        let timeout = config.timeout_for(req.timeout_ms);
        inner.session.open(&req, timeout);

        let (tx, rx) = mpsc::sync_channel(usize::from(config.queue_depth));
        inner.inbox = Some(tx);

        let spec = TaskSpec {
            core: Core::App,
            priority: config.task_priority,
            stack_kb: usize::from(config.task_stack_kb),
            name: TASK_NAME,
        };
        let shared = Arc::clone(&self.shared);

        // The lock is held across spawn; the task's first action is to take
        // it, so it cannot observe the session before the handle is stored.
        match spawn_on_core(spec, move || task::run(shared, rx)) {
            Ok(handle) => {
                inner.session.task = Some(handle);
                info!(
                    "OTA: session started by {} ({} bytes, timeout {:?}, flags {:?})",
                    client, req.total_size, timeout, req.flags
                );
                inner.events.emit(&OtaEvent::SessionStarted {
                    owner: *client,
                    total_size: req.total_size,
                });
            }
            Err(e) => {
                warn!("OTA: failed to spawn session task: {}", e);
                inner.registry.release();
                inner.session.reset();
                inner.inbox = None;
                inner.events.emit(&OtaEvent::Aborted {
                    reason: AbortReason::OtaBeginError,
                    bytes_received: 0,
                });
                drop(inner);
                self.shared
                    .send(client, Response::Abort(AbortReason::OtaBeginError));
            }
        }
    }

    /// Receiving + data payload (`state_request`, optionally with `is_end`).
    pub fn data(&self, client: &ClientIdentity, is_end: bool, payload: &[u8]) {
        let mut inner = self.shared.lock();

        if let Err(code) = Self::authorize(&inner, client) {
            return self.reject(&mut inner, client, code);
        }
        match inner.session.state {
            SessionState::Receiving => {}
            SessionState::Finalizing => {
                return self.reject(&mut inner, client, ErrorCode::ActionWrongTime);
            }
            SessionState::Idle | SessionState::Aborted(_) => {
                return self.reject(&mut inner, client, ErrorCode::NotRunning);
            }
        }
        if payload.len() > self.shared.config.max_chunk_size as usize {
            return self.reject(&mut inner, client, ErrorCode::PacketSizeError);
        }

        let Some(inbox) = inner.inbox.as_ref() else {
            return self.reject(&mut inner, client, ErrorCode::NotRunning);
        };
        let msg = TaskMessage::Data {
            chunk: payload.to_vec(),
            is_end,
        };
        match inbox.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // A dropped chunk would corrupt the image.
                warn!("OTA: inbox full, client ignored flow control");
                inner.session.mark_aborted(AbortReason::OtaWriteError);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("OTA: session task gone, chunk from {} dropped", client);
                self.reject(&mut inner, client, ErrorCode::NotRunning);
            }
        }
    }

    /// Any state + `abort_request`.
    pub fn abort(&self, client: &ClientIdentity) {
        let mut inner = self.shared.lock();

        if let Err(code) = Self::authorize(&inner, client) {
            return self.reject(&mut inner, client, code);
        }
        match inner.session.state {
            SessionState::Receiving => {
                info!("OTA: abort requested by {}", client);
                inner.session.mark_aborted(AbortReason::UserRequest);
                Self::wake(&inner);
            }
            SessionState::Finalizing => self.reject(&mut inner, client, ErrorCode::ActionWrongTime),
            SessionState::Idle | SessionState::Aborted(_) => {
                self.reject(&mut inner, client, ErrorCode::NotRunning)
            }
        }
    }

    /// Idle + `action_request`.
    pub fn action(&self, client: &ClientIdentity, action: Action) {
        let pending_reboot = {
            let mut inner = self.shared.lock();
            if inner.registry.is_bound() {
                let code = if inner.registry.verify(client) {
                    ErrorCode::ActionWrongTime
                } else {
                    ErrorCode::WrongUser
                };
                return self.reject(&mut inner, client, code);
            }
            inner.update_pending_reboot
        };

        // Boot-state calls run without the session lock. A start arriving
        // meanwhile is refused while `update_pending_reboot` is still set.
        let firmware = &self.shared.firmware;
        let pending_verify = firmware.pending_verify();
        let result = match action {
            Action::Reset => Ok(()),
            Action::ValidateImage if pending_verify => firmware.mark_valid(),
            Action::ValidateImage if pending_reboot => Ok(()),
            Action::InvalidateImage if pending_reboot => firmware.revert_boot_partition(),
            Action::InvalidateImage if pending_verify => firmware.mark_invalid_and_rollback(),
            Action::ValidateImage | Action::InvalidateImage => {
                return self.reject(&mut self.shared.lock(), client, ErrorCode::ActionWrongTime);
            }
        };

        let mut inner = self.shared.lock();
        if action == Action::InvalidateImage && pending_reboot && result.is_ok() {
            inner.update_pending_reboot = false;
        }
        let result = result.map_or_else(FlashError::code, |()| 0);
        info!("OTA: action {:?} from {} -> {}", action, client, result);
        inner
            .events
            .emit(&OtaEvent::ActionPerformed { action, result });
        drop(inner);

        self.shared.send(client, Response::Action { action, result });

        if action == Action::Reset {
            self.schedule_restart();
        }
    }

    /// Peer disconnect notification.
    pub fn on_close(&self, client: &ClientIdentity) {
        let mut inner = self.shared.lock();
        if !inner.registry.verify(client) {
            return;
        }
        match inner.session.state {
            SessionState::Receiving => {
                info!("OTA: owner {} disconnected", client);
                inner.session.mark_aborted(AbortReason::UserDisconnect);
                Self::wake(&inner);
            }
            SessionState::Finalizing => {
                info!("OTA: owner {} left during finalization", client);
            }
            SessionState::Idle | SessionState::Aborted(_) => {}
        }
    }

    // ── Helpers ───────────────────────────────────────────────

    /// Restart after `reset_delay` on a helper thread so the reply can drain
    /// and the request handler returns at once.
    fn schedule_restart(&self) {
        let shared = Arc::clone(&self.shared);
        let spec = TaskSpec {
            core: Core::Pro,
            priority: self.shared.config.task_priority,
            stack_kb: RESTART_STACK_KB,
            name: RESTART_TASK_NAME,
        };
        let spawned = spawn_on_core(spec, move || {
            std::thread::sleep(shared.config.reset_delay());
            shared.firmware.restart();
        });
        if let Err(e) = spawned {
            warn!("OTA: failed to spawn restart task ({}), restarting inline", e);
            std::thread::sleep(self.shared.config.reset_delay());
            self.shared.firmware.restart();
        }
    }

    /// Ownership gate for session-scoped commands.
    fn authorize(inner: &Inner<F, E>, client: &ClientIdentity) -> Result<(), ErrorCode> {
        if !inner.registry.is_bound() {
            Err(ErrorCode::NotRunning)
        } else if !inner.registry.verify(client) {
            Err(ErrorCode::WrongUser)
        } else {
            Ok(())
        }
    }

    fn wake(inner: &Inner<F, E>) {
        if let Some(inbox) = inner.inbox.as_ref() {
            // A full inbox wakes the task anyway.
            let _ = inbox.try_send(TaskMessage::Wake);
        }
    }

    fn reject(&self, inner: &mut Inner<F, E>, client: &ClientIdentity, code: ErrorCode) {
        warn!("OTA: rejecting request from {}: {}", client, code);
        inner.events.emit(&OtaEvent::Rejected {
            client: *client,
            code,
        });
        self.shared.send(client, Response::Error(code));
    }
}
