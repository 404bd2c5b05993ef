//! OTA packet codec.
//!
//! Fixed-layout binary frames, one per websocket message:
//!
//! ```text
//! start_request   [1][total_size u32][timeout u16][flags]        8 B
//! state_request   [2][flags] + optional image chunk              2 B + N
//! state_packet    [2][size_received u32][size_requested u32]     9 B
//! abort_request   [3]                                            1 B
//! abort_packet    [3][reason]                                    2 B
//! action_request  [4][action]                                    2 B
//! action_packet   [4][action][result i32]                        6 B
//! error_packet    [10][error_code]                               2 B
//! ```
//!
//! Integers are little-endian. Flag bytes are packed LSB-first by explicit
//! shifts; reserved bits are written as zero and ignored when read.
//! Requests and responses reuse the `state`, `abort` and `action`
//! discriminants, so each direction has its own decoder.

use core::fmt;

pub const START_REQUEST_LEN: usize = 8;
pub const STATE_REQUEST_HEADER_LEN: usize = 2;
pub const ABORT_REQUEST_LEN: usize = 1;
pub const ACTION_REQUEST_LEN: usize = 2;

pub const STATE_PACKET_LEN: usize = 9;
pub const ABORT_PACKET_LEN: usize = 2;
pub const ACTION_PACKET_LEN: usize = 6;
pub const ERROR_PACKET_LEN: usize = 2;

/// Largest response frame.
pub const MAX_RESPONSE_LEN: usize = STATE_PACKET_LEN;

const FLAG_RESET: u8 = 1 << 0;
const FLAG_CHECK_LAST_INVALID: u8 = 1 << 1;
const FLAG_CHECK_SAME_VERSION: u8 = 1 << 2;
const FLAG_IS_END: u8 = 1 << 0;

// ── Enumerations ──────────────────────────────────────────────

/// Leading byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Start = 1,
    State = 2,
    Abort = 3,
    Action = 4,
    Error = 10,
}

impl Command {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Start),
            2 => Some(Self::State),
            3 => Some(Self::Abort),
            4 => Some(Self::Action),
            10 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Code carried by an `error_packet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    AlreadyRunning = 1,
    NotRunning = 2,
    WrongUser = 3,
    PacketSizeError = 4,
    NoCommandFound = 5,
    NoActionFound = 6,
    ActionWrongTime = 7,
}

impl ErrorCode {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Success),
            1 => Some(Self::AlreadyRunning),
            2 => Some(Self::NotRunning),
            3 => Some(Self::WrongUser),
            4 => Some(Self::PacketSizeError),
            5 => Some(Self::NoCommandFound),
            6 => Some(Self::NoActionFound),
            7 => Some(Self::ActionWrongTime),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::AlreadyRunning => "already running",
            Self::NotRunning => "not running",
            Self::WrongUser => "wrong user",
            Self::PacketSizeError => "packet size error",
            Self::NoCommandFound => "no command found",
            Self::NoActionFound => "no action found",
            Self::ActionWrongTime => "action at wrong time",
        };
        f.write_str(s)
    }
}

/// Why a session ended without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortReason {
    NoAbort = 0,
    UserRequest = 1,
    UserDisconnect = 2,
    GetPartitionError = 3,
    InvalidVersion = 4,
    SameVersion = 5,
    Timeout = 6,
    OtaBeginError = 7,
    OtaWriteError = 8,
    OtaEndError = 9,
    SetPartitionError = 10,
}

impl AbortReason {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::NoAbort),
            1 => Some(Self::UserRequest),
            2 => Some(Self::UserDisconnect),
            3 => Some(Self::GetPartitionError),
            4 => Some(Self::InvalidVersion),
            5 => Some(Self::SameVersion),
            6 => Some(Self::Timeout),
            7 => Some(Self::OtaBeginError),
            8 => Some(Self::OtaWriteError),
            9 => Some(Self::OtaEndError),
            10 => Some(Self::SetPartitionError),
            _ => None,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoAbort => "no abort",
            Self::UserRequest => "user request",
            Self::UserDisconnect => "user disconnect",
            Self::GetPartitionError => "get partition error",
            Self::InvalidVersion => "invalid version",
            Self::SameVersion => "same version",
            Self::Timeout => "timeout",
            Self::OtaBeginError => "OTA begin error",
            Self::OtaWriteError => "OTA write error",
            Self::OtaEndError => "OTA end error",
            Self::SetPartitionError => "set partition error",
        };
        f.write_str(s)
    }
}

/// Out-of-band operation requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    Reset = 0,
    ValidateImage = 1,
    InvalidateImage = 2,
}

impl Action {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Reset),
            1 => Some(Self::ValidateImage),
            2 => Some(Self::InvalidateImage),
            _ => None,
        }
    }
}

// ── Flags ─────────────────────────────────────────────────────

/// Policy bits of a `start_request`, fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags {
    /// Restart the device after a successful update.
    pub reset_after_success: bool,
    /// Refuse an image whose version matches the last invalidated one.
    pub check_against_last_invalid: bool,
    /// Refuse an image whose version matches the running one.
    pub check_against_running_version: bool,
}

impl SessionFlags {
    pub const fn pack(self) -> u8 {
        let mut bits = 0;
        if self.reset_after_success {
            bits |= FLAG_RESET;
        }
        if self.check_against_last_invalid {
            bits |= FLAG_CHECK_LAST_INVALID;
        }
        if self.check_against_running_version {
            bits |= FLAG_CHECK_SAME_VERSION;
        }
        bits
    }

    pub const fn unpack(bits: u8) -> Self {
        Self {
            reset_after_success: bits & FLAG_RESET != 0,
            check_against_last_invalid: bits & FLAG_CHECK_LAST_INVALID != 0,
            check_against_running_version: bits & FLAG_CHECK_SAME_VERSION != 0,
        }
    }

    /// True when the image header has to be inspected before writing.
    pub const fn needs_version_check(self) -> bool {
        self.check_against_last_invalid || self.check_against_running_version
    }
}

// ── Decode errors ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Zero-length frame.
    Empty,
    /// Leading byte is not a command valid in this direction.
    UnknownCommand(u8),
    /// Frame length does not match the command's fixed layout.
    Length {
        command: Command,
        expected: usize,
        actual: usize,
    },
    /// `action_request` / `action_packet` carries an unknown action.
    UnknownAction(u8),
    /// A response enum field holds an unknown value.
    UnknownValue(u8),
}

impl DecodeError {
    /// Error code reported back to the sender of the offending frame.
    pub const fn error_code(self) -> ErrorCode {
        match self {
            Self::Empty | Self::Length { .. } | Self::UnknownValue(_) => ErrorCode::PacketSizeError,
            Self::UnknownCommand(_) => ErrorCode::NoCommandFound,
            Self::UnknownAction(_) => ErrorCode::NoActionFound,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::UnknownCommand(c) => write!(f, "unknown command {c}"),
            Self::Length {
                command,
                expected,
                actual,
            } => write!(f, "{command:?} frame is {actual} bytes, expected {expected}"),
            Self::UnknownAction(a) => write!(f, "unknown action {a}"),
            Self::UnknownValue(v) => write!(f, "unknown field value {v}"),
        }
    }
}

// ── Requests (client → device) ────────────────────────────────

/// Body of a `start_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRequest {
    pub total_size: u32,
    /// Maximum idle time between data frames, in milliseconds.
    pub timeout_ms: u16,
    pub flags: SessionFlags,
}

/// A decoded inbound frame. `State` borrows its image chunk from the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Start(StartRequest),
    State { is_end: bool, payload: &'a [u8] },
    Abort,
    Action(Action),
}

impl<'a> Request<'a> {
    pub fn decode(frame: &'a [u8]) -> Result<Self, DecodeError> {
        let (&raw, _) = frame.split_first().ok_or(DecodeError::Empty)?;
        let command = match Command::from_u8(raw) {
            Some(Command::Error) | None => return Err(DecodeError::UnknownCommand(raw)),
            Some(c) => c,
        };

        match command {
            Command::Start => {
                expect_len(command, frame, START_REQUEST_LEN)?;
                Ok(Self::Start(StartRequest {
                    total_size: le_u32(frame, 1),
                    timeout_ms: u16::from_le_bytes([frame[5], frame[6]]),
                    flags: SessionFlags::unpack(frame[7]),
                }))
            }
            Command::State => {
                if frame.len() < STATE_REQUEST_HEADER_LEN {
                    return Err(DecodeError::Length {
                        command,
                        expected: STATE_REQUEST_HEADER_LEN,
                        actual: frame.len(),
                    });
                }
                Ok(Self::State {
                    is_end: frame[1] & FLAG_IS_END != 0,
                    payload: &frame[STATE_REQUEST_HEADER_LEN..],
                })
            }
            Command::Abort => {
                expect_len(command, frame, ABORT_REQUEST_LEN)?;
                Ok(Self::Abort)
            }
            Command::Action => {
                expect_len(command, frame, ACTION_REQUEST_LEN)?;
                Action::from_u8(frame[1])
                    .map(Self::Action)
                    .ok_or(DecodeError::UnknownAction(frame[1]))
            }
            Command::Error => Err(DecodeError::UnknownCommand(raw)),
        }
    }

    /// Serialise the request. Client-side helper; the device only decodes.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::Start(req) => {
                let mut out = Vec::with_capacity(START_REQUEST_LEN);
                out.push(Command::Start as u8);
                out.extend_from_slice(&req.total_size.to_le_bytes());
                out.extend_from_slice(&req.timeout_ms.to_le_bytes());
                out.push(req.flags.pack());
                out
            }
            Self::State { is_end, payload } => {
                let mut out = Vec::with_capacity(STATE_REQUEST_HEADER_LEN + payload.len());
                out.push(Command::State as u8);
                out.push(if is_end { FLAG_IS_END } else { 0 });
                out.extend_from_slice(payload);
                out
            }
            Self::Abort => vec![Command::Abort as u8],
            Self::Action(action) => vec![Command::Action as u8, action as u8],
        }
    }
}

// ── Responses (device → client) ───────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    State {
        size_received: u32,
        size_requested: u32,
    },
    Abort(AbortReason),
    Action {
        action: Action,
        result: i32,
    },
    Error(ErrorCode),
}

impl Response {
    pub fn encode(&self) -> ResponseFrame {
        let mut frame = ResponseFrame::new();
        match *self {
            Self::State {
                size_received,
                size_requested,
            } => {
                frame.push(Command::State as u8);
                frame.extend(&size_received.to_le_bytes());
                frame.extend(&size_requested.to_le_bytes());
            }
            Self::Abort(reason) => {
                frame.push(Command::Abort as u8);
                frame.push(reason as u8);
            }
            Self::Action { action, result } => {
                frame.push(Command::Action as u8);
                frame.push(action as u8);
                frame.extend(&result.to_le_bytes());
            }
            Self::Error(code) => {
                frame.push(Command::Error as u8);
                frame.push(code as u8);
            }
        }
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let (&raw, _) = frame.split_first().ok_or(DecodeError::Empty)?;
        let command = match Command::from_u8(raw) {
            Some(Command::Start) | None => return Err(DecodeError::UnknownCommand(raw)),
            Some(c) => c,
        };

        match command {
            Command::State => {
                expect_len(command, frame, STATE_PACKET_LEN)?;
                Ok(Self::State {
                    size_received: le_u32(frame, 1),
                    size_requested: le_u32(frame, 5),
                })
            }
            Command::Abort => {
                expect_len(command, frame, ABORT_PACKET_LEN)?;
                AbortReason::from_u8(frame[1])
                    .map(Self::Abort)
                    .ok_or(DecodeError::UnknownValue(frame[1]))
            }
            Command::Action => {
                expect_len(command, frame, ACTION_PACKET_LEN)?;
                let action = Action::from_u8(frame[1]).ok_or(DecodeError::UnknownAction(frame[1]))?;
                Ok(Self::Action {
                    action,
                    result: le_u32(frame, 2) as i32,
                })
            }
            Command::Error => {
                expect_len(command, frame, ERROR_PACKET_LEN)?;
                ErrorCode::from_u8(frame[1])
                    .map(Self::Error)
                    .ok_or(DecodeError::UnknownValue(frame[1]))
            }
            Command::Start => Err(DecodeError::UnknownCommand(raw)),
        }
    }
}

/// Stack buffer holding one encoded response.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    buf: [u8; MAX_RESPONSE_LEN],
    len: usize,
}

impl ResponseFrame {
    const fn new() -> Self {
        Self {
            buf: [0; MAX_RESPONSE_LEN],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        self.buf[self.len] = byte;
        self.len += 1;
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Debug for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseFrame({:02x?})", self.as_bytes())
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn expect_len(command: Command, frame: &[u8], expected: usize) -> Result<(), DecodeError> {
    if frame.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::Length {
            command,
            expected,
            actual: frame.len(),
        })
    }
}

fn le_u32(frame: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
}
