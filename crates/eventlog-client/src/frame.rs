//! Package wire protocol.
//!
//! A package is a single length-prefixed TCP frame, not a multipart message:
//!
//! ```text
//! u32 LE length (excludes itself)
//! u8  command
//! u8  flags            (bit 0 = authenticated)
//! [16]u8 correlation id
//! ---- if authenticated ----
//! u8  login length, login bytes
//! u8  password length, password bytes
//! ---- payload ----
//! remaining bytes
//! ```
//!
//! The codec only validates the outer frame; payload interpretation per
//! command is the concern of `operations`/`subscriptions`.

use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use eventlog_settings::UserCredentials;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::NotHandledReason;

/// Largest frame the codec will decode, guarding against a runaway length
/// prefix from a misbehaving peer.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 1 + 1 + 16;
const LENGTH_PREFIX_LEN: usize = 4;

/// Commands needed to drive the documented connection/operation/subscription
/// lifecycle. Additional application-level commands can be layered on top of
/// `Package` by treating `payload` opaquely.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    HeartbeatRequest = 0x01,
    HeartbeatResponse = 0x02,
    ClientIdentify = 0x03,
    ClientIdentified = 0x04,
    WriteEvents = 0x10,
    WriteEventsCompleted = 0x11,
    DeleteStream = 0x12,
    DeleteStreamCompleted = 0x13,
    ReadEvent = 0x20,
    ReadEventCompleted = 0x21,
    ReadStreamEventsForward = 0x22,
    ReadStreamEventsForwardCompleted = 0x23,
    ReadStreamEventsBackward = 0x24,
    ReadStreamEventsBackwardCompleted = 0x25,
    ReadAllEventsForward = 0x26,
    ReadAllEventsForwardCompleted = 0x27,
    ReadAllEventsBackward = 0x28,
    ReadAllEventsBackwardCompleted = 0x29,
    SubscribeToStream = 0x30,
    SubscriptionConfirmation = 0x31,
    StreamEventAppeared = 0x32,
    UnsubscribeFromStream = 0x33,
    SubscriptionDropped = 0x34,
    CreatePersistentSubscription = 0x40,
    CreatePersistentSubscriptionCompleted = 0x41,
    UpdatePersistentSubscription = 0x42,
    UpdatePersistentSubscriptionCompleted = 0x43,
    DeletePersistentSubscription = 0x44,
    DeletePersistentSubscriptionCompleted = 0x45,
    NotHandled = 0xF0,
    BadRequest = 0xF1,
    NotAuthenticated = 0xF2,
}

impl Command {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        use Command::*;
        Ok(match value {
            0x01 => HeartbeatRequest,
            0x02 => HeartbeatResponse,
            0x03 => ClientIdentify,
            0x04 => ClientIdentified,
            0x10 => WriteEvents,
            0x11 => WriteEventsCompleted,
            0x12 => DeleteStream,
            0x13 => DeleteStreamCompleted,
            0x20 => ReadEvent,
            0x21 => ReadEventCompleted,
            0x22 => ReadStreamEventsForward,
            0x23 => ReadStreamEventsForwardCompleted,
            0x24 => ReadStreamEventsBackward,
            0x25 => ReadStreamEventsBackwardCompleted,
            0x26 => ReadAllEventsForward,
            0x27 => ReadAllEventsForwardCompleted,
            0x28 => ReadAllEventsBackward,
            0x29 => ReadAllEventsBackwardCompleted,
            0x30 => SubscribeToStream,
            0x31 => SubscriptionConfirmation,
            0x32 => StreamEventAppeared,
            0x33 => UnsubscribeFromStream,
            0x34 => SubscriptionDropped,
            0x40 => CreatePersistentSubscription,
            0x41 => CreatePersistentSubscriptionCompleted,
            0x42 => UpdatePersistentSubscription,
            0x43 => UpdatePersistentSubscriptionCompleted,
            0x44 => DeletePersistentSubscription,
            0x45 => DeletePersistentSubscriptionCompleted,
            0xF0 => NotHandled,
            0xF1 => BadRequest,
            0xF2 => NotAuthenticated,
            other => return Err(FrameError::InvalidCommand(other)),
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Any frame except an explicit disconnect/bad-request acts as a
    /// liveness signal for heartbeat bookkeeping.
    pub fn indicates_liveness(self) -> bool {
        !matches!(self, Command::BadRequest)
    }
}

const FLAG_AUTHENTICATED: u8 = 0b0000_0001;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid command byte: {0:#04x}")]
    InvalidCommand(u8),
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
    #[error("frame length {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLong(usize),
    #[error("invalid utf-8 in authenticated credentials")]
    InvalidUtf8,
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err.to_string())
    }
}

/// A single parsed protocol package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub command: Command,
    pub correlation_id: Uuid,
    pub credentials: Option<UserCredentials>,
    pub payload: Bytes,
}

impl Package {
    pub fn new(command: Command, correlation_id: Uuid, payload: Bytes) -> Self {
        Self {
            command,
            correlation_id,
            credentials: None,
            payload,
        }
    }

    pub fn with_credentials(mut self, credentials: UserCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn heartbeat_request() -> Self {
        Self::new(Command::HeartbeatRequest, Uuid::new_v4(), Bytes::new())
    }

    pub fn heartbeat_response(correlation_id: Uuid) -> Self {
        Self::new(Command::HeartbeatResponse, correlation_id, Bytes::new())
    }

    /// Encode this package's body (everything after the length prefix) into
    /// `dst`. Does not write the length prefix itself.
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.command.to_u8());
        let flags = if self.credentials.is_some() {
            FLAG_AUTHENTICATED
        } else {
            0
        };
        dst.put_u8(flags);
        dst.put_slice(self.correlation_id.as_bytes());
        if let Some(creds) = &self.credentials {
            dst.put_u8(creds.login.len() as u8);
            dst.put_slice(creds.login.as_bytes());
            dst.put_u8(creds.password.len() as u8);
            dst.put_slice(creds.password.as_bytes());
        }
        dst.put_slice(&self.payload);
    }

    /// Encode the full frame, including its length prefix, into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        self.encode_body(&mut body);
        dst.put_u32_le(body.len() as u32);
        dst.put_slice(&body);
    }

    /// Decode a package from a body buffer (length prefix already consumed
    /// and validated by the caller).
    fn decode_body(mut body: Bytes) -> Result<Self, FrameError> {
        if body.len() < HEADER_LEN {
            return Err(FrameError::FrameTooShort {
                expected: HEADER_LEN,
                actual: body.len(),
            });
        }
        let command = Command::from_u8(body.get_u8())?;
        let flags = body.get_u8();
        let mut correlation_bytes = [0u8; 16];
        body.copy_to_slice(&mut correlation_bytes);
        let correlation_id = Uuid::from_bytes(correlation_bytes);

        let credentials = if flags & FLAG_AUTHENTICATED != 0 {
            if body.is_empty() {
                return Err(FrameError::FrameTooShort {
                    expected: 1,
                    actual: 0,
                });
            }
            let login_len = body.get_u8() as usize;
            if body.len() < login_len {
                return Err(FrameError::FrameTooShort {
                    expected: login_len,
                    actual: body.len(),
                });
            }
            let login = std::str::from_utf8(&body.copy_to_bytes(login_len))
                .map_err(|_| FrameError::InvalidUtf8)?
                .to_string();
            if body.is_empty() {
                return Err(FrameError::FrameTooShort {
                    expected: 1,
                    actual: 0,
                });
            }
            let pass_len = body.get_u8() as usize;
            if body.len() < pass_len {
                return Err(FrameError::FrameTooShort {
                    expected: pass_len,
                    actual: body.len(),
                });
            }
            let password = std::str::from_utf8(&body.copy_to_bytes(pass_len))
                .map_err(|_| FrameError::InvalidUtf8)?
                .to_string();
            Some(UserCredentials { login, password })
        } else {
            None
        };

        Ok(Package {
            command,
            correlation_id,
            credentials,
            payload: body,
        })
    }

    pub fn indicates_liveness(&self) -> bool {
        self.command.indicates_liveness()
    }
}

/// Encode a `SubscriptionConfirmation` payload: the commit position the
/// subscription was confirmed at, and, for stream (not all-stream)
/// subscriptions, the last event number.
pub fn encode_subscription_confirmation(last_commit_position: i64, last_event_number: Option<i64>) -> Bytes {
    let mut out = BytesMut::new();
    out.put_i64_le(last_commit_position);
    match last_event_number {
        Some(n) => {
            out.put_u8(1);
            out.put_i64_le(n);
        }
        None => out.put_u8(0),
    }
    out.freeze()
}

/// Decode a `SubscriptionConfirmation` payload. A missing or short payload
/// decodes to `(0, None)` rather than erroring, since some servers confirm
/// all-stream subscriptions with an empty body.
pub fn decode_subscription_confirmation(payload: &Bytes) -> (i64, Option<i64>) {
    let mut body = payload.clone();
    if body.len() < 8 {
        return (0, None);
    }
    let last_commit_position = body.get_i64_le();
    let last_event_number = if body.len() >= 9 && body.get_u8() == 1 {
        Some(body.get_i64_le())
    } else {
        None
    };
    (last_commit_position, last_event_number)
}

/// Encode a `NotHandled` payload: the sub-reason, plus (for `NotMaster`) the
/// master endpoint the caller should reconnect to.
pub fn encode_not_handled(reason: NotHandledReason, master_endpoint: Option<SocketAddr>) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u8(match reason {
        NotHandledReason::NotMaster => 0,
        NotHandledReason::NotReady => 1,
        NotHandledReason::TooBusy => 2,
    });
    if let Some(addr) = master_endpoint {
        let host = addr.ip().to_string();
        out.put_u8(host.len() as u8);
        out.put_slice(host.as_bytes());
        out.put_u16_le(addr.port());
    }
    out.freeze()
}

/// Decode a `NotHandled` payload. Returns `None` if the reason byte itself
/// is missing or unrecognized; a recognized reason with a malformed or
/// absent master endpoint still decodes, just without an address to
/// reconnect to.
pub fn decode_not_handled(payload: &Bytes) -> Option<(NotHandledReason, Option<SocketAddr>)> {
    let mut body = payload.clone();
    if body.is_empty() {
        return None;
    }
    let reason = match body.get_u8() {
        0 => NotHandledReason::NotMaster,
        1 => NotHandledReason::NotReady,
        2 => NotHandledReason::TooBusy,
        _ => return None,
    };
    let master_endpoint = if !body.is_empty() {
        let host_len = body.get_u8() as usize;
        if body.len() < host_len + 2 {
            None
        } else {
            let host_bytes = body.copy_to_bytes(host_len);
            let port = body.get_u16_le();
            std::str::from_utf8(&host_bytes)
                .ok()
                .and_then(|host| format!("{host}:{port}").parse::<SocketAddr>().ok())
        }
    } else {
        None
    };
    Some((reason, master_endpoint))
}

/// A `tokio_util::codec::{Encoder,Decoder}` pair over `Package`, used to
/// wrap a raw `TcpStream` into a `Framed<TcpStream, PackageCodec>`.
#[derive(Debug, Default)]
pub struct PackageCodec;

impl tokio_util::codec::Encoder<Package> for PackageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Package, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

impl tokio_util::codec::Decoder for PackageCodec {
    type Item = Package;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let length = u32::from_le_bytes(src[..LENGTH_PREFIX_LEN].try_into().unwrap()) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLong(length));
        }
        if src.len() < LENGTH_PREFIX_LEN + length {
            src.reserve(LENGTH_PREFIX_LEN + length - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX_LEN);
        let body = src.split_to(length).freeze();
        Package::decode_body(body).map(Some)
    }
}
