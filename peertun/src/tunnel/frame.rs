/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use peertun_types::net::{ConnectError, Endpoint};

const TYPE_OPEN: u8 = 1;
const TYPE_OPENED: u8 = 2;
const TYPE_REFUSED: u8 = 3;
const TYPE_DATA: u8 = 4;
const TYPE_WINDOW: u8 = 5;
const TYPE_FIN: u8 = 6;
const TYPE_RESET: u8 = 7;

const HEADER_SIZE: usize = 5;

/// Why the far side did not open a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefuseReason {
    ConnectionRefused,
    HostUnreachable,
    NetworkUnreachable,
    TimedOut,
    NotAllowed,
    ResolveFailed,
    GeneralFailure,
}

impl RefuseReason {
    const fn code(&self) -> u8 {
        match self {
            RefuseReason::ConnectionRefused => 1,
            RefuseReason::HostUnreachable => 2,
            RefuseReason::NetworkUnreachable => 3,
            RefuseReason::TimedOut => 4,
            RefuseReason::NotAllowed => 5,
            RefuseReason::ResolveFailed => 6,
            RefuseReason::GeneralFailure => 7,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        let reason = match code {
            1 => RefuseReason::ConnectionRefused,
            2 => RefuseReason::HostUnreachable,
            3 => RefuseReason::NetworkUnreachable,
            4 => RefuseReason::TimedOut,
            5 => RefuseReason::NotAllowed,
            6 => RefuseReason::ResolveFailed,
            7 => RefuseReason::GeneralFailure,
            _ => return None,
        };
        Some(reason)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            RefuseReason::ConnectionRefused => "connection refused",
            RefuseReason::HostUnreachable => "host unreachable",
            RefuseReason::NetworkUnreachable => "network unreachable",
            RefuseReason::TimedOut => "connect timed out",
            RefuseReason::NotAllowed => "not allowed",
            RefuseReason::ResolveFailed => "resolve failed",
            RefuseReason::GeneralFailure => "general failure",
        }
    }
}

impl fmt::Display for RefuseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ConnectError> for RefuseReason {
    fn from(e: &ConnectError) -> Self {
        match e {
            ConnectError::ConnectionRefused | ConnectError::ConnectionReset => {
                RefuseReason::ConnectionRefused
            }
            ConnectError::NetworkUnreachable => RefuseReason::NetworkUnreachable,
            ConnectError::HostUnreachable => RefuseReason::HostUnreachable,
            ConnectError::TimedOut => RefuseReason::TimedOut,
            ConnectError::ResolveFailed(_) => RefuseReason::ResolveFailed,
            ConnectError::Canceled | ConnectError::UnspecifiedError(_) => {
                RefuseReason::GeneralFailure
            }
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum FrameDecodeError {
    #[error("frame too short")]
    TooShort,
    #[error("unknown frame type {0}")]
    UnknownType(u8),
    #[error("invalid endpoint")]
    InvalidEndpoint,
    #[error("invalid refuse reason {0}")]
    InvalidReason(u8),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    Open { id: u32, destination: Endpoint },
    Opened { id: u32, bound: Endpoint },
    Refused { id: u32, reason: RefuseReason },
    Data { id: u32, payload: Bytes },
    Window { id: u32, credit: u32 },
    Fin { id: u32 },
    Reset { id: u32 },
}

fn put_endpoint(buf: &mut BytesMut, endpoint: &Endpoint) {
    let s = endpoint.to_string();
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_endpoint(buf: &mut Bytes) -> Result<Endpoint, FrameDecodeError> {
    if buf.remaining() < 2 {
        return Err(FrameDecodeError::TooShort);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() != len {
        return Err(FrameDecodeError::InvalidEndpoint);
    }
    let s = std::str::from_utf8(buf.chunk()).map_err(|_| FrameDecodeError::InvalidEndpoint)?;
    Endpoint::from_str(s).map_err(|_| FrameDecodeError::InvalidEndpoint)
}

impl Frame {
    pub(crate) fn encode(&self) -> Bytes {
        match self {
            Frame::Open { id, destination } => {
                let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
                buf.put_u8(TYPE_OPEN);
                buf.put_u32(*id);
                put_endpoint(&mut buf, destination);
                buf.freeze()
            }
            Frame::Opened { id, bound } => {
                let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
                buf.put_u8(TYPE_OPENED);
                buf.put_u32(*id);
                put_endpoint(&mut buf, bound);
                buf.freeze()
            }
            Frame::Refused { id, reason } => {
                let mut buf = BytesMut::with_capacity(HEADER_SIZE + 1);
                buf.put_u8(TYPE_REFUSED);
                buf.put_u32(*id);
                buf.put_u8(reason.code());
                buf.freeze()
            }
            Frame::Data { id, payload } => {
                let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
                buf.put_u8(TYPE_DATA);
                buf.put_u32(*id);
                buf.put_slice(payload);
                buf.freeze()
            }
            Frame::Window { id, credit } => {
                let mut buf = BytesMut::with_capacity(HEADER_SIZE + 4);
                buf.put_u8(TYPE_WINDOW);
                buf.put_u32(*id);
                buf.put_u32(*credit);
                buf.freeze()
            }
            Frame::Fin { id } => Frame::header_only(TYPE_FIN, *id),
            Frame::Reset { id } => Frame::header_only(TYPE_RESET, *id),
        }
    }

    fn header_only(frame_type: u8, id: u32) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u8(frame_type);
        buf.put_u32(id);
        buf.freeze()
    }

    pub(crate) fn decode(mut msg: Bytes) -> Result<Self, FrameDecodeError> {
        if msg.len() < HEADER_SIZE {
            return Err(FrameDecodeError::TooShort);
        }
        let frame_type = msg.get_u8();
        let id = msg.get_u32();
        match frame_type {
            TYPE_OPEN => Ok(Frame::Open {
                id,
                destination: get_endpoint(&mut msg)?,
            }),
            TYPE_OPENED => Ok(Frame::Opened {
                id,
                bound: get_endpoint(&mut msg)?,
            }),
            TYPE_REFUSED => {
                if msg.remaining() < 1 {
                    return Err(FrameDecodeError::TooShort);
                }
                let code = msg.get_u8();
                let reason =
                    RefuseReason::from_code(code).ok_or(FrameDecodeError::InvalidReason(code))?;
                Ok(Frame::Refused { id, reason })
            }
            TYPE_DATA => Ok(Frame::Data { id, payload: msg }),
            TYPE_WINDOW => {
                if msg.remaining() < 4 {
                    return Err(FrameDecodeError::TooShort);
                }
                Ok(Frame::Window {
                    id,
                    credit: msg.get_u32(),
                })
            }
            TYPE_FIN => Ok(Frame::Fin { id }),
            TYPE_RESET => Ok(Frame::Reset { id }),
            _ => Err(FrameDecodeError::UnknownType(frame_type)),
        }
    }

    pub(crate) fn id(&self) -> u32 {
        match self {
            Frame::Open { id, .. }
            | Frame::Opened { id, .. }
            | Frame::Refused { id, .. }
            | Frame::Data { id, .. }
            | Frame::Window { id, .. }
            | Frame::Fin { id }
            | Frame::Reset { id } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_layout() {
        let frame = Frame::Open {
            id: 3,
            destination: Endpoint::from_str("example.com:80").unwrap(),
        };
        let encoded = frame.encode();
        assert_eq!(&encoded[..5], &[TYPE_OPEN, 0, 0, 0, 3]);
        assert_eq!(&encoded[5..7], &[0, 14]);
        assert_eq!(&encoded[7..], b"example.com:80");
        assert_eq!(Frame::decode(encoded).unwrap(), frame);
    }

    #[test]
    fn data_slice() {
        let frame = Frame::Data {
            id: 0x01020304,
            payload: Bytes::from_static(b"payload"),
        };
        let decoded = Frame::decode(frame.encode()).unwrap();
        assert_eq!(decoded.id(), 0x01020304);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn control_frames() {
        for frame in [
            Frame::Window { id: 1, credit: 65536 },
            Frame::Fin { id: 2 },
            Frame::Reset { id: 3 },
            Frame::Refused {
                id: 4,
                reason: RefuseReason::NotAllowed,
            },
            Frame::Opened {
                id: 5,
                bound: Endpoint::from_str("[::1]:4000").unwrap(),
            },
        ] {
            assert_eq!(Frame::decode(frame.encode()).unwrap(), frame);
        }
    }

    #[test]
    fn malformed() {
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[1, 0, 0])),
            Err(FrameDecodeError::TooShort)
        ));
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[99, 0, 0, 0, 1])),
            Err(FrameDecodeError::UnknownType(99))
        ));
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[TYPE_REFUSED, 0, 0, 0, 1, 42])),
            Err(FrameDecodeError::InvalidReason(42))
        ));
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[TYPE_OPEN, 0, 0, 0, 1, 0, 9, b'x'])),
            Err(FrameDecodeError::InvalidEndpoint)
        ));
    }

    #[test]
    fn refuse_from_connect_error() {
        assert_eq!(
            RefuseReason::from(&ConnectError::ConnectionRefused),
            RefuseReason::ConnectionRefused
        );
        assert_eq!(
            RefuseReason::from(&ConnectError::TimedOut),
            RefuseReason::TimedOut
        );
        assert_eq!(
            RefuseReason::from(&ConnectError::Canceled),
            RefuseReason::GeneralFailure
        );
    }
}
