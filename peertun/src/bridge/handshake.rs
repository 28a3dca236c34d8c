/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{BufMut, Bytes, BytesMut};

use super::CandidateError;
use crate::channel::MessageChannel;

const MAGIC: &[u8; 2] = b"PT";
const VERSION: u8 = 1;
const TOKEN_SIZE: usize = 16;

const TYPE_HELLO: u8 = 1;
const TYPE_HELLO_ACK: u8 = 2;
const TYPE_COMMIT: u8 = 3;

#[derive(Debug, PartialEq, Eq)]
enum HandshakeMessage {
    Hello([u8; TOKEN_SIZE]),
    HelloAck([u8; TOKEN_SIZE]),
    Commit,
}

impl HandshakeMessage {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + TOKEN_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        match self {
            HandshakeMessage::Hello(token) => {
                buf.put_u8(TYPE_HELLO);
                buf.put_slice(token);
            }
            HandshakeMessage::HelloAck(token) => {
                buf.put_u8(TYPE_HELLO_ACK);
                buf.put_slice(token);
            }
            HandshakeMessage::Commit => buf.put_u8(TYPE_COMMIT),
        }
        buf.freeze()
    }

    fn decode(msg: &[u8]) -> Result<Self, CandidateError> {
        if msg.len() < 4 || &msg[0..2] != MAGIC {
            return Err(CandidateError::Handshake("bad magic"));
        }
        if msg[2] != VERSION {
            return Err(CandidateError::Handshake("unsupported version"));
        }
        let body = &msg[4..];
        let token = || -> Result<[u8; TOKEN_SIZE], CandidateError> {
            body.try_into()
                .map_err(|_| CandidateError::Handshake("invalid token length"))
        };
        match msg[3] {
            TYPE_HELLO => Ok(HandshakeMessage::Hello(token()?)),
            TYPE_HELLO_ACK => Ok(HandshakeMessage::HelloAck(token()?)),
            TYPE_COMMIT if body.is_empty() => Ok(HandshakeMessage::Commit),
            _ => Err(CandidateError::Handshake("unexpected message")),
        }
    }
}

async fn recv_message(channel: &mut MessageChannel) -> Result<HandshakeMessage, CandidateError> {
    match channel.recv().await? {
        Some(msg) => HandshakeMessage::decode(&msg),
        None => Err(CandidateError::Abandoned),
    }
}

/// Offerer side: hello and the echoed token.
pub(super) async fn offer(channel: &mut MessageChannel) -> Result<(), CandidateError> {
    let token: [u8; TOKEN_SIZE] = rand::random();
    channel.send(HandshakeMessage::Hello(token).encode()).await?;
    match recv_message(channel).await? {
        HandshakeMessage::HelloAck(echo) if echo == token => Ok(()),
        HandshakeMessage::HelloAck(_) => Err(CandidateError::Handshake("token mismatch")),
        _ => Err(CandidateError::Handshake("unexpected message")),
    }
}

pub(super) async fn commit(channel: &mut MessageChannel) -> Result<(), CandidateError> {
    channel.send(HandshakeMessage::Commit.encode()).await?;
    Ok(())
}

/// Answerer side: echo the hello.
pub(super) async fn answer(channel: &mut MessageChannel) -> Result<(), CandidateError> {
    match recv_message(channel).await? {
        HandshakeMessage::Hello(token) => {
            channel.send(HandshakeMessage::HelloAck(token).encode()).await?;
            Ok(())
        }
        _ => Err(CandidateError::Handshake("unexpected message")),
    }
}

/// Answerer side: wait until the offerer picks this channel.
///
/// The offerer drops the channels it did not pick.
pub(super) async fn await_commit(channel: &mut MessageChannel) -> Result<(), CandidateError> {
    match recv_message(channel).await? {
        HandshakeMessage::Commit => Ok(()),
        _ => Err(CandidateError::Handshake("unexpected message")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory_channel_pair;

    #[test]
    fn codec() {
        let hello = HandshakeMessage::Hello([7u8; TOKEN_SIZE]);
        let encoded = hello.encode();
        assert_eq!(&encoded[..4], b"PT\x01\x01");
        assert_eq!(HandshakeMessage::decode(&encoded).unwrap(), hello);
        assert_eq!(
            HandshakeMessage::decode(&HandshakeMessage::Commit.encode()).unwrap(),
            HandshakeMessage::Commit
        );
        assert!(HandshakeMessage::decode(b"XX\x01\x03").is_err());
        assert!(HandshakeMessage::decode(b"PT\x02\x03").is_err());
        assert!(HandshakeMessage::decode(b"PT\x01\x01abc").is_err());
    }

    #[tokio::test]
    async fn full_exchange() {
        let (mut a, mut b) = memory_channel_pair(4);
        let answerer = tokio::spawn(async move {
            answer(&mut b).await.unwrap();
            await_commit(&mut b).await.unwrap();
        });
        offer(&mut a).await.unwrap();
        commit(&mut a).await.unwrap();
        answerer.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_before_commit() {
        let (mut a, mut b) = memory_channel_pair(4);
        let answerer = tokio::spawn(async move {
            answer(&mut b).await.unwrap();
            await_commit(&mut b).await
        });
        offer(&mut a).await.unwrap();
        drop(a);
        let r = answerer.await.unwrap();
        assert!(matches!(r, Err(CandidateError::Abandoned)));
    }
}
