/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::{MessageChannel, MessageReceiver, MessageSender};

pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

fn new_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_MESSAGE_SIZE)
        .new_codec()
}

struct FramedSender<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

#[async_trait]
impl<W> MessageSender for FramedSender<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn send(&mut self, msg: Bytes) -> io::Result<()> {
        SinkExt::<Bytes>::send(&mut self.inner, msg).await
    }

    async fn close(&mut self) -> io::Result<()> {
        SinkExt::<Bytes>::close(&mut self.inner).await
    }
}

struct FramedReceiver<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

#[async_trait]
impl<R> MessageReceiver for FramedReceiver<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        match self.inner.next().await {
            Some(Ok(msg)) => Ok(Some(msg.freeze())),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Length prefixed messages over a byte stream pair.
pub fn framed_channel<R, W>(reader: R, writer: W) -> MessageChannel
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    MessageChannel::new(
        Box::new(FramedSender {
            inner: FramedWrite::new(writer, new_codec()),
        }),
        Box::new(FramedReceiver {
            inner: FramedRead::new(reader, new_codec()),
        }),
    )
}

pub fn framed_tcp_channel(stream: TcpStream) -> MessageChannel {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    framed_channel(reader, writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn boundaries_kept() {
        let (a, b) = tokio::io::duplex(64);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let mut left = framed_channel(ar, aw);
        let mut right = framed_channel(br, bw);

        left.send(Bytes::from_static(b"hello")).await.unwrap();
        left.send(Bytes::new()).await.unwrap();
        left.send(Bytes::from(vec![7u8; 300])).await.unwrap();
        left.sender.close().await.unwrap();

        assert_eq!(right.recv().await.unwrap().unwrap().as_ref(), b"hello");
        assert!(right.recv().await.unwrap().unwrap().is_empty());
        assert_eq!(right.recv().await.unwrap().unwrap().len(), 300);
        assert!(right.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame() {
        let (a, b) = tokio::io::duplex(64);
        let (_ar, mut aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let mut right = framed_channel(br, bw);

        let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut aw, &len)
            .await
            .unwrap();
        assert!(right.recv().await.is_err());
    }
}
