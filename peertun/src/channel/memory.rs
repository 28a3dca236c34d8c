/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{MessageChannel, MessageReceiver, MessageSender};

struct MemorySender {
    inner: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl MessageSender for MemorySender {
    async fn send(&mut self, msg: Bytes) -> io::Result<()> {
        let Some(sender) = &self.inner else {
            return Err(io::ErrorKind::BrokenPipe.into());
        };
        sender
            .send(msg)
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner = None;
        Ok(())
    }
}

struct MemoryReceiver {
    inner: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl MessageReceiver for MemoryReceiver {
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.inner.recv().await)
    }
}

/// Two connected in-process channel ends.
pub fn memory_channel_pair(capacity: usize) -> (MessageChannel, MessageChannel) {
    let (s1, r1) = mpsc::channel(capacity);
    let (s2, r2) = mpsc::channel(capacity);
    let a = MessageChannel::new(
        Box::new(MemorySender { inner: Some(s1) }),
        Box::new(MemoryReceiver { inner: r2 }),
    );
    let b = MessageChannel::new(
        Box::new(MemorySender { inner: Some(s2) }),
        Box::new(MemoryReceiver { inner: r1 }),
    );
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair() {
        let (mut a, mut b) = memory_channel_pair(4);
        a.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap().as_ref(), b"ping");
        b.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(a.recv().await.unwrap().unwrap().as_ref(), b"pong");

        a.sender.close().await.unwrap();
        assert!(b.recv().await.unwrap().is_none());
        assert!(a.sender.send(Bytes::new()).await.is_err());
        drop(a);
        assert!(b.send(Bytes::new()).await.is_err());
    }
}
