/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Bidirectional message channels between the two peers.
//!
//! A message channel preserves message boundaries. Both the raw transports
//! and the obfuscation layers on top of them expose the same interface.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;

mod framed;
mod memory;

pub use framed::{MAX_MESSAGE_SIZE, framed_channel, framed_tcp_channel};
pub use memory::memory_channel_pair;

#[async_trait]
pub trait MessageSender: Send {
    async fn send(&mut self, msg: Bytes) -> io::Result<()>;

    /// Flush and close the sending direction.
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait MessageReceiver: Send {
    /// Next message, or `None` once the peer closed its sending direction.
    async fn recv(&mut self) -> io::Result<Option<Bytes>>;
}

pub struct MessageChannel {
    pub sender: Box<dyn MessageSender>,
    pub receiver: Box<dyn MessageReceiver>,
}

impl MessageChannel {
    pub fn new(sender: Box<dyn MessageSender>, receiver: Box<dyn MessageReceiver>) -> Self {
        MessageChannel { sender, receiver }
    }

    #[inline]
    pub async fn send(&mut self, msg: Bytes) -> io::Result<()> {
        self.sender.send(msg).await
    }

    #[inline]
    pub async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        self.receiver.recv().await
    }

    pub fn into_split(self) -> (Box<dyn MessageSender>, Box<dyn MessageReceiver>) {
        (self.sender, self.receiver)
    }
}
