/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::{Semaphore, mpsc};

use peertun_types::net::Endpoint;

use super::frame::Frame;
use super::mux::{Command, TunnelShared};
use super::{MAX_DATA_PAYLOAD, RECV_WINDOW, TunnelError};

pub(super) enum Inbound {
    Data(Bytes),
    Fin,
    Reset,
}

/// Local ends of a registered session slot.
pub(super) struct SessionParts {
    /// Send credit granted by the peer.
    pub(super) credit: Arc<Semaphore>,
    /// Bytes received but not yet credited back, at most the window.
    pub(super) unacked: Arc<AtomicUsize>,
    pub(super) inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Releases the session slot once both halves are gone.
///
/// A session that did not finish its sending direction is reset.
pub(super) struct SessionGuard {
    id: u32,
    shared: Arc<TunnelShared>,
    local_fin: AtomicBool,
}

impl SessionGuard {
    pub(super) fn new(id: u32, shared: Arc<TunnelShared>) -> Self {
        SessionGuard {
            id,
            shared,
            local_fin: AtomicBool::new(false),
        }
    }

    pub(super) fn set_local_fin(&self) {
        self.local_fin.store(true, Ordering::Release);
    }

    fn local_fin(&self) -> bool {
        self.local_fin.load(Ordering::Acquire)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.local_fin() && !self.shared.is_broken() {
            self.shared.send_reset(self.id);
        }
        self.shared.send_command(Command::Release { id: self.id });
    }
}

/// One bidirectional byte stream inside the tunnel.
pub struct TunnelSession {
    destination: Endpoint,
    bound: Endpoint,
    sender: SessionSender,
    receiver: SessionReceiver,
}

impl TunnelSession {
    pub(super) fn new(
        id: u32,
        destination: Endpoint,
        bound: Endpoint,
        shared: Arc<TunnelShared>,
        guard: Arc<SessionGuard>,
        parts: SessionParts,
    ) -> Self {
        TunnelSession {
            destination,
            bound,
            sender: SessionSender {
                id,
                shared: shared.clone(),
                credit: parts.credit,
                guard: guard.clone(),
            },
            receiver: SessionReceiver {
                id,
                shared,
                inbound: parts.inbound,
                unacked: parts.unacked,
                consumed: 0,
                finished: false,
                _guard: guard,
            },
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.sender.id
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    /// The local address the far side used for the outbound connection.
    pub fn bound(&self) -> &Endpoint {
        &self.bound
    }

    pub fn into_split(self) -> (SessionSender, SessionReceiver) {
        (self.sender, self.receiver)
    }
}

pub struct SessionSender {
    id: u32,
    shared: Arc<TunnelShared>,
    credit: Arc<Semaphore>,
    guard: Arc<SessionGuard>,
}

impl SessionSender {
    fn closed_error(&self) -> TunnelError {
        if self.shared.is_broken() {
            TunnelError::Broken
        } else {
            TunnelError::Reset
        }
    }

    /// Send data, waiting for flow control credit from the peer.
    pub async fn send(&mut self, mut data: Bytes) -> Result<(), TunnelError> {
        if self.guard.local_fin() {
            return Err(TunnelError::Finished);
        }
        while !data.is_empty() {
            let n = data.len().min(MAX_DATA_PAYLOAD);
            match self.credit.acquire_many(n as u32).await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(self.closed_error()),
            }
            let payload = data.split_to(n);
            self.shared
                .send_ordered(Frame::Data {
                    id: self.id,
                    payload,
                })
                .await?;
        }
        Ok(())
    }

    /// End the sending direction. The peer sees end of stream after all
    /// data sent before.
    pub async fn finish(&mut self) -> Result<(), TunnelError> {
        if self.guard.local_fin() {
            return Ok(());
        }
        self.shared.send_ordered(Frame::Fin { id: self.id }).await?;
        self.guard.set_local_fin();
        Ok(())
    }
}

pub struct SessionReceiver {
    id: u32,
    shared: Arc<TunnelShared>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    unacked: Arc<AtomicUsize>,
    consumed: usize,
    finished: bool,
    _guard: Arc<SessionGuard>,
}

impl SessionReceiver {
    /// Next data chunk, or `None` once the peer finished sending.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, TunnelError> {
        if self.finished {
            return Ok(None);
        }
        match self.inbound.recv().await {
            Some(Inbound::Data(data)) => {
                self.consumed += data.len();
                if self.consumed >= RECV_WINDOW / 2 {
                    self.unacked.fetch_sub(self.consumed, Ordering::AcqRel);
                    self.shared.send_control(Frame::Window {
                        id: self.id,
                        credit: self.consumed as u32,
                    });
                    self.consumed = 0;
                }
                Ok(Some(data))
            }
            Some(Inbound::Fin) => {
                self.finished = true;
                Ok(None)
            }
            Some(Inbound::Reset) => Err(TunnelError::Reset),
            None => Err(TunnelError::Broken),
        }
    }
}
