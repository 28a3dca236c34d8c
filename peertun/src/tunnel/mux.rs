/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use bytes::Bytes;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use peertun_types::net::Endpoint;

use super::frame::{Frame, RefuseReason};
use super::session::{Inbound, SessionGuard, SessionParts, TunnelSession};
use super::{RECV_WINDOW, TunnelError};
use crate::bridge::{NegotiatedChannel, PeerNotices};
use crate::channel::{MessageChannel, MessageReceiver, MessageSender};
use crate::obfs::PipeSide;
use crate::signal::{PeerSignal, TunnelNotice};

const ORDERED_QUEUE_SIZE: usize = 64;
const INCOMING_QUEUE_SIZE: usize = 64;

pub(super) enum Command {
    Register { id: u32, slot: SessionSlot },
    Release { id: u32 },
}

#[derive(Debug, Error)]
enum ProtocolViolation {
    #[error("window credit overflow for session {0}")]
    CreditOverflow(u32),
    #[error("data beyond the receive window for session {0}")]
    WindowExceeded(u32),
}

type OpenedSender = oneshot::Sender<Result<Endpoint, RefuseReason>>;

pub(super) struct SessionSlot {
    inbound: mpsc::UnboundedSender<Inbound>,
    credit: Arc<Semaphore>,
    unacked: Arc<AtomicUsize>,
    opened: Option<OpenedSender>,
}

impl SessionSlot {
    fn new(opened: Option<OpenedSender>) -> (Self, SessionParts) {
        let credit = Arc::new(Semaphore::new(RECV_WINDOW));
        let unacked = Arc::new(AtomicUsize::new(0));
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        let slot = SessionSlot {
            inbound: inbound_sender,
            credit: credit.clone(),
            unacked: unacked.clone(),
            opened,
        };
        let parts = SessionParts {
            credit,
            unacked,
            inbound,
        };
        (slot, parts)
    }

    /// Credit from the peer never lifts the send window above its size.
    fn add_credit(&self, id: u32, credit: u32) -> Result<(), ProtocolViolation> {
        let credit = credit as usize;
        if credit > RECV_WINDOW.saturating_sub(self.credit.available_permits()) {
            return Err(ProtocolViolation::CreditOverflow(id));
        }
        self.credit.add_permits(credit);
        Ok(())
    }

    fn push_data(&self, id: u32, payload: Bytes) -> Result<(), ProtocolViolation> {
        if payload.is_empty() {
            return Ok(());
        }
        let unacked = self.unacked.fetch_add(payload.len(), Ordering::AcqRel) + payload.len();
        if unacked > RECV_WINDOW {
            return Err(ProtocolViolation::WindowExceeded(id));
        }
        let _ = self.inbound.send(Inbound::Data(payload));
        Ok(())
    }

    fn close(mut self) {
        self.credit.close();
        if let Some(opened) = self.opened.take() {
            let _ = opened.send(Err(RefuseReason::GeneralFailure));
        }
    }
}

pub(super) struct TunnelShared {
    broken: CancellationToken,
    peer_shutdown: AtomicBool,
    next_id: AtomicU32,
    ordered: mpsc::Sender<Frame>,
    control: mpsc::UnboundedSender<Frame>,
    commands: mpsc::UnboundedSender<Command>,
}

impl TunnelShared {
    pub(super) fn is_broken(&self) -> bool {
        self.broken.is_cancelled()
    }

    /// Frames that must keep their order relative to data.
    pub(super) async fn send_ordered(&self, frame: Frame) -> Result<(), TunnelError> {
        tokio::select! {
            biased;

            _ = self.broken.cancelled() => Err(TunnelError::Broken),
            r = self.ordered.send(frame) => r.map_err(|_| TunnelError::Broken),
        }
    }

    /// Frames that may overtake queued data.
    pub(super) fn send_control(&self, frame: Frame) {
        let _ = self.control.send(frame);
    }

    /// Reset must not overtake an open still queued for the same session.
    pub(super) fn send_reset(&self, id: u32) {
        if let Err(e) = self.ordered.try_send(Frame::Reset { id }) {
            self.send_control(e.into_inner());
        }
    }

    pub(super) fn send_command(&self, command: Command) {
        let _ = self.commands.send(command);
    }
}

/// An open request from the peer, waiting for a decision.
///
/// Dropping it refuses the session.
pub struct IncomingSession {
    id: u32,
    destination: Endpoint,
    shared: Arc<TunnelShared>,
    parts: Option<SessionParts>,
}

impl IncomingSession {
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    pub async fn accept(mut self, bound: Endpoint) -> Result<TunnelSession, TunnelError> {
        let Some(parts) = self.parts.take() else {
            return Err(TunnelError::Finished);
        };
        let guard = Arc::new(SessionGuard::new(self.id, self.shared.clone()));
        self.shared
            .send_ordered(Frame::Opened {
                id: self.id,
                bound: bound.clone(),
            })
            .await?;
        Ok(TunnelSession::new(
            self.id,
            self.destination.clone(),
            bound,
            self.shared.clone(),
            guard,
            parts,
        ))
    }

    pub fn reject(mut self, reason: RefuseReason) {
        self.refuse(reason);
    }

    fn refuse(&mut self, reason: RefuseReason) {
        if self.parts.take().is_some() {
            self.shared.send_control(Frame::Refused {
                id: self.id,
                reason,
            });
            self.shared.send_command(Command::Release { id: self.id });
        }
    }
}

impl Drop for IncomingSession {
    fn drop(&mut self) {
        self.refuse(RefuseReason::GeneralFailure);
    }
}

pub struct IncomingSessions {
    receiver: mpsc::Receiver<IncomingSession>,
}

impl IncomingSessions {
    /// Next open request. `None` once the tunnel is broken.
    pub async fn recv(&mut self) -> Option<IncomingSession> {
        self.receiver.recv().await
    }
}

/// Cloneable handle to open sessions over a running tunnel.
#[derive(Clone)]
pub struct TunnelHandle {
    shared: Arc<TunnelShared>,
    notices: Option<mpsc::UnboundedSender<PeerSignal>>,
}

impl TunnelHandle {
    pub async fn open(&self, destination: Endpoint) -> Result<TunnelSession, TunnelError> {
        if self.shared.is_broken() {
            return Err(TunnelError::Broken);
        }
        let id = self.shared.next_id.fetch_add(2, Ordering::Relaxed);
        let (opened_sender, opened) = oneshot::channel();
        let (slot, parts) = SessionSlot::new(Some(opened_sender));
        self.shared.send_command(Command::Register { id, slot });
        let guard = Arc::new(SessionGuard::new(id, self.shared.clone()));
        self.shared
            .send_ordered(Frame::Open {
                id,
                destination: destination.clone(),
            })
            .await?;

        match opened.await {
            Ok(Ok(bound)) => Ok(TunnelSession::new(
                id,
                destination,
                bound,
                self.shared.clone(),
                guard,
                parts,
            )),
            Ok(Err(reason)) => {
                // the slot is gone on both sides already
                guard.set_local_fin();
                if self.shared.is_broken() {
                    Err(TunnelError::Broken)
                } else {
                    Err(TunnelError::Refused(reason))
                }
            }
            Err(_) => Err(TunnelError::Broken),
        }
    }

    pub fn is_broken(&self) -> bool {
        self.shared.is_broken()
    }

    /// Whether the peer announced its shutdown.
    pub fn peer_shut_down(&self) -> bool {
        self.shared.peer_shutdown.load(Ordering::Acquire)
    }

    pub async fn once_broken(&self) {
        self.shared.broken.cancelled().await
    }

    /// Tell the peer and tear the tunnel down. Every session sees it broken.
    pub fn shutdown(&self) {
        if let Some(notices) = &self.notices {
            let _ = notices.send(PeerSignal::Notice {
                notice: TunnelNotice::Shutdown,
            });
        }
        self.shared.broken.cancel();
    }
}

/// Start the tunnel over a committed channel.
pub fn start(negotiated: NegotiatedChannel, side: PipeSide) -> (TunnelHandle, IncomingSessions) {
    start_with(negotiated.channel, Some(negotiated.notices), side)
}

pub(crate) fn start_with(
    channel: MessageChannel,
    notices: Option<PeerNotices>,
    side: PipeSide,
) -> (TunnelHandle, IncomingSessions) {
    let (ordered, ordered_receiver) = mpsc::channel(ORDERED_QUEUE_SIZE);
    let (control, control_receiver) = mpsc::unbounded_channel();
    let (commands, command_receiver) = mpsc::unbounded_channel();
    let (incoming, incoming_receiver) = mpsc::channel(INCOMING_QUEUE_SIZE);

    // each side opens with its own id parity
    let first_id = match side {
        PipeSide::Offerer => 1,
        PipeSide::Answerer => 2,
    };
    let shared = Arc::new(TunnelShared {
        broken: CancellationToken::new(),
        peer_shutdown: AtomicBool::new(false),
        next_id: AtomicU32::new(first_id),
        ordered,
        control,
        commands,
    });

    let (sender, receiver) = channel.into_split();
    tokio::spawn(run_writer(
        shared.clone(),
        sender,
        ordered_receiver,
        control_receiver,
    ));
    tokio::spawn(run_reader(
        shared.clone(),
        receiver,
        command_receiver,
        incoming,
    ));

    let notice_sender = notices.as_ref().map(|n| n.sender());
    if let Some(notices) = notices {
        tokio::spawn(watch_notices(shared.clone(), notices));
    }

    (
        TunnelHandle {
            shared,
            notices: notice_sender,
        },
        IncomingSessions {
            receiver: incoming_receiver,
        },
    )
}

async fn watch_notices(shared: Arc<TunnelShared>, mut notices: PeerNotices) {
    loop {
        let notice = tokio::select! {
            biased;

            _ = shared.broken.cancelled() => return,
            n = notices.recv() => n,
        };
        match notice {
            Some(TunnelNotice::Shutdown) => {
                info!("peer is shutting the tunnel down");
                shared.peer_shutdown.store(true, Ordering::Release);
            }
            None => return,
        }
    }
}

async fn run_writer(
    shared: Arc<TunnelShared>,
    mut sender: Box<dyn MessageSender>,
    mut ordered: mpsc::Receiver<Frame>,
    mut control: mpsc::UnboundedReceiver<Frame>,
) {
    loop {
        let frame = tokio::select! {
            biased;

            _ = shared.broken.cancelled() => break,
            f = control.recv() => f,
            f = ordered.recv() => f,
        };
        let Some(frame) = frame else {
            break;
        };
        let r = tokio::select! {
            biased;

            _ = shared.broken.cancelled() => break,
            r = sender.send(frame.encode()) => r,
        };
        if let Err(e) = r {
            debug!("tunnel write failed: {e}");
            break;
        }
    }
    shared.broken.cancel();
    let _ = sender.close().await;
}

struct ReaderState {
    shared: Arc<TunnelShared>,
    sessions: HashMap<u32, SessionSlot>,
    incoming: mpsc::Sender<IncomingSession>,
}

impl ReaderState {
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Register { id, slot } => {
                self.sessions.insert(id, slot);
            }
            Command::Release { id } => {
                self.sessions.remove(&id);
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), ProtocolViolation> {
        match frame {
            Frame::Open { id, destination } => self.handle_open(id, destination),
            Frame::Opened { id, bound } => {
                if let Some(opened) = self.sessions.get_mut(&id).and_then(|s| s.opened.take()) {
                    let _ = opened.send(Ok(bound));
                }
            }
            Frame::Refused { id, reason } => {
                if let Some(mut slot) = self.sessions.remove(&id)
                    && let Some(opened) = slot.opened.take()
                {
                    let _ = opened.send(Err(reason));
                }
            }
            Frame::Data { id, payload } => {
                if let Some(slot) = self.sessions.get(&id) {
                    slot.push_data(id, payload)?;
                } else {
                    debug!("dropped data for unknown session {id}");
                }
            }
            Frame::Window { id, credit } => {
                if let Some(slot) = self.sessions.get(&id) {
                    slot.add_credit(id, credit)?;
                }
            }
            Frame::Fin { id } => {
                if let Some(slot) = self.sessions.get(&id) {
                    let _ = slot.inbound.send(Inbound::Fin);
                }
            }
            Frame::Reset { id } => {
                if let Some(slot) = self.sessions.remove(&id) {
                    debug!("session {id} reset by peer");
                    let _ = slot.inbound.send(Inbound::Reset);
                    slot.close();
                }
            }
        }
        Ok(())
    }

    fn handle_open(&mut self, id: u32, destination: Endpoint) {
        if self.sessions.contains_key(&id) {
            warn!("duplicated open for session {id}");
            self.shared.send_reset(id);
            return;
        }
        let (slot, parts) = SessionSlot::new(None);
        self.sessions.insert(id, slot);
        let session = IncomingSession {
            id,
            destination,
            shared: self.shared.clone(),
            parts: Some(parts),
        };
        // a refused session is released by its drop
        if let Err(e) = self.incoming.try_send(session) {
            debug!("no room for incoming session {id}: {e}");
        }
    }

    fn break_all(&mut self) {
        for (_, slot) in self.sessions.drain() {
            slot.close();
        }
    }
}

async fn run_reader(
    shared: Arc<TunnelShared>,
    mut receiver: Box<dyn MessageReceiver>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    incoming: mpsc::Sender<IncomingSession>,
) {
    let mut state = ReaderState {
        shared: shared.clone(),
        sessions: HashMap::new(),
        incoming,
    };
    loop {
        tokio::select! {
            biased;

            _ = shared.broken.cancelled() => break,
            c = commands.recv() => {
                match c {
                    Some(command) => state.handle_command(command),
                    None => break,
                }
            }
            r = receiver.recv() => {
                match r {
                    Ok(Some(msg)) => match Frame::decode(msg) {
                        Ok(frame) if frame.id() == 0 => {
                            warn!("tunnel protocol error: frame with session id 0");
                            break;
                        }
                        Ok(frame) => {
                            if let Err(e) = state.handle_frame(frame) {
                                warn!("tunnel protocol error: {e}");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("tunnel protocol error: {e}");
                            break;
                        }
                    },
                    Ok(None) => {
                        if shared.peer_shutdown.load(Ordering::Acquire) {
                            info!("tunnel closed by peer");
                        } else {
                            warn!("tunnel channel closed unexpectedly");
                        }
                        break;
                    }
                    Err(e) => {
                        warn!("tunnel read failed: {e}");
                        break;
                    }
                }
            }
        }
    }
    shared.broken.cancel();
    state.break_all();
}
