/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;

use log::debug;
use tokio::sync::mpsc;

use super::CandidateError;
use crate::signal::{PeerSignal, TransportSignal};

enum CandidateEvent {
    Transport(TransportSignal),
    PeerFailed(String),
}

/// Routes inbound signals to the attempt owning the candidate index.
pub(super) struct CandidateRouter {
    outbound: mpsc::UnboundedSender<PeerSignal>,
    routes: HashMap<usize, mpsc::UnboundedSender<CandidateEvent>>,
}

impl CandidateRouter {
    pub(super) fn new(outbound: mpsc::UnboundedSender<PeerSignal>) -> Self {
        CandidateRouter {
            outbound,
            routes: HashMap::new(),
        }
    }

    pub(super) fn add(&mut self, index: usize) -> CandidateLink {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.insert(index, sender);
        CandidateLink {
            index,
            outbound: self.outbound.clone(),
            events: receiver,
        }
    }

    pub(super) fn remove(&mut self, index: usize) {
        self.routes.remove(&index);
    }

    pub(super) fn send(&self, signal: PeerSignal) {
        if self.outbound.send(signal).is_err() {
            debug!("no signaling conduit attached");
        }
    }

    pub(super) fn route(&mut self, signal: PeerSignal) {
        match signal {
            PeerSignal::Transport { candidate, payload } => {
                self.deliver(candidate, CandidateEvent::Transport(payload))
            }
            PeerSignal::Failed { candidate, reason } => {
                self.deliver(candidate, CandidateEvent::PeerFailed(reason))
            }
            signal => debug!("ignored {} signal during negotiation", signal.brief()),
        }
    }

    fn deliver(&mut self, index: usize, event: CandidateEvent) {
        let Some(route) = self.routes.get(&index) else {
            debug!("discarded signal for abandoned candidate {index}");
            return;
        };
        if route.send(event).is_err() {
            self.routes.remove(&index);
        }
    }
}

/// Signaling view of a single candidate attempt.
pub(super) struct CandidateLink {
    index: usize,
    outbound: mpsc::UnboundedSender<PeerSignal>,
    events: mpsc::UnboundedReceiver<CandidateEvent>,
}

impl CandidateLink {
    pub(super) fn send(&self, signal: PeerSignal) {
        let _ = self.outbound.send(signal);
    }

    pub(super) fn send_transport(&self, payload: TransportSignal) {
        self.send(PeerSignal::Transport {
            candidate: self.index,
            payload,
        });
    }

    pub(super) async fn recv_transport(&mut self) -> Result<TransportSignal, CandidateError> {
        match self.events.recv().await {
            Some(CandidateEvent::Transport(payload)) => Ok(payload),
            Some(CandidateEvent::PeerFailed(reason)) => Err(CandidateError::PeerFailed(reason)),
            None => Err(CandidateError::Abandoned),
        }
    }

    /// Resolves when the peer gave up on this candidate.
    pub(super) async fn peer_failure(&mut self) -> CandidateError {
        loop {
            match self.events.recv().await {
                Some(CandidateEvent::Transport(_)) => {
                    debug!("unexpected transport signal for candidate {}", self.index);
                }
                Some(CandidateEvent::PeerFailed(reason)) => {
                    return CandidateError::PeerFailed(reason);
                }
                None => return CandidateError::Abandoned,
            }
        }
    }
}
