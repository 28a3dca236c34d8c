/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Out of band signals exchanged between the two peers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use peertun_types::net::Endpoint;

use crate::bridge::CandidateOffer;

mod conduit;

pub use conduit::{cross_wire, run_tcp_conduit};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerSignal {
    /// A candidate the offerer is attempting.
    Offer(CandidateOffer),
    /// Transport specific payload for one candidate.
    Transport {
        candidate: usize,
        payload: TransportSignal,
    },
    /// The sending side gave up on a candidate.
    Failed { candidate: usize, reason: String },
    /// Notice for the layer on top of the committed channel.
    Notice { notice: TunnelNotice },
}

impl PeerSignal {
    pub fn brief(&self) -> &'static str {
        match self {
            PeerSignal::Offer(_) => "Offer",
            PeerSignal::Transport { .. } => "Transport",
            PeerSignal::Failed { .. } => "Failed",
            PeerSignal::Notice { .. } => "Notice",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSignal {
    /// Where the listening side of a tcp candidate can be reached.
    Address { endpoint: Endpoint },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelNotice {
    /// The sending side is shutting the tunnel down on purpose.
    Shutdown,
}

/// Signals to deliver to the peer, through whatever conduit the host uses.
pub struct SignalsForPeer {
    inner: mpsc::UnboundedReceiver<PeerSignal>,
}

impl SignalsForPeer {
    pub async fn recv(&mut self) -> Option<PeerSignal> {
        self.inner.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PeerSignal> {
        self.inner.try_recv().ok()
    }
}

/// Entry point for signals coming from the peer.
#[derive(Clone)]
pub struct SignalHandler {
    inner: mpsc::UnboundedSender<PeerSignal>,
}

impl SignalHandler {
    /// Returns false if nothing listens for signals anymore.
    pub fn handle(&self, signal: PeerSignal) -> bool {
        self.inner.send(signal).is_ok()
    }
}

pub(crate) fn outbound_pair() -> (mpsc::UnboundedSender<PeerSignal>, SignalsForPeer) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (sender, SignalsForPeer { inner: receiver })
}

pub(crate) fn inbound_pair() -> (SignalHandler, mpsc::UnboundedReceiver<PeerSignal>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (SignalHandler { inner: sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn json_tags() {
        let s = PeerSignal::Transport {
            candidate: 1,
            payload: TransportSignal::Address {
                endpoint: Endpoint::from_str("127.0.0.1:4000").unwrap(),
            },
        };
        let json = s.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"transport","candidate":1,"payload":{"kind":"address","endpoint":"127.0.0.1:4000"}}"#
        );
        assert_eq!(PeerSignal::from_json(&json).unwrap(), s);

        let s = PeerSignal::Notice {
            notice: TunnelNotice::Shutdown,
        };
        let json = s.to_json().unwrap();
        assert_eq!(json, r#"{"type":"notice","notice":"shutdown"}"#);
        assert_eq!(PeerSignal::from_json(&json).unwrap(), s);

        assert!(PeerSignal::from_json(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn handler_closed() {
        let (handler, receiver) = inbound_pair();
        assert!(handler.handle(PeerSignal::Failed {
            candidate: 0,
            reason: "x".to_string()
        }));
        drop(receiver);
        assert!(!handler.handle(PeerSignal::Notice {
            notice: TunnelNotice::Shutdown
        }));
    }
}
