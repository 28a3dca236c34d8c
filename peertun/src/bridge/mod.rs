/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Transport negotiation between the two peers.
//!
//! The offerer owns an ordered candidate list and announces each candidate
//! with an offer signal. Both sides then attempt the candidates concurrently,
//! each one once its start delay passed, and the first one whose handshake
//! completes carries the tunnel. Obfuscation keys never travel in offers.

mod candidate;
mod error;
mod handshake;
mod link;
mod negotiator;
mod race;
mod transport;

pub use candidate::{
    CandidateOffer, TcpListenSettings, TransportCandidate, TransportKind, expand_best,
};
pub use error::{CandidateError, CandidateFailure, NegotiationFailedError};
pub use negotiator::{
    AnswererConfig, NegotiatedChannel, NegotiationState, PeerNotices, TransportNegotiator,
};

use link::{CandidateLink, CandidateRouter};
