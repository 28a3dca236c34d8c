/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashSet;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use peertun_types::net::TcpConnectConfig;

use super::race::{CandidateRace, RaceEvent};
use super::{
    CandidateError, CandidateFailure, CandidateLink, CandidateOffer, CandidateRouter,
    NegotiationFailedError, TcpListenSettings, TransportCandidate, TransportKind, handshake,
    transport,
};
use crate::channel::MessageChannel;
use crate::obfs::{self, ObfuscationKeys, PipeSide};
use crate::signal::{PeerSignal, SignalHandler, SignalsForPeer, TunnelNotice};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Negotiating,
    Committed(usize),
    Failed,
}

/// Local settings of the answering side.
#[derive(Clone, Debug, Default)]
pub struct AnswererConfig {
    /// Candidate #n listens on the fixed ports shifted by n.
    pub listen: TcpListenSettings,
    pub connect: TcpConnectConfig,
    /// Keys for obfuscated offers, looked up by key id.
    pub keys: ObfuscationKeys,
}

enum Role {
    Offerer(Vec<TransportCandidate>),
    Answerer(AnswererConfig),
}

/// Signals for the layer on top of a committed channel.
///
/// Late negotiation signals are dropped here.
pub struct PeerNotices {
    outbound: mpsc::UnboundedSender<PeerSignal>,
    inbound: mpsc::UnboundedReceiver<PeerSignal>,
}

impl PeerNotices {
    pub fn send(&self, notice: TunnelNotice) -> bool {
        self.outbound.send(PeerSignal::Notice { notice }).is_ok()
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<PeerSignal> {
        self.outbound.clone()
    }

    pub async fn recv(&mut self) -> Option<TunnelNotice> {
        loop {
            match self.inbound.recv().await? {
                PeerSignal::Notice { notice } => return Some(notice),
                signal => debug!("discarded late {} signal", signal.brief()),
            }
        }
    }
}

pub struct NegotiatedChannel {
    pub candidate: usize,
    pub name: String,
    pub channel: MessageChannel,
    pub notices: PeerNotices,
}

pub struct TransportNegotiator {
    role: Role,
    state: watch::Sender<NegotiationState>,
    outbound: mpsc::UnboundedSender<PeerSignal>,
    inbound: mpsc::UnboundedReceiver<PeerSignal>,
    handler: SignalHandler,
    signals_for_peer: Option<SignalsForPeer>,
}

impl TransportNegotiator {
    fn new(role: Role) -> Self {
        let (outbound, signals_for_peer) = crate::signal::outbound_pair();
        let (handler, inbound) = crate::signal::inbound_pair();
        let (state, _) = watch::channel(NegotiationState::Idle);
        TransportNegotiator {
            role,
            state,
            outbound,
            inbound,
            handler,
            signals_for_peer: Some(signals_for_peer),
        }
    }

    /// The side owning the candidate list.
    pub fn offerer(candidates: Vec<TransportCandidate>) -> Self {
        TransportNegotiator::new(Role::Offerer(candidates))
    }

    /// The side following the offers of the peer.
    pub fn answerer(config: AnswererConfig) -> Self {
        TransportNegotiator::new(Role::Answerer(config))
    }

    /// Signals to forward to the peer. Only the first call returns them.
    pub fn signals_for_peer(&mut self) -> Option<SignalsForPeer> {
        self.signals_for_peer.take()
    }

    pub fn signal_handler(&self) -> SignalHandler {
        self.handler.clone()
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    /// Run the negotiation to completion.
    ///
    /// Every attempt not chosen is cancelled and joined before returning.
    pub async fn negotiate(self) -> Result<NegotiatedChannel, NegotiationFailedError> {
        let TransportNegotiator {
            role,
            state,
            outbound,
            mut inbound,
            ..
        } = self;
        state.send_replace(NegotiationState::Negotiating);

        let r = match role {
            Role::Offerer(candidates) => {
                run_offerer(candidates, outbound.clone(), &mut inbound).await
            }
            Role::Answerer(config) => run_answerer(config, outbound.clone(), &mut inbound).await,
        };
        match r {
            Ok((candidate, name, channel)) => {
                info!("negotiation committed to candidate #{candidate} {name}");
                state.send_replace(NegotiationState::Committed(candidate));
                Ok(NegotiatedChannel {
                    candidate,
                    name,
                    channel,
                    notices: PeerNotices { outbound, inbound },
                })
            }
            Err(e) => {
                warn!("negotiation failed: {e}");
                state.send_replace(NegotiationState::Failed);
                Err(e)
            }
        }
    }
}

fn report_failure(router: &CandidateRouter, index: usize, error: &CandidateError) {
    if !matches!(error, CandidateError::PeerFailed(_)) {
        router.send(PeerSignal::Failed {
            candidate: index,
            reason: error.to_string(),
        });
    }
}

async fn attempt_offer(
    candidate: TransportCandidate,
    offer: CandidateOffer,
    mut link: CandidateLink,
) -> Result<MessageChannel, CandidateError> {
    if !candidate.start_delay.is_zero() {
        tokio::time::sleep(candidate.start_delay).await;
    }
    link.send(PeerSignal::Offer(offer));
    let raw = match candidate.kind {
        TransportKind::TcpListen => transport::connect_side(&candidate.connect, &mut link).await?,
        TransportKind::TcpConnect => transport::listen_side(&candidate.listen, &mut link).await?,
    };
    let mut channel = obfs::wrap_with(raw, candidate.obfuscation.as_ref(), PipeSide::Offerer)?;
    handshake::offer(&mut channel).await?;
    Ok(channel)
}

async fn run_offerer(
    candidates: Vec<TransportCandidate>,
    outbound: mpsc::UnboundedSender<PeerSignal>,
    inbound: &mut mpsc::UnboundedReceiver<PeerSignal>,
) -> Result<(usize, String, MessageChannel), NegotiationFailedError> {
    let mut failures = Vec::new();
    let mut offers = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        match candidate.offer(index, candidates.len()) {
            Ok(offer) => offers.push(offer),
            Err(error) => failures.push(CandidateFailure {
                index,
                name: candidate.name.clone(),
                error,
            }),
        }
    }

    // the answerer waits for as many offers as announced
    let total = offers.len();
    let mut router = CandidateRouter::new(outbound);
    let mut race = CandidateRace::new();
    for mut offer in offers {
        offer.total = total;
        let index = offer.candidate;
        let candidate = &candidates[index];
        let link = router.add(index);
        race.spawn(
            index,
            candidate.start_delay.saturating_add(candidate.timeout),
            attempt_offer(candidate.clone(), offer, link),
        );
    }

    let mut inbound_open = true;
    while !race.is_empty() {
        tokio::select! {
            signal = inbound.recv(), if inbound_open => {
                match signal {
                    Some(signal) => router.route(signal),
                    None => inbound_open = false,
                }
            }
            ev = race.next() => {
                let Some(ev) = ev else {
                    break;
                };
                match ev {
                    RaceEvent::Won { index, mut value } => {
                        let name = candidates[index].name.clone();
                        match handshake::commit(&mut value).await {
                            Ok(_) => {
                                race.cancel_all().await;
                                return Ok((index, name, value));
                            }
                            Err(error) => {
                                debug!("commit to candidate #{index} failed: {error}");
                                router.remove(index);
                                failures.push(CandidateFailure { index, name, error });
                            }
                        }
                    }
                    RaceEvent::Failed { index, error } => {
                        debug!("candidate #{index} failed: {error}");
                        report_failure(&router, index, &error);
                        router.remove(index);
                        failures.push(CandidateFailure {
                            index,
                            name: candidates[index].name.clone(),
                            error,
                        });
                    }
                }
            }
        }
    }

    failures.sort_by_key(|f| f.index);
    Err(NegotiationFailedError { failures })
}

async fn attempt_answer(
    offer: CandidateOffer,
    config: AnswererConfig,
    mut link: CandidateLink,
) -> Result<MessageChannel, CandidateError> {
    let spec = match &offer.obfuscation {
        Some(obfuscation) => {
            let spec = obfuscation.resolve(&config.keys)?;
            spec.check()?;
            Some(spec)
        }
        None => None,
    };
    let raw = match offer.transport {
        TransportKind::TcpListen => {
            let listen = config.listen.for_candidate(offer.candidate)?;
            transport::listen_side(&listen, &mut link).await?
        }
        TransportKind::TcpConnect => transport::connect_side(&config.connect, &mut link).await?,
    };
    let mut channel = obfs::wrap_with(raw, spec.as_ref(), PipeSide::Answerer)?;
    handshake::answer(&mut channel).await?;
    handshake::await_commit(&mut channel).await?;
    Ok(channel)
}

async fn run_answerer(
    config: AnswererConfig,
    outbound: mpsc::UnboundedSender<PeerSignal>,
    inbound: &mut mpsc::UnboundedReceiver<PeerSignal>,
) -> Result<(usize, String, MessageChannel), NegotiationFailedError> {
    let mut router = CandidateRouter::new(outbound);
    let mut race = CandidateRace::new();
    let mut names: Vec<(usize, String)> = Vec::new();
    let mut seen = HashSet::new();
    let mut total: Option<usize> = None;
    let mut failures: Vec<CandidateFailure> = Vec::new();
    let mut inbound_open = true;

    let name_of = |names: &[(usize, String)], index: usize| -> String {
        names
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, name)| name.clone())
            .unwrap_or_default()
    };

    loop {
        tokio::select! {
            signal = inbound.recv(), if inbound_open => {
                match signal {
                    Some(PeerSignal::Offer(offer)) => {
                        let index = offer.candidate;
                        if !seen.insert(index) {
                            debug!("duplicated offer for candidate #{index}");
                            continue;
                        }
                        total = Some(offer.total);
                        names.push((index, offer.name.clone()));
                        let link = router.add(index);
                        race.spawn(
                            index,
                            offer.timeout(),
                            attempt_answer(offer, config.clone(), link),
                        );
                    }
                    Some(signal) => router.route(signal),
                    None => inbound_open = false,
                }
            }
            ev = race.next(), if !race.is_empty() => {
                let Some(ev) = ev else {
                    continue;
                };
                match ev {
                    RaceEvent::Won { index, value } => {
                        race.cancel_all().await;
                        return Ok((index, name_of(&names, index), value));
                    }
                    RaceEvent::Failed { index, error } => {
                        debug!("candidate #{index} failed: {error}");
                        report_failure(&router, index, &error);
                        router.remove(index);
                        failures.push(CandidateFailure {
                            index,
                            name: name_of(&names, index),
                            error,
                        });
                    }
                }
            }
            else => break,
        }

        if race.is_empty() {
            let all_offered = total.is_some_and(|total| seen.len() >= total);
            if all_offered || !inbound_open {
                break;
            }
        }
    }

    failures.sort_by_key(|f| f.index);
    Err(NegotiationFailedError { failures })
}
