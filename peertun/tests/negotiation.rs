/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;

use peertun::bridge::{
    AnswererConfig, CandidateError, NegotiatedChannel, NegotiationFailedError, NegotiationState,
    TransportCandidate, TransportKind, TransportNegotiator, expand_best,
};
use peertun::obfs::{DEFAULT_KEY_ID, ObfuscationSpec};
use peertun::signal::cross_wire;
use peertun_types::net::Endpoint;

const CANDIDATE_TIMEOUT: Duration = Duration::from_secs(5);

fn plain(name: &str) -> TransportCandidate {
    let mut candidate = TransportCandidate::new(name, TransportKind::TcpListen);
    candidate.timeout = CANDIDATE_TIMEOUT;
    candidate
}

/// The offerer listens but advertises a port nobody listens on.
async fn unreachable(name: &str) -> TransportCandidate {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let mut candidate = TransportCandidate::new(name, TransportKind::TcpConnect);
    candidate.timeout = CANDIDATE_TIMEOUT;
    candidate.listen.advertise = Some(Endpoint::from(dead));
    candidate
}

type NegotiationResult = Result<NegotiatedChannel, NegotiationFailedError>;

async fn negotiate(candidates: Vec<TransportCandidate>) -> (NegotiationResult, NegotiationResult) {
    negotiate_with(candidates, AnswererConfig::default()).await
}

async fn negotiate_with(
    candidates: Vec<TransportCandidate>,
    config: AnswererConfig,
) -> (NegotiationResult, NegotiationResult) {
    let mut offerer = TransportNegotiator::offerer(candidates);
    let mut answerer = TransportNegotiator::answerer(config);
    cross_wire(
        (offerer.signals_for_peer().unwrap(), offerer.signal_handler()),
        (answerer.signals_for_peer().unwrap(), answerer.signal_handler()),
    );
    assert_eq!(offerer.state(), NegotiationState::Idle);
    tokio::join!(offerer.negotiate(), answerer.negotiate())
}

async fn check_channel(offerer: &mut NegotiatedChannel, answerer: &mut NegotiatedChannel) {
    offerer
        .channel
        .send(Bytes::from_static(b"hello"))
        .await
        .unwrap();
    let msg = answerer.channel.recv().await.unwrap().unwrap();
    assert_eq!(msg.as_ref(), b"hello");

    answerer
        .channel
        .send(Bytes::from_static(b"world"))
        .await
        .unwrap();
    let msg = offerer.channel.recv().await.unwrap().unwrap();
    assert_eq!(msg.as_ref(), b"world");
}

#[tokio::test]
async fn failing_then_working() {
    let candidates = vec![unreachable("dead").await, plain("live")];
    let (o, a) = negotiate(candidates).await;
    let mut o = o.unwrap();
    let mut a = a.unwrap();
    assert_eq!(o.candidate, 1);
    assert_eq!(a.candidate, 1);
    assert_eq!(o.name, "live");
    assert_eq!(a.name, "live");
    check_channel(&mut o, &mut a).await;
}

#[tokio::test]
async fn working_then_failing() {
    let candidates = vec![plain("live"), unreachable("dead").await];
    let (o, a) = negotiate(candidates).await;
    let mut o = o.unwrap();
    let mut a = a.unwrap();
    assert_eq!(o.candidate, 0);
    assert_eq!(a.candidate, 0);
    check_channel(&mut o, &mut a).await;
}

fn keyed_answerer(key_id: &str, key: &str) -> AnswererConfig {
    let mut config = AnswererConfig::default();
    config.keys.insert(key_id, key);
    config
}

/// Holds a local port whose next port is free.
async fn held_port_with_free_next() -> TcpListener {
    loop {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = held.local_addr().unwrap().port();
        if port == u16::MAX {
            continue;
        }
        if TcpListener::bind(("127.0.0.1", port + 1)).await.is_ok() {
            return held;
        }
    }
}

#[tokio::test]
async fn obfuscated_channel() {
    let mut candidate = plain("sealed");
    candidate.obfuscation = Some(ObfuscationSpec::new("sealed", Some("shared secret")));
    let config = keyed_answerer(DEFAULT_KEY_ID, "shared secret");
    let (o, a) = negotiate_with(vec![candidate], config).await;
    let mut o = o.unwrap();
    let mut a = a.unwrap();
    assert_eq!(o.name, "sealed");
    check_channel(&mut o, &mut a).await;
}

#[tokio::test]
async fn all_failing() {
    let mut bad_transform = plain("bad-transform");
    bad_transform.obfuscation = Some(ObfuscationSpec::new("rot13", None));
    let candidates = vec![unreachable("dead").await, bad_transform];

    let (o, a) = negotiate(candidates).await;
    let e = o.err().unwrap();
    assert_eq!(e.failures.len(), 2);
    assert_eq!(e.failures[0].index, 0);
    assert_eq!(e.failures[0].name, "dead");
    assert_eq!(e.failures[1].index, 1);
    assert!(a.is_err());
}

#[tokio::test]
async fn nothing_to_offer() {
    let (o, a) = negotiate(Vec::new()).await;
    let e = o.err().unwrap();
    assert!(e.failures.is_empty());
    assert_eq!(e.to_string(), "no transport candidate attempted");
    // the answerer gives up once the offerer signals are gone
    assert!(a.is_err());
}

#[tokio::test]
async fn obfuscated_by_key_id() {
    let mut candidate = plain("keystream");
    candidate.obfuscation =
        Some(ObfuscationSpec::new("keystream", Some("second")).with_key_id("relay-b"));
    let mut config = keyed_answerer(DEFAULT_KEY_ID, "first");
    config.keys.insert("relay-b", "second");
    let (o, a) = negotiate_with(vec![candidate], config).await;
    let mut o = o.unwrap();
    let mut a = a.unwrap();
    check_channel(&mut o, &mut a).await;
}

#[tokio::test]
async fn unknown_key_id() {
    let mut candidate = plain("sealed");
    candidate.obfuscation = Some(ObfuscationSpec::new("sealed", Some("k")).with_key_id("nope"));
    let (o, a) = negotiate_with(vec![candidate], keyed_answerer(DEFAULT_KEY_ID, "k")).await;
    let e = o.err().unwrap();
    assert_eq!(e.failures.len(), 1);
    assert!(matches!(e.failures[0].error, CandidateError::PeerFailed(_)));
    assert!(a.is_err());
}

#[tokio::test]
async fn fixed_bind_port_per_candidate() {
    // the port of the first candidate is taken, the second one uses the next
    let held = held_port_with_free_next().await;
    let mut config = AnswererConfig::default();
    config.listen.bind = held.local_addr().unwrap();

    let candidates = vec![plain("blocked"), plain("fallback")];
    let (o, a) = negotiate_with(candidates, config).await;
    let mut o = o.unwrap();
    let mut a = a.unwrap();
    assert_eq!(o.name, "fallback");
    assert_eq!(a.candidate, 1);
    check_channel(&mut o, &mut a).await;
    drop(held);
}

#[tokio::test]
async fn best_prefers_obfuscated() {
    let spec = ObfuscationSpec::new("sealed", Some("psk"));
    let candidates = expand_best(spec, CANDIDATE_TIMEOUT);
    let (o, a) = negotiate_with(candidates, keyed_answerer(DEFAULT_KEY_ID, "psk")).await;
    let mut o = o.unwrap();
    let mut a = a.unwrap();
    assert_eq!(o.name, "best-obfuscated");
    assert_eq!(a.candidate, 0);
    check_channel(&mut o, &mut a).await;
}

#[tokio::test]
async fn best_falls_back_to_plain() {
    // the answerer has no key, so only the plain candidate can complete
    let spec = ObfuscationSpec::new("sealed", Some("psk"));
    let candidates = expand_best(spec, CANDIDATE_TIMEOUT);
    let (o, a) = negotiate(candidates).await;
    let mut o = o.unwrap();
    let mut a = a.unwrap();
    assert_eq!(o.name, "best-plain");
    assert_eq!(a.candidate, 1);
    check_channel(&mut o, &mut a).await;
}

#[tokio::test]
async fn oversized_timeout_not_offered() {
    let mut huge = plain("huge");
    huge.timeout = Duration::MAX;
    let (o, a) = negotiate(vec![huge, plain("live")]).await;
    let o = o.unwrap();
    let a = a.unwrap();
    assert_eq!(o.candidate, 1);
    assert_eq!(a.name, "live");
}
