/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use peertun_types::net::{Endpoint, TcpConnectConfig};

use super::CandidateError;
use crate::obfs::{ObfuscationOffer, ObfuscationSpec};

const DEFAULT_CANDIDATE_TIMEOUT: Duration = Duration::from_secs(10);
const BEST_PLAIN_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// The answerer listens and the offerer connects.
    TcpListen,
    /// The offerer listens and the answerer connects.
    TcpConnect,
}

impl TransportKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportKind::TcpListen => "tcp_listen",
            TransportKind::TcpConnect => "tcp_connect",
        }
    }
}

/// Local listening settings for the side that listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpListenSettings {
    pub bind: SocketAddr,
    /// Endpoint sent to the peer. Port 0 is replaced with the bound port.
    pub advertise: Option<Endpoint>,
}

impl Default for TcpListenSettings {
    fn default() -> Self {
        TcpListenSettings {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            advertise: None,
        }
    }
}

impl TcpListenSettings {
    /// Settings for one of many candidates sharing this config.
    ///
    /// Fixed ports are shifted by the candidate index so that concurrent
    /// candidates never bind the same address. Port 0 stays as it is.
    pub(super) fn for_candidate(&self, index: usize) -> Result<Self, CandidateError> {
        let shift = |port: u16| -> Result<u16, CandidateError> {
            if port == 0 {
                return Ok(0);
            }
            u16::try_from(index)
                .ok()
                .and_then(|i| port.checked_add(i))
                .ok_or(CandidateError::PortOutOfRange(index))
        };
        let mut settings = self.clone();
        settings.bind.set_port(shift(self.bind.port())?);
        if let Some(endpoint) = &mut settings.advertise {
            endpoint.set_port(shift(endpoint.port())?);
        }
        Ok(settings)
    }

    pub(super) fn advertised(&self, bound: SocketAddr) -> Endpoint {
        match &self.advertise {
            Some(endpoint) => {
                let mut endpoint = endpoint.clone();
                if endpoint.port() == 0 {
                    endpoint.set_port(bound.port());
                }
                endpoint
            }
            None => {
                let ip = match bound.ip() {
                    IpAddr::V4(ip4) if ip4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    IpAddr::V6(ip6) if ip6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    ip => ip,
                };
                Endpoint::from_ip_and_port(ip, bound.port())
            }
        }
    }
}

/// One transport the offerer will attempt.
#[derive(Clone, Debug)]
pub struct TransportCandidate {
    pub name: String,
    pub kind: TransportKind,
    pub obfuscation: Option<ObfuscationSpec>,
    pub timeout: Duration,
    /// Wait this long before offering, on top of the timeout.
    pub start_delay: Duration,
    /// Used when this side listens.
    pub listen: TcpListenSettings,
    /// Used when this side connects.
    pub connect: TcpConnectConfig,
}

impl TransportCandidate {
    pub fn new(name: &str, kind: TransportKind) -> Self {
        TransportCandidate {
            name: name.to_string(),
            kind,
            obfuscation: None,
            timeout: DEFAULT_CANDIDATE_TIMEOUT,
            start_delay: Duration::ZERO,
            listen: TcpListenSettings::default(),
            connect: TcpConnectConfig::default(),
        }
    }

    pub fn timeout_ms(&self) -> Result<u64, CandidateError> {
        u64::try_from(self.timeout.as_millis())
            .map_err(|_| CandidateError::TimeoutOutOfRange(self.timeout))
    }

    pub(super) fn offer(&self, index: usize, total: usize) -> Result<CandidateOffer, CandidateError> {
        Ok(CandidateOffer {
            candidate: index,
            total,
            name: self.name.clone(),
            transport: self.kind,
            obfuscation: self.obfuscation.as_ref().map(|spec| spec.offer()),
            timeout_ms: self.timeout_ms()?,
        })
    }
}

/// Expand a single obfuscation into an obfuscated and a plain candidate.
///
/// The plain one is offered after a head start of the obfuscated one, so
/// it only wins when the obfuscated one has not completed by then.
pub fn expand_best(obfuscation: ObfuscationSpec, timeout: Duration) -> Vec<TransportCandidate> {
    let mut obfuscated = TransportCandidate::new("best-obfuscated", TransportKind::TcpListen);
    obfuscated.obfuscation = Some(obfuscation);
    obfuscated.timeout = timeout;
    let mut plain = TransportCandidate::new("best-plain", TransportKind::TcpListen);
    plain.timeout = timeout;
    plain.start_delay = BEST_PLAIN_DELAY.min(timeout / 2);
    vec![obfuscated, plain]
}

/// What the answerer learns about a candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOffer {
    pub candidate: usize,
    pub total: usize,
    pub name: String,
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfuscation: Option<ObfuscationOffer>,
    pub timeout_ms: u64,
}

impl CandidateOffer {
    pub(super) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
