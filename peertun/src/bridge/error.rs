/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use peertun_types::net::ConnectError;

use crate::obfs::ObfsError;

#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("timed out")]
    TimedOut,
    #[error("obfuscation setup failed: {0}")]
    Obfuscation(#[from] ObfsError),
    #[error("timeout {0:?} out of range")]
    TimeoutOutOfRange(Duration),
    #[error("no listening port left for candidate #{0}")]
    PortOutOfRange(usize),
    #[error("bind failed: {0}")]
    Bind(io::Error),
    #[error("accept failed: {0}")]
    Accept(io::Error),
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("channel io failed: {0}")]
    ChannelIo(#[from] io::Error),
    #[error("handshake failed: {0}")]
    Handshake(&'static str),
    #[error("peer failed: {0}")]
    PeerFailed(String),
    #[error("abandoned")]
    Abandoned,
    #[error("task panicked")]
    Panicked,
}

#[derive(Debug)]
pub struct CandidateFailure {
    pub index: usize,
    pub name: String,
    pub error: CandidateError,
}

/// Every candidate failed or timed out.
#[derive(Debug, Error)]
pub struct NegotiationFailedError {
    pub failures: Vec<CandidateFailure>,
}

impl fmt::Display for NegotiationFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("no transport candidate attempted");
        }
        f.write_str("all transport candidates failed")?;
        for failure in &self.failures {
            write!(
                f,
                "; #{} {}: {}",
                failure.index, failure.name, failure.error
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let e = NegotiationFailedError {
            failures: vec![
                CandidateFailure {
                    index: 0,
                    name: "a".to_string(),
                    error: CandidateError::TimedOut,
                },
                CandidateFailure {
                    index: 1,
                    name: "b".to_string(),
                    error: CandidateError::Connect(ConnectError::ConnectionRefused),
                },
            ],
        };
        assert_eq!(
            e.to_string(),
            "all transport candidates failed; #0 a: timed out; #1 b: connect failed: connection refused"
        );
        let e = NegotiationFailedError {
            failures: Vec::new(),
        };
        assert_eq!(e.to_string(), "no transport candidate attempted");
    }
}
