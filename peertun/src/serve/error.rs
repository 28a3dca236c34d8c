/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use peertun_socks::{SocksCommand, SocksRequestParseError};
use peertun_types::net::ConnectError;

use crate::bridge::NegotiationFailedError;
use crate::splice::SpliceEnd;
use crate::tcp::{BindError, CloseReason};
use crate::tunnel::{RefuseReason, TunnelError};

/// Why a bridge could not be started.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("already started")]
    AlreadyStarted,
    #[error("socks server: {0}")]
    Bind(#[from] BindError),
    #[error("{0}")]
    Negotiation(#[from] NegotiationFailedError),
}

#[derive(Error, Debug)]
pub(crate) enum ServerTaskError {
    #[error("invalid client protocol: {0}")]
    InvalidClientProtocol(SocksRequestParseError),
    #[error("tcp read from client: {0:?}")]
    ClientTcpReadFailed(io::Error),
    #[error("tcp write to client: closed")]
    ClientTcpWriteFailed,
    #[error("client authentication failed")]
    ClientAuthFailed,
    #[error("client app timeout: {0}")]
    ClientAppTimeout(&'static str),
    #[error("unsupported command {0}")]
    UnsupportedCommand(SocksCommand),
    #[error("destination forbidden")]
    DestinationForbidden,
    #[error("upstream not resolved: {0:?}")]
    UpstreamNotResolved(io::Error),
    #[error("upstream not connected: {0}")]
    UpstreamNotConnected(ConnectError),
    #[error("session refused: {0}")]
    SessionRefused(RefuseReason),
    #[error("tunnel error: {0}")]
    TunnelFailed(TunnelError),
    #[error("closed by upstream")]
    ClosedByUpstream,
    #[error("closed by client")]
    ClosedByClient,
    #[error("closed early by client")]
    ClosedEarlyByClient,
    #[error("canceled as server quit")]
    CanceledAsServerQuit,
    #[error("finished")]
    Finished, // this isn't an error, for log only
}

impl ServerTaskError {
    pub(crate) fn brief(&self) -> &'static str {
        match self {
            ServerTaskError::InvalidClientProtocol(_) => "InvalidClientProtocol",
            ServerTaskError::ClientTcpReadFailed(_) => "ClientTcpReadFailed",
            ServerTaskError::ClientTcpWriteFailed => "ClientTcpWriteFailed",
            ServerTaskError::ClientAuthFailed => "ClientAuthFailed",
            ServerTaskError::ClientAppTimeout(_) => "ClientAppTimeout",
            ServerTaskError::UnsupportedCommand(_) => "UnsupportedCommand",
            ServerTaskError::DestinationForbidden => "DestinationForbidden",
            ServerTaskError::UpstreamNotResolved(_) => "UpstreamNotResolved",
            ServerTaskError::UpstreamNotConnected(_) => "UpstreamNotConnected",
            ServerTaskError::SessionRefused(_) => "SessionRefused",
            ServerTaskError::TunnelFailed(e) => e.brief(),
            ServerTaskError::ClosedByUpstream => "ClosedByUpstream",
            ServerTaskError::ClosedByClient => "ClosedByClient",
            ServerTaskError::ClosedEarlyByClient => "ClosedEarlyByClient",
            ServerTaskError::CanceledAsServerQuit => "CanceledAsServerQuit",
            ServerTaskError::Finished => "Finished",
        }
    }

    pub(crate) fn is_tunnel_broken(&self) -> bool {
        matches!(self, ServerTaskError::TunnelFailed(TunnelError::Broken))
    }

    /// Classify how a splice ended, `tcp_is_client` telling which side the
    /// tcp connection faces.
    pub(crate) fn from_splice_end(end: SpliceEnd, tcp_is_client: bool) -> Self {
        match end {
            SpliceEnd::TcpClosed(CloseReason::RemotelyClosed) => {
                if tcp_is_client {
                    ServerTaskError::ClosedByClient
                } else {
                    ServerTaskError::ClosedByUpstream
                }
            }
            SpliceEnd::TcpClosed(_) => ServerTaskError::CanceledAsServerQuit,
            SpliceEnd::SessionFinished => ServerTaskError::Finished,
            SpliceEnd::SessionFailed(e) => ServerTaskError::TunnelFailed(e),
        }
    }
}

impl From<SocksRequestParseError> for ServerTaskError {
    fn from(e: SocksRequestParseError) -> Self {
        match e {
            SocksRequestParseError::ReadFailed(e) => ServerTaskError::ClientTcpReadFailed(e),
            SocksRequestParseError::ClientClosed => ServerTaskError::ClosedEarlyByClient,
            e => ServerTaskError::InvalidClientProtocol(e),
        }
    }
}

impl From<TunnelError> for ServerTaskError {
    fn from(e: TunnelError) -> Self {
        match e {
            TunnelError::Refused(reason) => ServerTaskError::SessionRefused(reason),
            e => ServerTaskError::TunnelFailed(e),
        }
    }
}

pub(crate) type ServerTaskResult<T> = Result<T, ServerTaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_end() {
        let e = ServerTaskError::from_splice_end(
            SpliceEnd::TcpClosed(CloseReason::RemotelyClosed),
            true,
        );
        assert_eq!(e.brief(), "ClosedByClient");
        let e = ServerTaskError::from_splice_end(
            SpliceEnd::TcpClosed(CloseReason::RemotelyClosed),
            false,
        );
        assert_eq!(e.brief(), "ClosedByUpstream");
        let e = ServerTaskError::from_splice_end(SpliceEnd::SessionFailed(TunnelError::Broken), true);
        assert_eq!(e.brief(), "TunnelBroken");
    }

    #[test]
    fn socks_parse() {
        let e = ServerTaskError::from(SocksRequestParseError::ClientClosed);
        assert!(matches!(e, ServerTaskError::ClosedEarlyByClient));
        let e = ServerTaskError::from(TunnelError::Refused(RefuseReason::TimedOut));
        assert_eq!(e.to_string(), "session refused: connect timed out");
    }
}
