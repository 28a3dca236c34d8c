/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocksNegotiationError {
    #[error("invalid version code")]
    InvalidVersion,
    #[error("no auth method set in request")]
    NoAuthMethod,
    #[error("no acceptable auth method")]
    NoAcceptableAuthMethod,
    #[error("invalid command code")]
    InvalidCommand,
    #[error("invalid domain string")]
    InvalidDomainString,
    #[error("invalid addr type")]
    InvalidAddrType,
}

#[derive(Error, Debug)]
pub enum SocksRequestParseError {
    #[error("read failed: {0:?}")]
    ReadFailed(io::Error),
    #[error("invalid socks protocol: {0}")]
    InvalidProtocol(#[from] SocksNegotiationError),
    #[error("client closed")]
    ClientClosed,
}

impl From<io::Error> for SocksRequestParseError {
    fn from(e: io::Error) -> Self {
        if matches!(e.kind(), io::ErrorKind::UnexpectedEof) {
            SocksRequestParseError::ClientClosed
        } else {
            SocksRequestParseError::ReadFailed(e)
        }
    }
}

#[derive(Error, Debug)]
pub enum SocksConnectError {
    #[error("io failed: {0:?}")]
    IoFailed(#[from] io::Error),
    #[error("no auth method available")]
    NoAuthMethodAvailable,
    #[error("invalid socks protocol: {0}")]
    InvalidProtocol(#[from] SocksNegotiationError),
    #[error("request failed: {0}")]
    RequestFailed(&'static str),
}
