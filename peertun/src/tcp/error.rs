/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use peertun_types::net::{ConnectError, Endpoint};

#[derive(Debug, Error)]
pub enum TcpConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("connect already started")]
    ConnectStarted,
    #[error("connect failed: {0}")]
    ConnectFailed(#[from] ConnectError),
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("address {0} already in use")]
    AddressInUse(Endpoint),
    #[error("permission denied to bind {0}")]
    PermissionDenied(Endpoint),
    #[error("address {0} not available")]
    AddressNotAvailable(Endpoint),
    #[error("unable to resolve listen address {0}")]
    InvalidAddress(Endpoint),
    #[error("server already started")]
    AlreadyStarted,
    #[error("bind to {0} failed: {1:?}")]
    Other(Endpoint, io::Error),
}

impl BindError {
    pub(super) fn from_io(endpoint: &Endpoint, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::AddrInUse => BindError::AddressInUse(endpoint.clone()),
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied(endpoint.clone()),
            io::ErrorKind::AddrNotAvailable => BindError::AddressNotAvailable(endpoint.clone()),
            _ => BindError::Other(endpoint.clone(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn from_io() {
        let ep = Endpoint::from_str("127.0.0.1:80").unwrap();
        let e = BindError::from_io(&ep, io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(e, BindError::AddressInUse(_)));
        let e = BindError::from_io(&ep, io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(e.to_string(), "permission denied to bind 127.0.0.1:80");
        let e = BindError::from_io(&ep, io::Error::other("x"));
        assert!(matches!(e, BindError::Other(_, _)));
    }
}
