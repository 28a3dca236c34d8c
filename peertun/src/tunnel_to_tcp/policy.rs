/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;

use peertun_types::net::{Endpoint, Host, is_public_unicast};

use crate::serve::ServerTaskError;

/// Which destinations the relay may connect to.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct DestinationPolicy {
    pub(super) allow_non_unicast: bool,
}

impl DestinationPolicy {
    fn check(&self, addr: &SocketAddr) -> bool {
        self.allow_non_unicast || is_public_unicast(addr.ip())
    }

    /// Resolve `destination` and check every address it resolves to.
    pub(super) async fn resolve(
        &self,
        destination: &Endpoint,
    ) -> Result<Vec<SocketAddr>, ServerTaskError> {
        let addrs: Vec<SocketAddr> = match destination.host() {
            Host::Ip(ip) => vec![SocketAddr::new(*ip, destination.port())],
            Host::Domain(domain) => tokio::net::lookup_host((domain.as_str(), destination.port()))
                .await
                .map_err(ServerTaskError::UpstreamNotResolved)?
                .collect(),
        };
        if addrs.is_empty() {
            return Err(ServerTaskError::UpstreamNotResolved(
                std::io::ErrorKind::NotFound.into(),
            ));
        }
        if addrs.iter().all(|addr| self.check(addr)) {
            Ok(addrs)
        } else {
            Err(ServerTaskError::DestinationForbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn ip_destinations() {
        let policy = DestinationPolicy::default();
        let public = Endpoint::from_str("8.8.8.8:53").unwrap();
        assert_eq!(policy.resolve(&public).await.unwrap().len(), 1);

        for s in ["127.0.0.1:80", "10.0.0.1:80", "[::1]:80", "[fe80::1]:80", "0.0.0.0:80"] {
            let dst = Endpoint::from_str(s).unwrap();
            assert!(matches!(
                policy.resolve(&dst).await,
                Err(ServerTaskError::DestinationForbidden)
            ));
        }

        let open = DestinationPolicy {
            allow_non_unicast: true,
        };
        let local = Endpoint::from_str("127.0.0.1:80").unwrap();
        assert!(open.resolve(&local).await.is_ok());
    }

    #[tokio::test]
    async fn domain_to_loopback() {
        let policy = DestinationPolicy::default();
        let dst = Endpoint::from_str("localhost:80").unwrap();
        assert!(policy.resolve(&dst).await.is_err());
    }
}
