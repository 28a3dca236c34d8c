/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use anyhow::anyhow;

/// Host part of an [`Endpoint`](super::Endpoint).
///
/// Domains are stored in their ascii (punycode) form.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl Host {
    pub fn unspecified() -> Self {
        Host::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn is_unspecified(&self) -> bool {
        match self {
            Host::Ip(ip) => ip.is_unspecified(),
            Host::Domain(domain) => domain.is_empty(),
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Host::Ip(ip) => Some(*ip),
            Host::Domain(_) => None,
        }
    }

    fn from_maybe_mapped_ip6(ip6: Ipv6Addr) -> Self {
        match ip6.to_ipv4_mapped() {
            Some(ip4) => Host::Ip(IpAddr::V4(ip4)),
            None => Host::Ip(IpAddr::V6(ip6)),
        }
    }

    pub fn from_domain_str(domain: &str) -> anyhow::Result<Self> {
        if domain.len() > 255 {
            return Err(anyhow!("domain too long"));
        }
        let domain = idna::domain_to_ascii(domain).map_err(|e| anyhow!("invalid domain: {e}"))?;
        if domain.is_empty() {
            return Err(anyhow!("empty domain"));
        }
        Ok(Host::Domain(domain))
    }
}

impl From<IpAddr> for Host {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Host::Ip(ip),
            IpAddr::V6(ip6) => Host::from_maybe_mapped_ip6(ip6),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(ip6)) => write!(f, "[{ip6}]"),
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Domain(domain) => f.write_str(domain),
        }
    }
}

impl FromStr for Host {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(anyhow!("empty string"));
        }
        if let Some(inner) = s.strip_prefix('[') {
            let Some(inner) = inner.strip_suffix(']') else {
                return Err(anyhow!("unclosed square bracket"));
            };
            return Ipv6Addr::from_str(inner)
                .map(Host::from_maybe_mapped_ip6)
                .map_err(|_| anyhow!("invalid ipv6 ip in squared brackets"));
        }
        if let Ok(ip) = IpAddr::from_str(s) {
            return Ok(Host::from(ip));
        }
        Host::from_domain_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ip() {
        assert_eq!(
            Host::from_str("127.0.0.1").unwrap(),
            Host::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(
            Host::from_str("[::1]").unwrap(),
            Host::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST))
        );
        assert_eq!(
            Host::from_str("::ffff:10.0.0.1").unwrap(),
            Host::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        );
        assert!(Host::from_str("[::1").is_err());
    }

    #[test]
    fn parse_domain() {
        assert_eq!(
            Host::from_str("Example.COM").unwrap(),
            Host::Domain("example.com".to_string())
        );
        assert!(Host::from_str("").is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Host::from_str("::1").unwrap().to_string(), "[::1]");
        assert_eq!(Host::unspecified().to_string(), "0.0.0.0");
    }
}
