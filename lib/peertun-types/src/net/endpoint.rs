/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use anyhow::{Context, anyhow};

use super::Host;

/// A host and port pair.
///
/// Port 0 in a listen endpoint means any free port.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Endpoint {
    host: Host,
    port: u16,
}

impl Endpoint {
    pub fn new(host: Host, port: u16) -> Self {
        Endpoint { host, port }
    }

    pub fn from_ip_and_port(ip: IpAddr, port: u16) -> Self {
        Endpoint::new(Host::from(ip), port)
    }

    pub fn from_host_str_and_port(host: &str, port: u16) -> anyhow::Result<Self> {
        let host = Host::from_str(host)?;
        Ok(Endpoint::new(host, port))
    }

    #[inline]
    pub fn host(&self) -> &Host {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// The socket address if the host is an ip literal.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.host.ip().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::from_ip_and_port(addr.ip(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((host, port)) = s.rsplit_once(':') else {
            return Err(anyhow!("no port found in {s}"));
        };
        if host.contains(':') && !host.starts_with('[') {
            return Err(anyhow!("ipv6 host should be enclosed in square brackets"));
        }
        let port = u16::from_str(port).map_err(|e| anyhow!("invalid port {port}: {e}"))?;
        let host = Host::from_str(host).context(format!("invalid host {host}"))?;
        Ok(Endpoint::new(host, port))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Endpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        Endpoint::from_str(&s).map_err(serde::de::Error::custom)
    }
}
