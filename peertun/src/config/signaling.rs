/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use peertun_types::net::Endpoint;

/// How the signals reach the peer.
#[derive(Clone, Debug)]
pub enum SignalingConfig {
    /// Both ends run in this process.
    Loopback,
    /// Wait for the peer on a tcp listener.
    Listen(SocketAddr),
    /// Connect to the listener of the peer.
    Connect(Endpoint),
}

pub(super) fn parse(v: &Yaml) -> anyhow::Result<SignalingConfig> {
    match v {
        Yaml::String(s) if s.eq_ignore_ascii_case("loopback") => Ok(SignalingConfig::Loopback),
        Yaml::Hash(map) => {
            let mut config = None;
            peertun_yaml::foreach_kv(map, |k, v| {
                let parsed = match peertun_yaml::key::normalize(k).as_str() {
                    "listen" => SignalingConfig::Listen(
                        peertun_yaml::value::as_sockaddr(v)
                            .context(format!("invalid socket address value for key {k}"))?,
                    ),
                    "connect" => SignalingConfig::Connect(
                        peertun_yaml::value::as_endpoint(v)
                            .context(format!("invalid endpoint value for key {k}"))?,
                    ),
                    _ => return Err(anyhow!("invalid key {k}")),
                };
                if config.replace(parsed).is_some() {
                    return Err(anyhow!("only one of listen or connect is allowed"));
                }
                Ok(())
            })?;
            config.ok_or_else(|| anyhow!("no listen or connect set for signaling"))
        }
        _ => Err(anyhow!(
            "signaling should be 'loopback' or a map with listen / connect"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signaling_of(s: &str) -> anyhow::Result<SignalingConfig> {
        let map = super::super::yaml_hash(s);
        parse(map.get(&Yaml::String("signaling".to_string())).unwrap())
    }

    #[test]
    fn variants() {
        assert!(matches!(
            signaling_of("signaling: loopback").unwrap(),
            SignalingConfig::Loopback
        ));
        let SignalingConfig::Listen(addr) =
            signaling_of("signaling:\n  listen: 127.0.0.1:7000").unwrap()
        else {
            panic!("not listen");
        };
        assert_eq!(addr.port(), 7000);
        let SignalingConfig::Connect(endpoint) =
            signaling_of("signaling:\n  connect: peer.example.net:7000").unwrap()
        else {
            panic!("not connect");
        };
        assert_eq!(endpoint.to_string(), "peer.example.net:7000");
    }

    #[test]
    fn invalid() {
        assert!(signaling_of("signaling: p2p").is_err());
        assert!(signaling_of("signaling: {}").is_err());
        assert!(
            signaling_of("signaling:\n  listen: 127.0.0.1:7000\n  connect: 127.0.0.1:7000")
                .is_err()
        );
    }
}
