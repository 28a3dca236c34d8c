/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

use crate::bridge::TransportCandidate;
use crate::socks_to_tunnel::SocksServerConfig;
use crate::tunnel_to_tcp::RelayConfig;

mod relay;
mod signaling;
mod socks;
mod transport;

pub use signaling::SignalingConfig;

/// Everything the daemon runs, from one yaml file.
#[derive(Debug)]
pub struct ProcessConfig {
    pub socks: Option<SocksServerConfig>,
    pub relay: Option<RelayConfig>,
    pub transport: Vec<TransportCandidate>,
    pub signaling: SignalingConfig,
}

impl ProcessConfig {
    fn check(&mut self) -> anyhow::Result<()> {
        match self.signaling {
            SignalingConfig::Loopback => {
                if self.socks.is_none() || self.relay.is_none() {
                    return Err(anyhow!(
                        "both socks and relay should be set for loopback signaling"
                    ));
                }
            }
            _ => {
                if self.socks.is_some() == self.relay.is_some() {
                    return Err(anyhow!(
                        "exactly one of socks or relay should be set for remote signaling"
                    ));
                }
            }
        }
        if self.socks.is_some() {
            if self.transport.is_empty() {
                self.transport = transport::default_candidates();
            }
            for candidate in &self.transport {
                candidate
                    .timeout_ms()
                    .context(format!("invalid timeout for candidate {}", candidate.name))?;
                let Some(spec) = &candidate.obfuscation else {
                    continue;
                };
                spec.check()
                    .context(format!("invalid obfuscation for candidate {}", candidate.name))?;
                // both ends live here, so the relay must hold the same key
                if let Some(relay) = &self.relay {
                    let resolved = spec.offer().resolve(&relay.transport.keys).context(format!(
                        "no relay obfuscation key for candidate {}",
                        candidate.name
                    ))?;
                    if resolved.params != spec.params {
                        return Err(anyhow!(
                            "relay obfuscation key differs for candidate {}",
                            candidate.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn load(path: &Path) -> anyhow::Result<ProcessConfig> {
    match peertun_yaml::load_doc(path)? {
        Yaml::Hash(map) => load_doc(&map),
        _ => Err(anyhow!("yaml doc root should be hash")),
    }
}

fn load_doc(map: &yaml::Hash) -> anyhow::Result<ProcessConfig> {
    let mut config = ProcessConfig {
        socks: None,
        relay: None,
        transport: Vec::new(),
        signaling: SignalingConfig::Loopback,
    };
    peertun_yaml::foreach_kv(map, |k, v| match peertun_yaml::key::normalize(k).as_str() {
        "socks" | "socks_server" => {
            config.socks = Some(socks::parse(v)?);
            Ok(())
        }
        "relay" => {
            config.relay = Some(relay::parse(v)?);
            Ok(())
        }
        "transport" | "transports" => {
            config.transport = transport::parse(v)?;
            Ok(())
        }
        "signaling" => {
            config.signaling = signaling::parse(v)?;
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k} in main conf")),
    })?;
    config.check()?;
    Ok(config)
}

#[cfg(test)]
fn yaml_hash(s: &str) -> yaml::Hash {
    let mut docs = yaml_rust::YamlLoader::load_from_str(s).unwrap();
    match docs.remove(0) {
        Yaml::Hash(map) => map,
        _ => panic!("not a hash"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback() {
        let map = yaml_hash(
            "socks:\n  listen: 127.0.0.1:0\nrelay:\n  allow_non_unicast: true\nsignaling: loopback\n",
        );
        let config = load_doc(&map).unwrap();
        assert!(config.socks.is_some());
        assert!(config.relay.as_ref().unwrap().allow_non_unicast);
        assert_eq!(config.transport.len(), 1);
        assert!(matches!(config.signaling, SignalingConfig::Loopback));
    }

    #[test]
    fn role_mismatch() {
        let map = yaml_hash("socks:\n  listen: 127.0.0.1:0\n");
        assert!(load_doc(&map).is_err());

        let map = yaml_hash(
            "socks: {}\nrelay: {}\nsignaling:\n  connect: 127.0.0.1:7000\n",
        );
        assert!(load_doc(&map).is_err());

        let map = yaml_hash("relay: {}\nsignaling:\n  listen: 127.0.0.1:7000\n");
        let config = load_doc(&map).unwrap();
        assert!(config.transport.is_empty());
    }

    #[test]
    fn unknown_key() {
        let map = yaml_hash("socks: {}\nrelay: {}\nmetrics: {}\n");
        assert!(load_doc(&map).is_err());
    }

    #[test]
    fn loopback_keys() {
        let transport = "transport:\n  - name: a\n    obfuscation:\n      transform: sealed\n      key: k1\n";
        let map = yaml_hash(&format!("socks: {{}}\nrelay: {{}}\n{transport}"));
        let e = load_doc(&map).unwrap_err();
        assert!(format!("{e:#}").contains("no relay obfuscation key"));

        let map = yaml_hash(&format!(
            "socks: {{}}\nrelay:\n  obfuscation_key: k2\n{transport}"
        ));
        assert!(load_doc(&map).is_err());

        let map = yaml_hash(&format!(
            "socks: {{}}\nrelay:\n  obfuscation_key: k1\n{transport}"
        ));
        assert!(load_doc(&map).is_ok());
    }

    #[test]
    fn bad_obfuscation() {
        let map = yaml_hash(
            "socks: {}\nrelay: {}\ntransport:\n  - name: a\n    obfuscation: rot13\n",
        );
        assert!(load_doc(&map).is_err());
    }
}
