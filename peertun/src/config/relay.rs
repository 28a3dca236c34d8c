/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use crate::obfs::{DEFAULT_KEY_ID, ObfuscationKeys};
use crate::tunnel_to_tcp::RelayConfig;

fn parse_keys(v: &Yaml, keys: &mut ObfuscationKeys) -> anyhow::Result<()> {
    let Yaml::Hash(map) = v else {
        return Err(anyhow!("yaml value type for obfuscation keys should be 'map'"));
    };
    peertun_yaml::foreach_kv(map, |k, v| {
        let key = peertun_yaml::value::as_string(v)?;
        if key.is_empty() {
            return Err(anyhow!("empty obfuscation key for id {k}"));
        }
        keys.insert(k, &key);
        Ok(())
    })
}

pub(super) fn parse(v: &Yaml) -> anyhow::Result<RelayConfig> {
    let Yaml::Hash(map) = v else {
        return Err(anyhow!("yaml value type for relay config should be 'map'"));
    };
    let mut config = RelayConfig::default();
    peertun_yaml::foreach_kv(map, |k, v| match peertun_yaml::key::normalize(k).as_str() {
        "allow_non_unicast" => {
            config.allow_non_unicast = peertun_yaml::value::as_bool(v)?;
            Ok(())
        }
        "connect" | "tcp_connect" | "connect_timeout" => {
            config.connect = peertun_yaml::value::as_tcp_connect_config(v)
                .context(format!("invalid tcp connect config value for key {k}"))?;
            Ok(())
        }
        "bind" | "transport_bind" => {
            config.transport.listen.bind = peertun_yaml::value::as_sockaddr(v)
                .context(format!("invalid socket address value for key {k}"))?;
            Ok(())
        }
        "advertise" | "transport_advertise" => {
            let endpoint = peertun_yaml::value::as_endpoint(v)
                .context(format!("invalid endpoint value for key {k}"))?;
            config.transport.listen.advertise = Some(endpoint);
            Ok(())
        }
        "obfuscation_key" => {
            let key = peertun_yaml::value::as_string(v)?;
            if key.is_empty() {
                return Err(anyhow!("empty value for key {k}"));
            }
            config.transport.keys.insert(DEFAULT_KEY_ID, &key);
            Ok(())
        }
        "obfuscation_keys" => parse_keys(v, &mut config.transport.keys)
            .context(format!("invalid obfuscation keys value for key {k}")),
        "transport_connect" => {
            config.transport.connect = peertun_yaml::value::as_tcp_connect_config(v)
                .context(format!("invalid tcp connect config value for key {k}"))?;
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn full() {
        let map = super::super::yaml_hash(
            "relay:\n  allow_non_unicast: yes\n  connect:\n    timeout: 5s\n    linger: 1s\n  bind: 0.0.0.0:7001\n  advertise: 203.0.113.9:0\n  transport_connect: 8s\n  obfuscation_key: k0\n  obfuscation_keys:\n    relay-a: ka\n",
        );
        let v = map.get(&Yaml::String("relay".to_string())).unwrap();
        let config = parse(v).unwrap();
        assert!(config.allow_non_unicast);
        assert_eq!(config.connect.timeout(), Duration::from_secs(5));
        assert_eq!(config.connect.linger(), Duration::from_secs(1));
        assert_eq!(config.transport.listen.bind.port(), 7001);
        assert_eq!(
            config.transport.listen.advertise.as_ref().unwrap().to_string(),
            "203.0.113.9:0"
        );
        assert_eq!(config.transport.connect.timeout(), Duration::from_secs(8));
        assert_eq!(config.transport.keys.get(DEFAULT_KEY_ID), Some("k0"));
        assert_eq!(config.transport.keys.get("relay-a"), Some("ka"));
    }

    #[test]
    fn invalid() {
        assert!(parse(&Yaml::String("x".to_string())).is_err());
        let map = super::super::yaml_hash("relay:\n  allow_private: true\n");
        let v = map.get(&Yaml::String("relay".to_string())).unwrap();
        assert!(parse(v).is_err());

        let map = super::super::yaml_hash("relay:\n  obfuscation_key: ''\n");
        let v = map.get(&Yaml::String("relay".to_string())).unwrap();
        assert!(parse(v).is_err());
    }
}
