/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use peertun_types::net::{Endpoint, TcpConnectConfig};

pub fn as_sockaddr(v: &Yaml) -> anyhow::Result<SocketAddr> {
    match v {
        Yaml::String(s) => {
            SocketAddr::from_str(s).map_err(|e| anyhow!("invalid socket address {s}: {e}"))
        }
        _ => Err(anyhow!("yaml value type for 'SocketAddr' should be 'string'")),
    }
}

/// Parse `host:port`, or a bare integer meaning a port on all addresses.
pub fn as_endpoint(v: &Yaml) -> anyhow::Result<Endpoint> {
    match v {
        Yaml::String(s) => Endpoint::from_str(s),
        Yaml::Integer(i) => {
            let port = super::as_u16(v).context(format!("out of range port {i}"))?;
            Ok(Endpoint::new(peertun_types::net::Host::unspecified(), port))
        }
        _ => Err(anyhow!(
            "yaml value type for 'Endpoint' should be 'string' or 'integer'"
        )),
    }
}

/// A duration is taken as the connect timeout, a map may set `timeout` and `linger`.
pub fn as_tcp_connect_config(v: &Yaml) -> anyhow::Result<TcpConnectConfig> {
    let mut config = TcpConnectConfig::default();
    match v {
        Yaml::Hash(map) => {
            crate::foreach_kv(map, |k, v| match crate::key::normalize(k).as_str() {
                "timeout" | "connect_timeout" => {
                    let timeout = crate::humanize::as_duration(v)
                        .context(format!("invalid humanize duration value for key {k}"))?;
                    config.set_timeout(timeout);
                    Ok(())
                }
                "linger" => {
                    let linger = crate::humanize::as_duration(v)
                        .context(format!("invalid humanize duration value for key {k}"))?;
                    config.set_linger(linger);
                    Ok(())
                }
                _ => Err(anyhow!("invalid key {k}")),
            })?;
        }
        _ => {
            let timeout = crate::humanize::as_duration(v)
                .context("invalid tcp connect timeout value")?;
            config.set_timeout(timeout);
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn t_endpoint() {
        let v = Yaml::String("0.0.0.0:9999".to_string());
        let ep = as_endpoint(&v).unwrap();
        assert_eq!(ep.port(), 9999);

        let v = Yaml::Integer(1080);
        let ep = as_endpoint(&v).unwrap();
        assert_eq!(ep.to_string(), "0.0.0.0:1080");

        let v = Yaml::Integer(70000);
        assert!(as_endpoint(&v).is_err());
    }

    #[test]
    fn t_sockaddr() {
        let v = Yaml::String("127.0.0.1:0".to_string());
        assert_eq!(as_sockaddr(&v).unwrap().port(), 0);
        let v = Yaml::String("localhost:80".to_string());
        assert!(as_sockaddr(&v).is_err());
    }

    #[test]
    fn t_tcp_connect_config() {
        let v = yaml_doc!("timeout: 5s\nlinger: 1s");
        let config = as_tcp_connect_config(&v).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.linger(), Duration::from_secs(1));

        let v = Yaml::String("3s".to_string());
        let config = as_tcp_connect_config(&v).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(3));

        let v = yaml_doc!("retry: 3");
        assert!(as_tcp_connect_config(&v).is_err());
    }
}
