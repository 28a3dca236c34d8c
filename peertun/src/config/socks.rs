/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use crate::socks_to_tunnel::SocksServerConfig;

pub(super) fn parse(v: &Yaml) -> anyhow::Result<SocksServerConfig> {
    let mut config = SocksServerConfig::default();
    match v {
        Yaml::Hash(map) => {
            peertun_yaml::foreach_kv(map, |k, v| match peertun_yaml::key::normalize(k).as_str() {
                "listen" => {
                    config.listen = peertun_yaml::value::as_endpoint(v)
                        .context(format!("invalid endpoint value for key {k}"))?;
                    Ok(())
                }
                "negotiation_timeout" | "handshake_timeout" => {
                    config.negotiation_timeout = peertun_yaml::humanize::as_duration(v)
                        .context(format!("invalid humanize duration value for key {k}"))?;
                    Ok(())
                }
                "linger" => {
                    let linger = peertun_yaml::humanize::as_duration(v)
                        .context(format!("invalid humanize duration value for key {k}"))?;
                    config.connection.set_linger(linger);
                    Ok(())
                }
                _ => Err(anyhow!("invalid key {k}")),
            })?;
        }
        Yaml::String(_) | Yaml::Integer(_) => {
            config.listen = peertun_yaml::value::as_endpoint(v)
                .context("invalid socks listen endpoint")?;
        }
        _ => return Err(anyhow!("invalid value type for socks config")),
    }
    Ok(config)
}
