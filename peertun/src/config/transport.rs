/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

use crate::bridge::{TransportCandidate, TransportKind, expand_best};
use crate::obfs::ObfuscationSpec;

const DEFAULT_BEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A single plain candidate, used when no transport is configured.
pub(super) fn default_candidates() -> Vec<TransportCandidate> {
    vec![TransportCandidate::new("plain", TransportKind::TcpListen)]
}

/// Either an ordered candidate list, or a map holding the `best` preset.
pub(super) fn parse(v: &Yaml) -> anyhow::Result<Vec<TransportCandidate>> {
    match v {
        Yaml::Array(seq) => {
            let mut candidates = Vec::with_capacity(seq.len());
            for (i, v) in seq.iter().enumerate() {
                let candidate =
                    parse_candidate(v, i).context(format!("invalid transport candidate #{i}"))?;
                if candidates
                    .iter()
                    .any(|c: &TransportCandidate| c.name == candidate.name)
                {
                    return Err(anyhow!("duplicated transport candidate name {}", candidate.name));
                }
                candidates.push(candidate);
            }
            check_listen_binds(&candidates)?;
            Ok(candidates)
        }
        Yaml::Hash(map) => {
            let mut best = None;
            peertun_yaml::foreach_kv(map, |k, v| match peertun_yaml::key::normalize(k).as_str() {
                "best" => {
                    best = Some(parse_best(v)?);
                    Ok(())
                }
                _ => Err(anyhow!("invalid key {k}")),
            })?;
            best.ok_or_else(|| anyhow!("no transport preset set"))
        }
        _ => Err(anyhow!(
            "transport should be a candidate list or a map with the best preset"
        )),
    }
}

/// Candidates listening on this side must not share a fixed address.
fn check_listen_binds(candidates: &[TransportCandidate]) -> anyhow::Result<()> {
    let mut binds = Vec::new();
    for candidate in candidates {
        if candidate.kind != TransportKind::TcpConnect || candidate.listen.bind.port() == 0 {
            continue;
        }
        if binds.contains(&candidate.listen.bind) {
            return Err(anyhow!(
                "transport candidate {} binds {} which is already used",
                candidate.name,
                candidate.listen.bind
            ));
        }
        binds.push(candidate.listen.bind);
    }
    Ok(())
}

fn parse_best(v: &Yaml) -> anyhow::Result<Vec<TransportCandidate>> {
    let Yaml::Hash(map) = v else {
        return Err(anyhow!("yaml value type for best preset should be 'map'"));
    };
    let mut timeout = DEFAULT_BEST_TIMEOUT;
    let mut transform = None;
    let mut key = None;
    let mut key_id = None;
    peertun_yaml::foreach_kv(map, |k, v| match peertun_yaml::key::normalize(k).as_str() {
        "transform" => {
            transform = Some(peertun_yaml::value::as_string(v)?);
            Ok(())
        }
        "key" => {
            key = Some(peertun_yaml::value::as_string(v)?);
            Ok(())
        }
        "key_id" => {
            key_id = Some(peertun_yaml::value::as_string(v)?);
            Ok(())
        }
        "timeout" => {
            timeout = peertun_yaml::humanize::as_duration(v)
                .context(format!("invalid humanize duration value for key {k}"))?;
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    })?;
    let transform = transform.ok_or_else(|| anyhow!("no transform set for best preset"))?;
    let mut spec = ObfuscationSpec::new(&transform, key.as_deref());
    spec.key_id = key_id;
    Ok(expand_best(spec, timeout))
}

fn parse_kind(v: &Yaml) -> anyhow::Result<TransportKind> {
    let s = peertun_yaml::value::as_string(v)?;
    match peertun_yaml::key::normalize(&s).as_str() {
        "tcp_listen" => Ok(TransportKind::TcpListen),
        "tcp_connect" => Ok(TransportKind::TcpConnect),
        _ => Err(anyhow!("unsupported transport kind {s}")),
    }
}

fn parse_obfuscation(v: &Yaml) -> anyhow::Result<ObfuscationSpec> {
    match v {
        Yaml::String(transform) => Ok(ObfuscationSpec::new(transform, None)),
        Yaml::Hash(map) => parse_obfuscation_map(map),
        _ => Err(anyhow!(
            "yaml value type for obfuscation should be 'string' or 'map'"
        )),
    }
}

fn parse_obfuscation_map(map: &yaml::Hash) -> anyhow::Result<ObfuscationSpec> {
    let transform = peertun_yaml::hash_get_required_str(map, "transform")?;
    let mut spec = ObfuscationSpec::new(transform, None);
    peertun_yaml::foreach_kv(map, |k, v| match peertun_yaml::key::normalize(k).as_str() {
        "transform" => Ok(()),
        "key" => {
            spec.params.key = Some(peertun_yaml::value::as_string(v)?);
            Ok(())
        }
        "key_id" => {
            spec.key_id = Some(peertun_yaml::value::as_string(v)?);
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    })?;
    Ok(spec)
}

fn parse_candidate(v: &Yaml, index: usize) -> anyhow::Result<TransportCandidate> {
    let Yaml::Hash(map) = v else {
        return Err(anyhow!("yaml value type for transport candidate should be 'map'"));
    };
    let mut candidate =
        TransportCandidate::new(&format!("candidate-{index}"), TransportKind::TcpListen);
    peertun_yaml::foreach_kv(map, |k, v| match peertun_yaml::key::normalize(k).as_str() {
        "name" => {
            candidate.name = peertun_yaml::value::as_string(v)?;
            Ok(())
        }
        "kind" | "type" => {
            candidate.kind = parse_kind(v)?;
            Ok(())
        }
        "obfuscation" => {
            candidate.obfuscation = Some(parse_obfuscation(v)?);
            Ok(())
        }
        "timeout" => {
            candidate.timeout = peertun_yaml::humanize::as_duration(v)
                .context(format!("invalid humanize duration value for key {k}"))?;
            candidate
                .timeout_ms()
                .context(format!("invalid value for key {k}"))?;
            Ok(())
        }
        "start_delay" | "delay" => {
            candidate.start_delay = peertun_yaml::humanize::as_duration(v)
                .context(format!("invalid humanize duration value for key {k}"))?;
            Ok(())
        }
        "bind" => {
            candidate.listen.bind = peertun_yaml::value::as_sockaddr(v)
                .context(format!("invalid socket address value for key {k}"))?;
            Ok(())
        }
        "advertise" => {
            let endpoint = peertun_yaml::value::as_endpoint(v)
                .context(format!("invalid endpoint value for key {k}"))?;
            candidate.listen.advertise = Some(endpoint);
            Ok(())
        }
        "connect" | "tcp_connect" => {
            candidate.connect = peertun_yaml::value::as_tcp_connect_config(v)
                .context(format!("invalid tcp connect config value for key {k}"))?;
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    })?;
    Ok(candidate)
}
