/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use humanize_rs::ParseError;
use yaml_rust::Yaml;

fn secs_f64(s: &str) -> anyhow::Result<Duration> {
    let f = f64::from_str(s).map_err(|e| anyhow!("invalid f64 value: {e}"))?;
    Duration::try_from_secs_f64(f).map_err(anyhow::Error::new)
}

/// Parse `10s`, `1m30s`, a plain integer (seconds) or a real (seconds).
pub fn as_duration(v: &Yaml) -> anyhow::Result<Duration> {
    match v {
        Yaml::String(value) => match humanize_rs::duration::parse(value) {
            Ok(v) => Ok(v),
            Err(ParseError::MissingUnit) => u64::from_str(value)
                .map(Duration::from_secs)
                .map_err(|_| anyhow!("invalid duration string {value}")),
            Err(e) => Err(anyhow!("invalid humanize duration string: {e}")),
        },
        Yaml::Integer(value) => u64::try_from(*value)
            .map(Duration::from_secs)
            .map_err(|_| anyhow!("negative duration value {value}")),
        Yaml::Real(s) => secs_f64(s),
        _ => Err(anyhow!(
            "yaml value type for humanize duration should be 'string' or 'integer' or 'real'"
        )),
    }
}
