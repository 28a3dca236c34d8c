/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, YamlLoader};

/// Load the single yaml document in the given file.
pub fn load_doc(path: &Path) -> anyhow::Result<Yaml> {
    let content = fs::read_to_string(path)
        .context(format!("failed to read file {}", path.display()))?;
    let mut docs = YamlLoader::load_from_str(&content)
        .map_err(|e| anyhow!("invalid yaml file {}: {e}", path.display()))?;
    match docs.len() {
        0 => Err(anyhow!("no yaml doc found in file {}", path.display())),
        1 => Ok(docs.remove(0)),
        n => Err(anyhow!(
            "only one yaml doc is allowed, but {n} found in file {}",
            path.display()
        )),
    }
}
