/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown obfuscation transform {0}")]
pub struct UnknownTransformError(pub String);

#[derive(Debug, Error)]
pub enum ObfsError {
    #[error(transparent)]
    UnknownTransform(#[from] UnknownTransformError),
    #[error("invalid params for transform {transform}: {reason}")]
    InvalidParams {
        transform: &'static str,
        reason: &'static str,
    },
    #[error("no obfuscation key configured with id {0}")]
    UnknownKeyId(String),
}
