/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub mod net;

#[cfg(feature = "async-log")]
pub mod log;
