/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub mod bridge;
pub mod channel;
pub mod config;
pub mod daemon;
pub mod log;
pub mod obfs;
pub mod opts;
pub mod signal;
pub mod socks_to_tunnel;
pub mod tcp;
pub mod tunnel;
pub mod tunnel_to_tcp;

mod build;
mod serve;
mod splice;

pub use serve::StartError;
