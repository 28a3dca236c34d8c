/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod endpoint;
mod error;
mod host;
mod ip;
mod tcp;

pub use endpoint::Endpoint;
pub use error::ConnectError;
pub use host::Host;
pub use ip::{is_public_unicast, is_public_unicast_v4, is_public_unicast_v6};
pub use tcp::TcpConnectConfig;
