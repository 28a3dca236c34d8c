/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod net;
mod primary;

pub use net::{as_endpoint, as_sockaddr, as_tcp_connect_config};
pub use primary::{as_bool, as_string, as_u16};
