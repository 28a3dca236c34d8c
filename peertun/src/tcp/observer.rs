/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::{CloseReason, ConnectionInfo};

/// Callbacks for connection lifecycle events.
///
/// Calls happen on the connection's own task and must not block.
pub trait TcpConnectionObserver: Send + Sync {
    fn on_connected(&self, _id: u64, _info: &ConnectionInfo) {}
    fn on_data_received(&self, _id: u64, _data: &[u8]) {}
    fn on_closed(&self, _id: u64, _reason: CloseReason) {}
}
