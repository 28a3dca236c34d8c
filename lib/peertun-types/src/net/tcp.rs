/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LINGER_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TcpConnectConfig {
    timeout: Duration,
    linger: Duration,
}

impl Default for TcpConnectConfig {
    fn default() -> Self {
        TcpConnectConfig {
            timeout: DEFAULT_CONNECT_TIMEOUT,
            linger: DEFAULT_LINGER_TIMEOUT,
        }
    }
}

impl TcpConnectConfig {
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How long queued data may still be flushed after close.
    pub fn set_linger(&mut self, linger: Duration) {
        self.linger = linger;
    }

    #[inline]
    pub fn linger(&self) -> Duration {
        self.linger
    }
}
