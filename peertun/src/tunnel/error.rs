/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

use super::RefuseReason;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TunnelError {
    #[error("tunnel broken")]
    Broken,
    #[error("session reset by peer")]
    Reset,
    #[error("session refused: {0}")]
    Refused(RefuseReason),
    #[error("session already finished")]
    Finished,
}

impl TunnelError {
    pub fn brief(&self) -> &'static str {
        match self {
            TunnelError::Broken => "TunnelBroken",
            TunnelError::Reset => "SessionReset",
            TunnelError::Refused(_) => "SessionRefused",
            TunnelError::Finished => "SessionFinished",
        }
    }
}
