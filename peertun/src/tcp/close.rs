/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Why a connection reached the closed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Closed on request of the local owner.
    WeClosedIt,
    /// The peer closed, reset, or the far end of a splice went away.
    RemotelyClosed,
    /// The connection never got established.
    NeverConnected,
}

impl CloseReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::WeClosedIt => "WeClosedIt",
            CloseReason::RemotelyClosed => "RemotelyClosed",
            CloseReason::NeverConnected => "NeverConnected",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const STATE_CONNECTING: u8 = 0;
const STATE_CONNECTED: u8 = 1;
const STATE_CLOSED_WE: u8 = 2;
const STATE_CLOSED_REMOTE: u8 = 3;
const STATE_CLOSED_NEVER: u8 = 4;

/// Which state a successful close transition left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ClosedFrom {
    Connecting,
    Connected,
}

/// Lifecycle state packed into one atomic.
///
/// The close reason is part of the state value, so the first transition
/// into closed is the only one that sticks.
pub(super) struct StateCell(AtomicU8);

impl StateCell {
    pub(super) fn connecting() -> Self {
        StateCell(AtomicU8::new(STATE_CONNECTING))
    }

    pub(super) fn connected() -> Self {
        StateCell(AtomicU8::new(STATE_CONNECTED))
    }

    pub(super) fn is_connecting(&self) -> bool {
        self.0.load(Ordering::Acquire) == STATE_CONNECTING
    }

    pub(super) fn is_connected(&self) -> bool {
        self.0.load(Ordering::Acquire) == STATE_CONNECTED
    }

    pub(super) fn close_reason(&self) -> Option<CloseReason> {
        match self.0.load(Ordering::Acquire) {
            STATE_CLOSED_WE => Some(CloseReason::WeClosedIt),
            STATE_CLOSED_REMOTE => Some(CloseReason::RemotelyClosed),
            STATE_CLOSED_NEVER => Some(CloseReason::NeverConnected),
            _ => None,
        }
    }

    pub(super) fn set_connected(&self) -> bool {
        self.0
            .compare_exchange(
                STATE_CONNECTING,
                STATE_CONNECTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move into closed, returning the recorded reason on success.
    ///
    /// Closing from the connecting state always records `NeverConnected`.
    pub(super) fn set_closed(&self, reason: CloseReason) -> Option<(CloseReason, ClosedFrom)> {
        let mut cur = self.0.load(Ordering::Acquire);
        loop {
            let (recorded, from) = match cur {
                STATE_CONNECTING => (CloseReason::NeverConnected, ClosedFrom::Connecting),
                STATE_CONNECTED => (reason, ClosedFrom::Connected),
                _ => return None,
            };
            let code = match recorded {
                CloseReason::WeClosedIt => STATE_CLOSED_WE,
                CloseReason::RemotelyClosed => STATE_CLOSED_REMOTE,
                CloseReason::NeverConnected => STATE_CLOSED_NEVER,
            };
            match self
                .0
                .compare_exchange(cur, code, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some((recorded, from)),
                Err(v) => cur = v,
            }
        }
    }
}
