/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Multiplexes tcp sessions over one negotiated message channel.
//!
//! Each session has its own credit window so a slow session never stalls
//! the others. Session ids opened by the offerer are odd, the answerer
//! uses even ids.

mod error;
mod frame;
mod mux;
mod session;

pub use error::TunnelError;
pub use frame::RefuseReason;
pub use mux::{IncomingSession, IncomingSessions, TunnelHandle, start};
#[cfg(test)]
pub(crate) use mux::start_with;
pub use session::{SessionReceiver, SessionSender, TunnelSession};

const RECV_WINDOW: usize = 256 * 1024;
const MAX_DATA_PAYLOAD: usize = 16 * 1024;
