/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Managed tcp connections and servers.
//!
//! Every socket is driven by its own reader and writer future, so a stalled
//! peer on one direction never blocks the other one. The owner only sees
//! message passing: a bounded send queue, a data stream and two notifications
//! for the connect and close transitions.

mod close;
mod connection;
mod error;
mod observer;
mod server;

pub use close::CloseReason;
pub use connection::{
    ConnectionHandle, ConnectionInfo, ConnectionState, DataFromSocket, ManagedTcpConnection,
};
pub use error::{BindError, TcpConnectionError};
pub use observer::TcpConnectionObserver;
pub use server::{ManagedTcpServer, ServerHandle, ServerState};

pub(crate) use connection::connect_stream;
