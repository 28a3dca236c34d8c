/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use peertun_types::net::Endpoint;

#[derive(Clone, Copy)]
pub(crate) enum ServerTaskStage {
    Created,
    Preparing,
    Connecting,
    Replying,
    Relaying,
    Finished,
}

impl ServerTaskStage {
    pub(crate) fn brief(&self) -> &'static str {
        match self {
            ServerTaskStage::Created => "Created",
            ServerTaskStage::Preparing => "Preparing",
            ServerTaskStage::Connecting => "Connecting",
            ServerTaskStage::Replying => "Replying",
            ServerTaskStage::Relaying => "Relaying",
            ServerTaskStage::Finished => "Finished",
        }
    }
}

/// Notes of one relay task, bound to a single tcp connection.
pub(crate) struct ServerTaskNotes {
    pub(crate) id: u64,
    pub(crate) stage: ServerTaskStage,
    pub(crate) start_at: DateTime<Utc>,
    create_ins: Instant,
    pub(crate) client_addr: Option<SocketAddr>,
    pub(crate) destination: Option<Endpoint>,
    pub(crate) session_id: Option<u32>,
    pub(crate) ready_time: Duration,
}

impl ServerTaskNotes {
    pub(crate) fn new(id: u64, client_addr: Option<SocketAddr>) -> Self {
        ServerTaskNotes {
            id,
            stage: ServerTaskStage::Created,
            start_at: Utc::now(),
            create_ins: Instant::now(),
            client_addr,
            destination: None,
            session_id: None,
            ready_time: Duration::default(),
        }
    }

    pub(crate) fn mark_relaying(&mut self) {
        self.stage = ServerTaskStage::Relaying;
        self.ready_time = self.create_ins.elapsed();
    }

    #[inline]
    pub(crate) fn time_elapsed(&self) -> Duration {
        self.create_ins.elapsed()
    }
}
