/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use slog::{Logger, slog_info};

use crate::serve::{ServerTaskError, ServerTaskNotes};
use crate::splice::SpliceStats;

pub(crate) struct TaskLogForSession<'a> {
    pub(crate) logger: &'a Logger,
    pub(crate) task_type: &'static str,
    pub(crate) task_notes: &'a ServerTaskNotes,
    pub(crate) stats: Option<&'a SpliceStats>,
}

impl TaskLogForSession<'_> {
    pub(crate) fn log(&self, e: &ServerTaskError) {
        let (tcp_rd_bytes, tcp_wr_bytes) = self
            .stats
            .map(|s| (s.tcp_rd_bytes, s.tcp_wr_bytes))
            .unwrap_or_default();
        let destination = self.task_notes.destination.as_ref().map(|d| d.to_string());

        slog_info!(self.logger, "{}", e;
            "task_type" => self.task_type,
            "task_id" => self.task_notes.id,
            "stage" => self.task_notes.stage.brief(),
            "start_at" => self.task_notes.start_at.to_rfc3339(),
            "client_addr" => self.task_notes.client_addr.map(|a| a.to_string()),
            "destination" => destination,
            "session_id" => self.task_notes.session_id,
            "ready_time" => format!("{:?}", self.task_notes.ready_time),
            "total_time" => format!("{:?}", self.task_notes.time_elapsed()),
            "tcp_rd_bytes" => tcp_rd_bytes,
            "tcp_wr_bytes" => tcp_wr_bytes,
            "splice_end" => self.stats.map(|s| s.end.brief()),
            "reason" => e.brief(),
        )
    }
}
