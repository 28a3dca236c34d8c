/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub mod process;

mod task;
pub(crate) use task::TaskLogForSession;

const LOG_TYPE_TASK: &str = "Task";

/// Logger for the per session task records, derived from the global one.
pub fn task_logger() -> slog::Logger {
    slog_scope::logger().new(slog::o!(
        "log_type" => LOG_TYPE_TASK,
        "pid" => std::process::id(),
    ))
}
