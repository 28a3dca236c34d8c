/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::StartError;
pub(crate) use error::{ServerTaskError, ServerTaskResult};

mod task;
pub(crate) use task::{ServerTaskNotes, ServerTaskStage};
