/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use slog::Logger;
use tokio::time::Instant;

use peertun_types::net::{ConnectError, Endpoint, TcpConnectConfig};

use super::policy::DestinationPolicy;
use crate::log::TaskLogForSession;
use crate::serve::{ServerTaskError, ServerTaskNotes, ServerTaskResult, ServerTaskStage};
use crate::splice::{self, SpliceStats};
use crate::tcp::{ManagedTcpConnection, TcpConnectionError};
use crate::tunnel::{IncomingSession, RefuseReason};

pub(super) struct RelayTaskContext {
    pub(super) policy: DestinationPolicy,
    pub(super) connect: TcpConnectConfig,
    pub(super) task_logger: Option<Logger>,
}

/// One connect timeout shared by all resolved addresses.
struct ConnectBudget {
    deadline: Instant,
}

impl ConnectBudget {
    fn new(timeout: Duration) -> Self {
        ConnectBudget {
            deadline: Instant::now() + timeout,
        }
    }

    /// Timeout for the next attempt, with `left` addresses still to try.
    fn next_timeout(&self, left: usize) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let share = u32::try_from(left.max(1)).unwrap_or(u32::MAX);
        Some(remaining / share)
    }
}

pub(super) struct RelayTask {
    ctx: Arc<RelayTaskContext>,
    task_notes: ServerTaskNotes,
}

impl RelayTask {
    pub(super) fn new(ctx: Arc<RelayTaskContext>, request: &IncomingSession) -> Self {
        let mut task_notes = ServerTaskNotes::new(u64::from(request.id()), None);
        task_notes.session_id = Some(request.id());
        task_notes.destination = Some(request.destination().clone());
        RelayTask { ctx, task_notes }
    }

    pub(super) async fn into_running(mut self, request: IncomingSession) {
        let (e, stats) = match self.run(request).await {
            Ok(stats) => (ServerTaskError::from_splice_end(stats.end, false), Some(stats)),
            Err(e) => (e, None),
        };
        self.task_notes.stage = ServerTaskStage::Finished;
        debug!("relay task {} finished: {e}", self.task_notes.id);
        if let Some(logger) = &self.ctx.task_logger {
            TaskLogForSession {
                logger,
                task_type: "TunnelToTcp",
                task_notes: &self.task_notes,
                stats: stats.as_ref(),
            }
            .log(&e);
        }
    }

    async fn run(&mut self, request: IncomingSession) -> ServerTaskResult<SpliceStats> {
        self.task_notes.stage = ServerTaskStage::Preparing;
        let addrs = match self.ctx.policy.resolve(request.destination()).await {
            Ok(addrs) => addrs,
            Err(e) => {
                request.reject(refuse_reason(&e));
                return Err(e);
            }
        };

        self.task_notes.stage = ServerTaskStage::Connecting;
        let mut last_err = None;
        let mut connected = None;
        let budget = ConnectBudget::new(self.ctx.connect.timeout());
        let total = addrs.len();
        for (i, addr) in addrs.into_iter().enumerate() {
            let Some(timeout) = budget.next_timeout(total - i) else {
                last_err = Some(ConnectError::TimedOut);
                break;
            };
            let mut config = self.ctx.connect;
            config.set_timeout(timeout);
            let mut conn = ManagedTcpConnection::new(Endpoint::from(addr), config);
            match conn.connect().await {
                Ok(info) => {
                    connected = Some((conn, info));
                    break;
                }
                Err(TcpConnectionError::ConnectFailed(e)) => {
                    debug!("relay task {} connect to {addr}: {e}", self.task_notes.id);
                    last_err = Some(e);
                }
                Err(e) => {
                    debug!("relay task {} connect to {addr}: {e}", self.task_notes.id);
                }
            }
        }
        let Some((mut conn, info)) = connected else {
            let e = last_err.unwrap_or(ConnectError::Canceled);
            request.reject(RefuseReason::from(&e));
            return Err(ServerTaskError::UpstreamNotConnected(e));
        };
        self.task_notes.client_addr = Some(info.local_addr);

        self.task_notes.stage = ServerTaskStage::Replying;
        let session = request.accept(Endpoint::from(info.local_addr)).await?;

        self.task_notes.mark_relaying();
        let Some(data) = conn.data_from_socket() else {
            return Err(ServerTaskError::ClosedByUpstream);
        };
        Ok(splice::splice(&conn, data, None, session).await)
    }
}

fn refuse_reason(e: &ServerTaskError) -> RefuseReason {
    match e {
        ServerTaskError::DestinationForbidden => RefuseReason::NotAllowed,
        ServerTaskError::UpstreamNotResolved(_) => RefuseReason::ResolveFailed,
        ServerTaskError::UpstreamNotConnected(e) => RefuseReason::from(e),
        _ => RefuseReason::GeneralFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuse_reasons() {
        assert_eq!(
            refuse_reason(&ServerTaskError::DestinationForbidden),
            RefuseReason::NotAllowed
        );
        assert_eq!(
            refuse_reason(&ServerTaskError::UpstreamNotConnected(
                ConnectError::ConnectionRefused
            )),
            RefuseReason::ConnectionRefused
        );
        assert_eq!(
            refuse_reason(&ServerTaskError::ClosedByClient),
            RefuseReason::GeneralFailure
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_budget_shared() {
        let budget = ConnectBudget::new(Duration::from_secs(12));
        assert_eq!(budget.next_timeout(3), Some(Duration::from_secs(4)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(budget.next_timeout(2), Some(Duration::from_secs(4)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(budget.next_timeout(1), Some(Duration::from_secs(3)));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(budget.next_timeout(1), None);
    }
}
