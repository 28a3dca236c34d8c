/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::Bytes;
use log::debug;

use crate::tcp::{CloseReason, ConnectionState, DataFromSocket, ManagedTcpConnection};
use crate::tunnel::{SessionReceiver, SessionSender, TunnelError, TunnelSession};

/// Which side ended a splice first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SpliceEnd {
    TcpClosed(CloseReason),
    SessionFinished,
    SessionFailed(TunnelError),
}

impl SpliceEnd {
    pub(crate) fn brief(&self) -> &'static str {
        match self {
            SpliceEnd::TcpClosed(reason) => reason.as_str(),
            SpliceEnd::SessionFinished => "SessionFinished",
            SpliceEnd::SessionFailed(e) => e.brief(),
        }
    }
}

pub(crate) struct SpliceStats {
    pub(crate) tcp_rd_bytes: u64,
    pub(crate) tcp_wr_bytes: u64,
    pub(crate) end: SpliceEnd,
}

/// Copy data both ways between a connected tcp connection and a tunnel
/// session until one of them ends.
///
/// `pending` holds bytes already taken from `data`, they go first. A tcp
/// close ends the session: a remote close finishes it so the peer still gets
/// every byte, a local close resets it. The end or the failure of the session
/// closes the tcp connection as remotely closed.
pub(crate) async fn splice(
    conn: &ManagedTcpConnection,
    mut data: DataFromSocket,
    pending: Option<Bytes>,
    session: TunnelSession,
) -> SpliceStats {
    let id = session.id();
    let (mut sender, mut receiver) = session.into_split();

    let mut tcp_rd_bytes = 0u64;
    if let Some(chunk) = pending.filter(|b| !b.is_empty()) {
        tcp_rd_bytes = chunk.len() as u64;
        if let Err(e) = sender.send(chunk).await {
            conn.close_for_remote();
            return SpliceStats {
                tcp_rd_bytes,
                tcp_wr_bytes: 0,
                end: SpliceEnd::SessionFailed(e),
            };
        }
    }

    let mut tcp_wr_bytes = 0u64;
    let end = tokio::select! {
        r = tcp_to_session(&mut data, &mut sender, &mut tcp_rd_bytes) => {
            match r {
                Ok(_) => SpliceEnd::TcpClosed(close_reason(conn)),
                Err(e) => SpliceEnd::SessionFailed(e),
            }
        }
        r = session_to_tcp(&mut receiver, conn, &mut tcp_wr_bytes) => {
            match r {
                Ok(true) => SpliceEnd::SessionFinished,
                Ok(false) => SpliceEnd::TcpClosed(close_reason(conn)),
                Err(e) => SpliceEnd::SessionFailed(e),
            }
        }
    };
    debug!("session {id} splice ended: {}", end.brief());

    match end {
        SpliceEnd::TcpClosed(CloseReason::RemotelyClosed) => {
            let _ = sender.finish().await;
        }
        SpliceEnd::TcpClosed(_) => {}
        SpliceEnd::SessionFinished => {
            conn.close_for_remote();
            let _ = sender.finish().await;
        }
        SpliceEnd::SessionFailed(_) => conn.close_for_remote(),
    }
    SpliceStats {
        tcp_rd_bytes,
        tcp_wr_bytes,
        end,
    }
}

// recorded before the data stream of the connection ends
fn close_reason(conn: &ManagedTcpConnection) -> CloseReason {
    match conn.state() {
        ConnectionState::Closed(reason) => reason,
        _ => CloseReason::WeClosedIt,
    }
}

async fn tcp_to_session(
    data: &mut DataFromSocket,
    sender: &mut SessionSender,
    count: &mut u64,
) -> Result<(), TunnelError> {
    while let Some(chunk) = data.recv().await {
        *count += chunk.len() as u64;
        sender.send(chunk).await?;
    }
    Ok(())
}

/// `Ok(true)` when the peer finished, `false` when the tcp side is gone.
async fn session_to_tcp(
    receiver: &mut SessionReceiver,
    conn: &ManagedTcpConnection,
    count: &mut u64,
) -> Result<bool, TunnelError> {
    while let Some(chunk) = receiver.recv().await? {
        let len = chunk.len() as u64;
        if conn.send(chunk).await.is_err() {
            return Ok(false);
        }
        *count += len;
    }
    Ok(true)
}
