/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::debug;
use slog::Logger;
use tokio_util::io::StreamReader;

use peertun_socks::v5::{self, Socks5Reply, Socks5Request};
use peertun_socks::{SocksAuthMethod, SocksCommand, SocksNegotiationError, SocksRequestParseError};
use peertun_types::net::Endpoint;

use crate::log::TaskLogForSession;
use crate::serve::{ServerTaskError, ServerTaskNotes, ServerTaskResult, ServerTaskStage};
use crate::splice::{self, SpliceStats};
use crate::tcp::{DataFromSocket, ManagedTcpConnection};
use crate::tunnel::{RefuseReason, TunnelError, TunnelHandle};

const SUPPORTED_METHODS: &[SocksAuthMethod] = &[SocksAuthMethod::None];

type ClientReader = StreamReader<DataFromSocket, Bytes>;

pub(super) struct SocksTaskContext {
    pub(super) negotiation_timeout: Duration,
    pub(super) task_logger: Option<Logger>,
}

pub(super) struct SocksTunnelTask {
    conn: ManagedTcpConnection,
    tunnel: TunnelHandle,
    ctx: Arc<SocksTaskContext>,
    task_notes: ServerTaskNotes,
}

impl SocksTunnelTask {
    pub(super) fn new(
        conn: ManagedTcpConnection,
        tunnel: TunnelHandle,
        ctx: Arc<SocksTaskContext>,
    ) -> Self {
        let task_notes = ServerTaskNotes::new(conn.id(), conn.info().map(|i| i.peer_addr));
        SocksTunnelTask {
            conn,
            tunnel,
            ctx,
            task_notes,
        }
    }

    pub(super) async fn into_running(mut self) {
        let (e, stats) = match self.run().await {
            Ok(stats) => (ServerTaskError::from_splice_end(stats.end, true), Some(stats)),
            Err(e) => {
                if e.is_tunnel_broken() {
                    self.conn.close_for_remote();
                } else {
                    self.conn.close();
                }
                (e, None)
            }
        };
        self.task_notes.stage = ServerTaskStage::Finished;
        debug!("socks task {} finished: {e}", self.task_notes.id);
        if let Some(logger) = &self.ctx.task_logger {
            TaskLogForSession {
                logger,
                task_type: "SocksToTunnel",
                task_notes: &self.task_notes,
                stats: stats.as_ref(),
            }
            .log(&e);
        }
    }

    async fn run(&mut self) -> ServerTaskResult<SpliceStats> {
        let Some(data) = self.conn.data_from_socket() else {
            return Err(ServerTaskError::ClosedEarlyByClient);
        };
        let mut clt_r = StreamReader::new(data);

        self.task_notes.stage = ServerTaskStage::Preparing;
        let destination = match tokio::time::timeout(
            self.ctx.negotiation_timeout,
            self.negotiate(&mut clt_r),
        )
        .await
        {
            Ok(r) => r?,
            Err(_) => return Err(ServerTaskError::ClientAppTimeout("socks negotiation")),
        };
        self.task_notes.destination = Some(destination.clone());

        self.task_notes.stage = ServerTaskStage::Connecting;
        // an unfinished open is reset when dropped
        let opened = tokio::select! {
            r = self.tunnel.open(destination) => r,
            _ = self.conn.once_closed() => return Err(ServerTaskError::ClosedByClient),
        };
        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                let _ = self.send_reply(reply_for_tunnel_error(e)).await;
                return Err(e.into());
            }
        };
        self.task_notes.session_id = Some(session.id());

        self.task_notes.stage = ServerTaskStage::Replying;
        let bound = session
            .bound()
            .to_socket_addr()
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
        self.send_reply(Socks5Reply::Succeeded(bound)).await?;

        self.task_notes.mark_relaying();
        let (data, pending) = clt_r.into_inner_with_chunk();
        Ok(splice::splice(&self.conn, data, pending, session).await)
    }

    async fn negotiate(&self, clt_r: &mut ClientReader) -> ServerTaskResult<Endpoint> {
        let methods = v5::auth::recv_methods_from_client(clt_r).await?;
        let method = v5::auth::select_method(&methods, SUPPORTED_METHODS);
        self.send_to_client(Bytes::copy_from_slice(&v5::auth::encode_method_selection(
            method,
        )))
        .await?;
        if method == SocksAuthMethod::NoAcceptable {
            return Err(ServerTaskError::ClientAuthFailed);
        }

        let request = match Socks5Request::recv(clt_r).await {
            Ok(request) => request,
            Err(e) => {
                if let Some(reply) = reply_for_parse_error(&e) {
                    let _ = self.send_reply(reply).await;
                }
                return Err(e.into());
            }
        };
        match request.command {
            SocksCommand::TcpConnect => Ok(request.destination),
            command => {
                let _ = self.send_reply(Socks5Reply::CommandNotSupported).await;
                Err(ServerTaskError::UnsupportedCommand(command))
            }
        }
    }

    async fn send_reply(&self, reply: Socks5Reply) -> ServerTaskResult<()> {
        self.send_to_client(reply.to_bytes()).await
    }

    async fn send_to_client(&self, data: Bytes) -> ServerTaskResult<()> {
        self.conn
            .send(data)
            .await
            .map_err(|_| ServerTaskError::ClientTcpWriteFailed)
    }
}

fn reply_for_parse_error(e: &SocksRequestParseError) -> Option<Socks5Reply> {
    match e {
        SocksRequestParseError::InvalidProtocol(SocksNegotiationError::InvalidCommand) => {
            Some(Socks5Reply::CommandNotSupported)
        }
        SocksRequestParseError::InvalidProtocol(SocksNegotiationError::InvalidAddrType) => {
            Some(Socks5Reply::AddressTypeNotSupported)
        }
        SocksRequestParseError::InvalidProtocol(_) => Some(Socks5Reply::GeneralServerFailure),
        _ => None,
    }
}

fn reply_for_tunnel_error(e: TunnelError) -> Socks5Reply {
    match e {
        TunnelError::Refused(reason) => reply_for_refuse(reason),
        _ => Socks5Reply::GeneralServerFailure,
    }
}

pub(super) fn reply_for_refuse(reason: RefuseReason) -> Socks5Reply {
    match reason {
        RefuseReason::ConnectionRefused => Socks5Reply::ConnectionRefused,
        RefuseReason::HostUnreachable => Socks5Reply::HostUnreachable,
        RefuseReason::NetworkUnreachable => Socks5Reply::NetworkUnreachable,
        RefuseReason::NotAllowed => Socks5Reply::ForbiddenByRule,
        RefuseReason::TimedOut => Socks5Reply::TtlExpired,
        RefuseReason::ResolveFailed | RefuseReason::GeneralFailure => {
            Socks5Reply::GeneralServerFailure
        }
    }
}
