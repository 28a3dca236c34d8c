/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Local SOCKS5 entry of the tunnel.
//!
//! Each accepted client completes a SOCKS5 CONNECT handshake and is then
//! carried as one tunnel session to the peer running
//! [`TunnelToTcp`](crate::tunnel_to_tcp::TunnelToTcp).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use slog::Logger;

use peertun_types::net::{Endpoint, TcpConnectConfig};

use crate::bridge::{TransportCandidate, TransportNegotiator};
use crate::obfs::PipeSide;
use crate::serve::StartError;
use crate::signal::{PeerSignal, SignalHandler, SignalsForPeer};
use crate::tcp::{ManagedTcpServer, ServerHandle};
use crate::tunnel::{self, TunnelHandle};

mod task;
use task::{SocksTaskContext, SocksTunnelTask};

const DEFAULT_LISTEN_PORT: u16 = 9999;
const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct SocksServerConfig {
    pub listen: Endpoint,
    /// Limit for the whole SOCKS5 handshake of one client.
    pub negotiation_timeout: Duration,
    /// Only the linger timeout applies to accepted clients.
    pub connection: TcpConnectConfig,
}

impl Default for SocksServerConfig {
    fn default() -> Self {
        SocksServerConfig {
            listen: Endpoint::from(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_LISTEN_PORT))),
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            connection: TcpConnectConfig::default(),
        }
    }
}

struct Running {
    server: ServerHandle,
    tunnel: TunnelHandle,
}

pub struct SocksToTunnel {
    config: SocksServerConfig,
    negotiator: Option<TransportNegotiator>,
    handler: SignalHandler,
    task_logger: Option<Logger>,
    running: Option<Running>,
}

impl SocksToTunnel {
    /// The candidates are attempted in order of preference.
    pub fn new(config: SocksServerConfig, candidates: Vec<TransportCandidate>) -> Self {
        let negotiator = TransportNegotiator::offerer(candidates);
        SocksToTunnel {
            config,
            handler: negotiator.signal_handler(),
            negotiator: Some(negotiator),
            task_logger: None,
            running: None,
        }
    }

    /// Emit one structured record per finished client.
    pub fn set_task_logger(&mut self, logger: Logger) {
        self.task_logger = Some(logger);
    }

    /// Signals to forward to the peer. Only the first call returns them.
    pub fn signals_for_peer(&mut self) -> Option<SignalsForPeer> {
        self.negotiator.as_mut()?.signals_for_peer()
    }

    /// Entry for signals from the peer, to hand to a conduit.
    pub fn signal_handler(&self) -> SignalHandler {
        self.handler.clone()
    }

    /// Returns `false` once the signal can no longer be consumed.
    pub fn handle_signal_from_peer(&self, signal: PeerSignal) -> bool {
        self.handler.handle(signal)
    }

    /// Bind the SOCKS5 listener and negotiate the tunnel with the peer.
    ///
    /// Clients are served once both are ready. Returns the bound endpoint.
    pub async fn start(&mut self) -> Result<Endpoint, StartError> {
        let Some(negotiator) = self.negotiator.take() else {
            return Err(StartError::AlreadyStarted);
        };

        let mut server = ManagedTcpServer::new(self.config.listen.clone());
        server.set_connection_config(self.config.connection);
        let bound = server.listen().await?;

        let negotiated = match negotiator.negotiate().await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                server.shutdown();
                return Err(e.into());
            }
        };
        info!(
            "socks server {bound} is using transport {} to the peer",
            negotiated.name
        );

        // sessions are only opened from this side
        let (tunnel, _incoming) = tunnel::start(negotiated, PipeSide::Offerer);
        let ctx = Arc::new(SocksTaskContext {
            negotiation_timeout: self.config.negotiation_timeout,
            task_logger: self.task_logger.clone(),
        });
        self.running = Some(Running {
            server: server.handle(),
            tunnel: tunnel.clone(),
        });
        tokio::spawn(serve(server, tunnel, ctx));
        Ok(bound)
    }

    pub fn server_handle(&self) -> Option<ServerHandle> {
        self.running.as_ref().map(|r| r.server.clone())
    }

    pub fn tunnel_handle(&self) -> Option<TunnelHandle> {
        self.running.as_ref().map(|r| r.tunnel.clone())
    }

    /// Stop accepting clients and tear the tunnel down.
    pub fn shutdown(&self) {
        if let Some(running) = &self.running {
            running.server.shutdown();
            running.tunnel.shutdown();
        }
    }

    /// Resolves once the tunnel is gone, by shutdown or by failure.
    pub async fn once_stopped(&self) {
        if let Some(running) = &self.running {
            running.tunnel.once_broken().await;
        }
    }
}

async fn serve(mut server: ManagedTcpServer, tunnel: TunnelHandle, ctx: Arc<SocksTaskContext>) {
    loop {
        tokio::select! {
            biased;

            _ = tunnel.once_broken() => {
                if !tunnel.peer_shut_down() {
                    warn!("tunnel broken, socks server stops accepting");
                }
                server.shutdown();
                break;
            }
            r = server.accept() => {
                let Some(conn) = r else {
                    break;
                };
                let task = SocksTunnelTask::new(conn, tunnel.clone(), ctx.clone());
                tokio::spawn(task.into_running());
            }
        }
    }
}
