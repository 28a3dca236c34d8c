/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Far end of the tunnel, turning each session into a real tcp connection.

use std::sync::Arc;

use log::{info, warn};
use slog::Logger;

use peertun_types::net::TcpConnectConfig;

use crate::bridge::{AnswererConfig, TransportNegotiator};
use crate::obfs::PipeSide;
use crate::serve::StartError;
use crate::signal::{PeerSignal, SignalHandler, SignalsForPeer};
use crate::tunnel::{self, IncomingSessions, TunnelHandle};

mod policy;
use policy::DestinationPolicy;

mod task;
use task::{RelayTask, RelayTaskContext};

#[derive(Clone, Debug, Default)]
pub struct RelayConfig {
    /// Also connect to loopback, private and other non public addresses.
    pub allow_non_unicast: bool,
    /// Outbound connections to the destinations.
    pub connect: TcpConnectConfig,
    /// Local side of the transport candidates.
    pub transport: AnswererConfig,
}

pub struct TunnelToTcp {
    config: RelayConfig,
    negotiator: Option<TransportNegotiator>,
    handler: SignalHandler,
    task_logger: Option<Logger>,
    tunnel: Option<TunnelHandle>,
}

impl TunnelToTcp {
    pub fn new(config: RelayConfig) -> Self {
        let negotiator = TransportNegotiator::answerer(config.transport.clone());
        TunnelToTcp {
            config,
            handler: negotiator.signal_handler(),
            negotiator: Some(negotiator),
            task_logger: None,
            tunnel: None,
        }
    }

    /// Emit one structured record per finished session.
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

    pub fn handle_signal_from_peer(&self, signal: PeerSignal) -> bool {
        self.handler.handle(signal)
    }

    /// Answer the offers of the peer and serve its sessions once a
    /// transport is committed. Returns the name of that transport.
    pub async fn start(&mut self) -> Result<String, StartError> {
        let Some(negotiator) = self.negotiator.take() else {
            return Err(StartError::AlreadyStarted);
        };
        let negotiated = negotiator.negotiate().await?;
        let name = negotiated.name.clone();
        info!("relay is using transport {name} from the peer");

        let (tunnel, incoming) = tunnel::start(negotiated, PipeSide::Answerer);
        let ctx = Arc::new(RelayTaskContext {
            policy: DestinationPolicy {
                allow_non_unicast: self.config.allow_non_unicast,
            },
            connect: self.config.connect,
            task_logger: self.task_logger.clone(),
        });
        self.tunnel = Some(tunnel.clone());
        tokio::spawn(serve(incoming, tunnel, ctx));
        Ok(name)
    }

    pub fn tunnel_handle(&self) -> Option<TunnelHandle> {
        self.tunnel.clone()
    }

    pub fn shutdown(&self) {
        if let Some(tunnel) = &self.tunnel {
            tunnel.shutdown();
        }
    }

    /// Resolves once the tunnel is gone, by shutdown or by failure.
    pub async fn once_stopped(&self) {
        if let Some(tunnel) = &self.tunnel {
            tunnel.once_broken().await;
        }
    }
}

async fn serve(mut incoming: IncomingSessions, tunnel: TunnelHandle, ctx: Arc<RelayTaskContext>) {
    while let Some(request) = incoming.recv().await {
        let task = RelayTask::new(ctx.clone(), &request);
        tokio::spawn(task.into_running(request));
    }
    if !tunnel.peer_shut_down() {
        warn!("tunnel broken, relay stopped");
    }
}
