/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::{Context, anyhow};
use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};

use peertun_types::net::{Endpoint, TcpConnectConfig};

use crate::config::{ProcessConfig, SignalingConfig};
use crate::signal::{SignalHandler, SignalsForPeer};
use crate::socks_to_tunnel::SocksToTunnel;
use crate::tunnel_to_tcp::TunnelToTcp;

const SIGNALING_CONNECT_RETRY: usize = 10;
const SIGNALING_CONNECT_PAUSE: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

type SignalPair = (SignalsForPeer, SignalHandler);

/// Run the configured roles until ctrl-c or until the tunnel is gone.
pub async fn run(config: ProcessConfig) -> anyhow::Result<()> {
    let ProcessConfig {
        socks,
        relay,
        transport,
        signaling,
    } = config;

    let task_logger = crate::log::task_logger();
    let mut socks = socks.map(|c| {
        let mut s = SocksToTunnel::new(c, transport);
        s.set_task_logger(task_logger.clone());
        s
    });
    let mut relay = relay.map(|c| {
        let mut r = TunnelToTcp::new(c);
        r.set_task_logger(task_logger.clone());
        r
    });

    match signaling {
        SignalingConfig::Loopback => {
            let (Some(s), Some(r)) = (socks.as_mut(), relay.as_mut()) else {
                return Err(anyhow!("loopback signaling needs both socks and relay"));
            };
            let a = signal_pair_of_socks(s)?;
            let b = signal_pair_of_relay(r)?;
            crate::signal::cross_wire(a, b);
        }
        SignalingConfig::Listen(addr) => {
            let pair = remote_signal_pair(&mut socks, &mut relay)?;
            let listener = TcpListener::bind(addr)
                .await
                .context(format!("failed to bind signaling listener {addr}"))?;
            info!("waiting for the signaling peer on {addr}");
            let (stream, peer) = listener
                .accept()
                .await
                .context("failed to accept the signaling peer")?;
            info!("signaling peer {peer} connected");
            spawn_conduit(stream, pair);
        }
        SignalingConfig::Connect(endpoint) => {
            let pair = remote_signal_pair(&mut socks, &mut relay)?;
            let stream = connect_signaling(&endpoint).await?;
            info!("connected to signaling peer {endpoint}");
            spawn_conduit(stream, pair);
        }
    }

    let socks_start = async {
        match socks.as_mut() {
            Some(s) => s.start().await.map(Some),
            None => Ok(None),
        }
    };
    let relay_start = async {
        match relay.as_mut() {
            Some(r) => r.start().await.map(Some),
            None => Ok(None),
        }
    };
    let (socks_r, relay_r) = tokio::join!(socks_start, relay_start);
    let socks_bound = socks_r.context("failed to start socks server")?;
    let relay_transport = relay_r.context("failed to start relay")?;
    if let Some(bound) = socks_bound {
        info!("socks server ready on {bound}");
    }
    if let Some(name) = relay_transport {
        info!("relay ready on transport {name}");
    }

    let stopped = async {
        tokio::select! {
            _ = once_socks_stopped(&socks) => {}
            _ = once_relay_stopped(&relay) => {}
        }
    };

    let ret = tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("failed to wait for ctrl-c")?;
            info!("got ctrl-c, shutting down");
            Ok(())
        }
        _ = stopped => {
            let peer_shut_down = socks
                .as_ref()
                .and_then(|s| s.tunnel_handle())
                .or_else(|| relay.as_ref().and_then(|r| r.tunnel_handle()))
                .map(|t| t.peer_shut_down())
                .unwrap_or(false);
            if peer_shut_down {
                info!("peer shut the tunnel down");
                Ok(())
            } else {
                Err(anyhow!("tunnel to the peer is broken"))
            }
        }
    };

    if let Some(s) = &socks {
        s.shutdown();
    }
    if let Some(r) = &relay {
        r.shutdown();
    }
    // let the shutdown notice reach the peer
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    ret
}

fn signal_pair_of_socks(s: &mut SocksToTunnel) -> anyhow::Result<SignalPair> {
    let signals = s
        .signals_for_peer()
        .ok_or_else(|| anyhow!("signals of socks server already taken"))?;
    Ok((signals, s.signal_handler()))
}

fn signal_pair_of_relay(r: &mut TunnelToTcp) -> anyhow::Result<SignalPair> {
    let signals = r
        .signals_for_peer()
        .ok_or_else(|| anyhow!("signals of relay already taken"))?;
    Ok((signals, r.signal_handler()))
}

fn remote_signal_pair(
    socks: &mut Option<SocksToTunnel>,
    relay: &mut Option<TunnelToTcp>,
) -> anyhow::Result<SignalPair> {
    match (socks.as_mut(), relay.as_mut()) {
        (Some(s), None) => signal_pair_of_socks(s),
        (None, Some(r)) => signal_pair_of_relay(r),
        _ => Err(anyhow!(
            "remote signaling needs exactly one of socks or relay"
        )),
    }
}

async fn connect_signaling(endpoint: &Endpoint) -> anyhow::Result<TcpStream> {
    let config = TcpConnectConfig::default();
    let mut retry = 0;
    loop {
        match crate::tcp::connect_stream(endpoint, &config).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                retry += 1;
                if retry >= SIGNALING_CONNECT_RETRY {
                    return Err(anyhow!(
                        "failed to connect to signaling peer {endpoint}: {e}"
                    ));
                }
                warn!("failed to connect to signaling peer {endpoint}: {e}, will retry");
                tokio::time::sleep(SIGNALING_CONNECT_PAUSE).await;
            }
        }
    }
}

fn spawn_conduit(stream: TcpStream, pair: SignalPair) {
    let (signals, handler) = pair;
    tokio::spawn(async move {
        match crate::signal::run_tcp_conduit(stream, signals, handler).await {
            Ok(_) => info!("signaling conduit closed"),
            Err(e) => warn!("signaling conduit failed: {e:?}"),
        }
    });
}

async fn once_socks_stopped(socks: &Option<SocksToTunnel>) {
    match socks {
        Some(s) => s.once_stopped().await,
        None => std::future::pending().await,
    }
}

async fn once_relay_stopped(relay: &Option<TunnelToTcp>) {
    match relay {
        Some(r) => r.once_stopped().await,
        None => std::future::pending().await,
    }
}
