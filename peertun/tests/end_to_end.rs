/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use peertun::bridge::{TransportCandidate, TransportKind};
use peertun::signal::cross_wire;
use peertun::socks_to_tunnel::{SocksServerConfig, SocksToTunnel};
use peertun::tcp::ServerState;
use peertun::tunnel_to_tcp::{RelayConfig, TunnelToTcp};
use peertun_socks::SocksConnectError;
use peertun_socks::v5::client::socks5_connect_to;
use peertun_types::net::Endpoint;

const WAIT: Duration = Duration::from_secs(5);

struct Pair {
    socks: SocksToTunnel,
    relay: TunnelToTcp,
    socks_addr: SocketAddr,
}

async fn start_pair(allow_non_unicast: bool) -> Pair {
    let config = SocksServerConfig {
        listen: Endpoint::from_str("127.0.0.1:0").unwrap(),
        ..Default::default()
    };
    let candidates = vec![TransportCandidate::new("plain", TransportKind::TcpListen)];
    let mut socks = SocksToTunnel::new(config, candidates);
    let mut relay = TunnelToTcp::new(RelayConfig {
        allow_non_unicast,
        ..Default::default()
    });
    cross_wire(
        (socks.signals_for_peer().unwrap(), socks.signal_handler()),
        (relay.signals_for_peer().unwrap(), relay.signal_handler()),
    );

    // each side waits for the other while negotiating
    let (bound, transport) = tokio::join!(socks.start(), relay.start());
    let bound = bound.unwrap();
    assert_eq!(transport.unwrap(), "plain");
    let socks_addr = bound.to_socket_addr().unwrap();
    Pair {
        socks,
        relay,
        socks_addr,
    }
}

async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

async fn dead_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn socks_connect(
    socks_addr: SocketAddr,
    destination: SocketAddr,
) -> (TcpStream, Result<SocketAddr, SocksConnectError>) {
    let mut stream = TcpStream::connect(socks_addr).await.unwrap();
    let r = socks5_connect_to(&mut stream, &Endpoint::from(destination)).await;
    (stream, r)
}

#[tokio::test]
async fn ping_echo() {
    let pair = start_pair(true).await;
    let echo = echo_server().await;

    let (mut stream, r) = socks_connect(pair.socks_addr, echo).await;
    r.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn concurrent_clients() {
    let pair = start_pair(true).await;
    let echo = echo_server().await;

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let socks_addr = pair.socks_addr;
        tasks.push(tokio::spawn(async move {
            let (mut stream, r) = socks_connect(socks_addr, echo).await;
            r.unwrap();
            let msg = vec![i; 64 * 1024];
            stream.write_all(&msg).await.unwrap();
            let mut buf = vec![0u8; msg.len()];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
        }));
    }
    for task in tasks {
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn upstream_close_reaches_client() {
    let pair = start_pair(true).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"bye").await.unwrap();
    });

    let (mut stream, r) = socks_connect(pair.socks_addr, upstream).await;
    r.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"bye");
}

#[tokio::test]
async fn client_close_reaches_upstream() {
    let pair = start_pair(true).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let upstream_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });

    let (mut stream, r) = socks_connect(pair.socks_addr, upstream).await;
    r.unwrap();
    stream.write_all(b"last words").await.unwrap();
    drop(stream);

    let received = tokio::time::timeout(WAIT, upstream_task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"last words");
}

#[tokio::test]
async fn loopback_forbidden_by_default() {
    let pair = start_pair(false).await;
    let echo = echo_server().await;

    let (_stream, r) = socks_connect(pair.socks_addr, echo).await;
    match r {
        Err(SocksConnectError::RequestFailed(msg)) => {
            assert_eq!(msg, "Connection not allowed by ruleset")
        }
        r => panic!("unexpected result {r:?}"),
    }
}

#[tokio::test]
async fn refused_destination() {
    let pair = start_pair(true).await;
    let dead = dead_port().await;

    let (_stream, r) = socks_connect(pair.socks_addr, dead).await;
    match r {
        Err(SocksConnectError::RequestFailed(msg)) => assert_eq!(msg, "Connection refused"),
        r => panic!("unexpected result {r:?}"),
    }

    // the tunnel keeps serving after a refused session
    let echo = echo_server().await;
    let (mut stream, r) = socks_connect(pair.socks_addr, echo).await;
    r.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn relay_shutdown_stops_socks_server() {
    let pair = start_pair(true).await;
    let server = pair.socks.server_handle().unwrap();
    assert_eq!(server.state(), ServerState::Listening);

    pair.relay.shutdown();
    tokio::time::timeout(WAIT, pair.socks.once_stopped())
        .await
        .unwrap();
    tokio::time::timeout(WAIT, server.once_shutdown())
        .await
        .unwrap();
    assert_eq!(server.state(), ServerState::Shutdown);
    assert!(pair.socks.tunnel_handle().unwrap().is_broken());
    assert!(TcpStream::connect(pair.socks_addr).await.is_err());
}

#[tokio::test]
async fn start_twice() {
    let mut pair = start_pair(true).await;
    assert!(pair.socks.start().await.is_err());
    assert!(pair.relay.start().await.is_err());
}
