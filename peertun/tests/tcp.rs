/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;

use peertun::tcp::{
    CloseReason, ConnectionInfo, ConnectionState, ManagedTcpConnection, ManagedTcpServer,
    ServerState, TcpConnectionObserver,
};
use peertun_types::net::{Endpoint, TcpConnectConfig};

fn any_local() -> Endpoint {
    Endpoint::from_str("127.0.0.1:0").unwrap()
}

async fn listening_server() -> (ManagedTcpServer, Endpoint) {
    let mut server = ManagedTcpServer::new(any_local());
    let bound = server.listen().await.unwrap();
    (server, bound)
}

async fn connected_client(target: &Endpoint) -> ManagedTcpConnection {
    let mut conn = ManagedTcpConnection::new(target.clone(), TcpConnectConfig::default());
    conn.connect().await.unwrap();
    conn
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl TcpConnectionObserver for RecordingObserver {
    fn on_connected(&self, _id: u64, _info: &ConnectionInfo) {
        self.events.lock().unwrap().push("connected".to_string());
    }

    fn on_data_received(&self, _id: u64, data: &[u8]) {
        let s = String::from_utf8_lossy(data).to_string();
        self.events.lock().unwrap().push(format!("data:{s}"));
    }

    fn on_closed(&self, _id: u64, reason: CloseReason) {
        self.events.lock().unwrap().push(format!("closed:{reason}"));
    }
}

#[tokio::test]
async fn client_close_seen_as_remote() {
    let (mut server, bound) = listening_server().await;
    let client = connected_client(&bound).await;
    let accepted = server.accept().await.unwrap();
    assert_eq!(accepted.state(), ConnectionState::Connected);

    client.close();
    assert_eq!(client.once_closed().await, CloseReason::WeClosedIt);
    assert_eq!(accepted.once_closed().await, CloseReason::RemotelyClosed);
    assert_eq!(
        accepted.state(),
        ConnectionState::Closed(CloseReason::RemotelyClosed)
    );
}

#[tokio::test]
async fn server_close_seen_as_remote() {
    let (mut server, bound) = listening_server().await;
    let client = connected_client(&bound).await;
    let accepted = server.accept().await.unwrap();

    accepted.close();
    assert_eq!(accepted.once_closed().await, CloseReason::WeClosedIt);
    assert_eq!(client.once_closed().await, CloseReason::RemotelyClosed);
}

#[tokio::test]
async fn data_both_ways() {
    let (mut server, bound) = listening_server().await;
    let mut client = connected_client(&bound).await;
    let mut accepted = server.accept().await.unwrap();

    let mut client_data = client.data_from_socket().unwrap();
    assert!(client.data_from_socket().is_none());
    let mut server_data = accepted.data_from_socket().unwrap();

    client.send(Bytes::from_static(b"ping")).await.unwrap();
    assert_eq!(server_data.recv().await.unwrap().as_ref(), b"ping");
    accepted.send(Bytes::from_static(b"pong")).await.unwrap();
    assert_eq!(client_data.recv().await.unwrap().as_ref(), b"pong");

    // queued data is flushed before the close goes out
    accepted.send(Bytes::from_static(b"bye")).await.unwrap();
    accepted.close();
    assert_eq!(client_data.recv().await.unwrap().as_ref(), b"bye");
    assert!(client_data.recv().await.is_none());
    assert_eq!(client.once_closed().await, CloseReason::RemotelyClosed);
}

#[tokio::test]
async fn never_connected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut conn = ManagedTcpConnection::new(Endpoint::from(addr), TcpConnectConfig::default());
    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert!(conn.connect().await.is_err());
    assert_eq!(
        conn.state(),
        ConnectionState::Closed(CloseReason::NeverConnected)
    );
    assert_eq!(conn.once_closed().await, CloseReason::NeverConnected);
    assert!(conn.info().is_none());
    assert!(conn.send(Bytes::from_static(b"x")).await.is_err());
}

#[tokio::test]
async fn close_during_connect() {
    // not routable, the connect either hangs or fails fast
    let target = Endpoint::from_str("10.255.255.1:9").unwrap();
    let mut config = TcpConnectConfig::default();
    config.set_timeout(Duration::from_secs(5));
    let mut conn = ManagedTcpConnection::new(target, config);
    let handle = conn.handle();

    let connect = tokio::spawn(async move {
        let r = conn.connect().await;
        (r.is_err(), conn.state())
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.close();

    assert_eq!(handle.once_closed().await, CloseReason::NeverConnected);
    let (failed, state) = connect.await.unwrap();
    assert!(failed);
    assert_eq!(state, ConnectionState::Closed(CloseReason::NeverConnected));
}

#[tokio::test]
async fn observer_events_in_order() {
    let observer = Arc::new(RecordingObserver::default());
    let mut server = ManagedTcpServer::new(any_local());
    server.add_connection_observer(observer.clone());
    let bound = server.listen().await.unwrap();

    let client = connected_client(&bound).await;
    let accepted = server.accept().await.unwrap();
    client.send(Bytes::from_static(b"hello")).await.unwrap();
    client.close();
    assert_eq!(accepted.once_closed().await, CloseReason::RemotelyClosed);

    let events = observer.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("connected"));
    assert_eq!(events.last().map(String::as_str), Some("closed:RemotelyClosed"));
    let data: String = events
        .iter()
        .filter_map(|e| e.strip_prefix("data:"))
        .collect();
    assert_eq!(data, "hello");
    assert_eq!(events.iter().filter(|e| e.starts_with("closed")).count(), 1);
}

#[tokio::test]
async fn connections_count() {
    let (mut server, bound) = listening_server().await;

    let mut clients = Vec::new();
    let mut accepted = Vec::new();
    for _ in 0..5 {
        clients.push(connected_client(&bound).await);
        accepted.push(server.accept().await.unwrap());
    }
    assert_eq!(server.connections_count(), 5);

    for (i, client) in clients.drain(..).enumerate() {
        client.close();
        accepted[i].once_closed().await;
        assert_eq!(server.connections_count(), 4 - i);
    }
}

#[tokio::test]
async fn shutdown_releases_listener() {
    let (mut server, bound) = listening_server().await;
    assert_eq!(server.state(), ServerState::Listening);
    let client = connected_client(&bound).await;
    let accepted = server.accept().await.unwrap();

    let handle = server.handle();
    handle.shutdown();
    handle.once_shutdown().await;
    assert_eq!(server.state(), ServerState::Shutdown);

    // accepted connections survive the shutdown
    assert_eq!(accepted.state(), ConnectionState::Connected);
    assert_eq!(client.state(), ConnectionState::Connected);

    let mut late = ManagedTcpConnection::new(bound, TcpConnectConfig::default());
    assert!(late.connect().await.is_err());
    assert!(server.listen().await.is_err());
}

#[tokio::test]
async fn drop_releases_listener() {
    let (server, bound) = listening_server().await;
    let handle = server.handle();
    drop(server);
    tokio::time::timeout(Duration::from_secs(5), handle.once_shutdown())
        .await
        .unwrap();
    assert_eq!(handle.state(), ServerState::Shutdown);

    // nothing connected in between, the address is free again
    let addr = bound.to_socket_addr().unwrap();
    let listener = TcpListener::bind(addr).await.unwrap();
    assert_eq!(listener.local_addr().unwrap(), addr);
}

#[tokio::test]
async fn shutdown_before_listen() {
    let mut server = ManagedTcpServer::new(any_local());
    server.shutdown();
    server.once_shutdown().await;
    assert!(server.listen().await.is_err());
    assert!(server.accept().await.is_none());
}

#[tokio::test]
async fn port_zero_gives_distinct_ports() {
    let (_a, a_bound) = listening_server().await;
    let (_b, b_bound) = listening_server().await;
    assert_ne!(a_bound.port(), 0);
    assert_ne!(b_bound.port(), 0);
    assert_ne!(a_bound.port(), b_bound.port());
}

#[tokio::test]
async fn address_in_use() {
    let (_a, a_bound) = listening_server().await;
    let mut b = ManagedTcpServer::new(a_bound);
    assert!(b.listen().await.is_err());
}
