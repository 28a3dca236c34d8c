/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use peertun_types::net::{Endpoint, TcpConnectConfig};

use super::{BindError, ManagedTcpConnection, TcpConnectionObserver};

const ACCEPT_QUEUE_SIZE: usize = 64;
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

const STATE_IDLE: u8 = 0;
const STATE_LISTENING: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    Shutdown,
}

struct ServerShared {
    state: AtomicU8,
    alive: Arc<AtomicUsize>,
    cancel: CancellationToken,
    stopped: watch::Sender<bool>,
}

impl ServerShared {
    fn state(&self) -> ServerState {
        match self.state.load(Ordering::Acquire) {
            STATE_IDLE => ServerState::Idle,
            STATE_LISTENING => ServerState::Listening,
            _ => ServerState::Shutdown,
        }
    }

    fn shutdown(&self) {
        let prev = self.state.swap(STATE_SHUTDOWN, Ordering::AcqRel);
        self.cancel.cancel();
        if prev == STATE_IDLE {
            // no listener to release
            self.stopped.send_replace(true);
        }
    }

    async fn once_shutdown(&self) {
        let mut receiver = self.stopped.subscribe();
        let _ = receiver.wait_for(|v| *v).await;
    }
}

/// Cloneable control handle of a [`ManagedTcpServer`].
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

impl ServerHandle {
    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    /// Number of accepted connections still connected.
    pub fn connections_count(&self) -> usize {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Stop accepting. Connections already accepted stay open.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Resolves once the listening socket is released.
    pub async fn once_shutdown(&self) {
        self.shared.once_shutdown().await
    }
}

/// A tcp listener producing [`ManagedTcpConnection`]s.
///
/// Dropping the server shuts it down, while accepted connections stay open.
pub struct ManagedTcpServer {
    endpoint: Endpoint,
    config: TcpConnectConfig,
    observers: Vec<Arc<dyn TcpConnectionObserver>>,
    shared: Arc<ServerShared>,
    accepted: Option<mpsc::Receiver<ManagedTcpConnection>>,
}

impl ManagedTcpServer {
    /// Port 0 in `endpoint` picks a free port when listening.
    pub fn new(endpoint: Endpoint) -> Self {
        let (stopped, _) = watch::channel(false);
        ManagedTcpServer {
            endpoint,
            config: TcpConnectConfig::default(),
            observers: Vec::new(),
            shared: Arc::new(ServerShared {
                state: AtomicU8::new(STATE_IDLE),
                alive: Arc::new(AtomicUsize::new(0)),
                cancel: CancellationToken::new(),
                stopped,
            }),
            accepted: None,
        }
    }

    /// Settings for accepted connections. Only the linger timeout applies.
    pub fn set_connection_config(&mut self, config: TcpConnectConfig) {
        self.config = config;
    }

    pub fn add_connection_observer(&mut self, observer: Arc<dyn TcpConnectionObserver>) {
        self.observers.push(observer);
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    /// Bind the listening socket and start accepting.
    ///
    /// Returns the actually bound endpoint.
    pub async fn listen(&mut self) -> Result<Endpoint, BindError> {
        if self.accepted.is_some() || self.shared.state() != ServerState::Idle {
            return Err(BindError::AlreadyStarted);
        }
        let Some(addr) = self.endpoint.to_socket_addr() else {
            return Err(BindError::InvalidAddress(self.endpoint.clone()));
        };
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BindError::from_io(&self.endpoint, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BindError::from_io(&self.endpoint, e))?;

        if self
            .shared
            .state
            .compare_exchange(
                STATE_IDLE,
                STATE_LISTENING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // shut down while binding
            return Err(BindError::AlreadyStarted);
        }

        let (sender, receiver) = mpsc::channel(ACCEPT_QUEUE_SIZE);
        self.accepted = Some(receiver);
        let runtime = AcceptRuntime {
            local_addr,
            config: self.config,
            observers: self.observers.clone(),
            shared: self.shared.clone(),
            sender,
        };
        runtime.into_running(listener);
        Ok(Endpoint::from(local_addr))
    }

    /// Next accepted connection, already in the connected state.
    ///
    /// Returns `None` after shutdown once every queued connection was taken.
    pub async fn accept(&mut self) -> Option<ManagedTcpConnection> {
        match &mut self.accepted {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    pub fn connections_count(&self) -> usize {
        self.shared.alive.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub async fn once_shutdown(&self) {
        self.shared.once_shutdown().await
    }
}

impl Drop for ManagedTcpServer {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

struct AcceptRuntime {
    local_addr: SocketAddr,
    config: TcpConnectConfig,
    observers: Vec<Arc<dyn TcpConnectionObserver>>,
    shared: Arc<ServerShared>,
    sender: mpsc::Sender<ManagedTcpConnection>,
}

impl AcceptRuntime {
    fn into_running(self, listener: TcpListener) {
        tokio::spawn(async move {
            info!("tcp server {} started", self.local_addr);
            self.run(listener).await;
        });
    }

    async fn run(self, listener: TcpListener) {
        loop {
            tokio::select! {
                biased;

                _ = self.shared.cancel.cancelled() => break,
                r = listener.accept() => {
                    match r {
                        Ok((stream, peer_addr)) => {
                            if !self.deliver(stream, peer_addr).await {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("tcp server {} accept: {e:?}", self.local_addr);
                            tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                        }
                    }
                }
            }
        }

        drop(listener);
        self.shared.state.store(STATE_SHUTDOWN, Ordering::Release);
        info!("tcp server {} stopped", self.local_addr);
        self.shared.stopped.send_replace(true);
    }

    async fn deliver(&self, stream: TcpStream, peer_addr: SocketAddr) -> bool {
        let conn = match ManagedTcpConnection::accepted(
            stream,
            self.config,
            self.observers.clone(),
            self.shared.alive.clone(),
        ) {
            Ok(conn) => conn,
            Err(e) => {
                debug!(
                    "tcp server {} dropped connection from {peer_addr}: {e}",
                    self.local_addr
                );
                return true;
            }
        };
        debug!(
            "tcp server {} accepted connection {} from {peer_addr}",
            self.local_addr,
            conn.id()
        );
        tokio::select! {
            biased;

            _ = self.shared.cancel.cancelled() => false,
            r = self.sender.send(conn) => r.is_ok(),
        }
    }
}
