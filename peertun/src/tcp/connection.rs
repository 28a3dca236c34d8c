/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use peertun_types::net::{ConnectError, Endpoint, Host, TcpConnectConfig};

use super::close::{ClosedFrom, StateCell};
use super::{CloseReason, TcpConnectionError, TcpConnectionObserver};

const SEND_QUEUE_SIZE: usize = 16;
const RECV_QUEUE_SIZE: usize = 16;
const READ_BUFFER_SIZE: usize = 16 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
}

impl ConnectionInfo {
    fn from_stream(stream: &TcpStream) -> io::Result<Self> {
        Ok(ConnectionInfo {
            local_addr: stream.local_addr()?,
            peer_addr: stream.peer_addr()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed(CloseReason),
}

struct Shared {
    id: u64,
    state: StateCell,
    cancel: CancellationToken,
    closed: watch::Sender<Option<CloseReason>>,
    info: OnceLock<ConnectionInfo>,
    observers: Vec<Arc<dyn TcpConnectionObserver>>,
    alive: Option<Arc<AtomicUsize>>,
}

impl Shared {
    fn new(
        state: StateCell,
        observers: Vec<Arc<dyn TcpConnectionObserver>>,
        alive: Option<Arc<AtomicUsize>>,
    ) -> Self {
        let (closed, _) = watch::channel(None);
        Shared {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            state,
            cancel: CancellationToken::new(),
            closed,
            info: OnceLock::new(),
            observers,
            alive,
        }
    }

    fn state(&self) -> ConnectionState {
        if let Some(reason) = self.state.close_reason() {
            ConnectionState::Closed(reason)
        } else if self.state.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        }
    }

    /// Record the close and stop both io loops.
    ///
    /// When the socket was never established there is nothing left to
    /// release, so the closed notification goes out at once. Otherwise it
    /// is published by the io task after the socket halves are dropped.
    fn close(&self, reason: CloseReason) -> bool {
        let Some((recorded, from)) = self.state.set_closed(reason) else {
            return false;
        };
        self.cancel.cancel();
        match from {
            ClosedFrom::Connecting => self.publish_closed(recorded),
            ClosedFrom::Connected => {
                if let Some(alive) = &self.alive {
                    alive.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
        true
    }

    fn publish_closed(&self, reason: CloseReason) {
        for observer in &self.observers {
            observer.on_closed(self.id, reason);
        }
        self.closed.send_replace(Some(reason));
    }

    async fn once_closed(&self) -> CloseReason {
        let mut receiver = self.closed.subscribe();
        match receiver.wait_for(Option::is_some).await {
            Ok(v) => (*v).unwrap_or(CloseReason::NeverConnected),
            Err(_) => self
                .state
                .close_reason()
                .unwrap_or(CloseReason::NeverConnected),
        }
    }
}

/// Cloneable control handle of a [`ManagedTcpConnection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    #[inline]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn close(&self) {
        self.shared.close(CloseReason::WeClosedIt);
    }

    /// Resolves once the connection is closed and its socket released.
    pub async fn once_closed(&self) -> CloseReason {
        self.shared.once_closed().await
    }
}

/// Data read from the socket, in arrival order.
///
/// Only one consumer exists at a time. Moving it to another owner replaces
/// the handler; buffers already taken are not delivered again. The stream
/// ends after the connection closed and all buffered data was taken.
pub struct DataFromSocket {
    receiver: mpsc::Receiver<Bytes>,
}

impl DataFromSocket {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

impl Stream for DataFromSocket {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx).map(|v| v.map(Ok))
    }
}

struct IoParts {
    send_receiver: mpsc::Receiver<Bytes>,
    data_sender: mpsc::Sender<Bytes>,
}

/// A tcp connection with an explicit lifecycle.
///
/// The state moves from connecting to connected to closed, or directly from
/// connecting to closed. The close reason is recorded exactly once and the
/// closed notification fires exactly once. Dropping the connection closes
/// it with [`CloseReason::WeClosedIt`].
pub struct ManagedTcpConnection {
    shared: Arc<Shared>,
    target: Option<Endpoint>,
    config: TcpConnectConfig,
    send_sender: mpsc::Sender<Bytes>,
    io_parts: Option<IoParts>,
    data: Option<DataFromSocket>,
}

impl ManagedTcpConnection {
    /// Create a connection to `target`, still in the connecting state.
    pub fn new(target: Endpoint, config: TcpConnectConfig) -> Self {
        ManagedTcpConnection::with_observers(target, config, Vec::new())
    }

    pub fn with_observers(
        target: Endpoint,
        config: TcpConnectConfig,
        observers: Vec<Arc<dyn TcpConnectionObserver>>,
    ) -> Self {
        let shared = Shared::new(StateCell::connecting(), observers, None);
        ManagedTcpConnection::build(shared, Some(target), config)
    }

    pub(super) fn accepted(
        stream: TcpStream,
        config: TcpConnectConfig,
        observers: Vec<Arc<dyn TcpConnectionObserver>>,
        alive: Arc<AtomicUsize>,
    ) -> io::Result<Self> {
        let info = ConnectionInfo::from_stream(&stream)?;
        alive.fetch_add(1, Ordering::AcqRel);
        let shared = Shared::new(StateCell::connected(), observers, Some(alive));
        let _ = shared.info.set(info);
        let mut conn = ManagedTcpConnection::build(shared, None, config);
        conn.start_io(stream, info);
        Ok(conn)
    }

    fn build(shared: Shared, target: Option<Endpoint>, config: TcpConnectConfig) -> Self {
        let (send_sender, send_receiver) = mpsc::channel(SEND_QUEUE_SIZE);
        let (data_sender, data_receiver) = mpsc::channel(RECV_QUEUE_SIZE);
        ManagedTcpConnection {
            shared: Arc::new(shared),
            target,
            config,
            send_sender,
            io_parts: Some(IoParts {
                send_receiver,
                data_sender,
            }),
            data: Some(DataFromSocket {
                receiver: data_receiver,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Local and peer address, once connected.
    pub fn info(&self) -> Option<ConnectionInfo> {
        self.shared.info.get().copied()
    }

    /// Establish the connection.
    ///
    /// Resolves when the connection is up. On failure, or if the connection
    /// is closed while connecting, the close reason is `NeverConnected`.
    pub async fn connect(&mut self) -> Result<ConnectionInfo, TcpConnectionError> {
        let Some(target) = self.target.take() else {
            return Err(TcpConnectionError::ConnectStarted);
        };
        if !self.shared.state.is_connecting() {
            return Err(ConnectError::Canceled.into());
        }

        let r = tokio::select! {
            biased;

            _ = self.shared.cancel.cancelled() => Err(ConnectError::Canceled),
            r = connect_stream(&target, &self.config) => r,
        };
        let stream = match r {
            Ok(stream) => stream,
            Err(e) => {
                debug!("connection {} to {target} failed: {e}", self.shared.id);
                self.shared.close(CloseReason::NeverConnected);
                return Err(e.into());
            }
        };
        let info = match ConnectionInfo::from_stream(&stream) {
            Ok(info) => info,
            Err(e) => {
                self.shared.close(CloseReason::NeverConnected);
                return Err(ConnectError::from(e).into());
            }
        };
        let _ = self.shared.info.set(info);
        if !self.shared.state.set_connected() {
            return Err(ConnectError::Canceled.into());
        }
        self.start_io(stream, info);
        Ok(info)
    }

    fn start_io(&mut self, stream: TcpStream, info: ConnectionInfo) {
        let Some(parts) = self.io_parts.take() else {
            return;
        };
        let _ = stream.set_nodelay(true);
        for observer in &self.shared.observers {
            observer.on_connected(self.shared.id, &info);
        }

        let (reader, writer) = stream.into_split();
        let shared = self.shared.clone();
        let linger = self.config.linger();
        tokio::spawn(async move {
            tokio::join!(
                read_loop(&shared, reader, parts.data_sender),
                write_loop(&shared, writer, parts.send_receiver, linger),
            );
            shared.close(CloseReason::WeClosedIt);
            if let Some(reason) = shared.state.close_reason() {
                shared.publish_closed(reason);
            }
        });
    }

    /// Take the data stream. Only the first call returns it.
    pub fn data_from_socket(&mut self) -> Option<DataFromSocket> {
        self.data.take()
    }

    /// Queue `data` for writing.
    ///
    /// Waits while the send queue is full, so the caller is paced by the
    /// socket.
    pub async fn send(&self, data: Bytes) -> Result<(), TcpConnectionError> {
        if !self.shared.state.is_connected() {
            return Err(TcpConnectionError::NotConnected);
        }
        self.send_sender
            .send(data)
            .await
            .map_err(|_| TcpConnectionError::NotConnected)
    }

    /// Queue `data` without waiting.
    ///
    /// A full queue hands the data back as `Ok(Some(data))`; wait on
    /// [`drained`](Self::drained) before trying again.
    pub fn try_send(&self, data: Bytes) -> Result<Option<Bytes>, TcpConnectionError> {
        if !self.shared.state.is_connected() {
            return Err(TcpConnectionError::NotConnected);
        }
        match self.send_sender.try_send(data) {
            Ok(_) => Ok(None),
            Err(mpsc::error::TrySendError::Full(data)) => Ok(Some(data)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TcpConnectionError::NotConnected),
        }
    }

    /// Resolves when the send queue has room again.
    pub async fn drained(&self) {
        let _ = self.send_sender.reserve().await;
    }

    /// Close from the local side.
    ///
    /// Queued data is still flushed within the linger timeout.
    pub fn close(&self) {
        self.shared.close(CloseReason::WeClosedIt);
    }

    /// Close because the other end of a splice went away.
    pub(crate) fn close_for_remote(&self) {
        self.shared.close(CloseReason::RemotelyClosed);
    }

    pub async fn once_closed(&self) -> CloseReason {
        self.shared.once_closed().await
    }
}

impl Drop for ManagedTcpConnection {
    fn drop(&mut self) {
        self.shared.close(CloseReason::WeClosedIt);
    }
}

/// Plain tcp connect to `target`, bounded by the connect timeout.
pub(crate) async fn connect_stream(
    target: &Endpoint,
    config: &TcpConnectConfig,
) -> Result<TcpStream, ConnectError> {
    match tokio::time::timeout(config.timeout(), connect_to(target)).await {
        Ok(r) => r,
        Err(_) => Err(ConnectError::TimedOut),
    }
}

async fn connect_to(target: &Endpoint) -> Result<TcpStream, ConnectError> {
    match target.host() {
        Host::Ip(ip) => TcpStream::connect(SocketAddr::new(*ip, target.port()))
            .await
            .map_err(ConnectError::from),
        Host::Domain(domain) => {
            let addrs = tokio::net::lookup_host((domain.as_str(), target.port()))
                .await
                .map_err(ConnectError::ResolveFailed)?;
            let mut last_err = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_err = Some(e),
                }
            }
            match last_err {
                Some(e) => Err(ConnectError::from(e)),
                None => Err(ConnectError::ResolveFailed(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no address resolved",
                ))),
            }
        }
    }
}

async fn read_loop(shared: &Shared, mut reader: OwnedReadHalf, data_sender: mpsc::Sender<Bytes>) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        buf.reserve(READ_BUFFER_SIZE);
        let r = tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => return,
            r = reader.read_buf(&mut buf) => r,
        };
        match r {
            Ok(0) => {
                debug!("connection {} closed by peer", shared.id);
                shared.close(CloseReason::RemotelyClosed);
                return;
            }
            Ok(_) => {
                let data = buf.split().freeze();
                for observer in &shared.observers {
                    observer.on_data_received(shared.id, &data);
                }
                tokio::select! {
                    biased;

                    _ = shared.cancel.cancelled() => return,
                    r = data_sender.send(data) => {
                        if r.is_err() {
                            // the data consumer is gone
                            shared.close(CloseReason::WeClosedIt);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                debug!("connection {} read failed: {e}", shared.id);
                shared.close(CloseReason::RemotelyClosed);
                return;
            }
        }
    }
}

async fn write_loop(
    shared: &Shared,
    mut writer: OwnedWriteHalf,
    mut send_receiver: mpsc::Receiver<Bytes>,
    linger: Duration,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        let next = if deadline.is_some() {
            send_receiver.recv().await
        } else {
            tokio::select! {
                biased;

                _ = shared.cancel.cancelled() => {
                    deadline = Some(Instant::now() + linger);
                    send_receiver.close();
                    continue;
                }
                r = send_receiver.recv() => r,
            }
        };
        let Some(data) = next else {
            break;
        };
        if let Err(e) = write_data(shared, &mut writer, &data, &mut deadline, linger).await {
            debug!("connection {} write failed: {e}", shared.id);
            shared.close(CloseReason::RemotelyClosed);
            return;
        }
        if deadline.is_some() {
            send_receiver.close();
        }
    }

    let r = match deadline {
        Some(at) => tokio::time::timeout_at(at, writer.shutdown())
            .await
            .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into())),
        None => writer.shutdown().await,
    };
    if let Err(e) = r {
        debug!("connection {} shutdown failed: {e}", shared.id);
    }
}

/// Write one buffer, switching to the linger deadline once closing started.
async fn write_data(
    shared: &Shared,
    writer: &mut OwnedWriteHalf,
    data: &[u8],
    deadline: &mut Option<Instant>,
    linger: Duration,
) -> io::Result<()> {
    let write = writer.write_all(data);
    tokio::pin!(write);

    let at = match *deadline {
        Some(at) => at,
        None => {
            tokio::select! {
                biased;

                r = &mut write => return r,
                _ = shared.cancel.cancelled() => {}
            }
            let at = Instant::now() + linger;
            *deadline = Some(at);
            at
        }
    };
    match tokio::time::timeout_at(at, write).await {
        Ok(r) => r,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "linger timeout")),
    }
}
