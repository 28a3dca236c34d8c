/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use log::debug;
use tokio::net::TcpListener;

use peertun_types::net::TcpConnectConfig;

use super::{CandidateError, CandidateLink, TcpListenSettings};
use crate::channel::{MessageChannel, framed_tcp_channel};
use crate::signal::TransportSignal;

/// Listen, advertise the endpoint to the peer and take one connection.
pub(super) async fn listen_side(
    settings: &TcpListenSettings,
    link: &mut CandidateLink,
) -> Result<MessageChannel, CandidateError> {
    let listener = TcpListener::bind(settings.bind)
        .await
        .map_err(CandidateError::Bind)?;
    let bound = listener.local_addr().map_err(CandidateError::Bind)?;
    link.send_transport(TransportSignal::Address {
        endpoint: settings.advertised(bound),
    });

    let (stream, peer_addr) = tokio::select! {
        r = listener.accept() => r.map_err(CandidateError::Accept)?,
        e = link.peer_failure() => return Err(e),
    };
    debug!("transport listener {bound} accepted {peer_addr}");
    Ok(framed_tcp_channel(stream))
}

/// Wait for the advertised endpoint and connect to it.
pub(super) async fn connect_side(
    config: &TcpConnectConfig,
    link: &mut CandidateLink,
) -> Result<MessageChannel, CandidateError> {
    let TransportSignal::Address { endpoint } = link.recv_transport().await?;
    let stream = crate::tcp::connect_stream(&endpoint, config).await?;
    debug!("transport connected to {endpoint}");
    Ok(framed_tcp_channel(stream))
}
