/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use peertun_types::net::Endpoint;

use super::{Socks5Reply, Socks5Request, SocksCommand, SocksConnectError, SocksNegotiationError};

/// Run a no-auth CONNECT handshake on an established stream.
///
/// Returns the bound address reported by the server.
pub async fn socks5_connect_to<S>(
    stream: &mut S,
    destination: &Endpoint,
) -> Result<SocketAddr, SocksConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[0x05, 0x01, 0x00]).await?;
    stream.flush().await?;

    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await?;
    if selection[0] != 0x05 {
        return Err(SocksNegotiationError::InvalidVersion.into());
    }
    if selection[1] != 0x00 {
        return Err(SocksConnectError::NoAuthMethodAvailable);
    }

    let mut buf = BytesMut::with_capacity(262);
    Socks5Request::encode(SocksCommand::TcpConnect, destination, &mut buf);
    stream.write_all(buf.as_ref()).await?;
    stream.flush().await?;

    match Socks5Reply::recv(stream).await? {
        Socks5Reply::Succeeded(addr) => Ok(addr),
        reply => Err(SocksConnectError::RequestFailed(reply.error_message())),
    }
}
