/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use tokio::io::{AsyncRead, AsyncReadExt};

use super::{SocksAuthMethod, SocksNegotiationError, SocksRequestParseError};

/// Read the method negotiation message, the version byte included.
pub async fn recv_methods_from_client<R>(
    clt_r: &mut R,
) -> Result<Vec<SocksAuthMethod>, SocksRequestParseError>
where
    R: AsyncRead + Unpin,
{
    let version = clt_r.read_u8().await?;
    if version != 0x05 {
        return Err(SocksNegotiationError::InvalidVersion.into());
    }

    let count = clt_r.read_u8().await?;
    if count == 0 {
        return Err(SocksNegotiationError::NoAuthMethod.into());
    }

    let mut buf = vec![0u8; count as usize];
    clt_r.read_exact(&mut buf).await?;
    Ok(buf.into_iter().map(SocksAuthMethod::from).collect())
}

/// Pick the first method in `supported` that the client also offered.
pub fn select_method(offered: &[SocksAuthMethod], supported: &[SocksAuthMethod]) -> SocksAuthMethod {
    supported
        .iter()
        .find(|m| offered.contains(m))
        .copied()
        .unwrap_or(SocksAuthMethod::NoAcceptable)
}

pub fn encode_method_selection(method: SocksAuthMethod) -> [u8; 2] {
    [0x05, method.code()]
}
