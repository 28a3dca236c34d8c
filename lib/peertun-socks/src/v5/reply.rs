/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{SocksConnectError, SocksNegotiationError};

#[derive(Debug, PartialEq, Eq)]
pub enum Socks5Reply {
    Succeeded(SocketAddr),
    GeneralServerFailure,
    ForbiddenByRule,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unassigned(u8),
}

impl Socks5Reply {
    fn new(code: u8, addr: SocketAddr) -> Self {
        match code {
            0x00 => Socks5Reply::Succeeded(addr),
            0x01 => Socks5Reply::GeneralServerFailure,
            0x02 => Socks5Reply::ForbiddenByRule,
            0x03 => Socks5Reply::NetworkUnreachable,
            0x04 => Socks5Reply::HostUnreachable,
            0x05 => Socks5Reply::ConnectionRefused,
            0x06 => Socks5Reply::TtlExpired,
            0x07 => Socks5Reply::CommandNotSupported,
            0x08 => Socks5Reply::AddressTypeNotSupported,
            n => Socks5Reply::Unassigned(n),
        }
    }

    pub const fn code(&self) -> u8 {
        match self {
            Socks5Reply::Succeeded(_) => 0x00,
            Socks5Reply::GeneralServerFailure => 0x01,
            Socks5Reply::ForbiddenByRule => 0x02,
            Socks5Reply::NetworkUnreachable => 0x03,
            Socks5Reply::HostUnreachable => 0x04,
            Socks5Reply::ConnectionRefused => 0x05,
            Socks5Reply::TtlExpired => 0x06,
            Socks5Reply::CommandNotSupported => 0x07,
            Socks5Reply::AddressTypeNotSupported => 0x08,
            Socks5Reply::Unassigned(n) => *n,
        }
    }

    // message from rfc1928
    pub const fn error_message(&self) -> &'static str {
        match self {
            Socks5Reply::Succeeded(_) => "Succeeded",
            Socks5Reply::GeneralServerFailure => "General SOCKS server failure",
            Socks5Reply::ForbiddenByRule => "Connection not allowed by ruleset",
            Socks5Reply::NetworkUnreachable => "Network unreachable",
            Socks5Reply::HostUnreachable => "Host unreachable",
            Socks5Reply::ConnectionRefused => "Connection refused",
            Socks5Reply::TtlExpired => "TTL expired",
            Socks5Reply::CommandNotSupported => "Command not supported",
            Socks5Reply::AddressTypeNotSupported => "Address type not supported",
            Socks5Reply::Unassigned(_) => "unassigned reply code",
        }
    }

    pub async fn recv<R>(reader: &mut R) -> Result<Self, SocksConnectError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).await?;
        if head[0] != 0x05 {
            return Err(SocksNegotiationError::InvalidVersion.into());
        }

        let ip = match head[3] {
            0x01 => {
                let mut ip_bytes = [0u8; 4];
                reader.read_exact(&mut ip_bytes).await?;
                IpAddr::V4(Ipv4Addr::from(ip_bytes))
            }
            0x04 => {
                let mut ip_bytes = [0u8; 16];
                reader.read_exact(&mut ip_bytes).await?;
                IpAddr::V6(Ipv6Addr::from(ip_bytes))
            }
            _ => return Err(SocksNegotiationError::InvalidAddrType.into()),
        };
        let port = reader.read_u16().await?;

        Ok(Socks5Reply::new(head[1], SocketAddr::new(ip, port)))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0x05);
        buf.put_u8(self.code());
        buf.put_u8(0x00);
        let addr = match self {
            Socks5Reply::Succeeded(addr) => *addr,
            _ => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        };
        let ip = match addr.ip() {
            IpAddr::V6(ip6) => ip6
                .to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(ip6)),
            ip4 => ip4,
        };
        match ip {
            IpAddr::V4(ip4) => {
                buf.put_u8(0x01);
                buf.put_slice(&ip4.octets());
            }
            IpAddr::V6(ip6) => {
                buf.put_u8(0x04);
                buf.put_slice(&ip6.octets());
            }
        }
        buf.put_u16(addr.port());
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(22);
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn encode_succeeded() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 40000);
        let b = Socks5Reply::Succeeded(addr).to_bytes();
        assert_eq!(
            b.as_ref(),
            &[0x05, 0x00, 0x00, 0x01, 10, 0, 0, 2, 0x9C, 0x40]
        );
    }

    #[test]
    fn encode_failure() {
        let b = Socks5Reply::CommandNotSupported.to_bytes();
        assert_eq!(b.as_ref(), &[0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

        let mapped = SocketAddr::new(
            IpAddr::V6(Ipv4Addr::new(1, 2, 3, 4).to_ipv6_mapped()),
            80,
        );
        let b = Socks5Reply::Succeeded(mapped).to_bytes();
        assert_eq!(b[3], 0x01);
    }

    #[tokio::test]
    async fn recv_reply() {
        let mut stream = Builder::new()
            .read(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .build();
        let reply = Socks5Reply::recv(&mut stream).await.unwrap();
        assert_eq!(reply, Socks5Reply::ConnectionRefused);
        assert_eq!(reply.error_message(), "Connection refused");
    }
}
