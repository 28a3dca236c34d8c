/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use peertun_types::net::{Endpoint, Host};

use super::{SocksCommand, SocksNegotiationError, SocksRequestParseError};

pub struct Socks5Request {
    pub command: SocksCommand,
    pub destination: Endpoint,
}

impl Socks5Request {
    pub async fn recv<R>(clt_r: &mut R) -> Result<Self, SocksRequestParseError>
    where
        R: AsyncRead + Unpin,
    {
        let version = clt_r.read_u8().await?;
        if version != 0x05 {
            return Err(SocksNegotiationError::InvalidVersion.into());
        }

        let command = SocksCommand::try_from(clt_r.read_u8().await?)?;

        let _rsv = clt_r.read_u8().await?;

        let destination = match clt_r.read_u8().await? {
            0x01 => {
                let mut ip_bytes = [0u8; 4];
                clt_r.read_exact(&mut ip_bytes).await?;
                let port = clt_r.read_u16().await?;
                Endpoint::from_ip_and_port(IpAddr::V4(Ipv4Addr::from(ip_bytes)), port)
            }
            0x03 => {
                let len = clt_r.read_u8().await?;
                if len == 0 {
                    return Err(SocksNegotiationError::InvalidDomainString.into());
                }
                let mut domain = vec![0u8; len as usize];
                clt_r.read_exact(&mut domain).await?;
                let domain = std::str::from_utf8(&domain)
                    .map_err(|_| SocksNegotiationError::InvalidDomainString)?;
                let port = clt_r.read_u16().await?;
                Endpoint::from_host_str_and_port(domain, port)
                    .map_err(|_| SocksNegotiationError::InvalidDomainString)?
            }
            0x04 => {
                let mut ip_bytes = [0u8; 16];
                clt_r.read_exact(&mut ip_bytes).await?;
                let port = clt_r.read_u16().await?;
                Endpoint::from_ip_and_port(IpAddr::V6(Ipv6Addr::from(ip_bytes)), port)
            }
            _ => return Err(SocksNegotiationError::InvalidAddrType.into()),
        };

        Ok(Socks5Request {
            command,
            destination,
        })
    }

    pub(crate) fn encode(command: SocksCommand, addr: &Endpoint, buf: &mut BytesMut) {
        buf.put_u8(0x05);
        buf.put_u8(command.code());
        buf.put_u8(0x00);
        match addr.host() {
            Host::Domain(domain) => {
                let len = domain.len().min(u8::MAX as usize);
                buf.put_u8(0x03);
                buf.put_u8(len as u8);
                buf.put_slice(&domain.as_bytes()[..len]);
            }
            Host::Ip(IpAddr::V4(ip4)) => {
                buf.put_u8(0x01);
                buf.put_slice(&ip4.octets());
            }
            Host::Ip(IpAddr::V6(ip6)) => {
                buf.put_u8(0x04);
                buf.put_slice(&ip6.octets());
            }
        }
        buf.put_u16(addr.port());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn recv_ipv4_connect() {
        let mut stream = Builder::new()
            .read(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
            .build();
        let req = Socks5Request::recv(&mut stream).await.unwrap();
        assert_eq!(req.command, SocksCommand::TcpConnect);
        assert_eq!(req.destination.to_string(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn recv_domain_in_chunks() {
        let mut stream = Builder::new()
            .read(&[0x05, 0x01, 0x00, 0x03, 11])
            .read(b"example")
            .read(b".com")
            .read(&[0x00, 0x50])
            .build();
        let req = Socks5Request::recv(&mut stream).await.unwrap();
        assert_eq!(req.destination.to_string(), "example.com:80");
    }

    #[tokio::test]
    async fn recv_bind_and_bad_addr() {
        let mut stream = Builder::new()
            .read(&[0x05, 0x02, 0x00, 0x01, 10, 0, 0, 1, 0x00, 0x50])
            .build();
        let req = Socks5Request::recv(&mut stream).await.unwrap();
        assert_eq!(req.command, SocksCommand::TcpBind);

        let mut stream = Builder::new().read(&[0x05, 0x01, 0x00, 0x07]).build();
        assert!(matches!(
            Socks5Request::recv(&mut stream).await,
            Err(SocksRequestParseError::InvalidProtocol(
                SocksNegotiationError::InvalidAddrType
            ))
        ));

        let mut stream = Builder::new().read(&[0x05, 0x09]).build();
        assert!(matches!(
            Socks5Request::recv(&mut stream).await,
            Err(SocksRequestParseError::InvalidProtocol(
                SocksNegotiationError::InvalidCommand
            ))
        ));
    }

    #[test]
    fn encode_domain() {
        let mut buf = BytesMut::new();
        let ep = Endpoint::from_str("a.io:443").unwrap();
        Socks5Request::encode(SocksCommand::TcpConnect, &ep, &mut buf);
        assert_eq!(
            buf.as_ref(),
            &[0x05, 0x01, 0x00, 0x03, 4, b'a', b'.', b'i', b'o', 0x01, 0xBB]
        );
    }
}
