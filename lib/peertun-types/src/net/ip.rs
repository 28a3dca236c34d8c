/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Whether the address is a globally routable unicast address.
///
/// Loopback, private, link-local, shared, documentation, benchmarking,
/// multicast, broadcast and reserved ranges are all rejected.
pub fn is_public_unicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip4) => is_public_unicast_v4(ip4),
        IpAddr::V6(ip6) => is_public_unicast_v6(ip6),
    }
}

pub fn is_public_unicast_v4(ip: Ipv4Addr) -> bool {
    if ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
    {
        return false;
    }
    let octets = ip.octets();
    match octets[0] {
        0 => false,                                // this network, 0.0.0.0/8
        100 if (octets[1] & 0xC0) == 64 => false,  // shared, 100.64.0.0/10
        192 if octets[1] == 0 && octets[2] == 0 => false, // ietf protocol, 192.0.0.0/24
        198 if (octets[1] & 0xFE) == 18 => false,  // benchmarking, 198.18.0.0/15
        240..=255 => false,                        // reserved, 240.0.0.0/4
        _ => true,
    }
}

pub fn is_public_unicast_v6(ip: Ipv6Addr) -> bool {
    if let Some(ip4) = ip.to_ipv4_mapped() {
        return is_public_unicast_v4(ip4);
    }
    if ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        || ip.is_unique_local()
        || ip.is_unicast_link_local()
    {
        return false;
    }
    let segments = ip.segments();
    // documentation, 2001:db8::/32
    !(segments[0] == 0x2001 && segments[1] == 0x0db8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn check(s: &str) -> bool {
        is_public_unicast(IpAddr::from_str(s).unwrap())
    }

    #[test]
    fn v4() {
        assert!(check("8.8.8.8"));
        assert!(check("1.1.1.1"));
        assert!(!check("0.0.0.0"));
        assert!(!check("127.0.0.1"));
        assert!(!check("10.1.2.3"));
        assert!(!check("172.16.0.1"));
        assert!(!check("192.168.1.1"));
        assert!(!check("169.254.0.1"));
        assert!(!check("100.64.0.1"));
        assert!(check("100.128.0.1"));
        assert!(!check("224.0.0.1"));
        assert!(!check("255.255.255.255"));
        assert!(!check("192.0.2.1"));
        assert!(!check("198.18.0.1"));
        assert!(!check("240.0.0.1"));
    }

    #[test]
    fn v6() {
        assert!(check("2606:4700:4700::1111"));
        assert!(!check("::"));
        assert!(!check("::1"));
        assert!(!check("fe80::1"));
        assert!(!check("fd00::1"));
        assert!(!check("ff02::1"));
        assert!(!check("2001:db8::1"));
        assert!(!check("::ffff:192.168.0.1"));
        assert!(check("::ffff:8.8.8.8"));
    }
}
