/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;

#[derive(Clone, Copy, Debug, PartialOrd, PartialEq, Ord, Eq)]
pub enum SocksAuthMethod {
    None,
    GssApi,
    User,
    Other(u8),
    NoAcceptable,
}

impl SocksAuthMethod {
    pub const fn code(&self) -> u8 {
        match self {
            SocksAuthMethod::None => 0x00,
            SocksAuthMethod::GssApi => 0x01,
            SocksAuthMethod::User => 0x02,
            SocksAuthMethod::Other(v) => *v,
            SocksAuthMethod::NoAcceptable => 0xFF,
        }
    }
}

impl fmt::Display for SocksAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksAuthMethod::None => f.write_str("None"),
            SocksAuthMethod::GssApi => f.write_str("GssApi"),
            SocksAuthMethod::User => f.write_str("User"),
            SocksAuthMethod::Other(v) => write!(f, "Other({v:#04x})"),
            SocksAuthMethod::NoAcceptable => f.write_str("NoAcceptable"),
        }
    }
}

impl From<u8> for SocksAuthMethod {
    fn from(method: u8) -> Self {
        match method {
            0x00 => SocksAuthMethod::None,
            0x01 => SocksAuthMethod::GssApi,
            0x02 => SocksAuthMethod::User,
            0xFF => SocksAuthMethod::NoAcceptable,
            v => SocksAuthMethod::Other(v),
        }
    }
}
