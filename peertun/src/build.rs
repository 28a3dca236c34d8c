/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

const BUILD_TARGET_OS: &str = std::env::consts::OS;
const BUILD_TARGET_ARCH: &str = std::env::consts::ARCH;

pub fn print_version(verbose_level: u8) {
    println!("{PKG_NAME} {VERSION}");
    if verbose_level > 1 {
        println!("Target: {BUILD_TARGET_ARCH}-{BUILD_TARGET_OS}");
        if cfg!(debug_assertions) {
            println!("Profile: debug");
        } else {
            println!("Profile: release");
        }
    }
}
