/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub fn normalize(raw: &str) -> String {
    raw.to_lowercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t() {
        assert_eq!(normalize("Allow-Non-Unicast"), "allow_non_unicast");
        assert_eq!(normalize("LISTEN"), "listen");
        assert_eq!(normalize("connect_timeout"), "connect_timeout");
    }
}
