/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use bytes::{Bytes, BytesMut};

use super::MessageCoder;

const KEYSTREAM_CONTEXT: &str = "peertun 2025-01-01 keystream obfuscation";
const PAD_CHUNK: usize = 1024;

pub(super) fn build(secret: &[u8], label: &[u8], salt: &[u8]) -> Box<dyn MessageCoder> {
    Box::new(KeystreamCoder::new(secret, label, salt))
}

/// XOR with the BLAKE3 extendable output of the salted direction key.
///
/// The keystream position carries across messages, so both ends must see
/// the messages in the same order.
pub(super) struct KeystreamCoder {
    reader: blake3::OutputReader,
}

impl KeystreamCoder {
    pub(super) fn new(secret: &[u8], label: &[u8], salt: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(KEYSTREAM_CONTEXT);
        hasher.update(secret);
        hasher.update(label);
        hasher.update(salt);
        KeystreamCoder {
            reader: hasher.finalize_xof(),
        }
    }

    fn xor(&mut self, data: &mut [u8]) {
        let mut pad = [0u8; PAD_CHUNK];
        for chunk in data.chunks_mut(PAD_CHUNK) {
            let pad = &mut pad[..chunk.len()];
            self.reader.fill(pad);
            chunk.iter_mut().zip(pad.iter()).for_each(|(b, p)| *b ^= *p);
        }
    }
}

impl MessageCoder for KeystreamCoder {
    fn apply(&mut self, msg: Bytes) -> io::Result<Bytes> {
        let mut buf = BytesMut::from(msg.as_ref());
        self.xor(&mut buf);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_carries() {
        let mut whole = KeystreamCoder::new(b"k", b"l", b"s");
        let mut parts = KeystreamCoder::new(b"k", b"l", b"s");
        let data = vec![0u8; 3000];

        let one = whole.apply(Bytes::from(data.clone())).unwrap();
        let mut two = Vec::new();
        two.extend_from_slice(&parts.apply(Bytes::from(data[..1500].to_vec())).unwrap());
        two.extend_from_slice(&parts.apply(Bytes::from(data[1500..].to_vec())).unwrap());
        assert_eq!(one.as_ref(), two.as_slice());
    }

    #[test]
    fn labels_differ() {
        let mut a = KeystreamCoder::new(b"k", b"a", b"s");
        let mut b = KeystreamCoder::new(b"k", b"b", b"s");
        let x = a.apply(Bytes::from_static(&[0u8; 32])).unwrap();
        let y = b.apply(Bytes::from_static(&[0u8; 32])).unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn salts_differ() {
        let mut a = KeystreamCoder::new(b"k", b"l", b"one");
        let mut b = KeystreamCoder::new(b"k", b"l", b"two");
        let x = a.apply(Bytes::from_static(&[0u8; 32])).unwrap();
        let y = b.apply(Bytes::from_static(&[0u8; 32])).unwrap();
        assert_ne!(x, y);
    }
}
