/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use bytes::Bytes;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::aead::{Aead, KeyInit};

use super::MessageCoder;

const SEALED_CONTEXT: &str = "peertun 2025-01-01 sealed obfuscation";
const NONCE_SIZE: usize = 12;

fn new_cipher(secret: &[u8], label: &[u8], salt: &[u8]) -> ChaCha20Poly1305 {
    let mut hasher = blake3::Hasher::new_derive_key(SEALED_CONTEXT);
    hasher.update(secret);
    hasher.update(label);
    hasher.update(salt);
    let key = hasher.finalize();
    ChaCha20Poly1305::new(key.as_bytes().into())
}

pub(super) fn build_seal(secret: &[u8], label: &[u8], salt: &[u8]) -> Box<dyn MessageCoder> {
    Box::new(SealCoder::new(secret, label, salt))
}

pub(super) fn build_open(secret: &[u8], label: &[u8], salt: &[u8]) -> Box<dyn MessageCoder> {
    Box::new(OpenCoder::new(secret, label, salt))
}

/// Counter nonce, the counter is placed in the last 8 bytes.
///
/// Only safe because every channel direction uses a freshly salted key.
struct NonceSequence {
    counter: u64,
}

impl NonceSequence {
    fn next(&mut self) -> io::Result<[u8; NONCE_SIZE]> {
        if self.counter == u64::MAX {
            return Err(io::Error::other("nonce exhausted"));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[4..].copy_from_slice(&self.counter.to_le_bytes());
        self.counter += 1;
        Ok(nonce)
    }
}

pub(super) struct SealCoder {
    cipher: ChaCha20Poly1305,
    nonce: NonceSequence,
}

impl SealCoder {
    pub(super) fn new(secret: &[u8], label: &[u8], salt: &[u8]) -> Self {
        SealCoder {
            cipher: new_cipher(secret, label, salt),
            nonce: NonceSequence { counter: 0 },
        }
    }
}

impl MessageCoder for SealCoder {
    fn apply(&mut self, msg: Bytes) -> io::Result<Bytes> {
        let nonce = self.nonce.next()?;
        self.cipher
            .encrypt((&nonce).into(), msg.as_ref())
            .map(Bytes::from)
            .map_err(|_| io::Error::other("message sealing failed"))
    }
}

pub(super) struct OpenCoder {
    cipher: ChaCha20Poly1305,
    nonce: NonceSequence,
}

impl OpenCoder {
    pub(super) fn new(secret: &[u8], label: &[u8], salt: &[u8]) -> Self {
        OpenCoder {
            cipher: new_cipher(secret, label, salt),
            nonce: NonceSequence { counter: 0 },
        }
    }
}

impl MessageCoder for OpenCoder {
    fn apply(&mut self, msg: Bytes) -> io::Result<Bytes> {
        let nonce = self.nonce.next()?;
        self.cipher
            .decrypt((&nonce).into(), msg.as_ref())
            .map(Bytes::from)
            .map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "message authentication failed")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_appended() {
        let mut seal = SealCoder::new(b"k", b"l", b"s");
        let mut open = OpenCoder::new(b"k", b"l", b"s");
        let sealed = seal.apply(Bytes::from_static(b"abc")).unwrap();
        assert_eq!(sealed.len(), 3 + 16);
        assert_eq!(open.apply(sealed).unwrap().as_ref(), b"abc");
    }

    #[test]
    fn replay_rejected() {
        let mut seal = SealCoder::new(b"k", b"l", b"s");
        let mut open = OpenCoder::new(b"k", b"l", b"s");
        let first = seal.apply(Bytes::from_static(b"one")).unwrap();
        assert!(open.apply(first.clone()).is_ok());
        assert!(open.apply(first).is_err());
    }

    #[test]
    fn tamper_rejected() {
        let mut seal = SealCoder::new(b"k", b"l", b"s");
        let mut open = OpenCoder::new(b"k", b"l", b"s");
        let sealed = seal.apply(Bytes::from_static(b"abc")).unwrap();
        let mut bad = sealed.to_vec();
        bad[0] ^= 1;
        let e = open.apply(Bytes::from(bad)).unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn salt_mismatch() {
        let mut seal = SealCoder::new(b"k", b"l", b"one");
        let mut open = OpenCoder::new(b"k", b"l", b"two");
        let sealed = seal.apply(Bytes::from_static(b"abc")).unwrap();
        assert!(open.apply(sealed).is_err());
    }
}
