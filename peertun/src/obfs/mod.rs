/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Reversible message transforms layered on a [`MessageChannel`].

use std::collections::BTreeMap;
use std::io;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::channel::{MessageChannel, MessageReceiver, MessageSender};

mod error;
mod keystream;
mod sealed;

pub use error::{ObfsError, UnknownTransformError};

const LABEL_OFFERER_TO_ANSWERER: &[u8] = b"offerer to answerer";
const LABEL_ANSWERER_TO_OFFERER: &[u8] = b"answerer to offerer";

/// Random bytes in front of the first message of each direction.
pub const SALT_SIZE: usize = 16;

/// Key id used when an offer names none.
pub const DEFAULT_KEY_ID: &str = "default";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformKind {
    None,
    Keystream,
    Sealed,
}

impl TransformKind {
    pub const fn name(&self) -> &'static str {
        match self {
            TransformKind::None => "none",
            TransformKind::Keystream => "keystream",
            TransformKind::Sealed => "sealed",
        }
    }
}

impl FromStr for TransformKind {
    type Err = UnknownTransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "plain" => Ok(TransformKind::None),
            "keystream" | "xor" => Ok(TransformKind::Keystream),
            "sealed" | "chacha20poly1305" => Ok(TransformKind::Sealed),
            _ => Err(UnknownTransformError(s.to_string())),
        }
    }
}

/// Local transform parameters. Never sent to the peer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformParams {
    pub key: Option<String>,
}

/// A locally configured transform with its parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObfuscationSpec {
    pub transform: String,
    /// Names the key the peer should use, see [`ObfuscationKeys`].
    pub key_id: Option<String>,
    pub params: TransformParams,
}

impl ObfuscationSpec {
    pub fn new(transform: &str, key: Option<&str>) -> Self {
        ObfuscationSpec {
            transform: transform.to_string(),
            key_id: None,
            params: TransformParams {
                key: key.map(|s| s.to_string()),
            },
        }
    }

    pub fn with_key_id(mut self, key_id: &str) -> Self {
        self.key_id = Some(key_id.to_string());
        self
    }

    /// Validate without building anything.
    pub fn check(&self) -> Result<TransformKind, ObfsError> {
        let kind = TransformKind::from_str(&self.transform)?;
        if kind != TransformKind::None {
            required_key(kind, &self.params)?;
        }
        Ok(kind)
    }

    /// What the peer is told about this transform. The key stays here.
    pub fn offer(&self) -> ObfuscationOffer {
        ObfuscationOffer {
            transform: self.transform.clone(),
            key_id: self.key_id.clone(),
        }
    }
}

/// A transform name and key id, as carried in offers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObfuscationOffer {
    pub transform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl ObfuscationOffer {
    /// Find the local key named by this offer.
    pub fn resolve(&self, keys: &ObfuscationKeys) -> Result<ObfuscationSpec, ObfsError> {
        let kind = TransformKind::from_str(&self.transform)?;
        let mut spec = ObfuscationSpec {
            transform: self.transform.clone(),
            key_id: self.key_id.clone(),
            params: TransformParams::default(),
        };
        if kind != TransformKind::None {
            let key_id = self.key_id.as_deref().unwrap_or(DEFAULT_KEY_ID);
            let key = keys
                .get(key_id)
                .ok_or_else(|| ObfsError::UnknownKeyId(key_id.to_string()))?;
            spec.params.key = Some(key.to_string());
        }
        Ok(spec)
    }
}

/// Pre-shared keys of the answering side, by key id.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ObfuscationKeys {
    keys: BTreeMap<String, String>,
}

impl ObfuscationKeys {
    pub fn insert(&mut self, key_id: &str, key: &str) {
        self.keys.insert(key_id.to_string(), key.to_string());
    }

    pub fn get(&self, key_id: &str) -> Option<&str> {
        self.keys.get(key_id).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for ObfuscationKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.keys.keys()).finish()
    }
}

/// Which end of the negotiated channel is wrapped.
///
/// Each direction derives its own key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipeSide {
    Offerer,
    Answerer,
}

impl PipeSide {
    fn labels(&self) -> (&'static [u8], &'static [u8]) {
        match self {
            PipeSide::Offerer => (LABEL_OFFERER_TO_ANSWERER, LABEL_ANSWERER_TO_OFFERER),
            PipeSide::Answerer => (LABEL_ANSWERER_TO_OFFERER, LABEL_OFFERER_TO_ANSWERER),
        }
    }
}

trait MessageCoder: Send {
    fn apply(&mut self, msg: Bytes) -> io::Result<Bytes>;
}

type CoderBuilder = fn(secret: &[u8], label: &[u8], salt: &[u8]) -> Box<dyn MessageCoder>;

/// Picks a fresh salt and sends it ahead of the first message.
struct SaltingEncoder {
    secret: Vec<u8>,
    label: &'static [u8],
    build: CoderBuilder,
    inner: Option<Box<dyn MessageCoder>>,
}

impl MessageCoder for SaltingEncoder {
    fn apply(&mut self, msg: Bytes) -> io::Result<Bytes> {
        if let Some(inner) = &mut self.inner {
            return inner.apply(msg);
        }
        let salt: [u8; SALT_SIZE] = rand::random();
        let mut inner = (self.build)(&self.secret, self.label, &salt);
        let coded = inner.apply(msg)?;
        self.inner = Some(inner);

        let mut buf = BytesMut::with_capacity(SALT_SIZE + coded.len());
        buf.put_slice(&salt);
        buf.put_slice(&coded);
        Ok(buf.freeze())
    }
}

/// Takes the salt of the peer from the front of the first message.
struct SaltedDecoder {
    secret: Vec<u8>,
    label: &'static [u8],
    build: CoderBuilder,
    inner: Option<Box<dyn MessageCoder>>,
}

impl MessageCoder for SaltedDecoder {
    fn apply(&mut self, mut msg: Bytes) -> io::Result<Bytes> {
        if let Some(inner) = &mut self.inner {
            return inner.apply(msg);
        }
        if msg.len() < SALT_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "first message too short for the salt",
            ));
        }
        let coded = msg.split_off(SALT_SIZE);
        let mut inner = (self.build)(&self.secret, self.label, &msg);
        let plain = inner.apply(coded)?;
        self.inner = Some(inner);
        Ok(plain)
    }
}

struct CodedSender {
    inner: Box<dyn MessageSender>,
    coder: Box<dyn MessageCoder>,
}

#[async_trait]
impl MessageSender for CodedSender {
    async fn send(&mut self, msg: Bytes) -> io::Result<()> {
        let msg = self.coder.apply(msg)?;
        self.inner.send(msg).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.close().await
    }
}

struct CodedReceiver {
    inner: Box<dyn MessageReceiver>,
    coder: Box<dyn MessageCoder>,
}

#[async_trait]
impl MessageReceiver for CodedReceiver {
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        match self.inner.recv().await? {
            Some(msg) => self.coder.apply(msg).map(Some),
            None => Ok(None),
        }
    }
}

fn required_key<'a>(kind: TransformKind, params: &'a TransformParams) -> Result<&'a [u8], ObfsError> {
    match params.key.as_deref() {
        Some(key) if !key.is_empty() => Ok(key.as_bytes()),
        _ => Err(ObfsError::InvalidParams {
            transform: kind.name(),
            reason: "a non-empty key is required",
        }),
    }
}

/// Wrap `channel` with the named transform.
///
/// The paired end must be wrapped with the same transform and parameters,
/// and the opposite [`PipeSide`]. Each direction mixes a random salt into
/// its key, so no two channels share key material.
pub fn wrap(
    channel: MessageChannel,
    transform: &str,
    params: &TransformParams,
    side: PipeSide,
) -> Result<MessageChannel, ObfsError> {
    let kind = TransformKind::from_str(transform)?;
    let (send_label, recv_label) = side.labels();
    let (build_encoder, build_decoder): (CoderBuilder, CoderBuilder) = match kind {
        TransformKind::None => return Ok(channel),
        TransformKind::Keystream => (keystream::build, keystream::build),
        TransformKind::Sealed => (sealed::build_seal, sealed::build_open),
    };
    let key = required_key(kind, params)?;
    let encoder = SaltingEncoder {
        secret: key.to_vec(),
        label: send_label,
        build: build_encoder,
        inner: None,
    };
    let decoder = SaltedDecoder {
        secret: key.to_vec(),
        label: recv_label,
        build: build_decoder,
        inner: None,
    };
    let (sender, receiver) = channel.into_split();
    Ok(MessageChannel::new(
        Box::new(CodedSender {
            inner: sender,
            coder: Box::new(encoder),
        }),
        Box::new(CodedReceiver {
            inner: receiver,
            coder: Box::new(decoder),
        }),
    ))
}

pub fn wrap_with(
    channel: MessageChannel,
    spec: Option<&ObfuscationSpec>,
    side: PipeSide,
) -> Result<MessageChannel, ObfsError> {
    match spec {
        Some(spec) => wrap(channel, &spec.transform, &spec.params, side),
        None => Ok(channel),
    }
}
