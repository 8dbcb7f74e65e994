//! Reversible content pipeline shared by file payloads and the FAT blob.
//!
//! Pack:   compress → encrypt
//! Unpack: decrypt  → decompress
//!
//! Empty input is passed through untouched in both directions, so a
//! zero-length file occupies zero bytes in the data block.

use crate::codec::{get_codec, CompressKind};
use crate::crypto::{self, CipherKey, EncryptKind};
use crate::error::Result;

/// Settings for one container; every payload in it uses the same transform.
#[derive(Debug, Clone, Default)]
pub struct Transform {
    pub compression: CompressKind,
    pub encryption:  EncryptKind,
    pub key:         CipherKey,
}

impl Transform {
    pub fn new(compression: CompressKind, encryption: EncryptKind, key: CipherKey) -> Self {
        Self { compression, encryption, key }
    }

    /// A transform that stores bytes verbatim.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn forward(&self, data: &[u8]) -> Result<Vec<u8>> {
        forward(data, self)
    }

    pub fn inverse(&self, data: &[u8]) -> Result<Vec<u8>> {
        inverse(data, self)
    }
}

pub fn forward(data: &[u8], t: &Transform) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let compressed = get_codec(t.compression).compress(data)?;
    match t.encryption {
        EncryptKind::None => Ok(compressed),
        EncryptKind::Aes  => Ok(crypto::encrypt(&t.key, &compressed)?),
    }
}

pub fn inverse(data: &[u8], t: &Transform) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let plain = match t.encryption {
        EncryptKind::None => data.to_vec(),
        EncryptKind::Aes  => crypto::decrypt(&t.key, data)?,
    };
    match t.compression {
        CompressKind::None => Ok(plain),
        other => Ok(get_codec(other).decompress(&plain)?),
    }
}
