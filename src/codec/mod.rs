//! Compression registry.
//!
//! The compression kind is stored as a single byte in the container header
//! and applies uniformly to every file payload and to the FAT blob.  Unknown
//! kinds are rejected when the header is decoded; there is no negotiation.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

/// Zstd level used for [`CompressKind::Zstd`].
pub const ZSTD_LEVEL: i32 = 19;

// ── CompressKind ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CompressKind {
    #[default]
    None = 0,
    Gzip = 1,
    Zstd = 2,
}

impl CompressKind {
    /// Human-readable name (diagnostics and CLI).
    pub fn name(self) -> &'static str {
        match self {
            CompressKind::None => "none",
            CompressKind::Gzip => "gzip",
            CompressKind::Zstd => "zstd",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none"       => Some(CompressKind::None),
            "gz" | "gzip" => Some(CompressKind::Gzip),
            "zstd"       => Some(CompressKind::Zstd),
            _            => None,
        }
    }
}

impl TryFrom<u8> for CompressKind {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(CompressKind::None),
            1 => Ok(CompressKind::Gzip),
            2 => Ok(CompressKind::Zstd),
            other => Err(other),
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn kind(&self) -> CompressKind;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn kind(&self) -> CompressKind { CompressKind::None }
    fn compress(&self, data: &[u8])   -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

/// Gzip at maximum ratio.
pub struct GzipCodec;
impl Codec for GzipCodec {
    fn kind(&self) -> CompressKind { CompressKind::Gzip }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut enc = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn kind(&self) -> CompressKind { CompressKind::Zstd }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_codec(kind: CompressKind) -> Box<dyn Codec> {
    match kind {
        CompressKind::None => Box::new(NoneCodec),
        CompressKind::Gzip => Box::new(GzipCodec),
        CompressKind::Zstd => Box::new(ZstdCodec),
    }
}
