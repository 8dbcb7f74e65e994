use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad magic, unsupported version, unknown enum value or an
    /// inconsistent FAT.
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),
    /// Footer `pack_size` is not positive, or the stream is too small to hold
    /// the framing it claims.
    #[error("Invalid pack size {0}")]
    InvalidSize(i64),
    #[error("Ciphertext is too short: {0} bytes")]
    TruncatedCiphertext(usize),
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("FAT checksum mismatch (expected {expected:08x}, got {actual:08x})")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("Invalid cipher key: {0}")]
    Key(String),
    #[error("Crypto error: {0}")]
    Crypto(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("FAT decode error: {0}")]
    Fat(#[from] serde_json::Error),
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Walk error: {0}")]
    Walk(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Background task ended without a result")]
    TaskLost,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::TooShort(len) => Error::TruncatedCiphertext(len),
            CryptoError::InvalidKeyLength(len) => {
                Error::Key(format!("raw key must be 16, 24 or 32 bytes, got {len}"))
            }
            other => Error::Crypto(other.to_string()),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        let msg = e.to_string();
        match e.into_io_error() {
            Some(io) => Error::Io(io),
            None     => Error::Walk(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
