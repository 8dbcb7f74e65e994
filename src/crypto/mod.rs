//! AES-CFB encryption and PBKDF2 key derivation.
//!
//! Key derivation: PBKDF2-HMAC-SHA1(password, salt, iterations) → 16-byte key.
//! With `iterations == 0` the password bytes are used as the key verbatim.
//! Encryption:     AES in full-block CFB mode, random IV prepended.
//!
//! Encrypted payload layout: [ iv (16 B) | ciphertext ]
//!
//! The ciphertext has the same length as the plaintext; there is no
//! authentication tag.  A wrong key therefore surfaces later, as a
//! decompression or FAT decode failure.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use cfb_mode::{Decryptor, Encryptor};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use thiserror::Error;

/// AES block size; also the IV length prepended to every payload.
pub const BLOCK_SIZE: usize = 16;
/// Length of a derived key (AES-128).
pub const KEY_LEN: usize = 16;
pub const DEFAULT_SALT: &str = "icepacker";
pub const DEFAULT_ITERATIONS: u32 = 10_000;

// ── EncryptKind ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EncryptKind {
    #[default]
    None = 0,
    Aes  = 1,
}

impl EncryptKind {
    pub fn name(self) -> &'static str {
        match self {
            EncryptKind::None => "none",
            EncryptKind::Aes  => "aes",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(EncryptKind::None),
            "aes"  => Some(EncryptKind::Aes),
            _      => None,
        }
    }
}

impl TryFrom<u8> for EncryptKind {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(EncryptKind::None),
            1 => Ok(EncryptKind::Aes),
            other => Err(other),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encrypted payload too short ({0} bytes, minimum {BLOCK_SIZE})")]
    TooShort(usize),
    #[error("Invalid AES key length: {0}")]
    InvalidKeyLength(usize),
    #[error("Random source failed: {0}")]
    Random(String),
}

// ── Key material ─────────────────────────────────────────────────────────────

/// Derived key bytes.  `Debug` never prints the material.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct CipherKey(Vec<u8>);

impl CipherKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        CipherKey(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherKey({} bytes)", self.0.len())
    }
}

/// Password and derivation parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherSettings {
    pub password:   String,
    pub salt:       String,
    pub iterations: u32,
}

impl CipherSettings {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password:   password.into(),
            salt:       DEFAULT_SALT.to_owned(),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    pub fn derive_key(&self) -> CipherKey {
        derive_key(&self.password, self.salt.as_bytes(), self.iterations)
    }
}

impl Default for CipherSettings {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Debug for CipherSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherSettings")
            .field("password", &"<redacted>")
            .field("salt", &self.salt)
            .field("iterations", &self.iterations)
            .finish()
    }
}

/// Derive a key from a password.
///
/// Deterministic for identical inputs.  `iterations == 0` skips derivation
/// and returns the raw password bytes, which must then be a valid AES key
/// length for encryption to succeed.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> CipherKey {
    if iterations == 0 {
        return CipherKey::from_bytes(password.as_bytes());
    }
    let mut key = vec![0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, iterations, &mut key);
    CipherKey(key)
}

// ── Cipher ───────────────────────────────────────────────────────────────────

fn cfb_encrypt(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CryptoError> {
    let bad_len = |_| CryptoError::InvalidKeyLength(key.len());
    match key.len() {
        16 => Encryptor::<Aes128>::new_from_slices(key, iv).map_err(bad_len)?.encrypt(buf),
        24 => Encryptor::<Aes192>::new_from_slices(key, iv).map_err(bad_len)?.encrypt(buf),
        32 => Encryptor::<Aes256>::new_from_slices(key, iv).map_err(bad_len)?.encrypt(buf),
        n  => return Err(CryptoError::InvalidKeyLength(n)),
    }
    Ok(())
}

fn cfb_decrypt(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CryptoError> {
    let bad_len = |_| CryptoError::InvalidKeyLength(key.len());
    match key.len() {
        16 => Decryptor::<Aes128>::new_from_slices(key, iv).map_err(bad_len)?.decrypt(buf),
        24 => Decryptor::<Aes192>::new_from_slices(key, iv).map_err(bad_len)?.decrypt(buf),
        32 => Decryptor::<Aes256>::new_from_slices(key, iv).map_err(bad_len)?.decrypt(buf),
        n  => return Err(CryptoError::InvalidKeyLength(n)),
    }
    Ok(())
}

/// Encrypt `plaintext` under a fresh random IV.
///
/// Returns `iv (16 B) || ciphertext`.
pub fn encrypt(key: &CipherKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = vec![0u8; BLOCK_SIZE + plaintext.len()];
    let (iv, body) = out.split_at_mut(BLOCK_SIZE);
    OsRng
        .try_fill_bytes(iv)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    body.copy_from_slice(plaintext);
    cfb_encrypt(key.as_bytes(), iv, body)?;
    Ok(out)
}

/// Decrypt a payload produced by [`encrypt`].
pub fn decrypt(key: &CipherKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < BLOCK_SIZE {
        return Err(CryptoError::TooShort(data.len()));
    }
    let (iv, body) = data.split_at(BLOCK_SIZE);
    let mut out = body.to_vec();
    cfb_decrypt(key.as_bytes(), iv, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = CipherSettings::new("PackSecretKey").derive_key();
        let b = CipherSettings::new("PackSecretKey").derive_key();
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), KEY_LEN);
        assert_ne!(a, CipherSettings::new("other").derive_key());
    }

    #[test]
    fn salt_changes_the_key() {
        let mut s = CipherSettings::new("pw");
        let a = s.derive_key();
        s.salt = "pepper".into();
        assert_ne!(a, s.derive_key());
    }

    #[test]
    fn zero_iterations_uses_raw_password() {
        let key = derive_key("0123456789abcdef", b"ignored", 0);
        assert_eq!(key.as_bytes(), b"0123456789abcdef");
    }

    #[test]
    fn encrypt_prepends_fresh_iv() {
        let key = CipherSettings::new("k").derive_key();
        let a = encrypt(&key, b"hello world").unwrap();
        let b = encrypt(&key, b"hello world").unwrap();
        assert_eq!(a.len(), BLOCK_SIZE + 11);
        assert_ne!(a, b, "IV must differ per call");
        assert_eq!(decrypt(&key, &a).unwrap(), b"hello world");
        assert_eq!(decrypt(&key, &b).unwrap(), b"hello world");
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let key = CipherSettings::new("k").derive_key();
        assert!(matches!(decrypt(&key, &[0u8; 15]), Err(CryptoError::TooShort(15))));
    }

    #[test]
    fn raw_keys_select_aes_variant_by_length() {
        for len in [16usize, 24, 32] {
            let key = CipherKey::from_bytes(vec![7u8; len]);
            let ct = encrypt(&key, b"payload").unwrap();
            assert_eq!(decrypt(&key, &ct).unwrap(), b"payload");
        }
        let bad = CipherKey::from_bytes(vec![1u8; 5]);
        assert!(matches!(encrypt(&bad, b"x"), Err(CryptoError::InvalidKeyLength(5))));
    }

    #[test]
    fn debug_never_leaks_secrets() {
        let s = CipherSettings::new("hunter2");
        assert!(!format!("{s:?}").contains("hunter2"));
        assert!(!format!("{:?}", derive_key("hunter2hunter2!!", b"", 0)).contains("hunter2"));
    }
}
