use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use chrono::Utc;

use crate::codec::CompressKind;
use crate::crypto::EncryptKind;
use crate::error::{Error, Result};

pub const MAGIC: &[u8; 5] = b"IPACK";
pub const MAGIC_SIZE: usize = 5;
pub const VERSION: u8 = 1;

/// magic(5) version(1) encrypt(1) compress(1) fat_size(8) created(8)
pub const HEADER_SIZE: usize = MAGIC_SIZE + 1 + 1 + 1 + 8 + 8;

/// Fixed-size record at the start of every container.
///
/// Written once with `fat_size == 0` when the container is created and
/// rewritten in place by finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version:  u8,
    pub encrypt:  EncryptKind,
    pub compress: CompressKind,
    /// Length of the transformed FAT blob.
    pub fat_size: i64,
    /// Nanoseconds since the Unix epoch.
    pub created:  i64,
}

impl Header {
    pub fn new(encrypt: EncryptKind, compress: CompressKind) -> Self {
        Self {
            version: VERSION,
            encrypt,
            compress,
            fat_size: 0,
            created: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..MAGIC_SIZE].copy_from_slice(MAGIC);
        buf[5] = self.version;
        buf[6] = self.encrypt as u8;
        buf[7] = self.compress as u8;
        BigEndian::write_i64(&mut buf[8..16], self.fat_size);
        BigEndian::write_i64(&mut buf[16..24], self.created);
        buf
    }

    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.encrypt as u8)?;
        writer.write_u8(self.compress as u8)?;
        writer.write_i64::<BigEndian>(self.fat_size)?;
        writer.write_i64::<BigEndian>(self.created)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; MAGIC_SIZE];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::InvalidFormat("bad header magic".into()));
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(Error::InvalidFormat(format!("unsupported version {version}")));
        }
        let encrypt = EncryptKind::try_from(reader.read_u8()?)
            .map_err(|v| Error::InvalidFormat(format!("unknown encryption kind {v}")))?;
        let compress = CompressKind::try_from(reader.read_u8()?)
            .map_err(|v| Error::InvalidFormat(format!("unknown compression kind {v}")))?;
        let fat_size = reader.read_i64::<BigEndian>()?;
        let created  = reader.read_i64::<BigEndian>()?;
        Ok(Self { version, encrypt, compress, fat_size, created })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::read(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Header {
        Header {
            version:  VERSION,
            encrypt:  EncryptKind::Aes,
            compress: CompressKind::Gzip,
            fat_size: 12345,
            created:  123456789,
        }
    }

    #[test]
    fn round_trip() {
        let bytes = sample().encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(Header::decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn layout_is_big_endian() {
        let bytes = sample().encode();
        assert_eq!(&bytes[..5], b"IPACK");
        assert_eq!(&bytes[5..8], &[1, 1, 1]);
        assert_eq!(&bytes[8..16], &12345i64.to_be_bytes());
        assert_eq!(&bytes[16..24], &123456789i64.to_be_bytes());
    }

    #[test]
    fn corrupt_magic_is_invalid_format() {
        let mut bytes = sample().encode();
        bytes[0] = b'X';
        assert!(matches!(Header::decode(&bytes), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn wrong_version_is_invalid_format() {
        let mut bytes = sample().encode();
        bytes[5] = 2;
        assert!(matches!(Header::decode(&bytes), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        let mut bytes = sample().encode();
        bytes[6] = 7;
        assert!(matches!(Header::decode(&bytes), Err(Error::InvalidFormat(_))));
        let mut bytes = sample().encode();
        bytes[7] = 7;
        assert!(matches!(Header::decode(&bytes), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn short_input_is_io_error() {
        let bytes = sample().encode();
        assert!(matches!(Header::decode(&bytes[..10]), Err(Error::Io(_))));
    }

    #[test]
    fn new_header_starts_without_fat() {
        let h = Header::new(EncryptKind::None, CompressKind::None);
        assert_eq!(h.fat_size, 0);
        assert!(h.created > 0);
    }

    proptest! {
        #[test]
        fn any_sizes_round_trip(fat_size in any::<i64>(), created in any::<i64>()) {
            let h = Header { fat_size, created, ..sample() };
            prop_assert_eq!(Header::decode(&h.encode()).unwrap(), h);
        }
    }
}
