use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Error, Result};
use crate::header::{MAGIC, MAGIC_SIZE};

/// checksum(4) pack_size(8) magic(5)
pub const FOOTER_SIZE: usize = 4 + 8 + MAGIC_SIZE;

/// Fixed-size record at the very end of every container.
///
/// `pack_size` spans header, data block, FAT blob and footer, so a reader can
/// find the container start by seeking backwards from end-of-stream even
/// when unrelated bytes precede the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footer {
    /// CRC32 of the transformed FAT blob, or 0 when not recorded.
    pub checksum:  u32,
    pub pack_size: i64,
}

impl Footer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        BigEndian::write_u32(&mut buf[0..4], self.checksum);
        BigEndian::write_i64(&mut buf[4..12], self.pack_size);
        buf[12..].copy_from_slice(MAGIC);
        buf
    }

    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_u32::<BigEndian>(self.checksum)?;
        writer.write_i64::<BigEndian>(self.pack_size)?;
        writer.write_all(MAGIC)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let checksum  = reader.read_u32::<BigEndian>()?;
        let pack_size = reader.read_i64::<BigEndian>()?;
        let mut magic = [0u8; MAGIC_SIZE];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::InvalidFormat("bad footer magic".into()));
        }
        if pack_size <= 0 {
            return Err(Error::InvalidSize(pack_size));
        }
        Ok(Self { checksum, pack_size })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::read(bytes)
    }

    /// Check the recorded FAT checksum.  A zero checksum means the writer did
    /// not record one and is accepted as-is.
    pub fn verify_fat(&self, fat_blob: &[u8]) -> Result<()> {
        if self.checksum == 0 {
            return Ok(());
        }
        let actual = fat_checksum(fat_blob);
        if actual != self.checksum {
            return Err(Error::ChecksumMismatch { expected: self.checksum, actual });
        }
        Ok(())
    }
}

/// CRC32 over the transformed FAT blob, as stored in [`Footer::checksum`].
pub fn fat_checksum(fat_blob: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(fat_blob);
    hasher.finalize()
}
