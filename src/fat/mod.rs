//! File Allocation Table: the index from logical paths to byte ranges in the
//! data block.
//!
//! On disk the FAT is a JSON document passed through the same transform as
//! file payloads.  The content hash lives only in memory; it is never
//! serialized and reads back as all zeros.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{Error, Result};

/// SHA-512 of a file's original bytes.
pub type ContentHash = [u8; 64];

pub fn content_hash(data: &[u8]) -> ContentHash {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

fn zero_hash() -> ContentHash {
    [0u8; 64]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatItem {
    /// Forward-slash separated path relative to the pack root.
    pub path:      String,
    /// Offset into the data block.
    pub offset:    i64,
    /// Stored (transformed) length.
    pub size:      i64,
    #[serde(rename = "origSize")]
    pub orig_size: i64,
    #[serde(skip, default = "zero_hash")]
    pub hash:      ContentHash,
    /// Modification time, nanoseconds since the Unix epoch.
    #[serde(rename = "mTime")]
    pub mtime:     i64,
    /// OS mode word of the source file.
    pub mode:      u32,
    /// Permission bits restored on unpack.
    pub perm:      u32,
}

impl fmt::Display for FatItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "path: {}, offset: {}, size: {}, mode: {:o} perm: {:o}",
            self.path, self.offset, self.size, self.mode, self.perm
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fat {
    pub count: i64,
    /// Cumulative stored size of the data block.  Duplicates do not add to it.
    pub size:  i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<FatItem>,
}

// Older writers emit `"items": null` for an empty table.
fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<FatItem>, D::Error> {
    Ok(Option::<Vec<FatItem>>::deserialize(d)?.unwrap_or_default())
}

impl Fat {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn push(&mut self, item: FatItem) {
        self.items.push(item);
        self.count += 1;
    }

    pub fn find(&self, path: &str) -> Option<&FatItem> {
        self.items.iter().find(|i| i.path == path)
    }

    /// Sum of original sizes over every listed item, duplicates included.
    pub fn orig_total(&self) -> i64 {
        self.items.iter().map(|i| i.orig_size).sum()
    }

    /// Structural checks applied to a FAT read from disk.
    ///
    /// `data_len` is the data-block length implied by the framing.
    pub fn validate(&self, data_len: i64) -> Result<()> {
        if self.count != self.items.len() as i64 {
            return Err(Error::InvalidFormat(format!(
                "FAT count {} does not match {} items",
                self.count,
                self.items.len()
            )));
        }
        if self.size != data_len {
            return Err(Error::InvalidFormat(format!(
                "FAT size {} does not match data block of {data_len} bytes",
                self.size
            )));
        }
        for item in &self.items {
            let end = item.offset.checked_add(item.size);
            if item.offset < 0 || item.size < 0 || end.map_or(true, |e| e > self.size) {
                return Err(Error::InvalidFormat(format!(
                    "item '{}' range {}+{} exceeds data block of {} bytes",
                    item.path, item.offset, item.size, self.size
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Fat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Count: {}, Size: {}", self.count, self.size)?;
        for item in &self.items {
            write!(f, "\n  {item}")?;
        }
        Ok(())
    }
}

// ── Dedup index ──────────────────────────────────────────────────────────────

/// Stored range keyed by `(content hash, original size)`.
#[derive(Debug, Default)]
pub struct DedupIndex {
    ranges: HashMap<(ContentHash, i64), (i64, i64)>,
}

impl DedupIndex {
    /// Returns the `(offset, size)` of previously stored identical content.
    pub fn lookup(&self, hash: &ContentHash, orig_size: i64) -> Option<(i64, i64)> {
        self.ranges.get(&(*hash, orig_size)).copied()
    }

    /// Remember the first occurrence only; later aliases point at the same range.
    pub fn insert(&mut self, hash: ContentHash, orig_size: i64, offset: i64, size: i64) {
        self.ranges.entry((hash, orig_size)).or_insert((offset, size));
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
