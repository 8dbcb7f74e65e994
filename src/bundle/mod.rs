//! Container engine.
//!
//! # Layout
//! ```text
//! [Header][DataBlock][FAT blob][Footer]
//! ```
//! All integers are big-endian; offsets in the FAT are relative to the start
//! of the data block, which sits immediately after the header.
//!
//! # Writing
//! [`Bundle::create`] writes a header with `fat_size = 0` at the current
//! stream position.  Each [`Bundle::add_file`] hashes the original bytes
//! (SHA-512); identical content of identical size is stored once and later
//! entries alias the first range.  New content is transformed and written at
//! the logical end of the data block.  [`Bundle::finalize`] appends the FAT
//! blob, patches the header in place and writes the footer.
//!
//! # Reading
//! [`Bundle::open`] is tail-anchored: footer first, then the header located
//! `pack_size` bytes before end-of-stream, then the FAT blob located
//! `fat_size` bytes before the footer.  Bytes preceding the container (for
//! example an executable stub) are ignored.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::crypto::CipherKey;
use crate::error::{Error, Result};
use crate::fat::{content_hash, DedupIndex, Fat, FatItem};
use crate::footer::{fat_checksum, Footer, FOOTER_SIZE};
use crate::header::{Header, HEADER_SIZE};
use crate::transform::Transform;

/// Path argument that selects standard input in [`Bundle::open_file`].
pub const STDIN_PATH: &str = "-";

// ── FileMeta ─────────────────────────────────────────────────────────────────

/// Source-file metadata recorded alongside each FAT item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMeta {
    /// Nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub mode:  u32,
    pub perm:  u32,
}

impl FileMeta {
    pub fn from_metadata(md: &fs::Metadata) -> Self {
        let mtime = md
            .modified()
            .ok()
            .and_then(|t| DateTime::<Utc>::from(t).timestamp_nanos_opt())
            .unwrap_or_default();
        let mode = mode_word(md);
        Self { mtime, mode, perm: mode & 0o777 }
    }
}

#[cfg(unix)]
fn mode_word(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode()
}

#[cfg(not(unix))]
fn mode_word(md: &fs::Metadata) -> u32 {
    if md.permissions().readonly() { 0o444 } else { 0o666 }
}

// ── SetLen ───────────────────────────────────────────────────────────────────

/// Streams whose length can be cut.  [`Bundle::finalize`] trims whatever
/// the stream held past the new footer.
pub trait SetLen {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl SetLen for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl SetLen for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds address space"))?;
        self.get_mut().truncate(len);
        Ok(())
    }
}

// ── Framing ──────────────────────────────────────────────────────────────────

/// Fixed records located from the tail of a stream.
#[derive(Debug, Clone)]
pub struct Framing {
    /// Absolute offset of the header within the stream.
    pub start:  u64,
    /// Total stream length.
    pub len:    u64,
    pub header: Header,
    pub footer: Footer,
}

/// Locate and decode the footer and header without touching the FAT.
pub fn read_framing<S: Read + Seek>(stream: &mut S) -> Result<Framing> {
    let len = stream.seek(SeekFrom::End(0))?;
    let min = (HEADER_SIZE + FOOTER_SIZE) as u64;
    if len < min {
        return Err(Error::InvalidSize(len as i64));
    }

    stream.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
    let mut buf = [0u8; FOOTER_SIZE];
    stream.read_exact(&mut buf)?;
    let footer = Footer::decode(&buf)?;

    let pack_size = footer.pack_size as u64;
    if pack_size > len || pack_size < min {
        return Err(Error::InvalidSize(footer.pack_size));
    }
    let start = len - pack_size;

    stream.seek(SeekFrom::Start(start))?;
    let mut buf = [0u8; HEADER_SIZE];
    stream.read_exact(&mut buf)?;
    let header = Header::decode(&buf)?;

    Ok(Framing { start, len, header, footer })
}

// ── Bundle ───────────────────────────────────────────────────────────────────

/// An open container.
///
/// Not synchronized: callers must not drive two bundles over the same file
/// at once.
pub struct Bundle<S> {
    stream:          Option<S>,
    path:            Option<PathBuf>,
    pub header:      Header,
    pub footer:      Footer,
    pub fat:         Fat,
    container_start: u64,
    data_base:       u64,
    transform:       Transform,
    dedup:           DedupIndex,
    /// Entries that aliased previously stored content.
    pub dup_count:   u64,
    /// Stored bytes saved by aliasing.
    pub dup_size:    i64,
    dirty:           bool,
}

impl<S> Bundle<S> {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Absolute stream offset of the first data-block byte.
    pub fn data_base_offset(&self) -> u64 {
        self.data_base
    }

    pub fn container_start(&self) -> u64 {
        self.container_start
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Release the underlying stream.  Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("bundle closed");
        }
    }

    /// Detach and return the underlying stream.
    pub fn into_inner(mut self) -> Option<S> {
        self.stream.take()
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotConnected, "bundle is closed")))
    }
}

impl<S: Read + Write + Seek + SetLen> Bundle<S> {
    /// Start a new container at the current stream position.
    pub fn create(mut stream: S, transform: Transform) -> Result<Self> {
        let container_start = stream.stream_position()?;
        let header = Header::new(transform.encryption, transform.compression);
        header.write(&mut stream)?;
        info!(
            "creating container (compress={}, encrypt={})",
            transform.compression.name(),
            transform.encryption.name()
        );
        Ok(Self {
            stream: Some(stream),
            path: None,
            header,
            footer: Footer::new(),
            fat: Fat::default(),
            container_start,
            data_base: container_start + HEADER_SIZE as u64,
            transform,
            dedup: DedupIndex::default(),
            dup_count: 0,
            dup_size: 0,
            dirty: true,
        })
    }

    /// Append one entry.  Identical content (same hash and original size)
    /// is not written again; the new item aliases the stored range.
    pub fn add_file(&mut self, rel_path: &str, content: &[u8], meta: FileMeta) -> Result<FatItem> {
        let hash = content_hash(content);
        let mut item = FatItem {
            path:      rel_path.replace('\\', "/"),
            offset:    self.fat.size,
            size:      0,
            orig_size: content.len() as i64,
            hash,
            mtime:     meta.mtime,
            mode:      meta.mode,
            perm:      meta.perm,
        };

        if let Some((offset, size)) = self.dedup.lookup(&hash, item.orig_size) {
            self.dup_count += 1;
            self.dup_size += size;
            item.offset = offset;
            item.size = size;
            debug!("dup  {} -> {}+{} ({})", item.path, offset, size, hex::encode(&hash[..6]));
        } else {
            let blob = self.transform.forward(content)?;
            item.size = blob.len() as i64;
            // Always seek: reads may have moved the stream since the last write.
            let at = self.data_base + item.offset as u64;
            let stream = self.stream_mut()?;
            stream.seek(SeekFrom::Start(at))?;
            stream.write_all(&blob)?;
            self.fat.size += item.size;
            self.dedup.insert(hash, item.orig_size, item.offset, item.size);
            debug!("add  {} @{} {} -> {} B", item.path, item.offset, item.orig_size, item.size);
        }

        self.fat.push(item.clone());
        self.dirty = true;
        Ok(item)
    }

    /// Read `source` from disk and append it as `rel_path`.
    pub fn add_path(&mut self, rel_path: &str, source: &Path) -> Result<FatItem> {
        let mut file = File::open(source)?;
        let meta = FileMeta::from_metadata(&file.metadata()?);
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        self.add_file(rel_path, &content, meta)
    }

    /// Write the FAT blob, patch the header and write the footer.
    /// No-op when nothing changed since the last finalize or open.
    pub fn finalize(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let json = self.fat.to_json()?;
        let blob = self.transform.forward(&json)?;

        self.header.fat_size = blob.len() as i64;
        self.footer.checksum = fat_checksum(&blob);
        self.footer.pack_size =
            HEADER_SIZE as i64 + self.fat.size + self.header.fat_size + FOOTER_SIZE as i64;

        let fat_at = self.data_base + self.fat.size as u64;
        let footer_at = fat_at + blob.len() as u64;
        let start = self.container_start;
        let header = self.header.clone();
        let footer = self.footer.clone();

        let stream = self.stream_mut()?;
        stream.seek(SeekFrom::Start(fat_at))?;
        stream.write_all(&blob)?;
        stream.seek(SeekFrom::Start(start))?;
        header.write(&mut *stream)?;
        stream.seek(SeekFrom::Start(footer_at))?;
        footer.write(&mut *stream)?;
        stream.set_len(footer_at + FOOTER_SIZE as u64)?;
        stream.flush()?;

        self.dirty = false;
        info!(
            "finalized container: {} items, data {} B, FAT {} B, pack {} B",
            self.fat.count, self.fat.size, self.header.fat_size, self.footer.pack_size
        );
        Ok(())
    }
}

impl<S: Read + Seek> Bundle<S> {
    /// Open an existing container by parsing it from the tail.
    pub fn open(mut stream: S, key: CipherKey) -> Result<Self> {
        let Framing { start, len, header, footer } = read_framing(&mut stream)?;
        let data_base = start + HEADER_SIZE as u64;

        let fat_size = header.fat_size;
        let fat_at = (len - FOOTER_SIZE as u64)
            .checked_sub(u64::try_from(fat_size).map_err(|_| Error::InvalidSize(fat_size))?)
            .filter(|at| *at >= data_base)
            .ok_or(Error::InvalidSize(fat_size))?;

        stream.seek(SeekFrom::Start(fat_at))?;
        let mut blob = vec![0u8; fat_size as usize];
        stream.read_exact(&mut blob)?;
        footer.verify_fat(&blob)?;

        let transform = Transform::new(header.compress, header.encrypt, key);
        let fat = Fat::from_json(&transform.inverse(&blob)?)?;
        fat.validate((fat_at - data_base) as i64)?;

        info!(
            "opened container at offset {start}: {} items, data {} B",
            fat.count, fat.size
        );
        Ok(Self {
            stream: Some(stream),
            path: None,
            header,
            footer,
            fat,
            container_start: start,
            data_base,
            transform,
            dedup: DedupIndex::default(),
            dup_count: 0,
            dup_size: 0,
            dirty: false,
        })
    }

    /// Stored bytes of `item`, inverse-transformed back to the original.
    pub fn read_content(&mut self, item: &FatItem) -> Result<Vec<u8>> {
        if item.size == 0 {
            return Ok(Vec::new());
        }
        let in_range = item.offset >= 0
            && item.size > 0
            && item.offset.checked_add(item.size).is_some_and(|end| end <= self.fat.size);
        if !in_range {
            return Err(Error::InvalidFormat(format!(
                "item '{}' range {}+{} is outside the data block",
                item.path, item.offset, item.size
            )));
        }
        let at = self.data_base + item.offset as u64;
        let stream = self.stream_mut()?;
        stream.seek(SeekFrom::Start(at))?;
        let mut blob = vec![0u8; item.size as usize];
        stream.read_exact(&mut blob)?;
        self.transform.inverse(&blob)
    }

    /// Look up `path` in the FAT and return its original bytes.  The first
    /// matching entry wins.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let item = self.fat.find(path).cloned().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::NotFound, format!("File not found! Path: {path}")))
        })?;
        self.read_content(&item)
    }
}

impl Bundle<File> {
    /// Create `path` (and its parent directories) and start a container in it.
    pub fn create_file<P: AsRef<Path>>(path: P, transform: Transform) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut bundle = Self::create(file, transform)?;
        bundle.path = Some(path.to_owned());
        Ok(bundle)
    }

    /// Open a container file; `"-"` reads it from standard input.
    pub fn open_file<P: AsRef<Path>>(path: P, key: CipherKey) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == STDIN_PATH {
            return Self::open_stdin(key);
        }
        let mut bundle = Self::open(File::open(path)?, key)?;
        bundle.path = Some(path.to_owned());
        Ok(bundle)
    }

    /// Tail-anchored parsing needs random access, so standard input is
    /// spooled to an anonymous temporary file first.
    pub fn open_stdin(key: CipherKey) -> Result<Self> {
        let mut spool = tempfile::tempfile()?;
        let copied = io::copy(&mut io::stdin().lock(), &mut spool)?;
        debug!("spooled {copied} B from stdin");
        Self::open(spool, key)
    }
}
