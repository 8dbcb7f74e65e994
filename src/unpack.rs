//! Unpack driver: recreate every FAT entry below a target directory.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::bundle::Bundle;
use crate::crypto::CipherSettings;
use crate::error::{Error, Result};
use crate::fat::FatItem;
use crate::pack::PathFilter;
use crate::path::safe_join;
use crate::progress::{Reporter, Task, UnpackSummary, PROGRESS_EVERY};

/// Configuration for [`unpack`].
#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    pub cipher:  CipherSettings,
    /// Only entries whose stored path matches are restored.
    pub include: Option<String>,
    /// Entries whose stored path matches are skipped.
    pub exclude: Option<String>,
}

/// Extract `pack_file` (or standard input for `"-"`) into `target_dir`.
///
/// Entries are restored in FAT order, so a repeated path ends up with the
/// content of its last entry.  Failures on single entries are reported on
/// `reporter` and do not stop the run.
pub fn unpack(
    pack_file: &Path,
    target_dir: &Path,
    opts: &UnpackOptions,
    reporter: &Reporter,
) -> Result<UnpackSummary> {
    let filter = PathFilter::new(opts.include.as_deref(), opts.exclude.as_deref())?;
    fs::create_dir_all(target_dir)?;

    let mut bundle = Bundle::open_file(pack_file, opts.cipher.derive_key())?;
    info!("unpacking {} item(s) into {}", bundle.fat.count, target_dir.display());

    let items: Vec<FatItem> = bundle
        .fat
        .items
        .iter()
        .filter(|item| filter.accepts(Path::new(&item.path)))
        .cloned()
        .collect();

    let total = items.len();
    let mut summary = UnpackSummary::default();
    for (i, item) in items.iter().enumerate() {
        reporter.check_cancelled()?;
        if i % PROGRESS_EVERY == 0 {
            reporter.progress(total, i, &item.path);
        }
        summary.file_count += 1;

        let Some(full) = safe_join(target_dir, &item.path) else {
            reporter.progress_error(
                Error::InvalidFormat(format!("unsafe entry path '{}'", item.path)),
                &item.path,
            );
            continue;
        };
        match restore(&mut bundle, item, &full) {
            Ok(n) => summary.byte_size += n,
            Err(e) => reporter.progress_error(e, &item.path),
        }
    }
    reporter.progress(total, total, "");

    bundle.close();
    debug!("unpack summary: {summary:?}");
    Ok(summary)
}

/// Write one entry to `full`; returns the number of restored bytes.
fn restore<S: Read + Seek>(bundle: &mut Bundle<S>, item: &FatItem, full: &Path) -> Result<u64> {
    if let Some(dir) = full.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = create_with_perm(full, item.perm)?;

    let mut restored = 0u64;
    if item.size > 0 {
        let content = bundle.read_content(item)?;
        file.write_all(&content)?;
        restored = content.len() as u64;
    }
    if item.mtime > 0 {
        let mtime: SystemTime = UNIX_EPOCH + Duration::from_nanos(item.mtime as u64);
        file.set_modified(mtime)?;
    }
    drop(file);
    set_perm(full, item.perm)?;
    Ok(restored)
}

#[cfg(unix)]
fn create_with_perm(path: &Path, perm: u32) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(OpenOptions::new().write(true).create(true).truncate(true).mode(perm).open(path)?)
}

#[cfg(not(unix))]
fn create_with_perm(path: &Path, _perm: u32) -> Result<File> {
    Ok(OpenOptions::new().write(true).create(true).truncate(true).open(path)?)
}

// The create mode is filtered by the umask and ignored for existing files.
#[cfg(unix)]
fn set_perm(path: &Path, perm: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(perm & 0o7777))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_perm(path: &Path, perm: u32) -> Result<()> {
    let mut p = fs::metadata(path)?.permissions();
    p.set_readonly(perm & 0o222 == 0);
    fs::set_permissions(path, p)?;
    Ok(())
}

/// Run [`unpack`] on a background thread.
pub fn spawn(pack_file: PathBuf, target_dir: PathBuf, opts: UnpackOptions) -> Task<UnpackSummary> {
    Task::spawn(move |reporter| unpack(&pack_file, &target_dir, &opts, reporter))
}
