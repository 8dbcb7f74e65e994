//! Pack driver: walk a source tree and stream every accepted file into a new
//! container.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use regex::Regex;
use walkdir::WalkDir;

use crate::bundle::Bundle;
use crate::codec::CompressKind;
use crate::crypto::{CipherSettings, EncryptKind};
use crate::error::{Error, Result};
use crate::path::normalize_rel_path;
use crate::progress::{PackSummary, Reporter, Task, PROGRESS_EVERY};
use crate::transform::Transform;

/// Configuration for [`pack`].
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub compression: CompressKind,
    pub encryption:  EncryptKind,
    pub cipher:      CipherSettings,
    /// Only paths matching this regular expression are packed.
    pub include:     Option<String>,
    /// Paths matching this regular expression are skipped.
    pub exclude:     Option<String>,
}

/// Compiled include/exclude patterns, tested against the full walked path.
#[derive(Debug, Default)]
pub struct PathFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl PathFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        let compile = |p: Option<&str>| p.filter(|s| !s.is_empty()).map(Regex::new).transpose();
        Ok(Self { include: compile(include)?, exclude: compile(exclude)? })
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.include.as_ref().map_or(true, |re| re.is_match(&text))
            && !self.exclude.as_ref().map_or(false, |re| re.is_match(&text))
    }
}

/// Collect `(relative path, source path)` pairs to pack, in walk order.
///
/// Per-entry walk errors are reported on `reporter` and skipped.  `skip` is
/// the canonical path of the container being written; it is left out when
/// the container lives inside `source`.
pub fn collect_files(
    source: &Path,
    filter: &PathFilter,
    skip: Option<&Path>,
    reporter: &Reporter,
) -> Result<Vec<(String, PathBuf)>> {
    let md = fs::metadata(source).map_err(|_| Error::SourceNotFound(source.to_owned()))?;

    if !md.is_dir() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::SourceNotFound(source.to_owned()))?;
        return Ok(vec![(name, source.to_owned())]);
    }

    // Files are matched one by one; directories are never pruned.
    let walker = WalkDir::new(source).follow_links(false).sort_by_file_name();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let at = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                reporter.progress_error(e.into(), &at);
                continue;
            }
        };
        if entry.file_type().is_dir() || !filter.accepts(entry.path()) {
            continue;
        }
        if skip.is_some_and(|s| is_same_file(entry.path(), s)) {
            debug!("skipping pack target {}", entry.path().display());
            continue;
        }
        let rel = normalize_rel_path(source, entry.path())?;
        files.push((rel, entry.into_path()));
    }
    Ok(files)
}

fn is_same_file(path: &Path, canonical: &Path) -> bool {
    path.file_name() == canonical.file_name()
        && fs::canonicalize(path).is_ok_and(|p| p == canonical)
}

/// Bundle `source` (a directory or a single file) into `target`.
///
/// Unreadable files are reported on `reporter` and left out; the run only
/// fails when the container itself cannot be written.
pub fn pack(source: &Path, target: &Path, opts: &PackOptions, reporter: &Reporter) -> Result<PackSummary> {
    let filter = PathFilter::new(opts.include.as_deref(), opts.exclude.as_deref())?;
    let own_target = fs::canonicalize(target).ok();
    let files = collect_files(source, &filter, own_target.as_deref(), reporter)?;
    info!("packing {} file(s) from {} into {}", files.len(), source.display(), target.display());

    let key = opts.cipher.derive_key();
    let transform = Transform::new(opts.compression, opts.encryption, key);
    let mut bundle = Bundle::create_file(target, transform)?;

    let total = files.len();
    let mut cancelled = false;
    for (i, (rel, src)) in files.iter().enumerate() {
        if reporter.is_cancelled() {
            cancelled = true;
            break;
        }
        if i % PROGRESS_EVERY == 0 {
            reporter.progress(total, i, rel);
        }
        if let Err(e) = bundle.add_path(rel, src) {
            reporter.progress_error(e, rel);
        }
    }
    if !cancelled {
        reporter.progress(total, total, "");
    }

    bundle.finalize()?;
    let summary = PackSummary {
        file_count: bundle.fat.count as u64,
        byte_size:  bundle.footer.pack_size as u64,
        dup_count:  bundle.dup_count,
        dup_size:   bundle.dup_size as u64,
    };
    bundle.close();
    debug!("pack summary: {summary:?}");

    if cancelled {
        return Err(Error::Cancelled);
    }
    Ok(summary)
}

/// Run [`pack`] on a background thread.
pub fn spawn(source: PathBuf, target: PathBuf, opts: PackOptions) -> Task<PackSummary> {
    Task::spawn(move |reporter| pack(&source, &target, &opts, reporter))
}
