//! List driver: return the FAT of a container without reading file data.

use std::path::{Path, PathBuf};

use crate::bundle::Bundle;
use crate::crypto::CipherSettings;
use crate::error::Result;
use crate::fat::Fat;
use crate::progress::Task;

pub fn list(pack_file: &Path, cipher: &CipherSettings) -> Result<Fat> {
    let mut bundle = Bundle::open_file(pack_file, cipher.derive_key())?;
    let fat = std::mem::take(&mut bundle.fat);
    bundle.close();
    Ok(fat)
}

/// Run [`list`] on a background thread.
pub fn spawn(pack_file: PathBuf, cipher: CipherSettings) -> Task<Fat> {
    Task::spawn(move |_| list(&pack_file, &cipher))
}
