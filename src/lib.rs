//! Bundle a directory tree into one seekable container file.
//!
//! ```no_run
//! use std::path::Path;
//! use icepack::{pack, unpack, list, PackOptions, UnpackOptions, Reporter};
//! use icepack::{CipherSettings, CompressKind, EncryptKind};
//!
//! let opts = PackOptions {
//!     compression: CompressKind::Gzip,
//!     encryption:  EncryptKind::Aes,
//!     cipher:      CipherSettings::new("secret"),
//!     ..Default::default()
//! };
//! let done = pack::pack(Path::new("assets"), Path::new("assets.pack"), &opts, &Reporter::silent())?;
//! println!("{} files, {} bytes", done.file_count, done.byte_size);
//!
//! let fat = list::list(Path::new("assets.pack"), &CipherSettings::new("secret"))?;
//! println!("{fat}");
//!
//! let unpack_opts = UnpackOptions { cipher: CipherSettings::new("secret"), ..Default::default() };
//! unpack::unpack(Path::new("assets.pack"), Path::new("out"), &unpack_opts, &Reporter::silent())?;
//! # Ok::<(), icepack::Error>(())
//! ```

pub mod error;
pub mod codec;
pub mod crypto;
pub mod transform;
pub mod header;
pub mod footer;
pub mod fat;
pub mod path;
pub mod bundle;
pub mod progress;
pub mod pack;
pub mod unpack;
pub mod list;

pub use error::{Error, Result};
pub use codec::CompressKind;
pub use crypto::{CipherKey, CipherSettings, EncryptKind};
pub use transform::Transform;
pub use header::{Header, HEADER_SIZE};
pub use footer::{Footer, FOOTER_SIZE};
pub use fat::{Fat, FatItem};
pub use bundle::{Bundle, FileMeta, SetLen};
pub use progress::{CancelToken, PackSummary, ProgressState, Reporter, Task, UnpackSummary};
pub use pack::PackOptions;
pub use unpack::UnpackOptions;
