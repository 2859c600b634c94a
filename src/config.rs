//! Options controlling how packages are read and written.
//!
//! Both option types follow the builder style: start from `new()` (or `Default`) and
//! chain `with_*` setters.
//!
//! # Examples
//!
//! ```rust
//! use litchi_opc::{Compression, ReadOptions, WriteOptions};
//!
//! let read = ReadOptions::new().with_max_part_size(Some(64 * 1024 * 1024));
//! let write = WriteOptions::new()
//!     .with_compression(Compression::Deflated)
//!     .with_compression_level(Some(9));
//! ```

use crate::packuri::PackURI;
use phf::phf_set;

/// Default upper bound on a single member's uncompressed size (256 MiB).
pub const DEFAULT_MAX_PART_SIZE: u64 = 256 * 1024 * 1024;

/// Extensions of formats that are already compressed. Deflating them again costs time and
/// rarely saves a byte.
static PRECOMPRESSED_EXTENSIONS: phf::Set<&'static str> = phf_set! {
    ".png", ".jpeg", ".jpg", ".jpe", ".gif", ".tif", ".tiff", ".wdp",
    ".zip", ".xlsx", ".docx", ".pptx", ".xlsm", ".docm", ".pptm",
    ".mp3", ".mp4", ".m4a", ".wma", ".wmv", ".avi", ".mov",
};

/// Options used when opening a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// Largest uncompressed member accepted; `None` disables the check
    pub max_part_size: Option<u64>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_part_size: Some(DEFAULT_MAX_PART_SIZE),
        }
    }
}

impl ReadOptions {
    /// Create a new `ReadOptions` with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-member size limit.
    ///
    /// Members whose uncompressed size exceeds the limit fail the open with
    /// [`OpcError::PartTooLarge`](crate::OpcError::PartTooLarge).
    #[inline]
    pub fn with_max_part_size(mut self, limit: Option<u64>) -> Self {
        self.max_part_size = limit;
        self
    }
}

/// Compression method for written package members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// DEFLATE, the method every OPC consumer supports
    #[default]
    Deflated,
    /// No compression
    Stored,
}

/// Options used when saving a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Method applied to members
    pub compression: Compression,
    /// DEFLATE level; `None` uses the backend's default
    pub compression_level: Option<i64>,
    /// Store already-compressed media (images, audio, nested packages) without deflating
    pub store_precompressed: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Deflated,
            compression_level: None,
            store_precompressed: true,
        }
    }
}

impl WriteOptions {
    /// Create a new `WriteOptions` with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compression method.
    #[inline]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the DEFLATE level. Ignored for stored members.
    #[inline]
    pub fn with_compression_level(mut self, level: Option<i64>) -> Self {
        self.compression_level = level;
        self
    }

    /// Set whether already-compressed media is stored as-is.
    #[inline]
    pub fn with_store_precompressed(mut self, store: bool) -> Self {
        self.store_precompressed = store;
        self
    }

    /// The compression method to use for the member at `pack_uri`.
    pub fn compression_for(&self, pack_uri: &PackURI) -> Compression {
        if self.compression == Compression::Deflated
            && self.store_precompressed
            && is_precompressed(pack_uri.ext())
        {
            return Compression::Stored;
        }
        self.compression
    }
}

fn is_precompressed(ext: &str) -> bool {
    if ext.bytes().any(|b| b.is_ascii_uppercase()) {
        PRECOMPRESSED_EXTENSIONS.contains(ext.to_ascii_lowercase().as_str())
    } else {
        PRECOMPRESSED_EXTENSIONS.contains(ext)
    }
}
