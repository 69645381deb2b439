// src/storage/mod.rs

//! Storage abstraction for persistence targets.
//!
//! Checkpoints and plot files land on a shared or per-node filesystem; the
//! backend trait keeps the orchestration code independent of how bytes get
//! there. Positioned writes (`write_at`) exist so that every worker in a
//! collective write can place its own shards without touching anyone else's.

use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::error::Result;

mod local;
pub use local::LocalStorage;

/// A handle for reading from storage.
pub trait StorageReader: Read + Seek + Send {
    /// Total size of the object in bytes.
    fn size(&self) -> u64;

    /// Read `length` bytes starting at byte offset `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the range is out of bounds.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;
}

/// A handle for writing to storage.
pub trait StorageWriter: Write + Send {
    /// Finish the write, flushing and syncing all data.
    ///
    /// After calling `finish`, the writer must not be used again.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// The storage backend trait.
///
/// Object-safe; orchestration code holds it as `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Whether an object exists at the given path.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Size in bytes of the object at `path`.
    fn size(&self, path: &Path) -> Result<u64>;

    /// Open an object for sequential reading.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Open an object for sequential writing, truncating any existing
    /// content. Parent directories are created as needed.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;

    /// Write `data` at byte offset `offset` without truncating. The object
    /// must already exist; concurrent callers writing disjoint ranges are
    /// allowed.
    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()>;

    /// Extend or truncate the object at `path` to exactly `len` bytes.
    fn set_len(&self, path: &Path, len: u64) -> Result<()>;

    /// Create a directory and all parent directories. Pre-existing
    /// directories are not an error.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}
