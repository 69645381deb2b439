// src/storage/local.rs

//! Local filesystem storage backend.
//!
//! Supports buffered I/O for small objects and memory-mapped reads for
//! large bulk payloads.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::{StorageBackend, StorageReader, StorageWriter};
use crate::config::StorageConfig;
use crate::error::{PersistError, Result};

/// Local filesystem storage backend.
pub struct LocalStorage {
    /// Base path for all storage operations.
    base_path: PathBuf,
    /// Buffer size for buffered I/O operations.
    buffer_size: usize,
    /// Whether to use memory-mapped I/O for reads.
    use_mmap: bool,
    /// File size threshold above which to use mmap.
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` instance from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base path cannot be created.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = config.base_path.clone();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                PersistError::storage_with_source(&base_path, "failed to create base directory", e)
            })?;
        }

        Ok(Self {
            base_path,
            buffer_size: config.buffer_size,
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        })
    }

    /// Resolves a path relative to the base path.
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}

impl StorageBackend for LocalStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve_path(path).exists())
    }

    fn size(&self, path: &Path) -> Result<u64> {
        let full_path = self.resolve_path(path);
        let meta = fs::metadata(&full_path).map_err(|e| {
            PersistError::storage_with_source(&full_path, "failed to read metadata", e)
        })?;
        Ok(meta.len())
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full_path = self.resolve_path(path);
        let file = File::open(&full_path)
            .map_err(|e| PersistError::storage_with_source(&full_path, "failed to open file", e))?;

        let meta = file.metadata().map_err(|e| {
            PersistError::storage_with_source(&full_path, "failed to read file metadata", e)
        })?;
        let size = meta.len();

        if self.use_mmap && size >= self.mmap_threshold {
            // SAFETY: the file is opened read-only and the Mmap lives for
            // the lifetime of the reader.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                PersistError::storage_with_source(&full_path, "failed to memory-map file", e)
            })?;
            Ok(Box::new(MmapReader::new(mmap)))
        } else {
            Ok(Box::new(LocalReader::new(file, size, self.buffer_size)))
        }
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    PersistError::storage_with_source(
                        parent,
                        "failed to create parent directories",
                        e,
                    )
                })?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full_path)
            .map_err(|e| {
                PersistError::storage_with_source(&full_path, "failed to create file", e)
            })?;

        Ok(Box::new(LocalWriter::new(
            file,
            full_path,
            self.buffer_size,
        )))
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        let full_path = self.resolve_path(path);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&full_path)
            .map_err(|e| {
                PersistError::storage_with_source(&full_path, "failed to open file for writing", e)
            })?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| {
            PersistError::storage_with_source(
                &full_path,
                format!("failed to seek to offset {offset}"),
                e,
            )
        })?;
        file.write_all(data).map_err(|e| {
            PersistError::storage_with_source(
                &full_path,
                format!("failed to write {} bytes at offset {offset}", data.len()),
                e,
            )
        })?;
        file.sync_data().map_err(|e| {
            PersistError::storage_with_source(&full_path, "failed to sync file to disk", e)
        })?;
        Ok(())
    }

    fn set_len(&self, path: &Path, len: u64) -> Result<()> {
        let full_path = self.resolve_path(path);
        let file = OpenOptions::new()
            .write(true)
            .open(&full_path)
            .map_err(|e| {
                PersistError::storage_with_source(&full_path, "failed to open file for resizing", e)
            })?;
        file.set_len(len).map_err(|e| {
            PersistError::storage_with_source(
                &full_path,
                format!("failed to resize file to {len} bytes"),
                e,
            )
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path).map_err(|e| {
            PersistError::storage_with_source(&full_path, "failed to create directories", e)
        })
    }
}

/// Buffered file reader for local storage.
struct LocalReader {
    reader: BufReader<File>,
    size: u64,
}

impl LocalReader {
    fn new(file: File, size: u64, buffer_size: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, file),
            size,
        }
    }
}

impl Read for LocalReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for LocalReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(start))
            .map_err(|e| PersistError::Storage {
                path: PathBuf::from("<file>"),
                message: format!("failed to seek to position {start}"),
                source: Some(e),
            })?;

        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf)
            .map_err(|e| PersistError::Storage {
                path: PathBuf::from("<file>"),
                message: format!("failed to read {length} bytes at position {start}"),
                source: Some(e),
            })?;

        Ok(buf)
    }
}

/// Memory-mapped reader for bulk payloads.
struct MmapReader {
    mmap: Mmap,
    pos: u64,
}

impl MmapReader {
    fn new(mmap: Mmap) -> Self {
        Self { mmap, pos: 0 }
    }
}

impl Read for MmapReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = (self.pos as usize).min(self.mmap.len());
        let remaining = &self.mmap[pos..];
        let to_read = buf.len().min(remaining.len());
        if to_read == 0 {
            return Ok(0);
        }
        buf[..to_read].copy_from_slice(&remaining[..to_read]);
        self.pos = (pos + to_read) as u64;
        Ok(to_read)
    }
}

impl Seek for MmapReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.mmap.len() as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek to negative position",
            ));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

impl StorageReader for MmapReader {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let start = start as usize;
        let end = start + length;
        if end > self.mmap.len() {
            return Err(PersistError::storage(
                "<mmap>",
                format!(
                    "read range {}..{} exceeds file size {}",
                    start,
                    end,
                    self.mmap.len()
                ),
            ));
        }
        Ok(self.mmap[start..end].to_vec())
    }
}

/// Buffered file writer for local storage.
struct LocalWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl LocalWriter {
    fn new(file: File, path: PathBuf, buffer_size: usize) -> Self {
        Self {
            writer: BufWriter::with_capacity(buffer_size, file),
            path,
        }
    }
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl StorageWriter for LocalWriter {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.flush().map_err(|e| {
            PersistError::storage_with_source(&self.path, "failed to flush writer", e)
        })?;

        self.writer.get_ref().sync_all().map_err(|e| {
            PersistError::storage_with_source(&self.path, "failed to sync file to disk", e)
        })
    }
}
