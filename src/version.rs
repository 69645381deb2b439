// src/version.rs

//! Checkpoint format version negotiation.
//!
//! The crate maintains an internal checkpoint version so that new builds can
//! restart from checkpoints written by old ones. The version is stored in the
//! `ERFHeader` file inside a checkpoint directory. Version history:
//!
//! - 0: all checkpoints before the version file existed
//! - 1: adds the body-state slot
//!
//! On restart the coordinator reads the file (absent or unreadable means
//! version 0 — a recoverable fallback, not an error) and broadcasts the
//! result so every worker observes the identical value. The resolved value
//! is cached for the rest of the process and never re-read.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::OnceLock;

use tracing::debug;

use crate::collective::Collective;
use crate::error::{PersistError, Result};
use crate::storage::StorageBackend;

/// The version written by this build's checkpoints.
pub const CURRENT_CHECKPOINT_VERSION: u32 = 1;

/// Name of the version-metadata file inside a checkpoint directory.
pub const VERSION_FILE: &str = "ERFHeader";

/// Label preceding the version number in the version file.
pub const VERSION_LABEL: &str = "Checkpoint version";

/// Resolves and caches the on-disk format version of the checkpoint being
/// restored from.
///
/// Single-assignment by construction: the first successful `resolve` fixes
/// the value for the lifetime of the negotiator, and the negotiator is meant
/// to live for the whole run. The negotiator never interprets the version
/// beyond handing it to the slot migrator.
#[derive(Default)]
pub struct VersionNegotiator {
    resolved: OnceLock<u32>,
}

impl VersionNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resolved version, if `resolve` has completed.
    pub fn resolved(&self) -> Option<u32> {
        self.resolved.get().copied()
    }

    /// Resolve the checkpoint version of `restart_dir`.
    ///
    /// The coordinator reads the version file and the result is broadcast so
    /// all workers agree; subsequent calls return the cached value without
    /// touching the filesystem. Fails only if the broadcast itself cannot
    /// complete.
    pub fn resolve(
        &self,
        storage: &dyn StorageBackend,
        collective: &Collective,
        restart_dir: &Path,
    ) -> Result<u32> {
        if let Some(v) = self.resolved.get() {
            return Ok(*v);
        }

        let local = if collective.is_coordinator() {
            Some(read_version_file(storage, restart_dir))
        } else {
            None
        };
        let version = collective.broadcast_u32(local)?;

        Ok(*self.resolved.get_or_init(|| version))
    }
}

/// Read the version file under `dir`, defaulting to 0 when the file is
/// absent or unreadable.
fn read_version_file(storage: &dyn StorageBackend, dir: &Path) -> u32 {
    let path = dir.join(VERSION_FILE);

    let mut reader = match storage.open_read(&path) {
        Ok(reader) => reader,
        Err(_) => {
            debug!(path = %path.display(), "no version file, assuming version 0");
            return 0;
        }
    };

    let mut content = String::new();
    if reader.read_to_string(&mut content).is_err() {
        debug!(path = %path.display(), "unreadable version file, assuming version 0");
        return 0;
    }

    parse_version_line(&content).unwrap_or_else(|| {
        debug!(path = %path.display(), "malformed version file, assuming version 0");
        0
    })
}

/// Parse `Checkpoint version: <int>` from the first line.
fn parse_version_line(content: &str) -> Option<u32> {
    let first_line = content.lines().next()?;
    let (_, value) = first_line.split_once(':')?;
    value.trim().parse().ok()
}

/// Write the version file for a checkpoint being created. Coordinator-only.
pub fn write_version_file(storage: &dyn StorageBackend, dir: &Path) -> Result<()> {
    let path = dir.join(VERSION_FILE);
    let mut writer = storage.open_write(&path)?;
    writer
        .write_all(format!("{VERSION_LABEL}: {CURRENT_CHECKPOINT_VERSION}\n").as_bytes())
        .map_err(|e| PersistError::storage_with_source(&path, "failed to write version file", e))?;
    writer.finish()
}
