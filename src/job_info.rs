// src/job_info.rs

//! The `job_info` run report written alongside every checkpoint and plot
//! file. Free form and for humans; nothing in this crate parses it back.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Local};

use crate::error::{PersistError, Result};
use crate::mesh::MeshHierarchy;
use crate::storage::StorageBackend;

/// Name of the report file inside an output directory.
pub const JOB_INFO_FILE: &str = "job_info";

/// Write the report into `dir`. Coordinator-only; callers gate it.
pub fn write_job_info(
    storage: &dyn StorageBackend,
    dir: &Path,
    job_name: &str,
    num_workers: usize,
    hier: &MeshHierarchy,
) -> Result<()> {
    let report = render(job_name, num_workers, hier, dir, Local::now());
    let path = dir.join(JOB_INFO_FILE);
    let mut writer = storage.open_write(&path)?;
    writer
        .write_all(report.as_bytes())
        .map_err(|e| PersistError::storage_with_source(&path, "failed to write job_info", e))?;
    writer.finish()
}

fn render(
    job_name: &str,
    num_workers: usize,
    hier: &MeshHierarchy,
    dir: &Path,
    now: DateTime<Local>,
) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);

    writeln!(out, "{rule}").unwrap();
    writeln!(out, " Job Information").unwrap();
    writeln!(out, "{rule}").unwrap();
    writeln!(out, "job name: {job_name}").unwrap();
    writeln!(out, "output directory: {}", dir.display()).unwrap();
    writeln!(out, "written: {}", now.format("%Y-%m-%d %H:%M:%S %Z")).unwrap();
    writeln!(out, "number of workers: {num_workers}").unwrap();
    writeln!(out).unwrap();

    writeln!(out, " Grid Information").unwrap();
    writeln!(out, "{rule}").unwrap();
    for (lev, geom) in hier.levels.iter().enumerate() {
        writeln!(
            out,
            "level {lev}: {} grids, {} cells, step {}",
            geom.boxes.len(),
            geom.total_cells(),
            geom.steps
        )
        .unwrap();
    }

    out
}
