// src/header.rs

//! Textual header shared by checkpoint and plot-file output.
//!
//! The header is a fixed-order, line-oriented record. Writing and reading
//! are strict structural inverses: the reader rejects any stream whose line
//! order or per-line token count deviates from the write order. Floats are
//! emitted with Rust's shortest round-trip formatting, so a written header
//! parses back bit-exact.

use std::fmt::Write as _;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{PersistError, Result};
use crate::mesh::{IntBox, MeshHierarchy, RealBox, SPACEDIM};
use crate::storage::StorageBackend;

/// Name of the header file inside an output directory.
pub const HEADER_FILE: &str = "Header";

/// Write `header` to `dir/Header`. Coordinator-only; callers gate it.
pub fn write_header_file(
    storage: &dyn StorageBackend,
    dir: &Path,
    header: &PlotFileHeader,
) -> Result<()> {
    let path = dir.join(HEADER_FILE);
    let mut writer = storage.open_write(&path)?;
    writer
        .write_all(header.to_text().as_bytes())
        .map_err(|e| PersistError::storage_with_source(&path, "failed to write header", e))?;
    writer.finish()
}

/// Read and parse `dir/Header` (full variant).
pub fn read_header_file(storage: &dyn StorageBackend, dir: &Path) -> Result<PlotFileHeader> {
    let path = dir.join(HEADER_FILE);
    let mut reader = storage.open_read(&path)?;
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| PersistError::storage_with_source(&path, "failed to read header", e))?;
    PlotFileHeader::from_text(&text)
}

/// Per-level trailer of the header: grid bounds and the relative path of the
/// level's bulk payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelBlock {
    pub level: usize,
    /// Number of grids on this level, written alongside `level` and `time`.
    pub time: f64,
    pub steps: u64,
    /// Physical bounds of each grid, in box-list order.
    pub grids: Vec<RealBox>,
    /// Relative path of the bulk payload, e.g. `Level_0/Cell`.
    pub cell_path: String,
    /// Small-plot variant only: the volume-fraction pruning tolerance.
    pub tolerance: Option<f64>,
}

/// The complete header record, in write order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotFileHeader {
    pub file_type: String,
    pub var_names: Vec<String>,
    pub dim: usize,
    pub time: f64,
    pub finest_level: usize,
    pub prob_lo: [f64; SPACEDIM],
    pub prob_hi: [f64; SPACEDIM],
    /// Refinement ratio per coarse/fine level pair; `finest_level` entries.
    pub ref_ratios: Vec<u32>,
    /// Index-space domain of each level.
    pub domains: Vec<IntBox>,
    pub level_steps: Vec<u64>,
    pub cell_sizes: Vec<[f64; SPACEDIM]>,
    pub coord: i32,
    pub levels: Vec<LevelBlock>,
}

impl PlotFileHeader {
    /// Assemble a header from the mesh hierarchy and the ordered export
    /// variable names. `tolerance` selects the small-plot variant.
    pub fn from_hierarchy(
        file_type: &str,
        hier: &MeshHierarchy,
        var_names: Vec<String>,
        time: f64,
        tolerance: Option<f64>,
    ) -> Self {
        let finest_level = hier.finest_level();
        let levels = hier
            .levels
            .iter()
            .enumerate()
            .map(|(lev, geom)| LevelBlock {
                level: lev,
                time,
                steps: geom.steps,
                grids: geom
                    .boxes
                    .iter()
                    .map(|b| b.to_real(&geom.cell_size, &hier.prob_lo))
                    .collect(),
                cell_path: format!("Level_{lev}/Cell"),
                tolerance,
            })
            .collect();

        Self {
            file_type: file_type.to_string(),
            var_names,
            dim: SPACEDIM,
            time,
            finest_level,
            prob_lo: hier.prob_lo,
            prob_hi: hier.prob_hi,
            ref_ratios: hier.levels[1..].iter().map(|g| g.ref_ratio).collect(),
            domains: hier.levels.iter().map(|g| g.domain).collect(),
            level_steps: hier.levels.iter().map(|g| g.steps).collect(),
            cell_sizes: hier.levels.iter().map(|g| g.cell_size).collect(),
            coord: hier.coord,
            levels,
        }
    }

    /// Serialize the header in the fixed line order.
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        writeln!(out, "{}", self.file_type).unwrap();
        writeln!(out, "{}", self.var_names.len()).unwrap();
        for name in &self.var_names {
            writeln!(out, "{name}").unwrap();
        }
        writeln!(out, "{}", self.dim).unwrap();
        writeln!(out, "{}", self.time).unwrap();
        writeln!(out, "{}", self.finest_level).unwrap();
        writeln!(out, "{}", join_floats(&self.prob_lo)).unwrap();
        writeln!(out, "{}", join_floats(&self.prob_hi)).unwrap();
        writeln!(
            out,
            "{}",
            self.ref_ratios
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        )
        .unwrap();
        // All level domains on one line, six integers per level.
        writeln!(
            out,
            "{}",
            self.domains
                .iter()
                .flat_map(|d| d.lo.iter().chain(d.hi.iter()))
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        )
        .unwrap();
        writeln!(
            out,
            "{}",
            self.level_steps
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        )
        .unwrap();
        for cell_size in &self.cell_sizes {
            writeln!(out, "{}", join_floats(cell_size)).unwrap();
        }
        writeln!(out, "{}", self.coord).unwrap();
        writeln!(out, "0").unwrap();

        for block in &self.levels {
            writeln!(out, "{} {} {}", block.level, block.grids.len(), block.time).unwrap();
            writeln!(out, "{}", block.steps).unwrap();
            for grid in &block.grids {
                for d in 0..self.dim {
                    writeln!(out, "{} {}", grid.lo[d], grid.hi[d]).unwrap();
                }
            }
            writeln!(out, "{}", block.cell_path).unwrap();
            if let Some(tolerance) = block.tolerance {
                writeln!(out, "{tolerance}").unwrap();
            }
        }

        out
    }

    /// Parse a full-variant header. Strict inverse of `to_text`.
    pub fn from_text(text: &str) -> Result<Self> {
        Self::parse(text, false)
    }

    /// Parse a small-variant header (trailing per-level tolerance).
    pub fn from_text_small(text: &str) -> Result<Self> {
        Self::parse(text, true)
    }

    fn parse(text: &str, small: bool) -> Result<Self> {
        let mut lines = LineCursor::new(text);

        let file_type = lines.next_line("file type tag")?.to_string();
        let nvars: usize = lines.parse_scalar("variable count")?;
        let mut var_names = Vec::with_capacity(nvars);
        for _ in 0..nvars {
            var_names.push(lines.next_line("variable name")?.to_string());
        }
        let dim: usize = lines.parse_scalar("spatial dimension")?;
        if dim != SPACEDIM {
            return Err(lines.format_error(format!(
                "unsupported spatial dimension {dim}, expected {SPACEDIM}"
            )));
        }
        let time: f64 = lines.parse_scalar("cumulative time")?;
        let finest_level: usize = lines.parse_scalar("finest level")?;
        let nlev = finest_level + 1;

        let prob_lo = to_array(lines.parse_tokens("problem low bounds", SPACEDIM)?);
        let prob_hi = to_array(lines.parse_tokens("problem high bounds", SPACEDIM)?);
        let ref_ratios: Vec<u32> = lines.parse_tokens("refinement ratios", finest_level)?;

        let domain_ints: Vec<i64> = lines.parse_tokens("level domains", nlev * 2 * SPACEDIM)?;
        let domains = domain_ints
            .chunks_exact(2 * SPACEDIM)
            .map(|c| IntBox::new(to_array(c[..SPACEDIM].to_vec()), to_array(c[SPACEDIM..].to_vec())))
            .collect();

        let level_steps: Vec<u64> = lines.parse_tokens("level step counts", nlev)?;
        let mut cell_sizes = Vec::with_capacity(nlev);
        for _ in 0..nlev {
            cell_sizes.push(to_array(lines.parse_tokens("level cell sizes", SPACEDIM)?));
        }
        let coord: i32 = lines.parse_scalar("coordinate system tag")?;
        let boundary: i32 = lines.parse_scalar("boundary flag")?;
        if boundary != 0 {
            return Err(lines.format_error(format!("boundary flag must be 0, found {boundary}")));
        }

        let mut levels = Vec::with_capacity(nlev);
        for expected_level in 0..nlev {
            let head: Vec<String> = lines.parse_tokens("level record", 3)?;
            let level: usize = parse_token(&head[0], "level index", lines.line_number())?;
            if level != expected_level {
                return Err(lines.format_error(format!(
                    "out-of-order level record: expected level {expected_level}, found {level}"
                )));
            }
            let ngrids: usize = parse_token(&head[1], "grid count", lines.line_number())?;
            let level_time: f64 = parse_token(&head[2], "level time", lines.line_number())?;
            let steps: u64 = lines.parse_scalar("level steps")?;

            let mut grids = Vec::with_capacity(ngrids);
            for _ in 0..ngrids {
                let mut lo = [0.0; SPACEDIM];
                let mut hi = [0.0; SPACEDIM];
                for d in 0..SPACEDIM {
                    let pair: Vec<f64> = lines.parse_tokens("grid bounds", 2)?;
                    lo[d] = pair[0];
                    hi[d] = pair[1];
                }
                grids.push(RealBox { lo, hi });
            }
            let cell_path = lines.next_line("bulk payload path")?.to_string();
            let tolerance = if small {
                Some(lines.parse_scalar("pruning tolerance")?)
            } else {
                None
            };

            levels.push(LevelBlock {
                level,
                time: level_time,
                steps,
                grids,
                cell_path,
                tolerance,
            });
        }

        lines.expect_end()?;

        Ok(Self {
            file_type,
            var_names,
            dim,
            time,
            finest_level,
            prob_lo,
            prob_hi,
            ref_ratios,
            domains,
            level_steps,
            cell_sizes,
            coord,
            levels,
        })
    }
}

fn join_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_array<T: Copy + Default, const N: usize>(v: Vec<T>) -> [T; N] {
    let mut out = [T::default(); N];
    out.copy_from_slice(&v);
    out
}

fn parse_token<T: FromStr>(token: &str, what: &str, line: usize) -> Result<T> {
    token
        .parse()
        .map_err(|_| PersistError::format(line, format!("invalid {what}: '{token}'")))
}

/// Line-oriented cursor tracking 1-based line numbers for error reporting.
struct LineCursor<'a> {
    lines: std::str::Lines<'a>,
    line_number: usize,
}

impl<'a> LineCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            line_number: 0,
        }
    }

    fn line_number(&self) -> usize {
        self.line_number
    }

    fn format_error(&self, message: impl Into<String>) -> PersistError {
        PersistError::format(self.line_number, message)
    }

    fn next_line(&mut self, what: &str) -> Result<&'a str> {
        self.line_number += 1;
        self.lines.next().ok_or_else(|| {
            PersistError::format(
                self.line_number,
                format!("unexpected end of header, expected {what}"),
            )
        })
    }

    fn parse_scalar<T: FromStr>(&mut self, what: &str) -> Result<T> {
        let line = self.next_line(what)?;
        if line.split_whitespace().count() != 1 {
            return Err(self.format_error(format!("expected a single {what}, found '{line}'")));
        }
        parse_token(line.trim(), what, self.line_number)
    }

    /// Parse one line into exactly `n` whitespace-separated tokens.
    fn parse_tokens<T: FromStr>(&mut self, what: &str, n: usize) -> Result<Vec<T>> {
        let line = self.next_line(what)?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != n {
            return Err(self.format_error(format!(
                "expected {n} values for {what}, found {}",
                tokens.len()
            )));
        }
        tokens
            .into_iter()
            .map(|t| parse_token(t, what, self.line_number))
            .collect()
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.lines.next() {
            None => Ok(()),
            Some(extra) => Err(PersistError::format(
                self.line_number + 1,
                format!("trailing content after header: '{extra}'"),
            )),
        }
    }
}
