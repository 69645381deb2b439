// src/config.rs

//! Configuration for the persistence subsystem.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation. Runtime toggles (active plot
//! variables, the small-plot tolerance) live here so they can be injected at
//! startup instead of read from process-wide state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PersistError, Result};

/// Derived variable exported when `plot_cost` is enabled.
pub const WORK_ESTIMATE_VAR: &str = "WorkEstimate";

/// Top-level persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Job name recorded in `job_info`.
    pub job_name: String,
    pub storage: StorageConfig,
    pub plot: PlotConfig,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            job_name: "unnamed".to_string(),
            storage: StorageConfig::default(),
            plot: PlotConfig::default(),
        }
    }
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path for all persistence operations.
    pub base_path: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to use memory-mapped I/O for bulk reads.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024,      // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

/// A set of variable names with `ALL` / `NONE` keywords, in the manner of
/// runtime plot-variable lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarSet(Vec<String>);

impl VarSet {
    pub fn all() -> Self {
        Self(vec!["ALL".to_string()])
    }

    pub fn none() -> Self {
        Self(vec!["NONE".to_string()])
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Whether the set selects `name`.
    pub fn matches(&self, name: &str) -> bool {
        if self.0.iter().any(|v| v == "NONE") {
            return false;
        }
        if self.0.iter().any(|v| v == "ALL") {
            return true;
        }
        self.0.iter().any(|v| v == name)
    }
}

// Plot and checkpoint output options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Format-type tag written as the first header line.
    pub file_type: String,
    /// State components exported by full plot files.
    pub plot_vars: VarSet,
    /// State components exported by small plot files.
    pub small_plot_vars: VarSet,
    /// Derived variables exported by full plot files.
    pub derive_plot_vars: Vec<String>,
    /// Whether to additionally export the load-balance work estimate.
    pub plot_cost: bool,
    /// Volume-fraction tolerance appended to small plot headers. Written
    /// for downstream pruning of near-zero artifacts; never interpreted
    /// here.
    pub vfrac_eps: f64,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            file_type: "HyperCLaw-V1.1".to_string(),
            plot_vars: VarSet::all(),
            small_plot_vars: VarSet::none(),
            derive_plot_vars: Vec::new(),
            plot_cost: true,
            vfrac_eps: 0.000001,
        }
    }
}

impl PlotConfig {
    /// The active derived-variable set for full plots: the configured list,
    /// plus the work estimate when `plot_cost` is on.
    pub fn derived_plot_set(&self) -> VarSet {
        let mut names = self.derive_plot_vars.clone();
        if self.plot_cost && !names.iter().any(|n| n == WORK_ESTIMATE_VAR) {
            names.push(WORK_ESTIMATE_VAR.to_string());
        }
        if names.is_empty() {
            VarSet::none()
        } else {
            VarSet::names(names)
        }
    }
}

impl FromStr for PersistConfig {
    type Err = PersistError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| PersistError::config(format!("failed to parse TOML config: {e}")))
    }
}

impl PersistConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PersistError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `AMRIO_`:
    // - `AMRIO_JOB_NAME` overrides `job_name`
    // - `AMRIO_STORAGE_BASE_PATH` overrides `storage.base_path`
    // - `AMRIO_PLOT_VARS` / `AMRIO_SMALL_PLOT_VARS` take comma-separated lists
    // - `AMRIO_PLOT_COST` overrides `plot.plot_cost`
    // - `AMRIO_VFRAC_EPS` overrides `plot.vfrac_eps`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("AMRIO_JOB_NAME") {
            self.job_name = val;
        }
        if let Ok(val) = std::env::var("AMRIO_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("AMRIO_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("AMRIO_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("AMRIO_STORAGE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.storage.mmap_threshold = v;
            }
        }
        if let Ok(val) = std::env::var("AMRIO_PLOT_VARS") {
            self.plot.plot_vars = VarSet::names(val.split(',').map(str::trim));
        }
        if let Ok(val) = std::env::var("AMRIO_SMALL_PLOT_VARS") {
            self.plot.small_plot_vars = VarSet::names(val.split(',').map(str::trim));
        }
        if let Ok(val) = std::env::var("AMRIO_PLOT_COST") {
            if let Ok(v) = val.parse() {
                self.plot.plot_cost = v;
            }
        }
        if let Ok(val) = std::env::var("AMRIO_VFRAC_EPS") {
            if let Ok(v) = val.parse() {
                self.plot.vfrac_eps = v;
            }
        }
        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(PersistError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }
        if self.plot.file_type.is_empty() {
            return Err(PersistError::config("plot.file_type must not be empty"));
        }
        if !self.plot.vfrac_eps.is_finite() || self.plot.vfrac_eps < 0.0 {
            return Err(PersistError::config(
                "plot.vfrac_eps must be finite and non-negative",
            ));
        }
        Ok(())
    }
}
