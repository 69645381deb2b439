// src/checkpoint.rs

//! Checkpoint write and restart orchestration.
//!
//! A checkpoint is a full restorable snapshot: every component of every
//! persisted slot, plus the version file, accumulated CPU time, the run
//! report, and the textual header. Restart is the inverse, preceded by
//! version negotiation and slot migration so new builds can restore
//! checkpoints written by old ones.
//!
//! Any failure aborts the whole operation. An incomplete output directory
//! is corrupt and is left for operators to delete or ignore; nothing here
//! retries or repairs.

use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::bulk::{pack, BulkFieldReader, BulkFieldWriter, CELL_FILE};
use crate::collective::Collective;
use crate::config::PersistConfig;
use crate::error::{PersistError, Result};
use crate::header::{read_header_file, write_header_file, PlotFileHeader, HEADER_FILE};
use crate::job_info::write_job_info;
use crate::mesh::MeshHierarchy;
use crate::migrate::Migrator;
use crate::select::checkpoint_plan;
use crate::state::{DeriveRegistry, FieldArray, LevelState, StateSlotDescriptor, StateSlotInstance};
use crate::storage::StorageBackend;
use crate::version::{write_version_file, VersionNegotiator};

/// Name of the accumulated-CPU-time file inside a checkpoint directory.
pub const CPU_TIME_FILE: &str = "CPUtime";

/// The caller must supply one `LevelState` per hierarchy level.
pub(crate) fn check_state_levels(state: &[LevelState], hier: &MeshHierarchy) -> Result<()> {
    if state.len() < hier.levels.len() {
        return Err(PersistError::config(format!(
            "state holds {} levels but the hierarchy has {}",
            state.len(),
            hier.levels.len()
        )));
    }
    Ok(())
}

/// What a completed restart hands back to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartInfo {
    /// Negotiated format version of the restored checkpoint.
    pub version: u32,
    /// Simulation time recorded in the checkpoint header.
    pub time: f64,
    /// Accumulated CPU time from previous runs. Coordinator-local; other
    /// workers see 0.
    pub cpu_time: f64,
}

pub struct CheckpointManager<'a> {
    storage: &'a dyn StorageBackend,
    collective: &'a Collective,
    config: &'a PersistConfig,
    negotiator: VersionNegotiator,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(
        storage: &'a dyn StorageBackend,
        collective: &'a Collective,
        config: &'a PersistConfig,
    ) -> Self {
        Self {
            storage,
            collective,
            config,
            negotiator: VersionNegotiator::new(),
        }
    }

    /// Write a checkpoint of every persisted slot into `dir`.
    pub fn write_checkpoint(
        &self,
        dir: &Path,
        hier: &MeshHierarchy,
        state: &[LevelState],
        slots: &[StateSlotDescriptor],
        time: f64,
        cpu_time: f64,
    ) -> Result<()> {
        let plan = checkpoint_plan(slots);
        if plan.is_empty() {
            return Err(PersistError::config(
                "no persisted slots to checkpoint",
            ));
        }
        hier.validate()?;
        check_state_levels(state, hier)?;

        let header = PlotFileHeader::from_hierarchy(
            &self.config.plot.file_type,
            hier,
            plan.names.clone(),
            time,
            None,
        );

        self.collective.coordinator_step(|| {
            self.collective.ensure_directory(self.storage, dir)?;
            write_version_file(self.storage, dir)?;
            self.write_cpu_time(dir, cpu_time)?;
            write_job_info(
                self.storage,
                dir,
                &self.config.job_name,
                self.collective.num_workers(),
                hier,
            )?;
            write_header_file(self.storage, dir, &header)
        })?;

        // Checkpoints never carry derived data.
        let registry = DeriveRegistry::new();
        let writer = BulkFieldWriter::new(self.storage, self.collective);
        for (lev, geom) in hier.levels.iter().enumerate() {
            let level_dir = dir.join(format!("Level_{lev}"));
            self.collective
                .coordinator_step(|| self.collective.ensure_directory(self.storage, &level_dir))?;

            let packed = pack(
                geom,
                &state[lev],
                &plan,
                &registry,
                time,
                self.collective.rank(),
            )?;
            writer.write(&packed, geom, &level_dir.join(CELL_FILE))?;
        }

        if self.collective.is_coordinator() {
            info!(
                dir = %dir.display(),
                components = plan.num_components(),
                levels = hier.levels.len(),
                "checkpoint written"
            );
        }
        Ok(())
    }

    /// Restore state from the checkpoint in `dir`.
    ///
    /// The hierarchy must carry the same box decomposition the checkpoint
    /// was written with; restart never restructures the mesh. Each worker
    /// reads only its own shards. Slots the checkpoint cannot contain are
    /// synthesized from their predecessor without touching storage.
    pub fn restart(
        &self,
        dir: &Path,
        hier: &MeshHierarchy,
        slots: &[StateSlotDescriptor],
        state: &mut Vec<LevelState>,
    ) -> Result<RestartInfo> {
        hier.validate()?;

        let version = self
            .negotiator
            .resolve(self.storage, self.collective, dir)?;
        let migrator = Migrator::new(version);
        let presence = migrator.compute_presence(slots)?;

        let cpu_time = if self.collective.is_coordinator() {
            self.read_cpu_time(dir)
        } else {
            0.0
        };

        let header = read_header_file(self.storage, dir)?;
        let expected_comps: usize = slots
            .iter()
            .zip(&presence)
            .filter(|(_, &present)| present)
            .map(|(slot, _)| slot.ncomp())
            .sum();
        if header.var_names.len() != expected_comps {
            return Err(PersistError::storage(
                dir.join(HEADER_FILE),
                format!(
                    "checkpoint header lists {} components, expected {expected_comps} for \
                     version {version}",
                    header.var_names.len()
                ),
            ));
        }

        let rank = self.collective.rank();
        let reader = BulkFieldReader::new(self.storage);
        state.clear();
        for (lev, geom) in hier.levels.iter().enumerate() {
            let path = dir.join(format!("Level_{lev}")).join(CELL_FILE);
            reader.verify(&path)?;
            let array = reader.read(&path, geom, rank)?;
            if array.ncomp() != expected_comps {
                return Err(PersistError::storage(
                    &path,
                    format!(
                        "bulk payload holds {} components, expected {expected_comps}",
                        array.ncomp()
                    ),
                ));
            }

            let mut level_state = LevelState { slots: Vec::new() };
            let mut comp = 0;
            for (slot, &present) in slots.iter().zip(&presence) {
                if present {
                    let mut data = FieldArray::define(geom, slot.ncomp(), rank);
                    for c in 0..slot.ncomp() {
                        data.copy_component(c, &array, comp)?;
                        comp += 1;
                    }
                    level_state.slots.push(StateSlotInstance {
                        time: header.time,
                        data,
                    });
                } else {
                    // Placeholder; overwritten by synthesize_missing below.
                    level_state.slots.push(StateSlotInstance {
                        time: 0.0,
                        data: FieldArray::define(geom, slot.ncomp(), rank),
                    });
                }
            }
            migrator.synthesize_missing(&presence, &mut level_state)?;
            state.push(level_state);
        }

        if self.collective.is_coordinator() {
            info!(
                dir = %dir.display(),
                version,
                time = header.time,
                levels = state.len(),
                "restart complete"
            );
        }
        Ok(RestartInfo {
            version,
            time: header.time,
            cpu_time,
        })
    }

    /// Accumulated CPU time, 15 significant figures.
    fn write_cpu_time(&self, dir: &Path, cpu_time: f64) -> Result<()> {
        let path = dir.join(CPU_TIME_FILE);
        let mut writer = self.storage.open_write(&path)?;
        writer
            .write_all(format!("{cpu_time:.14e}\n").as_bytes())
            .map_err(|e| PersistError::storage_with_source(&path, "failed to write CPU time", e))?;
        writer.finish()
    }

    /// A missing or unparsable CPU-time file restarts the accumulator at
    /// zero rather than failing the restore.
    fn read_cpu_time(&self, dir: &Path) -> f64 {
        let path = dir.join(CPU_TIME_FILE);
        let mut reader = match self.storage.open_read(&path) {
            Ok(reader) => reader,
            Err(_) => return 0.0,
        };
        let mut content = String::new();
        if reader.read_to_string(&mut content).is_err() {
            debug!(path = %path.display(), "unreadable CPU-time file, restarting at 0");
            return 0.0;
        }
        content.trim().parse().unwrap_or(0.0)
    }
}
