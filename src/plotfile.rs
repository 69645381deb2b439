// src/plotfile.rs

//! Plot-file export orchestration.
//!
//! A plot file is a visualization-oriented export, not a restorable
//! snapshot. Full plots carry the configured state components plus derived
//! variables; small plots carry a reduced raw-variable set and append the
//! volume-fraction pruning tolerance to each level block of the header.
//!
//! Every export follows the collective protocol: the coordinator writes the
//! textual metadata and creates directories, all workers meet at a barrier,
//! then every worker writes its own bulk shards.

use std::path::Path;

use tracing::info;

use crate::bulk::{pack, BulkFieldWriter, CELL_FILE};
use crate::checkpoint::check_state_levels;
use crate::collective::Collective;
use crate::config::{PersistConfig, VarSet};
use crate::error::{PersistError, Result};
use crate::header::{write_header_file, PlotFileHeader};
use crate::job_info::write_job_info;
use crate::mesh::MeshHierarchy;
use crate::select::{build_plan, SelectionPlan};
use crate::state::{DeriveRegistry, LevelState, StateSlotDescriptor};
use crate::storage::StorageBackend;

pub struct PlotFileWriter<'a> {
    storage: &'a dyn StorageBackend,
    collective: &'a Collective,
    config: &'a PersistConfig,
}

impl<'a> PlotFileWriter<'a> {
    pub fn new(
        storage: &'a dyn StorageBackend,
        collective: &'a Collective,
        config: &'a PersistConfig,
    ) -> Self {
        Self {
            storage,
            collective,
            config,
        }
    }

    /// Write a full plot file: configured raw components plus derived
    /// variables.
    pub fn write_plot_file(
        &self,
        dir: &Path,
        hier: &MeshHierarchy,
        state: &[LevelState],
        slots: &[StateSlotDescriptor],
        registry: &DeriveRegistry,
        time: f64,
    ) -> Result<()> {
        let plan = build_plan(
            slots,
            registry,
            &self.config.plot.plot_vars,
            &self.config.plot.derived_plot_set(),
        );
        self.write_with_plan(dir, hier, state, registry, time, &plan, None)
    }

    /// Write a small plot file: the reduced raw-variable set only, with the
    /// pruning tolerance appended to each level block.
    pub fn write_small_plot_file(
        &self,
        dir: &Path,
        hier: &MeshHierarchy,
        state: &[LevelState],
        slots: &[StateSlotDescriptor],
        registry: &DeriveRegistry,
        time: f64,
    ) -> Result<()> {
        let plan = build_plan(
            slots,
            registry,
            &self.config.plot.small_plot_vars,
            &VarSet::none(),
        );
        self.write_with_plan(
            dir,
            hier,
            state,
            registry,
            time,
            &plan,
            Some(self.config.plot.vfrac_eps),
        )
    }

    fn write_with_plan(
        &self,
        dir: &Path,
        hier: &MeshHierarchy,
        state: &[LevelState],
        registry: &DeriveRegistry,
        time: f64,
        plan: &SelectionPlan,
        tolerance: Option<f64>,
    ) -> Result<()> {
        // Exporting zero variables is a configuration error, raised before
        // anything touches storage.
        if plan.is_empty() {
            return Err(PersistError::config(format!(
                "no variables selected for plot file '{}'",
                dir.display()
            )));
        }
        hier.validate()?;
        check_state_levels(state, hier)?;

        let header = PlotFileHeader::from_hierarchy(
            &self.config.plot.file_type,
            hier,
            plan.names.clone(),
            time,
            tolerance,
        );

        self.collective.coordinator_step(|| {
            self.collective.ensure_directory(self.storage, dir)?;
            write_header_file(self.storage, dir, &header)?;
            write_job_info(
                self.storage,
                dir,
                &self.config.job_name,
                self.collective.num_workers(),
                hier,
            )
        })?;

        let writer = BulkFieldWriter::new(self.storage, self.collective);
        for (lev, geom) in hier.levels.iter().enumerate() {
            let level_dir = dir.join(format!("Level_{lev}"));
            self.collective
                .coordinator_step(|| self.collective.ensure_directory(self.storage, &level_dir))?;

            let packed = pack(geom, &state[lev], plan, registry, time, self.collective.rank())?;
            writer.write(&packed, geom, &level_dir.join(CELL_FILE))?;
        }

        if self.collective.is_coordinator() {
            info!(
                dir = %dir.display(),
                variables = plan.num_components(),
                levels = hier.levels.len(),
                small = tolerance.is_some(),
                "plot file written"
            );
        }
        Ok(())
    }
}
