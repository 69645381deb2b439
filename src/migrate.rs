// src/migrate.rs

//! State-slot migration between checkpoint format versions.
//!
//! When the set of tracked slots has grown since a checkpoint was written,
//! the restored run must reconcile "what existed in the old run" with what
//! the current build expects. Slots that cannot be on disk are synthesized
//! by copying the immediately preceding slot's data. That copy is a
//! legacy-compatibility shim, not an interpolation policy: it assumes slot
//! k's best available proxy is slot k-1's current value, and multi-slot gaps
//! fall back one neighbor at a time.

use crate::error::{PersistError, Result};
use crate::state::{LevelState, StateSlotDescriptor};

/// Decides which slots a checkpoint of a known version contains, and fills
/// in the ones it does not.
pub struct Migrator {
    version: u32,
}

impl Migrator {
    /// Create a migrator for a negotiated checkpoint version.
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// One boolean per tracked slot: true if the checkpoint being restored
    /// is expected to contain that slot's data on disk.
    ///
    /// Every slot is present by default. A slot is absent when it is never
    /// persisted (recomputed on restart) or when the checkpoint predates its
    /// introduction.
    ///
    /// # Errors
    ///
    /// Slot 0 has no predecessor to inherit from, so a slot set that marks
    /// it absent is a configuration error.
    pub fn compute_presence(&self, slots: &[StateSlotDescriptor]) -> Result<Vec<bool>> {
        let presence: Vec<bool> = slots
            .iter()
            .map(|slot| slot.persisted && slot.introduced_in <= self.version)
            .collect();

        if presence.first() == Some(&false) {
            return Err(PersistError::config(format!(
                "slot 0 ('{}') cannot be absent from a checkpoint: it has no \
                 predecessor to inherit from",
                slots[0].name
            )));
        }

        Ok(presence)
    }

    /// Populate every absent slot's instance by copying its immediate
    /// predecessor, at the predecessor's definition time.
    ///
    /// `level_state.slots` must already hold defined instances for all
    /// present slots; entries for absent slots are overwritten.
    pub fn synthesize_missing(
        &self,
        presence: &[bool],
        level_state: &mut LevelState,
    ) -> Result<()> {
        for k in 0..presence.len() {
            if presence[k] {
                continue;
            }
            if k == 0 {
                return Err(PersistError::config(
                    "slot 0 cannot be synthesized: it has no predecessor",
                ));
            }
            level_state.slots[k] = level_state.slots[k - 1].clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{IntBox, LevelGeometry, SPACEDIM};
    use crate::state::{FieldArray, IndexType, StateSlotInstance};

    fn slot(name: &str) -> StateSlotDescriptor {
        StateSlotDescriptor::new(name, IndexType::Cell, vec![format!("{name}_c0")])
    }

    fn geom() -> LevelGeometry {
        LevelGeometry {
            domain: IntBox::new([0, 0, 0], [3, 3, 3]),
            boxes: vec![IntBox::new([0, 0, 0], [3, 3, 3])],
            owners: vec![0],
            cell_size: [1.0; SPACEDIM],
            ref_ratio: 2,
            steps: 0,
        }
    }

    fn instance(geom: &LevelGeometry, fill: f64, time: f64) -> StateSlotInstance {
        let mut data = FieldArray::define(geom, 1, 0);
        data.shard_mut(0).unwrap().fill(fill);
        StateSlotInstance { time, data }
    }

    #[test]
    fn test_all_present_by_default() {
        let migrator = Migrator::new(0);
        let slots = vec![slot("state"), slot("scalars")];
        assert_eq!(migrator.compute_presence(&slots).unwrap(), vec![true, true]);
    }

    #[test]
    fn test_unpersisted_slot_absent_regardless_of_version() {
        let migrator = Migrator::new(99);
        let slots = vec![slot("state"), slot("work_estimate").not_persisted()];
        assert_eq!(
            migrator.compute_presence(&slots).unwrap(),
            vec![true, false]
        );
    }

    #[test]
    fn test_newer_slot_absent_from_old_checkpoint() {
        let migrator = Migrator::new(0);
        let slots = vec![slot("state"), slot("scalars"), slot("body").introduced_in(1)];
        assert_eq!(
            migrator.compute_presence(&slots).unwrap(),
            vec![true, true, false]
        );

        // The same slot is present once the checkpoint is new enough.
        let migrator = Migrator::new(1);
        assert_eq!(
            migrator.compute_presence(&slots).unwrap(),
            vec![true, true, true]
        );
    }

    #[test]
    fn test_slot_zero_must_never_be_absent() {
        let migrator = Migrator::new(0);
        let slots = vec![slot("state").not_persisted(), slot("scalars")];
        let err = migrator.compute_presence(&slots).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_synthesize_copies_predecessor_bit_identical() {
        let geom = geom();
        let migrator = Migrator::new(0);
        let mut state = LevelState {
            slots: vec![
                instance(&geom, 1.25, 3.5),
                instance(&geom, 0.0, 0.0), // placeholder for the absent slot
            ],
        };

        migrator
            .synthesize_missing(&[true, false], &mut state)
            .unwrap();

        assert_eq!(state.slots[1], state.slots[0]);
        assert_eq!(state.slots[1].time, 3.5);
        assert_eq!(
            state.slots[1].data.shard(0).unwrap(),
            state.slots[0].data.shard(0).unwrap()
        );
    }

    #[test]
    fn test_synthesize_multi_slot_gap_falls_back_one_step_at_a_time() {
        let geom = geom();
        let migrator = Migrator::new(0);
        let mut state = LevelState {
            slots: vec![
                instance(&geom, 2.0, 1.0),
                instance(&geom, 0.0, 0.0),
                instance(&geom, 0.0, 0.0),
            ],
        };

        migrator
            .synthesize_missing(&[true, false, false], &mut state)
            .unwrap();

        // Slot 1 inherits slot 0, then slot 2 inherits the synthesized
        // slot 1.
        assert_eq!(state.slots[1], state.slots[0]);
        assert_eq!(state.slots[2], state.slots[1]);
    }

    #[test]
    fn test_synthesize_rejects_absent_slot_zero() {
        let geom = geom();
        let migrator = Migrator::new(0);
        let mut state = LevelState {
            slots: vec![instance(&geom, 1.0, 0.0)],
        };
        assert!(migrator.synthesize_missing(&[false], &mut state).is_err());
    }
}
