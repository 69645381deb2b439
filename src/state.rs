// src/state.rs

//! Field state data model: tracked state slots, their live per-level data,
//! and the derived-variable registry.
//!
//! Slot descriptors are fixed at program start by the physics engine; the
//! persistence core only reads existing instances, or writes freshly
//! synthesized ones during checkpoint migration.

use std::collections::BTreeMap;

use crate::error::{PersistError, Result};
use crate::mesh::{IntBox, LevelGeometry};

/// Spatial index type of a state slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Cell-centered data. Only cell-centered slots are exported to plots.
    Cell,
    /// Node-centered data.
    Node,
}

/// Describes one tracked category of field data.
#[derive(Debug, Clone)]
pub struct StateSlotDescriptor {
    /// Slot name, e.g. "state" or "work_estimate".
    pub name: String,
    pub index_type: IndexType,
    /// Registered component names, in component order.
    pub components: Vec<String>,
    /// Whether this slot's data is written to checkpoints. Slots that are
    /// recomputed on restart (e.g. load-balancing cost estimates) set this
    /// to false.
    pub persisted: bool,
    /// Checkpoint format version that introduced this slot. Checkpoints
    /// older than this cannot contain its data.
    pub introduced_in: u32,
}

impl StateSlotDescriptor {
    pub fn new(
        name: impl Into<String>,
        index_type: IndexType,
        components: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            index_type,
            components,
            persisted: true,
            introduced_in: 0,
        }
    }

    /// Mark this slot as recomputed-on-restart rather than persisted.
    #[must_use]
    pub fn not_persisted(mut self) -> Self {
        self.persisted = false;
        self
    }

    /// Set the format version that introduced this slot.
    #[must_use]
    pub fn introduced_in(mut self, version: u32) -> Self {
        self.introduced_in = version;
        self
    }

    /// Number of field components in this slot.
    pub fn ncomp(&self) -> usize {
        self.components.len()
    }
}

/// A distributed array of field values over one level's box decomposition.
///
/// Each worker holds only the shards for the boxes it owns; a shard stores
/// `ncomp * ncells` values, component-major, with no ghost cells. Shards for
/// boxes owned by other ranks are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldArray {
    ncomp: usize,
    boxes: Vec<IntBox>,
    shards: BTreeMap<usize, Vec<f64>>,
}

impl FieldArray {
    /// Define a zero-filled array over `geom` holding `rank`'s boxes.
    pub fn define(geom: &LevelGeometry, ncomp: usize, rank: usize) -> Self {
        let mut shards = BTreeMap::new();
        for ibox in geom.owned_boxes(rank) {
            let ncells = geom.boxes[ibox].num_cells();
            shards.insert(ibox, vec![0.0; ncomp * ncells]);
        }
        Self {
            ncomp,
            boxes: geom.boxes.clone(),
            shards,
        }
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn boxes(&self) -> &[IntBox] {
        &self.boxes
    }

    /// Owned shard indices, in ascending box order.
    pub fn owned(&self) -> impl Iterator<Item = usize> + '_ {
        self.shards.keys().copied()
    }

    pub fn shard(&self, ibox: usize) -> Option<&[f64]> {
        self.shards.get(&ibox).map(Vec::as_slice)
    }

    pub fn shard_mut(&mut self, ibox: usize) -> Option<&mut [f64]> {
        self.shards.get_mut(&ibox).map(Vec::as_mut_slice)
    }

    /// One component of one owned shard.
    pub fn component(&self, ibox: usize, comp: usize) -> Option<&[f64]> {
        let ncells = self.boxes[ibox].num_cells();
        self.shards
            .get(&ibox)
            .map(|s| &s[comp * ncells..(comp + 1) * ncells])
    }

    /// Copy component `src_comp` of `src` into component `dst_comp` of
    /// `self`, shard by shard. Both arrays must share a box decomposition
    /// and ownership.
    pub fn copy_component(
        &mut self,
        dst_comp: usize,
        src: &FieldArray,
        src_comp: usize,
    ) -> Result<()> {
        if self.boxes != src.boxes {
            return Err(PersistError::config(
                "cannot copy components across differing box decompositions",
            ));
        }
        for (&ibox, dst_shard) in self.shards.iter_mut() {
            let ncells = self.boxes[ibox].num_cells();
            let src_shard = src.shards.get(&ibox).ok_or_else(|| {
                PersistError::config(format!("source array does not own box {ibox}"))
            })?;
            let from = &src_shard[src_comp * ncells..(src_comp + 1) * ncells];
            dst_shard[dst_comp * ncells..(dst_comp + 1) * ncells].copy_from_slice(from);
        }
        Ok(())
    }
}

/// Live data for one state slot at one refinement level.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSlotInstance {
    /// Simulation time at which the data was last defined.
    pub time: f64,
    pub data: FieldArray,
}

/// The ordered slot instances for one level, indexed by slot ordinal.
#[derive(Debug, Clone)]
pub struct LevelState {
    pub slots: Vec<StateSlotInstance>,
}

/// Context handed to a derived-variable compute function.
pub struct DeriveContext<'a> {
    pub geom: &'a LevelGeometry,
    pub state: &'a LevelState,
    pub time: f64,
    pub rank: usize,
}

type DeriveFn = dyn Fn(&DeriveContext<'_>) -> Result<FieldArray> + Send + Sync;

/// One entry in the derived-variable registry.
pub struct DeriveRec {
    name: String,
    components: Vec<String>,
    func: Box<DeriveFn>,
}

impl DeriveRec {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Component names of the derived output.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn num_derive(&self) -> usize {
        self.components.len()
    }
}

/// Registration-ordered registry mapping derived-variable names to compute
/// capabilities. Derived data is computed on demand and never persisted.
#[derive(Default)]
pub struct DeriveRegistry {
    recs: Vec<DeriveRec>,
}

impl DeriveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, components: Vec<String>, func: F)
    where
        F: Fn(&DeriveContext<'_>) -> Result<FieldArray> + Send + Sync + 'static,
    {
        self.recs.push(DeriveRec {
            name: name.into(),
            components,
            func: Box::new(func),
        });
    }

    /// Records in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &DeriveRec> {
        self.recs.iter()
    }

    pub fn get(&self, name: &str) -> Option<&DeriveRec> {
        self.recs.iter().find(|r| r.name == name)
    }

    /// Invoke the compute function for `name`.
    ///
    /// The output must carry exactly the registered number of components.
    pub fn derive(&self, name: &str, ctx: &DeriveContext<'_>) -> Result<FieldArray> {
        let rec = self
            .get(name)
            .ok_or_else(|| PersistError::config(format!("unknown derived variable '{name}'")))?;
        let out = (rec.func)(ctx)?;
        if out.ncomp() != rec.num_derive() {
            return Err(PersistError::config(format!(
                "derived variable '{name}' produced {} components, registered {}",
                out.ncomp(),
                rec.num_derive()
            )));
        }
        Ok(out)
    }
}
