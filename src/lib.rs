// src/lib.rs

//! AMR I/O - Checkpoint and Plot-File Persistence
//!
//! This crate provides the persistence layer for block-structured AMR
//! simulations: restorable checkpoints, visualization-oriented plot files,
//! checkpoint format versioning with slot migration, and the collective
//! I/O discipline that coordinates them across a distributed worker set.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{PersistConfig, PlotConfig, StorageConfig, VarSet};
pub use error::{PersistError, Result};
pub use storage::{LocalStorage, StorageBackend, StorageReader, StorageWriter};

pub mod mesh;
pub use mesh::{IntBox, LevelGeometry, MeshHierarchy, RealBox, SPACEDIM};

pub mod state;
pub use state::{
    DeriveContext, DeriveRegistry, FieldArray, IndexType, LevelState, StateSlotDescriptor,
    StateSlotInstance,
};

pub mod collective;
pub use collective::{Collective, Communicator, SoloCommunicator, ThreadCommunicator};

pub mod version;
pub use version::{VersionNegotiator, CURRENT_CHECKPOINT_VERSION};

pub mod migrate;
pub use migrate::Migrator;

pub mod select;
pub use select::{build_plan, checkpoint_plan, SelectionPlan};

pub mod header;
pub use header::{LevelBlock, PlotFileHeader};

pub mod bulk;
pub use bulk::{pack, BulkFieldReader, BulkFieldWriter};

pub mod job_info;
pub mod plotfile;
pub use plotfile::PlotFileWriter;

pub mod checkpoint;
pub use checkpoint::{CheckpointManager, RestartInfo};
