// src/collective.rs

//! Collective I/O coordination across the worker set.
//!
//! Every persistence operation follows the same discipline: the designated
//! coordinator writes all textual metadata and creates output directories,
//! every worker then meets at a barrier, and only then does bulk data
//! transfer begin with each worker touching exclusively its own partition.
//!
//! The worker set runs in lock-step: barriers and broadcasts block without
//! timeout, and a stalled worker stalls the whole operation. There is no
//! cancellation mechanism.

use std::sync::{Arc, Barrier};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::error::{PersistError, Result};
use crate::storage::StorageBackend;

/// A fixed group of cooperating workers.
///
/// Rank assignment is static for the lifetime of the run. Both collective
/// operations block until every member participates; failure to complete
/// either is an unrecoverable infrastructure fault.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Block until every worker has reached the same call site.
    fn barrier(&self) -> Result<()>;

    /// Broadcast a value from `root` to every worker. The root passes
    /// `Some(value)`; everyone else passes `None` and receives the root's
    /// value.
    fn broadcast_u32(&self, root: usize, value: Option<u32>) -> Result<u32>;
}

/// Single-process communicator: barriers and broadcasts are local no-ops.
pub struct SoloCommunicator;

impl Communicator for SoloCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn broadcast_u32(&self, _root: usize, value: Option<u32>) -> Result<u32> {
        value.ok_or_else(|| {
            PersistError::infrastructure("broadcast root did not supply a value")
        })
    }
}

/// Communicator for a group of worker threads in one process.
///
/// Used by multi-worker tests and single-node runs; an MPI-style
/// implementation would satisfy the same trait.
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
    /// Senders to every other rank; the slot for this rank is `None` so a
    /// departed peer is observable as a disconnected channel.
    senders: Vec<Option<Sender<u32>>>,
    receiver: Receiver<u32>,
}

impl ThreadCommunicator {
    /// Build communicators for a group of `size` workers; element `i` of the
    /// returned vector belongs to rank `i`.
    pub fn group(size: usize) -> Vec<Self> {
        assert!(size > 0, "worker group must not be empty");

        let barrier = Arc::new(Barrier::new(size));
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| unbounded::<u32>()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                rank,
                size,
                barrier: Arc::clone(&barrier),
                senders: senders
                    .iter()
                    .enumerate()
                    .map(|(i, s)| (i != rank).then(|| s.clone()))
                    .collect(),
                receiver,
            })
            .collect()
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }

    fn broadcast_u32(&self, root: usize, value: Option<u32>) -> Result<u32> {
        if self.rank == root {
            let v = value.ok_or_else(|| {
                PersistError::infrastructure("broadcast root did not supply a value")
            })?;
            for (rank, sender) in self.senders.iter().enumerate() {
                if let Some(sender) = sender {
                    sender.send(v).map_err(|e| {
                        PersistError::infrastructure_with_source(
                            format!("broadcast to rank {rank} could not complete"),
                            e,
                        )
                    })?;
                }
            }
            Ok(v)
        } else {
            self.receiver.recv().map_err(|e| {
                PersistError::infrastructure_with_source(
                    format!("rank {} lost the broadcast channel", self.rank),
                    e,
                )
            })
        }
    }
}

/// Coordinator-gated collective operations.
///
/// Exactly one worker holds the coordinator role for the lifetime of the
/// run; the assignment is static, not elected.
pub struct Collective {
    comm: Arc<dyn Communicator>,
    coordinator: usize,
}

impl Collective {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            comm,
            coordinator: 0,
        }
    }

    /// A collective for a single-process run.
    pub fn solo() -> Self {
        Self::new(Arc::new(SoloCommunicator))
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn num_workers(&self) -> usize {
        self.comm.size()
    }

    pub fn is_coordinator(&self) -> bool {
        self.comm.rank() == self.coordinator
    }

    pub fn barrier(&self) -> Result<()> {
        self.comm.barrier()
    }

    pub fn broadcast_u32(&self, value: Option<u32>) -> Result<u32> {
        self.comm.broadcast_u32(self.coordinator, value)
    }

    /// Run `action` on the coordinator only; a no-op everywhere else.
    pub fn on_coordinator<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.is_coordinator() {
            action()?;
        }
        Ok(())
    }

    /// The coordinator-gated collective step: the coordinator runs `action`,
    /// then every worker meets at a barrier. No worker proceeds past this
    /// call before the action has completed.
    pub fn coordinator_step<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.on_coordinator(action)?;
        self.barrier()
    }

    /// Create `path` and all missing parents. Invoked only by the
    /// coordinator; failure for any reason other than pre-existence is an
    /// unrecoverable infrastructure fault.
    pub fn ensure_directory(&self, storage: &dyn StorageBackend, path: &std::path::Path) -> Result<()> {
        storage.create_dir_all(path).map_err(|e| {
            PersistError::infrastructure_with_source(
                format!("failed to create output directory '{}'", path.display()),
                e,
            )
        })
    }
}
