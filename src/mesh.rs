// src/mesh.rs

//! Geometry data model for the block-structured mesh hierarchy.
//!
//! The mesh itself (box decomposition, ownership, regridding) is owned by an
//! external collaborator; this crate only needs enough geometry to describe
//! what it persists: index-space boxes, physical bounds, and per-level grid
//! metadata.

use serde::{Deserialize, Serialize};

use crate::error::{PersistError, Result};

/// Number of spatial dimensions.
pub const SPACEDIM: usize = 3;

/// An axis-aligned box in integer index space (cell-centered, inclusive
/// bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntBox {
    pub lo: [i64; SPACEDIM],
    pub hi: [i64; SPACEDIM],
}

impl IntBox {
    pub fn new(lo: [i64; SPACEDIM], hi: [i64; SPACEDIM]) -> Self {
        Self { lo, hi }
    }

    /// Length in cells along dimension `d`.
    pub fn length(&self, d: usize) -> i64 {
        self.hi[d] - self.lo[d] + 1
    }

    /// Total number of cells in the box.
    pub fn num_cells(&self) -> usize {
        (0..SPACEDIM).map(|d| self.length(d) as usize).product()
    }

    /// Whether this box fits entirely inside `other`.
    pub fn contained_in(&self, other: &IntBox) -> bool {
        (0..SPACEDIM).all(|d| self.lo[d] >= other.lo[d] && self.hi[d] <= other.hi[d])
    }

    /// The box covering this one on a grid coarsened by `ratio`.
    pub fn coarsened(&self, ratio: u32) -> IntBox {
        let r = i64::from(ratio);
        let mut lo = [0; SPACEDIM];
        let mut hi = [0; SPACEDIM];
        for d in 0..SPACEDIM {
            lo[d] = self.lo[d].div_euclid(r);
            hi[d] = self.hi[d].div_euclid(r);
        }
        IntBox::new(lo, hi)
    }

    /// Physical bounds of the box given a cell size and problem origin.
    pub fn to_real(&self, cell_size: &[f64; SPACEDIM], prob_lo: &[f64; SPACEDIM]) -> RealBox {
        let mut lo = [0.0; SPACEDIM];
        let mut hi = [0.0; SPACEDIM];
        for d in 0..SPACEDIM {
            lo[d] = prob_lo[d] + self.lo[d] as f64 * cell_size[d];
            hi[d] = prob_lo[d] + (self.hi[d] + 1) as f64 * cell_size[d];
        }
        RealBox { lo, hi }
    }
}

/// An axis-aligned box in physical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealBox {
    pub lo: [f64; SPACEDIM],
    pub hi: [f64; SPACEDIM],
}

/// Per-refinement-level grid metadata.
///
/// `owners` assigns each box in `boxes` to the worker rank that holds its
/// data; the two vectors are parallel.
#[derive(Debug, Clone)]
pub struct LevelGeometry {
    /// Index-space domain covered by this level.
    pub domain: IntBox,
    /// Box decomposition of the level.
    pub boxes: Vec<IntBox>,
    /// Owner rank per box.
    pub owners: Vec<usize>,
    /// Cell size per dimension.
    pub cell_size: [f64; SPACEDIM],
    /// Refinement ratio to the next coarser level (unused at level 0).
    pub ref_ratio: u32,
    /// Step count at this level.
    pub steps: u64,
}

impl LevelGeometry {
    /// Indices of the boxes owned by `rank`.
    pub fn owned_boxes(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |(_, &o)| o == rank)
            .map(|(i, _)| i)
    }

    /// Total number of cells across all boxes.
    pub fn total_cells(&self) -> usize {
        self.boxes.iter().map(IntBox::num_cells).sum()
    }
}

/// The full refinement hierarchy plus problem-wide geometry.
///
/// Level 0 is coarsest and always exists; each finer level's domain must nest
/// inside its parent per the refinement ratio.
#[derive(Debug, Clone)]
pub struct MeshHierarchy {
    pub levels: Vec<LevelGeometry>,
    pub prob_lo: [f64; SPACEDIM],
    pub prob_hi: [f64; SPACEDIM],
    /// Coordinate-system tag (0 = Cartesian).
    pub coord: i32,
}

impl MeshHierarchy {
    /// Index of the finest level.
    pub fn finest_level(&self) -> usize {
        self.levels.len() - 1
    }

    /// Validate the structural invariants the persistence layer relies on.
    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(PersistError::config("mesh hierarchy must have level 0"));
        }
        for (lev, geom) in self.levels.iter().enumerate() {
            if geom.boxes.is_empty() {
                return Err(PersistError::config(format!(
                    "level {lev} has an empty box list"
                )));
            }
            if geom.boxes.len() != geom.owners.len() {
                return Err(PersistError::config(format!(
                    "level {lev}: {} boxes but {} owner entries",
                    geom.boxes.len(),
                    geom.owners.len()
                )));
            }
            for (i, b) in geom.boxes.iter().enumerate() {
                if !b.contained_in(&geom.domain) {
                    return Err(PersistError::config(format!(
                        "level {lev} box {i} extends outside the level domain"
                    )));
                }
            }
            if lev > 0 {
                if geom.ref_ratio == 0 {
                    return Err(PersistError::config(format!(
                        "level {lev} has a zero refinement ratio"
                    )));
                }
                let coarse = &self.levels[lev - 1].domain;
                if !geom.domain.coarsened(geom.ref_ratio).contained_in(coarse) {
                    return Err(PersistError::config(format!(
                        "level {lev} domain does not nest inside level {} per \
                         refinement ratio {}",
                        lev - 1,
                        geom.ref_ratio
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(n: i64) -> IntBox {
        IntBox::new([0, 0, 0], [n - 1, n - 1, n - 1])
    }

    #[test]
    fn test_box_lengths_and_cells() {
        let b = IntBox::new([0, 0, 0], [3, 1, 0]);
        assert_eq!(b.length(0), 4);
        assert_eq!(b.length(1), 2);
        assert_eq!(b.length(2), 1);
        assert_eq!(b.num_cells(), 8);
    }

    #[test]
    fn test_box_containment() {
        let outer = unit_box(8);
        let inner = IntBox::new([2, 2, 2], [5, 5, 5]);
        assert!(inner.contained_in(&outer));
        assert!(!outer.contained_in(&inner));
    }

    #[test]
    fn test_box_to_real() {
        let b = IntBox::new([2, 0, 0], [3, 1, 1]);
        let r = b.to_real(&[0.5, 0.5, 0.5], &[0.0, 0.0, 0.0]);
        assert_eq!(r.lo[0], 1.0);
        assert_eq!(r.hi[0], 2.0);
        assert_eq!(r.hi[1], 1.0);
    }

    #[test]
    fn test_owned_boxes() {
        let geom = LevelGeometry {
            domain: unit_box(8),
            boxes: vec![unit_box(4), unit_box(4), unit_box(4)],
            owners: vec![0, 1, 0],
            cell_size: [1.0; SPACEDIM],
            ref_ratio: 2,
            steps: 0,
        };
        let mine: Vec<usize> = geom.owned_boxes(0).collect();
        assert_eq!(mine, vec![0, 2]);
        let theirs: Vec<usize> = geom.owned_boxes(1).collect();
        assert_eq!(theirs, vec![1]);
    }

    fn level(domain: IntBox, ref_ratio: u32) -> LevelGeometry {
        LevelGeometry {
            domain,
            boxes: vec![domain],
            owners: vec![0],
            cell_size: [1.0; SPACEDIM],
            ref_ratio,
            steps: 0,
        }
    }

    #[test]
    fn test_coarsened_box() {
        let fine = IntBox::new([0, 0, 0], [31, 31, 31]);
        assert_eq!(fine.coarsened(2), IntBox::new([0, 0, 0], [15, 15, 15]));
        let offset = IntBox::new([8, 8, 8], [15, 15, 15]);
        assert_eq!(offset.coarsened(4), IntBox::new([2, 2, 2], [3, 3, 3]));
    }

    #[test]
    fn test_hierarchy_validate_accepts_nested_levels() {
        let hier = MeshHierarchy {
            levels: vec![
                level(unit_box(16), 2),
                level(IntBox::new([0, 0, 0], [31, 31, 31]), 2),
            ],
            prob_lo: [0.0; SPACEDIM],
            prob_hi: [2.0; SPACEDIM],
            coord: 0,
        };
        hier.validate().unwrap();
    }

    #[test]
    fn test_hierarchy_validate_rejects_non_nested_level() {
        // Level 1 spans 16x the refined extent of level 0.
        let hier = MeshHierarchy {
            levels: vec![
                level(unit_box(4), 2),
                level(IntBox::new([0, 0, 0], [127, 127, 127]), 2),
            ],
            prob_lo: [0.0; SPACEDIM],
            prob_hi: [2.0; SPACEDIM],
            coord: 0,
        };
        let err = hier.validate().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_hierarchy_validate_rejects_zero_ratio() {
        let hier = MeshHierarchy {
            levels: vec![
                level(unit_box(4), 2),
                level(IntBox::new([0, 0, 0], [7, 7, 7]), 0),
            ],
            prob_lo: [0.0; SPACEDIM],
            prob_hi: [2.0; SPACEDIM],
            coord: 0,
        };
        assert!(hier.validate().is_err());
    }

    #[test]
    fn test_hierarchy_validate_rejects_empty() {
        let hier = MeshHierarchy {
            levels: vec![],
            prob_lo: [0.0; SPACEDIM],
            prob_hi: [1.0; SPACEDIM],
            coord: 0,
        };
        assert!(hier.validate().is_err());
    }

    #[test]
    fn test_hierarchy_validate_rejects_stray_box() {
        let geom = LevelGeometry {
            domain: unit_box(4),
            boxes: vec![IntBox::new([0, 0, 0], [7, 3, 3])],
            owners: vec![0],
            cell_size: [1.0; SPACEDIM],
            ref_ratio: 2,
            steps: 0,
        };
        let hier = MeshHierarchy {
            levels: vec![geom],
            prob_lo: [0.0; SPACEDIM],
            prob_hi: [4.0; SPACEDIM],
            coord: 0,
        };
        let err = hier.validate().unwrap_err();
        assert!(err.is_config());
    }
}
