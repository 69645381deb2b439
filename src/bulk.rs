// src/bulk.rs

//! Bulk field payload: packing and collective transfer of distributed
//! arrays.
//!
//! The payload layout is fixed little-endian so every worker can compute its
//! shard offsets independently and write them with positioned writes, with
//! no coordination beyond the barriers of the collective protocol:
//!
//! ```text
//! offset  0   magic "ABLK"
//! offset  4   payload format version (u32)
//! offset  8   component count (u32)
//! offset 12   box count (u32)
//! offset 16   xxhash64 of the data region (u64, patched last)
//! offset 24   box records, 48 bytes each (lo[3], hi[3] as i64)
//! then        per-box shards in box order, component-major f64 cells
//! ```
//!
//! The checksum is written as zero up front and patched by the coordinator
//! after every shard has landed.

use std::hash::Hasher;
use std::io::Write;
use std::path::Path;

use tracing::debug;
use twox_hash::XxHash64;

use crate::collective::Collective;
use crate::error::{PersistError, Result};
use crate::mesh::{IntBox, LevelGeometry, SPACEDIM};
use crate::select::SelectionPlan;
use crate::state::{DeriveContext, DeriveRegistry, FieldArray, LevelState};
use crate::storage::StorageBackend;

/// Name of the bulk payload file inside a `Level_<n>` directory.
pub const CELL_FILE: &str = "Cell";

const MAGIC: &[u8; 4] = b"ABLK";
const BULK_FORMAT_VERSION: u32 = 1;
const CHECKSUM_OFFSET: u64 = 16;
const BOX_RECORDS_OFFSET: u64 = 24;
const BOX_RECORD_SIZE: u64 = (2 * SPACEDIM as u64) * 8;

/// Byte offset of the data region for a file with `nbox` box records.
fn data_offset(nbox: usize) -> u64 {
    BOX_RECORDS_OFFSET + nbox as u64 * BOX_RECORD_SIZE
}

/// Byte offset of box `ibox`'s shard.
fn shard_offset(boxes: &[IntBox], ncomp: usize, ibox: usize) -> u64 {
    let preceding: u64 = boxes[..ibox]
        .iter()
        .map(|b| (b.num_cells() * ncomp * 8) as u64)
        .sum();
    data_offset(boxes.len()) + preceding
}

/// Total file size for one payload.
fn total_size(boxes: &[IntBox], ncomp: usize) -> u64 {
    shard_offset(boxes, ncomp, boxes.len())
}

/// Build one logically contiguous array for export: the plan's raw
/// components copied verbatim from the slot instances, then each derived
/// variable computed once and concatenated.
pub fn pack(
    geom: &LevelGeometry,
    state: &LevelState,
    plan: &SelectionPlan,
    registry: &DeriveRegistry,
    time: f64,
    rank: usize,
) -> Result<FieldArray> {
    let mut packed = FieldArray::define(geom, plan.num_components(), rank);
    let mut dst_comp = 0;

    for &(slot_idx, comp_idx) in &plan.raw {
        let slot = state.slots.get(slot_idx).ok_or_else(|| {
            PersistError::config(format!("selection references undefined slot {slot_idx}"))
        })?;
        packed.copy_component(dst_comp, &slot.data, comp_idx)?;
        dst_comp += 1;
    }

    let ctx = DeriveContext {
        geom,
        state,
        time,
        rank,
    };
    for (name, ncomp) in &plan.derived {
        let computed = registry.derive(name, &ctx)?;
        for comp_idx in 0..*ncomp {
            packed.copy_component(dst_comp, &computed, comp_idx)?;
            dst_comp += 1;
        }
    }

    Ok(packed)
}

fn encode_header(ncomp: usize, boxes: &[IntBox], checksum: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(data_offset(boxes.len()) as usize);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&BULK_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(ncomp as u32).to_le_bytes());
    out.extend_from_slice(&(boxes.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    for b in boxes {
        for v in b.lo.iter().chain(b.hi.iter()) {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

struct BulkHeader {
    ncomp: usize,
    boxes: Vec<IntBox>,
    checksum: u64,
}

fn decode_header(storage: &dyn StorageBackend, path: &Path) -> Result<BulkHeader> {
    let mut reader = storage.open_read(path)?;
    let fixed = reader.read_range(0, BOX_RECORDS_OFFSET as usize)?;

    if &fixed[0..4] != MAGIC {
        return Err(PersistError::storage(
            path,
            "not a bulk field payload (bad magic)",
        ));
    }
    let version = u32::from_le_bytes(fixed[4..8].try_into().unwrap());
    if version != BULK_FORMAT_VERSION {
        return Err(PersistError::storage(
            path,
            format!("unsupported bulk payload version {version}"),
        ));
    }
    let ncomp = u32::from_le_bytes(fixed[8..12].try_into().unwrap()) as usize;
    let nbox = u32::from_le_bytes(fixed[12..16].try_into().unwrap()) as usize;
    let checksum = u64::from_le_bytes(fixed[16..24].try_into().unwrap());

    let records = reader.read_range(BOX_RECORDS_OFFSET, nbox * BOX_RECORD_SIZE as usize)?;
    let boxes = records
        .chunks_exact(BOX_RECORD_SIZE as usize)
        .map(|rec| {
            let mut vals = [0i64; 2 * SPACEDIM];
            for (i, chunk) in rec.chunks_exact(8).enumerate() {
                vals[i] = i64::from_le_bytes(chunk.try_into().unwrap());
            }
            IntBox::new(
                [vals[0], vals[1], vals[2]],
                [vals[3], vals[4], vals[5]],
            )
        })
        .collect();

    Ok(BulkHeader {
        ncomp,
        boxes,
        checksum,
    })
}

fn hash_data_region(storage: &dyn StorageBackend, path: &Path, start: u64) -> Result<u64> {
    let mut reader = storage.open_read(path)?;
    let len = reader.size().saturating_sub(start) as usize;
    let data = reader.read_range(start, len)?;
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&data);
    Ok(hasher.finish())
}

/// Collective writer for per-level bulk payloads.
pub struct BulkFieldWriter<'a> {
    storage: &'a dyn StorageBackend,
    collective: &'a Collective,
}

impl<'a> BulkFieldWriter<'a> {
    pub fn new(storage: &'a dyn StorageBackend, collective: &'a Collective) -> Self {
        Self {
            storage,
            collective,
        }
    }

    /// Write `array` to `path` collectively.
    ///
    /// The coordinator writes the header and sizes the file; after the
    /// barrier every worker writes only the shards it owns, at offsets
    /// determined by the shared box decomposition; a final coordinator step
    /// patches the checksum.
    pub fn write(&self, array: &FieldArray, geom: &LevelGeometry, path: &Path) -> Result<()> {
        if array.boxes() != geom.boxes.as_slice() {
            return Err(PersistError::config(
                "array box decomposition does not match the level geometry",
            ));
        }
        let ncomp = array.ncomp();
        let boxes = geom.boxes.clone();
        let size = total_size(&boxes, ncomp);

        self.collective.coordinator_step(|| {
            let header = encode_header(ncomp, &boxes, 0);
            let mut writer = self.storage.open_write(path)?;
            writer.write_all(&header).map_err(|e| {
                PersistError::storage_with_source(path, "failed to write bulk header", e)
            })?;
            writer.finish()?;
            self.storage.set_len(path, size)
        })?;

        for ibox in array.owned().collect::<Vec<_>>() {
            let shard = match array.shard(ibox) {
                Some(shard) => shard,
                None => continue,
            };
            let mut bytes = Vec::with_capacity(shard.len() * 8);
            for v in shard {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            self.storage
                .write_at(path, shard_offset(&boxes, ncomp, ibox), &bytes)?;
        }
        self.collective.barrier()?;

        self.collective.coordinator_step(|| {
            let checksum = hash_data_region(self.storage, path, data_offset(boxes.len()))?;
            self.storage
                .write_at(path, CHECKSUM_OFFSET, &checksum.to_le_bytes())
        })?;

        debug!(path = %path.display(), ncomp, nbox = boxes.len(), "bulk payload written");
        Ok(())
    }
}

/// Reader for per-level bulk payloads. Reads are independent per worker; no
/// collective steps are required.
pub struct BulkFieldReader<'a> {
    storage: &'a dyn StorageBackend,
}

impl<'a> BulkFieldReader<'a> {
    pub fn new(storage: &'a dyn StorageBackend) -> Self {
        Self { storage }
    }

    /// Read the shards `rank` owns under the decomposition in `geom`.
    ///
    /// The payload's box list must match `geom` exactly; a restart never
    /// restructures the decomposition.
    pub fn read(&self, path: &Path, geom: &LevelGeometry, rank: usize) -> Result<FieldArray> {
        let header = decode_header(self.storage, path)?;
        if header.boxes != geom.boxes {
            return Err(PersistError::storage(
                path,
                "bulk payload box decomposition does not match the level geometry",
            ));
        }

        let mut array = FieldArray::define(geom, header.ncomp, rank);
        let mut reader = self.storage.open_read(path)?;
        for ibox in geom.owned_boxes(rank) {
            let offset = shard_offset(&header.boxes, header.ncomp, ibox);
            let nbytes = header.boxes[ibox].num_cells() * header.ncomp * 8;
            let bytes = reader.read_range(offset, nbytes)?;
            if let Some(shard) = array.shard_mut(ibox) {
                for (dst, chunk) in shard.iter_mut().zip(bytes.chunks_exact(8)) {
                    *dst = f64::from_le_bytes(chunk.try_into().unwrap());
                }
            }
        }
        Ok(array)
    }

    /// Number of components stored in the payload at `path`.
    pub fn ncomp(&self, path: &Path) -> Result<usize> {
        Ok(decode_header(self.storage, path)?.ncomp)
    }

    /// Recompute the data-region checksum and compare with the stored one.
    pub fn verify(&self, path: &Path) -> Result<()> {
        let header = decode_header(self.storage, path)?;
        let actual = hash_data_region(self.storage, path, data_offset(header.boxes.len()))?;
        if actual != header.checksum {
            return Err(PersistError::storage(
                path,
                format!(
                    "bulk payload checksum mismatch: stored {:016x}, computed {actual:016x}",
                    header.checksum
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::ThreadCommunicator;
    use crate::config::StorageConfig;
    use crate::state::StateSlotInstance;
    use crate::storage::LocalStorage;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_storage() -> (LocalStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(&StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        (storage, temp_dir)
    }

    fn two_box_geom(owners: Vec<usize>) -> LevelGeometry {
        LevelGeometry {
            domain: IntBox::new([0, 0, 0], [7, 3, 3]),
            boxes: vec![
                IntBox::new([0, 0, 0], [3, 3, 3]),
                IntBox::new([4, 0, 0], [7, 3, 3]),
            ],
            owners,
            cell_size: [1.0; SPACEDIM],
            ref_ratio: 2,
            steps: 0,
        }
    }

    fn filled_array(geom: &LevelGeometry, ncomp: usize, rank: usize, salt: f64) -> FieldArray {
        let mut array = FieldArray::define(geom, ncomp, rank);
        for ibox in array.owned().collect::<Vec<_>>() {
            let shard = array.shard_mut(ibox).unwrap();
            for (i, v) in shard.iter_mut().enumerate() {
                *v = salt + ibox as f64 * 10_000.0 + i as f64;
            }
        }
        array
    }

    #[test]
    fn test_solo_round_trip_is_bit_identical() {
        let (storage, _temp) = test_storage();
        let collective = Collective::solo();
        let geom = two_box_geom(vec![0, 0]);
        let array = filled_array(&geom, 3, 0, 0.5);

        let path = Path::new("Level_0/Cell");
        BulkFieldWriter::new(&storage, &collective)
            .write(&array, &geom, path)
            .unwrap();

        let reader = BulkFieldReader::new(&storage);
        let restored = reader.read(path, &geom, 0).unwrap();
        assert_eq!(restored, array);
        assert_eq!(reader.ncomp(path).unwrap(), 3);
        reader.verify(path).unwrap();
    }

    #[test]
    fn test_multi_rank_collective_write() {
        let (storage, _temp) = test_storage();
        let storage = Arc::new(storage);
        let geom = two_box_geom(vec![0, 1]);
        let path = Path::new("Level_0/Cell");

        let handles: Vec<_> = ThreadCommunicator::group(2)
            .into_iter()
            .map(|comm| {
                let storage = Arc::clone(&storage);
                let geom = geom.clone();
                std::thread::spawn(move || {
                    let collective = Collective::new(Arc::new(comm));
                    let rank = collective.rank();
                    let array = filled_array(&geom, 2, rank, 0.25);
                    BulkFieldWriter::new(storage.as_ref(), &collective)
                        .write(&array, &geom, Path::new("Level_0/Cell"))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // A solo reader owning everything sees both ranks' shards.
        let all = two_box_geom(vec![0, 0]);
        let reader = BulkFieldReader::new(storage.as_ref());
        let restored = reader.read(path, &all, 0).unwrap();
        // The fill rule depends only on the box index, so an all-owning
        // array reproduces what the two ranks wrote.
        assert_eq!(restored, filled_array(&all, 2, 0, 0.25));
        reader.verify(path).unwrap();
    }

    #[test]
    fn test_reader_reads_only_owned_shards() {
        let (storage, _temp) = test_storage();
        let collective = Collective::solo();
        let geom = two_box_geom(vec![0, 0]);
        let array = filled_array(&geom, 1, 0, 1.0);
        let path = Path::new("Cell");
        BulkFieldWriter::new(&storage, &collective)
            .write(&array, &geom, path)
            .unwrap();

        let split = two_box_geom(vec![0, 1]);
        let rank1 = BulkFieldReader::new(&storage).read(path, &split, 1).unwrap();
        assert!(rank1.shard(0).is_none());
        assert_eq!(rank1.shard(1), array.shard(1));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let (storage, temp) = test_storage();
        std::fs::write(temp.path().join("Cell"), b"XXXXsome nonsense that is long enough").unwrap();
        let geom = two_box_geom(vec![0, 0]);
        assert!(BulkFieldReader::new(&storage)
            .read(Path::new("Cell"), &geom, 0)
            .is_err());
    }

    #[test]
    fn test_mismatched_decomposition_rejected() {
        let (storage, _temp) = test_storage();
        let collective = Collective::solo();
        let geom = two_box_geom(vec![0, 0]);
        let array = filled_array(&geom, 1, 0, 2.0);
        let path = Path::new("Cell");
        BulkFieldWriter::new(&storage, &collective)
            .write(&array, &geom, path)
            .unwrap();

        let mut other = two_box_geom(vec![0, 0]);
        other.boxes[1] = IntBox::new([4, 0, 0], [6, 3, 3]);
        assert!(BulkFieldReader::new(&storage)
            .read(path, &other, 0)
            .is_err());
    }

    #[test]
    fn test_verify_detects_corruption() {
        let (storage, temp) = test_storage();
        let collective = Collective::solo();
        let geom = two_box_geom(vec![0, 0]);
        let array = filled_array(&geom, 1, 0, 3.0);
        let path = Path::new("Cell");
        BulkFieldWriter::new(&storage, &collective)
            .write(&array, &geom, path)
            .unwrap();
        BulkFieldReader::new(&storage).verify(path).unwrap();

        // Flip one byte in the data region.
        let file = temp.path().join("Cell");
        let mut bytes = std::fs::read(&file).unwrap();
        let off = data_offset(geom.boxes.len()) as usize;
        bytes[off] ^= 0xff;
        std::fs::write(&file, bytes).unwrap();

        assert!(BulkFieldReader::new(&storage).verify(path).is_err());
    }

    #[test]
    fn test_pack_orders_raw_then_derived() {
        let geom = two_box_geom(vec![0, 0]);
        let mut slot0 = FieldArray::define(&geom, 2, 0);
        for ibox in [0, 1] {
            slot0.shard_mut(ibox).unwrap().fill(7.0);
        }
        let mut slot1 = FieldArray::define(&geom, 1, 0);
        for ibox in [0, 1] {
            slot1.shard_mut(ibox).unwrap().fill(11.0);
        }
        let state = LevelState {
            slots: vec![
                StateSlotInstance {
                    time: 1.0,
                    data: slot0,
                },
                StateSlotInstance {
                    time: 1.0,
                    data: slot1,
                },
            ],
        };

        let mut registry = DeriveRegistry::new();
        registry.register("Speed", vec!["Speed".to_string()], |ctx| {
            let mut out = FieldArray::define(ctx.geom, 1, ctx.rank);
            for ibox in out.owned().collect::<Vec<_>>() {
                out.shard_mut(ibox).unwrap().fill(13.0);
            }
            Ok(out)
        });

        let plan = SelectionPlan {
            raw: vec![(0, 0), (0, 1), (1, 0)],
            derived: vec![("Speed".to_string(), 1)],
            names: vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "Speed".to_string(),
            ],
        };

        let packed = pack(&geom, &state, &plan, &registry, 1.0, 0).unwrap();
        assert_eq!(packed.ncomp(), 4);
        assert!(packed.component(0, 0).unwrap().iter().all(|&v| v == 7.0));
        assert!(packed.component(0, 1).unwrap().iter().all(|&v| v == 7.0));
        assert!(packed.component(0, 2).unwrap().iter().all(|&v| v == 11.0));
        assert!(packed.component(0, 3).unwrap().iter().all(|&v| v == 13.0));
    }

    #[test]
    fn test_pack_rejects_unknown_slot() {
        let geom = two_box_geom(vec![0, 0]);
        let state = LevelState { slots: vec![] };
        let registry = DeriveRegistry::new();
        let plan = SelectionPlan {
            raw: vec![(0, 0)],
            derived: vec![],
            names: vec!["a".to_string()],
        };
        assert!(pack(&geom, &state, &plan, &registry, 0.0, 0).is_err());
    }
}
