//! Model container: the fixed-offset header tables at a model's base sector,
//! the skeleton depth sequence, and the derived parent tree.

pub mod geometry;
pub mod texture;

use std::io::{Read, Seek};

use anyhow::{bail, Context};
use binrw::BinReaderExt;

use crate::disc::LogicalDisc;

pub use geometry::{FaceSet, QuadFace, TriFace, Vertex};

/// One 3-D asset as laid out on disc: base sector plus four parallel
/// per-object offset/depth tables.
#[derive(Debug, Clone)]
pub struct Model {
    pub base_sector: u64,
    pub texture_sheet_offset: u32,
    pub object_count: u32,
    pub vertex_offsets: Vec<u32>,
    /// Read to keep the header layout aligned; never interpreted downstream.
    pub normal_offsets: Vec<u32>,
    pub face_offsets: Vec<u32>,
    /// Skeleton depth level per object, a flattened pre-order tree.
    pub skeleton: Vec<u32>,
    /// Parent object per object, derived from `skeleton`.
    pub node_tree: Vec<Option<usize>>,
}

impl Model {
    /// Reads the model header tables at `base_sector`.
    pub fn load<R: Read + Seek>(
        disc: &mut LogicalDisc<R>,
        base_sector: u64,
    ) -> anyhow::Result<Self> {
        disc.seek_to_sector(base_sector)?;

        let texture_sheet_offset: u32 = disc
            .read_le()
            .with_context(|| format!("model {:#x}: texture sheet offset", base_sector))?;
        // Reserved field between the texture offset and the object count.
        let _reserved: u32 = disc
            .read_le()
            .with_context(|| format!("model {:#x}: reserved header field", base_sector))?;
        let object_count: u32 = disc
            .read_le()
            .with_context(|| format!("model {:#x}: object count", base_sector))?;
        if object_count == 0 {
            bail!("model {:#x}: object count is zero", base_sector);
        }

        let mut read_table = |name: &str| -> anyhow::Result<Vec<u32>> {
            let mut table = Vec::with_capacity(object_count as usize);
            for i in 0..object_count {
                let v: u32 = disc.read_le().with_context(|| {
                    format!("model {:#x}: {} [{}/{}]", base_sector, name, i, object_count)
                })?;
                table.push(v);
            }
            Ok(table)
        };

        let vertex_offsets = read_table("vertex offsets")?;
        let normal_offsets = read_table("normal offsets")?;
        let face_offsets = read_table("face offsets")?;
        let skeleton = read_table("skeleton depths")?;

        let node_tree = build_node_tree(&skeleton)?;

        Ok(Model {
            base_sector,
            texture_sheet_offset,
            object_count,
            vertex_offsets,
            normal_offsets,
            face_offsets,
            skeleton,
            node_tree,
        })
    }

    pub fn load_vertices<R: Read + Seek>(
        &self,
        disc: &mut LogicalDisc<R>,
        object: usize,
    ) -> anyhow::Result<Vec<Vertex>> {
        geometry::load_vertices(disc, self, object)
    }

    pub fn load_faces<R: Read + Seek>(
        &self,
        disc: &mut LogicalDisc<R>,
        object: usize,
    ) -> anyhow::Result<FaceSet> {
        geometry::load_faces(disc, self, object)
    }

    /// Reads the eye-region blink table at a payload offset relative to the
    /// base sector. The records are opaque; they are carried through to the
    /// scene extras without interpretation.
    pub fn load_blink_table<R: Read + Seek>(
        &self,
        disc: &mut LogicalDisc<R>,
        offset: u32,
    ) -> anyhow::Result<Vec<BlinkRecord>> {
        disc.seek_to_sector(self.base_sector)?;
        disc.seek_forward(i64::from(offset))?;

        let mut records = Vec::new();
        loop {
            let marker: u16 = disc
                .read_le()
                .with_context(|| format!("blink record {} marker", records.len()))?;
            if marker == BLINK_SENTINEL {
                break;
            }
            let mut rest = [0u8; 8];
            disc.read_payload(&mut rest)
                .with_context(|| format!("blink record {} payload", records.len()))?;
            let mut raw = [0u8; 10];
            raw[..2].copy_from_slice(&marker.to_le_bytes());
            raw[2..].copy_from_slice(&rest);
            records.push(BlinkRecord { raw });
        }
        Ok(records)
    }
}

/// Terminates the blink-record list.
pub const BLINK_SENTINEL: u16 = 0xFFFF;

/// One fixed-layout eye-region record, kept as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkRecord {
    pub raw: [u8; 10],
}

/// Rebuilds the parent tree from the flattened pre-order depth sequence:
/// object `i` at depth `d` is parented to the nearest preceding object at
/// depth `d - 1`; depth 0 is a root.
///
/// A non-root object with no such predecessor means the depth sequence is
/// inconsistent with pre-order flattening and the data cannot be trusted.
pub fn build_node_tree(skeleton: &[u32]) -> anyhow::Result<Vec<Option<usize>>> {
    let mut parents = Vec::with_capacity(skeleton.len());
    for (i, &depth) in skeleton.iter().enumerate() {
        if depth == 0 {
            parents.push(None);
            continue;
        }
        let parent = (0..i).rev().find(|&j| skeleton[j] == depth - 1);
        match parent {
            Some(j) => parents.push(Some(j)),
            None => bail!(
                "no parent for object {} at depth {} (skeleton {:?})",
                i,
                depth,
                skeleton
            ),
        }
    }
    Ok(parents)
}
