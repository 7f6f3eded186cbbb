//! Per-object vertex and face records.
//!
//! All offsets in the model header are payload-relative to the model's base
//! sector, so every loader here starts with `seek_to_sector` + `seek_forward`
//! and then reads sequentially through the [`LogicalDisc`].

use std::io::Seek;

use anyhow::Context;
use binrw::{binrw, BinReaderExt};

use crate::disc::LogicalDisc;
use crate::model::Model;

/// Mask for the semi-transparency flag in a face's command byte.
pub const CMD_SEMI_TRANSPARENT: u8 = 0x80;

/// One model-space vertex, fixed-point with 4096 = 1.0.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[br(little)]
pub struct Vertex {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// A textured quad. 20 bytes on disc.
///
/// Vertex/normal indices are local to the owning object and range-unchecked;
/// a malformed index is malformed data, not something the decoder guards.
#[binrw]
#[derive(Debug, Clone, Copy)]
#[br(little)]
pub struct QuadFace {
    pub vertices: [u8; 4],
    pub normals: [u8; 4],
    /// Per-corner texel coordinates into the 128x256 texture block.
    pub uvs: [[u8; 2]; 4],
    pub palette: u8,
    pub clut: u8,
    pub command: u8,
    pub pad: u8,
}

/// A textured triangle. 16 bytes on disc, same tail as [`QuadFace`].
#[binrw]
#[derive(Debug, Clone, Copy)]
#[br(little)]
pub struct TriFace {
    pub vertices: [u8; 3],
    pub normals: [u8; 3],
    pub uvs: [[u8; 2]; 3],
    pub palette: u8,
    pub clut: u8,
    pub command: u8,
    pub pad: u8,
}

impl QuadFace {
    pub fn command_semi_flag(&self) -> bool {
        self.command & CMD_SEMI_TRANSPARENT != 0
    }
}

impl TriFace {
    pub fn command_semi_flag(&self) -> bool {
        self.command & CMD_SEMI_TRANSPARENT != 0
    }
}

/// One object's face lists. Within each shape kind the semi-transparent
/// group comes first, exactly as stored.
#[derive(Debug, Clone, Default)]
pub struct FaceSet {
    pub quads: Vec<QuadFace>,
    pub semi_quad_count: usize,
    pub tris: Vec<TriFace>,
    pub semi_tri_count: usize,
}

impl FaceSet {
    pub fn quad_is_semi_transparent(&self, index: usize) -> bool {
        index < self.semi_quad_count
    }

    pub fn tri_is_semi_transparent(&self, index: usize) -> bool {
        index < self.semi_tri_count
    }
}

pub(crate) fn load_vertices<R: std::io::Read + Seek>(
    disc: &mut LogicalDisc<R>,
    model: &Model,
    object: usize,
) -> anyhow::Result<Vec<Vertex>> {
    let vertex_offset = model.vertex_offsets[object];
    disc.seek_to_sector(model.base_sector)?;
    disc.seek_forward(i64::from(vertex_offset))?;

    let count: u32 = disc
        .read_le()
        .with_context(|| format!("object {}: vertex count at offset {:#x}", object, vertex_offset))?;
    // Two reserved bytes between the count and the records.
    disc.seek_forward(2)?;

    let mut vertices = Vec::with_capacity(count as usize);
    for i in 0..count {
        let v: Vertex = disc
            .read_le()
            .with_context(|| format!("object {}: vertex {}/{}", object, i, count))?;
        vertices.push(v);
    }
    Ok(vertices)
}

pub(crate) fn load_faces<R: std::io::Read + Seek>(
    disc: &mut LogicalDisc<R>,
    model: &Model,
    object: usize,
) -> anyhow::Result<FaceSet> {
    let face_offset = model.face_offsets[object];
    disc.seek_to_sector(model.base_sector)?;
    disc.seek_forward(i64::from(face_offset))?;

    let read_quads = |disc: &mut LogicalDisc<R>, group: &str| -> anyhow::Result<Vec<QuadFace>> {
        let count: u32 = disc
            .read_le()
            .with_context(|| format!("object {}: {} quad count", object, group))?;
        let mut quads = Vec::with_capacity(count as usize);
        for i in 0..count {
            quads.push(
                disc.read_le()
                    .with_context(|| format!("object {}: {} quad {}/{}", object, group, i, count))?,
            );
        }
        Ok(quads)
    };
    let read_tris = |disc: &mut LogicalDisc<R>, group: &str| -> anyhow::Result<Vec<TriFace>> {
        let count: u32 = disc
            .read_le()
            .with_context(|| format!("object {}: {} tri count", object, group))?;
        let mut tris = Vec::with_capacity(count as usize);
        for i in 0..count {
            tris.push(
                disc.read_le()
                    .with_context(|| format!("object {}: {} tri {}/{}", object, group, i, count))?,
            );
        }
        Ok(tris)
    };

    let mut quads = read_quads(disc, "semi-transparent")?;
    let semi_quad_count = quads.len();
    quads.extend(read_quads(disc, "opaque")?);

    let mut tris = read_tris(disc, "semi-transparent")?;
    let semi_tri_count = tris.len();
    tris.extend(read_tris(disc, "opaque")?);

    Ok(FaceSet {
        quads,
        semi_quad_count,
        tris,
        semi_tri_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinRead;
    use std::io::Cursor;

    #[test]
    fn quad_record_is_twenty_bytes() {
        let bytes: Vec<u8> = (0u8..20).collect();
        let mut cur = Cursor::new(&bytes);
        let quad = QuadFace::read_le(&mut cur).unwrap();
        assert_eq!(cur.position(), 20);
        assert_eq!(quad.vertices, [0, 1, 2, 3]);
        assert_eq!(quad.normals, [4, 5, 6, 7]);
        assert_eq!(quad.uvs[0], [8, 9]);
        assert_eq!(quad.uvs[3], [14, 15]);
        assert_eq!(quad.palette, 16);
        assert_eq!(quad.clut, 17);
        assert_eq!(quad.command, 18);
    }

    #[test]
    fn tri_record_is_sixteen_bytes() {
        let bytes: Vec<u8> = (0u8..16).collect();
        let mut cur = Cursor::new(&bytes);
        let tri = TriFace::read_le(&mut cur).unwrap();
        assert_eq!(cur.position(), 16);
        assert_eq!(tri.vertices, [0, 1, 2]);
        assert_eq!(tri.uvs[2], [10, 11]);
        assert_eq!(tri.palette, 12);
        assert_eq!(tri.clut, 13);
    }

    #[test]
    fn command_high_bit_flags_semi_transparency() {
        let mut quad = QuadFace::read_le(&mut Cursor::new([0u8; 20])).unwrap();
        assert!(!quad.command_semi_flag());
        quad.command = 0x82;
        assert!(quad.command_semi_flag());
    }
}
