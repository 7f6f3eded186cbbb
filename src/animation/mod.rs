//! Skeletal animation decoding.
//!
//! An animation sector holds, per object, an offset to that object's raw
//! transform stream, followed by a sentinel-terminated list of sub-animation
//! slots. Each sub-animation is a frame-remapping table: one byte per object
//! per output frame, indexing into the object's raw keyframe stream. All
//! sub-animations of a model share the same raw streams, so the number of
//! raw transforms to read per object is the maximum index referenced by any
//! frame table.

use std::io::{Read, Seek};

use anyhow::{bail, Context};
use binrw::{binrw, BinReaderExt};
use cgmath::Quaternion;

use crate::disc::LogicalDisc;
use crate::math::{self, FixedMatrix, FIXED_ONE};

/// Slot value marking an empty/reserved sub-animation slot.
const SLOT_RESERVED: u32 = 0;
/// Slot value terminating the sub-animation list.
const SLOT_END: u32 = 1;
/// Output frames per sub-animation are capped by the format.
pub const MAX_FRAMES: usize = 256;

/// Which byte ended a frame table. The two values behave identically as far
/// as anyone knows; the distinction is preserved rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTerminator {
    /// 0xFE
    EndA,
    /// 0xFF
    EndB,
}

impl FrameTerminator {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0xFE => Some(FrameTerminator::EndA),
            0xFF => Some(FrameTerminator::EndB),
            _ => None,
        }
    }
}

/// One named sub-animation: a frame table of raw-keyframe indices.
#[derive(Debug, Clone)]
pub struct SubAnimation {
    /// Stable label; advances over every slot, including reserved ones.
    pub label: char,
    /// Payload offset of the frame table, relative to the animation sector.
    pub keyframe_offset: u32,
    /// `frame_table[frame][object]` = raw keyframe index.
    pub frame_table: Vec<Vec<u8>>,
    pub terminator: FrameTerminator,
}

impl SubAnimation {
    pub fn frame_count(&self) -> usize {
        self.frame_table.len()
    }
}

/// One raw keyframe: rotation/scale matrix plus translation, 24 bytes.
#[binrw]
#[derive(Debug, Clone, Copy)]
#[br(little)]
pub struct RawTransform {
    pub matrix: FixedMatrix,
    pub translation: [i16; 3],
}

/// A raw transform decoded into independent output components, already in
/// the target coordinate convention (X and Y negated, Z preserved).
#[derive(Debug, Clone, Copy)]
pub struct Keyframe {
    pub rotation: Quaternion<f32>,
    pub translation: [f32; 3],
    pub scale: [f32; 3],
}

impl RawTransform {
    pub const IDENTITY: RawTransform = RawTransform {
        matrix: FixedMatrix::IDENTITY,
        translation: [0, 0, 0],
    };

    /// Converts to float, splits scale from rotation, and converts the
    /// rotation to a unit quaternion. The axis flip is a fixed property of
    /// the output convention, not configurable.
    pub fn decode(&self) -> Keyframe {
        let (scale, rotation) = self.matrix.to_f32().decompose();
        let mut q = math::matrix_to_quaternion(&rotation);
        q.v.x = -q.v.x;
        q.v.y = -q.v.y;
        let t = [
            -f32::from(self.translation[0]) / FIXED_ONE,
            -f32::from(self.translation[1]) / FIXED_ONE,
            f32::from(self.translation[2]) / FIXED_ONE,
        ];
        Keyframe {
            rotation: q,
            translation: t,
            scale,
        }
    }
}

/// Per-object output tracks for one sub-animation, one entry per frame.
#[derive(Debug, Clone, Default)]
pub struct ObjectTrack {
    pub rotations: Vec<[f32; 4]>,
    pub translations: Vec<[f32; 3]>,
    pub scales: Vec<[f32; 3]>,
}

/// An animation set bound to a model by shared object count.
#[derive(Debug, Clone)]
pub struct Animation {
    pub sector: u64,
    pub object_count: u32,
    /// Payload offset of each object's raw transform stream, sector-relative.
    pub transform_offsets: Vec<u32>,
    pub sub_animations: Vec<SubAnimation>,
    /// Highest raw keyframe index referenced by any frame table.
    pub max_keyframe: u8,
}

impl Animation {
    /// Reads the animation header, slot list and every frame table at
    /// `sector`. `object_count` must come from the model this set animates.
    pub fn load<R: Read + Seek>(
        disc: &mut LogicalDisc<R>,
        sector: u64,
        object_count: u32,
    ) -> anyhow::Result<Self> {
        if object_count == 0 {
            bail!("animation {:#x}: model has no objects", sector);
        }
        disc.seek_to_sector(sector)?;

        let reserved: u32 = disc
            .read_le()
            .with_context(|| format!("animation {:#x}: reserved header field", sector))?;
        if reserved != 0 {
            bail!(
                "animation {:#x}: reserved header field is {:#x}, expected 0",
                sector,
                reserved
            );
        }

        let mut transform_offsets = Vec::with_capacity(object_count as usize);
        for i in 0..object_count {
            let offset: u32 = disc.read_le().with_context(|| {
                format!("animation {:#x}: transform offset {}/{}", sector, i, object_count)
            })?;
            transform_offsets.push(offset);
        }

        // The slot list is contiguous, so collect it fully before chasing
        // any frame-table offsets.
        let mut slots: Vec<(char, u32)> = Vec::new();
        let mut label = b'a';
        loop {
            let value: u32 = disc.read_le().with_context(|| {
                format!("animation {:#x}: sub-animation slot '{}'", sector, label as char)
            })?;
            match value {
                SLOT_END => break,
                SLOT_RESERVED => {}
                offset => slots.push((label as char, offset)),
            }
            label += 1;
        }

        let mut sub_animations = Vec::with_capacity(slots.len());
        let mut max_keyframe = 0u8;
        for (label, keyframe_offset) in slots {
            let sub = read_frame_table(disc, sector, keyframe_offset, object_count, label)?;
            for row in &sub.frame_table {
                for &index in row {
                    max_keyframe = max_keyframe.max(index);
                }
            }
            sub_animations.push(sub);
        }

        Ok(Animation {
            sector,
            object_count,
            transform_offsets,
            sub_animations,
            max_keyframe,
        })
    }

    /// Reads one object's raw transform stream. Every sub-animation shares
    /// it, so the length is `max_keyframe + 1` regardless of which frames a
    /// given sub-animation uses.
    pub fn load_raw_transforms<R: Read + Seek>(
        &self,
        disc: &mut LogicalDisc<R>,
        object: usize,
    ) -> anyhow::Result<Vec<RawTransform>> {
        disc.seek_to_sector(self.sector)?;
        disc.seek_forward(i64::from(self.transform_offsets[object]))?;
        let count = usize::from(self.max_keyframe) + 1;
        let mut raws = Vec::with_capacity(count);
        for i in 0..count {
            let raw: RawTransform = disc.read_le().with_context(|| {
                format!(
                    "animation {:#x}: object {} raw transform {}/{}",
                    self.sector, object, i, count
                )
            })?;
            raws.push(raw);
        }
        Ok(raws)
    }

    /// Produces per-object keyframe tracks for one sub-animation by decoding
    /// each object's raw stream and indirecting through the frame table.
    pub fn serialize<R: Read + Seek>(
        &self,
        disc: &mut LogicalDisc<R>,
        sub_index: usize,
    ) -> anyhow::Result<Vec<ObjectTrack>> {
        let sub = &self.sub_animations[sub_index];
        let mut tracks = Vec::with_capacity(self.object_count as usize);
        for object in 0..self.object_count as usize {
            let raws = self.load_raw_transforms(disc, object)?;
            let keyframes: Vec<Keyframe> = raws.iter().map(RawTransform::decode).collect();
            let indices: Vec<u8> = sub.frame_table.iter().map(|row| row[object]).collect();
            let frames = remap_frames(&keyframes, &indices);
            let mut track = ObjectTrack::default();
            for frame in frames {
                let q = frame.rotation;
                track.rotations.push([q.v.x, q.v.y, q.v.z, q.s]);
                track.translations.push(frame.translation);
                track.scales.push(frame.scale);
            }
            tracks.push(track);
        }
        Ok(tracks)
    }
}

fn read_frame_table<R: Read + Seek>(
    disc: &mut LogicalDisc<R>,
    sector: u64,
    keyframe_offset: u32,
    object_count: u32,
    label: char,
) -> anyhow::Result<SubAnimation> {
    disc.seek_to_sector(sector)?;
    disc.seek_forward(i64::from(keyframe_offset))?;

    let mut frame_table = Vec::new();
    let terminator = loop {
        let mut first = [0u8; 1];
        disc.read_payload(&mut first).with_context(|| {
            format!(
                "animation {:#x} sub '{}': frame {} row",
                sector,
                label,
                frame_table.len()
            )
        })?;
        if let Some(term) = FrameTerminator::from_byte(first[0]) {
            break term;
        }
        if frame_table.len() == MAX_FRAMES {
            bail!(
                "animation {:#x} sub '{}': more than {} frames without a terminator",
                sector,
                label,
                MAX_FRAMES
            );
        }
        let mut row = vec![0u8; object_count as usize];
        row[0] = first[0];
        disc.read_payload(&mut row[1..]).with_context(|| {
            format!(
                "animation {:#x} sub '{}': frame {} indices",
                sector,
                label,
                frame_table.len()
            )
        })?;
        frame_table.push(row);
    };

    Ok(SubAnimation {
        label,
        keyframe_offset,
        frame_table,
        terminator,
    })
}

/// `out[frame] = raw[table[frame]]` — the pose-reuse indirection.
pub fn remap_frames<T: Clone>(raw: &[T], table: &[u8]) -> Vec<T> {
    table.iter().map(|&i| raw[i as usize].clone()).collect()
}
