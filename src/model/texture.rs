//! Texture sheet, palette resolution and atlas assembly.
//!
//! A model carries one 128x256 sheet of 4-bit texel indices. The same sheet
//! bytes double as palette storage: a face's (palette, CLUT) pair addresses a
//! 16-entry block of BGR555 colors inside it. Every distinct
//! (palette, CLUT, semi-transparency) tuple used by a face becomes one slot
//! of the composited RGBA atlas.

use std::collections::HashMap;
use std::io::{Read, Seek};

use anyhow::{bail, Context};
use image::RgbaImage;

use crate::disc::LogicalDisc;
use crate::model::geometry::FaceSet;
use crate::model::Model;

/// Texels per sheet row.
pub const SHEET_WIDTH: u32 = 128;
/// Sheet rows.
pub const SHEET_HEIGHT: u32 = 256;
/// 4-bit texels, two per byte.
pub const SHEET_BYTES: usize = (SHEET_WIDTH as usize / 2) * SHEET_HEIGHT as usize;
/// Bytes between the texture-sheet offset and the texel data.
const SHEET_HEADER_SKIP: i64 = 64;
/// Bytes per sheet row; also the CLUT row stride for palette addressing.
const ROW_STRIDE: usize = SHEET_WIDTH as usize / 2;
/// Bytes per palette column step.
const PALETTE_STRIDE: usize = 32;

/// Atlas slots per row.
pub const ATLAS_COLUMNS: u32 = 8;
/// Hard cap on distinct palette tuples per model.
pub const ATLAS_MAX_SLOTS: usize = 32;

/// The color that marks a fully transparent texel on semi-transparent faces.
const SENTINEL_COLOR: u16 = 0x8000;
/// STP bit: the texel participates in blending.
const STP_BIT: u16 = 0x8000;

/// The raw 4-bit-indexed texture block of one model.
pub struct TextureSheet {
    data: Vec<u8>,
}

impl TextureSheet {
    /// Reads the sheet at the model's texture-sheet offset.
    pub fn load<R: Read + Seek>(
        disc: &mut LogicalDisc<R>,
        model: &Model,
    ) -> anyhow::Result<Self> {
        disc.seek_to_sector(model.base_sector)?;
        disc.seek_forward(i64::from(model.texture_sheet_offset) + SHEET_HEADER_SKIP)?;
        let mut data = vec![0u8; SHEET_BYTES];
        disc.read_payload(&mut data).with_context(|| {
            format!(
                "texture sheet at sector {:#x} offset {:#x}",
                model.base_sector, model.texture_sheet_offset
            )
        })?;
        Ok(TextureSheet { data })
    }

    pub fn from_bytes(data: Vec<u8>) -> anyhow::Result<Self> {
        if data.len() != SHEET_BYTES {
            bail!("texture sheet must be {:#x} bytes, got {:#x}", SHEET_BYTES, data.len());
        }
        Ok(TextureSheet { data })
    }

    /// 4-bit palette index of texel (x, y); low nibble is the left texel.
    pub fn texel(&self, x: u32, y: u32) -> u8 {
        let byte = self.data[y as usize * ROW_STRIDE + (x / 2) as usize];
        if x % 2 == 0 {
            byte & 0x0F
        } else {
            byte >> 4
        }
    }

    /// The 16 BGR555 entries selected by a face's (palette, CLUT) pair.
    pub fn palette_block(&self, palette: u8, clut: u8) -> anyhow::Result<[u16; 16]> {
        let base = clut as usize * ROW_STRIDE + palette as usize * PALETTE_STRIDE;
        if base + 32 > self.data.len() {
            bail!(
                "palette block out of range: palette {:#x} clut {:#x} addresses byte {:#x}",
                palette,
                clut,
                base
            );
        }
        let mut entries = [0u16; 16];
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = u16::from_le_bytes([self.data[base + 2 * i], self.data[base + 2 * i + 1]]);
        }
        Ok(entries)
    }
}

/// Expands one BGR555 entry to RGBA.
///
/// On a semi-transparent face the 0x8000 sentinel is fully transparent,
/// texels with the STP bit get half alpha (approximating the blend), and the
/// rest stay opaque. Opaque faces ignore the STP bit entirely.
pub fn decode_color(color: u16, semi_transparent: bool) -> [u8; 4] {
    let r = ((color & 0x1F) << 3) as u8;
    let g = (((color >> 5) & 0x1F) << 3) as u8;
    let b = (((color >> 10) & 0x1F) << 3) as u8;
    let a = if semi_transparent {
        if color == SENTINEL_COLOR {
            0x00
        } else if color & STP_BIT != 0 {
            0x80
        } else {
            0xFF
        }
    } else {
        0xFF
    };
    [r, g, b, a]
}

/// One distinct palette selection; one atlas slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaletteKey {
    pub palette: u8,
    pub clut: u8,
    pub semi_transparent: bool,
}

/// The composited RGBA atlas plus the slot table that downstream UV
/// computation depends on. Slot order is first-encountered order over the
/// face scan, so it is deterministic for a given model.
#[derive(Debug)]
pub struct TextureAtlas {
    pub image: RgbaImage,
    slots: Vec<PaletteKey>,
    lookup: HashMap<PaletteKey, usize>,
}

impl TextureAtlas {
    /// Collects every palette tuple referenced by `face_sets` (object order,
    /// quads before tris, semi-transparent group before opaque) and renders
    /// one 128x256 slot per tuple, 8 slots per atlas row.
    pub fn build(sheet: &TextureSheet, face_sets: &[FaceSet]) -> anyhow::Result<Self> {
        let mut slots: Vec<PaletteKey> = Vec::new();
        let mut lookup: HashMap<PaletteKey, usize> = HashMap::new();

        let mut assign = |key: PaletteKey| -> anyhow::Result<()> {
            if lookup.contains_key(&key) {
                return Ok(());
            }
            if slots.len() == ATLAS_MAX_SLOTS {
                bail!(
                    "atlas capacity exceeded: more than {} distinct palette/CLUT/transparency tuples",
                    ATLAS_MAX_SLOTS
                );
            }
            lookup.insert(key, slots.len());
            slots.push(key);
            Ok(())
        };

        for faces in face_sets {
            for (i, quad) in faces.quads.iter().enumerate() {
                assign(PaletteKey {
                    palette: quad.palette,
                    clut: quad.clut,
                    semi_transparent: faces.quad_is_semi_transparent(i),
                })?;
            }
            for (i, tri) in faces.tris.iter().enumerate() {
                assign(PaletteKey {
                    palette: tri.palette,
                    clut: tri.clut,
                    semi_transparent: faces.tri_is_semi_transparent(i),
                })?;
            }
        }

        let rows = slots.len().div_ceil(ATLAS_COLUMNS as usize).max(1) as u32;
        let mut image = RgbaImage::new(ATLAS_COLUMNS * SHEET_WIDTH, rows * SHEET_HEIGHT);

        for (slot, key) in slots.iter().enumerate() {
            let colors = sheet.palette_block(key.palette, key.clut)?;
            let rgba: Vec<[u8; 4]> = colors
                .iter()
                .map(|&c| decode_color(c, key.semi_transparent))
                .collect();
            let (ox, oy) = slot_origin(slot);
            for y in 0..SHEET_HEIGHT {
                for x in 0..SHEET_WIDTH {
                    let index = sheet.texel(x, y) as usize;
                    image.put_pixel(ox + x, oy + y, image::Rgba(rgba[index]));
                }
            }
        }

        Ok(TextureAtlas {
            image,
            slots,
            lookup,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_of(&self, key: PaletteKey) -> Option<usize> {
        self.lookup.get(&key).copied()
    }

    /// Top-left texel of a slot inside the atlas.
    pub fn origin_of(&self, slot: usize) -> (u32, u32) {
        slot_origin(slot)
    }

    /// PNG-encodes the atlas for embedding.
    pub fn to_png_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .context("encoding texture atlas to PNG")?;
        Ok(bytes)
    }
}

fn slot_origin(slot: usize) -> (u32, u32) {
    let col = (slot as u32) % ATLAS_COLUMNS;
    let row = (slot as u32) / ATLAS_COLUMNS;
    (col * SHEET_WIDTH, row * SHEET_HEIGHT)
}
