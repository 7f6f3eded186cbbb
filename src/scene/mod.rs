//! Scene assembly: flattens decoded objects into glTF buffers, rebuilds the
//! node hierarchy from the skeleton, attaches step-interpolated animation
//! channels and embeds the texture atlas.
//!
//! Everything is emitted as one self-contained `.gltf` JSON document with
//! base64 data-URI buffers, built through a field aggregator so indices stay
//! consistent while the document grows.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use anyhow::Context;
use base64::{prelude::BASE64_STANDARD, Engine};
use gltf::json::{
    self,
    accessor::{ComponentType, GenericComponentType, Type},
    animation::{Channel, Interpolation, Property, Sampler, Target},
    image::MimeType,
    material::{AlphaMode, PbrBaseColorFactor, PbrMetallicRoughness, StrengthFactor},
    mesh::{Mode, Primitive, Semantic},
    texture::{MagFilter, MinFilter, WrappingMode},
    validation::{Checked, USize64},
    Accessor, Index, Node, Root, Scene,
};
use serde_json::{json, value::RawValue};

use crate::animation::{Animation, ObjectTrack};
use crate::disc::LogicalDisc;
use crate::math::FIXED_ONE;
use crate::model::texture::{PaletteKey, TextureAtlas, TextureSheet};
use crate::model::{BlinkRecord, FaceSet, Model, Vertex};

/// Output animations play at the console's frame rate.
const FRAME_RATE: f32 = 30.0;

pub struct GltfFieldsToAggregate {
    pub buffer: Vec<json::Buffer>,
    pub buffer_view: Vec<json::buffer::View>,
    pub accessor: Vec<Accessor>,
    pub image: Vec<json::Image>,
    pub texture: Vec<json::Texture>,
    pub material: Vec<json::Material>,
    pub sampler: Vec<json::texture::Sampler>,
    pub animation: Vec<json::Animation>,
    pub nodes: Vec<Node>,
    pub meshes: Vec<json::Mesh>,
}

impl GltfFieldsToAggregate {
    fn new() -> Self {
        Self {
            buffer: vec![],
            buffer_view: vec![],
            accessor: vec![],
            image: vec![],
            texture: vec![],
            material: vec![],
            sampler: vec![],
            animation: vec![],
            nodes: vec![],
            meshes: vec![],
        }
    }

    /// Embeds `bytes` as a data-URI buffer with a whole-buffer view.
    /// Returns the view index.
    fn push_buffer(&mut self, name: &str, bytes: &[u8]) -> usize {
        let buffer_index = self.buffer.len();
        self.buffer.push(json::Buffer {
            byte_length: USize64(bytes.len() as u64),
            uri: Some(format!(
                "data:application/octet-stream;base64,{}",
                BASE64_STANDARD.encode(bytes)
            )),
            extensions: None,
            extras: None,
            name: Some(name.to_string()),
        });
        let view_index = self.buffer_view.len();
        self.buffer_view.push(json::buffer::View {
            buffer: Index::new(buffer_index as u32),
            byte_length: USize64(bytes.len() as u64),
            byte_offset: Some(USize64(0)),
            byte_stride: None,
            target: None,
            extensions: None,
            extras: None,
            name: Some(format!("{}_view", name)),
        });
        view_index
    }
}

/// One object's fully decoded geometry.
pub struct DecodedObject {
    pub vertices: Vec<Vertex>,
    pub faces: FaceSet,
}

/// One animation sector's decoded contents: the table metadata plus the
/// serialized per-sub-animation, per-object tracks.
pub struct DecodedAnimationSet {
    /// Label from the batch table line identifying this sector.
    pub label: char,
    pub animation: Animation,
    /// `tracks[sub][object]`.
    pub tracks: Vec<Vec<ObjectTrack>>,
}

/// Decodes a whole extraction job. Nothing is emitted until every part has
/// decoded successfully, so a failure never leaves partial output.
pub fn extract_model<R: Read + Seek>(
    disc: &mut LogicalDisc<R>,
    name: &str,
    model_sector: u64,
    animation_sectors: &[(u64, char)],
    blink_offset: Option<u32>,
) -> anyhow::Result<Root> {
    let model = Model::load(disc, model_sector)
        .with_context(|| format!("{}: model header at sector {:#x}", name, model_sector))?;

    let mut objects = Vec::with_capacity(model.object_count as usize);
    for i in 0..model.object_count as usize {
        let vertices = model
            .load_vertices(disc, i)
            .with_context(|| format!("{}: object {} vertices", name, i))?;
        let faces = model
            .load_faces(disc, i)
            .with_context(|| format!("{}: object {} faces", name, i))?;
        objects.push(DecodedObject { vertices, faces });
    }

    let sheet = TextureSheet::load(disc, &model)
        .with_context(|| format!("{}: texture sheet", name))?;
    let face_sets: Vec<FaceSet> = objects.iter().map(|o| o.faces.clone()).collect();
    let atlas = TextureAtlas::build(&sheet, &face_sets)
        .with_context(|| format!("{}: texture atlas", name))?;

    let mut animation_sets = Vec::with_capacity(animation_sectors.len());
    for &(sector, label) in animation_sectors {
        let animation = Animation::load(disc, sector, model.object_count)
            .with_context(|| format!("{}: animation set '{}' at sector {:#x}", name, label, sector))?;
        let mut tracks = Vec::with_capacity(animation.sub_animations.len());
        for sub in 0..animation.sub_animations.len() {
            tracks.push(animation.serialize(disc, sub).with_context(|| {
                format!("{}: animation set '{}' sub-animation {}", name, label, sub)
            })?);
        }
        animation_sets.push(DecodedAnimationSet {
            label,
            animation,
            tracks,
        });
    }

    let blink_table = match blink_offset {
        Some(offset) => model
            .load_blink_table(disc, offset)
            .with_context(|| format!("{}: blink table at offset {:#x}", name, offset))?,
        None => vec![],
    };

    Ok(assemble_scene(
        name,
        &model,
        &objects,
        &atlas,
        &animation_sets,
        &blink_table,
    )?)
}

/// Builds the glTF document from fully decoded parts.
pub fn assemble_scene(
    name: &str,
    model: &Model,
    objects: &[DecodedObject],
    atlas: &TextureAtlas,
    animation_sets: &[DecodedAnimationSet],
    blink_table: &[BlinkRecord],
) -> anyhow::Result<Root> {
    let mut fields = GltfFieldsToAggregate::new();

    let (opaque_material, blend_material) = push_atlas_material(&mut fields, atlas)?;
    let flattened = flatten_objects(objects, atlas)?;
    push_meshes_and_nodes(
        &mut fields,
        model,
        &flattened,
        opaque_material,
        blend_material,
    );

    for set in animation_sets {
        push_animation_set(&mut fields, set);
    }

    let root_nodes: Vec<Index<Node>> = model
        .node_tree
        .iter()
        .enumerate()
        .filter(|(_, parent)| parent.is_none())
        .map(|(i, _)| Index::new(i as u32))
        .collect();

    let extras = if blink_table.is_empty() {
        None
    } else {
        let rows: Vec<Vec<u8>> = blink_table.iter().map(|r| r.raw.to_vec()).collect();
        Some(
            RawValue::from_string(json!({ "blink_regions": rows }).to_string())
                .context("serializing blink regions")?,
        )
    };

    let scene = Scene {
        nodes: root_nodes,
        name: Some(name.to_string()),
        extensions: None,
        extras,
    };

    Ok(Root {
        accessors: fields.accessor,
        animations: fields.animation,
        buffers: fields.buffer,
        buffer_views: fields.buffer_view,
        images: fields.image,
        materials: fields.material,
        meshes: fields.meshes,
        nodes: fields.nodes,
        samplers: fields.sampler,
        scene: Some(Index::new(0)),
        scenes: vec![scene],
        textures: fields.texture,
        ..Default::default()
    })
}

/// A contiguous run of flattened corner entries for one (object, group).
struct PrimitiveRange {
    first_entry: usize,
    entry_count: usize,
    semi_transparent: bool,
}

struct FlattenedGeometry {
    /// Corner positions, already in the output coordinate convention.
    positions: Vec<[f32; 3]>,
    /// Corner UVs, normalized into the atlas.
    uvs: Vec<[f32; 2]>,
    /// Primitive ranges per object, in object order.
    ranges: Vec<Vec<PrimitiveRange>>,
}

fn convert_position(v: Vertex) -> [f32; 3] {
    [
        -f32::from(v.x) / FIXED_ONE,
        -f32::from(v.y) / FIXED_ONE,
        f32::from(v.z) / FIXED_ONE,
    ]
}

/// Flattens every face corner into global position/UV arrays. Vertices are
/// duplicated per corner because UVs are stored per corner, not per vertex.
/// Quads split on the fixed diagonal into (C,B,A) and (A,B,D).
fn flatten_objects(
    objects: &[DecodedObject],
    atlas: &TextureAtlas,
) -> anyhow::Result<FlattenedGeometry> {
    let mut positions = Vec::new();
    let mut uvs = Vec::new();
    let mut ranges = Vec::new();

    let atlas_w = atlas.image.width() as f32;
    let atlas_h = atlas.image.height() as f32;

    for object in objects {
        let mut object_ranges = Vec::new();

        for semi in [true, false] {
            let first_entry = positions.len();

            let mut emit_corner =
                |vertex_index: u8, uv: [u8; 2], key: PaletteKey| -> anyhow::Result<()> {
                    // The atlas was built from the same face scan, so a
                    // missing tuple means the two passes disagree.
                    let slot = atlas.slot_of(key).with_context(|| {
                        format!("palette tuple {:?} missing from atlas", key)
                    })?;
                    let (ox, oy) = atlas.origin_of(slot);
                    positions.push(convert_position(object.vertices[vertex_index as usize]));
                    // Half-texel center bias keeps samples off the slot border.
                    uvs.push([
                        (ox as f32 + f32::from(uv[0]) + 0.5) / atlas_w,
                        (oy as f32 + f32::from(uv[1]) + 0.5) / atlas_h,
                    ]);
                    Ok(())
                };

            for (i, quad) in object.faces.quads.iter().enumerate() {
                if object.faces.quad_is_semi_transparent(i) != semi {
                    continue;
                }
                let key = PaletteKey {
                    palette: quad.palette,
                    clut: quad.clut,
                    semi_transparent: semi,
                };
                // (C, B, A) then (A, B, D).
                for corner in [2usize, 1, 0, 0, 1, 3] {
                    emit_corner(quad.vertices[corner], quad.uvs[corner], key)?;
                }
            }
            for (i, tri) in object.faces.tris.iter().enumerate() {
                if object.faces.tri_is_semi_transparent(i) != semi {
                    continue;
                }
                let key = PaletteKey {
                    palette: tri.palette,
                    clut: tri.clut,
                    semi_transparent: semi,
                };
                for corner in [2usize, 1, 0] {
                    emit_corner(tri.vertices[corner], tri.uvs[corner], key)?;
                }
            }

            let entry_count = positions.len() - first_entry;
            if entry_count > 0 {
                object_ranges.push(PrimitiveRange {
                    first_entry,
                    entry_count,
                    semi_transparent: semi,
                });
            }
        }

        ranges.push(object_ranges);
    }

    Ok(FlattenedGeometry {
        positions,
        uvs,
        ranges,
    })
}

fn object_node(model: &Model, object_index: usize, mesh: Option<Index<json::Mesh>>) -> Node {
    let children: Vec<Index<Node>> = model
        .node_tree
        .iter()
        .enumerate()
        .filter(|(_, parent)| **parent == Some(object_index))
        .map(|(child, _)| Index::new(child as u32))
        .collect();
    Node {
        name: Some(format!("object_{}", object_index)),
        mesh,
        children: if children.is_empty() {
            None
        } else {
            Some(children)
        },
        ..Default::default()
    }
}

/// Emits the shared position/UV/index buffers, one mesh per object slicing
/// them by byte offset, and one node per object wired from the parent tree.
fn push_meshes_and_nodes(
    fields: &mut GltfFieldsToAggregate,
    model: &Model,
    flattened: &FlattenedGeometry,
    opaque_material: usize,
    blend_material: usize,
) {
    if flattened.positions.is_empty() {
        // No faces anywhere: zero-length buffers are not valid output, but
        // the hierarchy still is.
        for object_index in 0..flattened.ranges.len() {
            fields.nodes.push(object_node(model, object_index, None));
        }
        return;
    }

    let position_bytes: &[u8] = bytemuck::cast_slice(&flattened.positions);
    let uv_bytes: &[u8] = bytemuck::cast_slice(&flattened.uvs);
    let indices: Vec<u32> = (0..flattened.positions.len() as u32).collect();
    let index_bytes: &[u8] = bytemuck::cast_slice(&indices);

    let position_view = fields.push_buffer("positions", position_bytes);
    fields.buffer_view[position_view].target =
        Some(Checked::Valid(json::buffer::Target::ArrayBuffer));
    let uv_view = fields.push_buffer("texcoords", uv_bytes);
    fields.buffer_view[uv_view].target = Some(Checked::Valid(json::buffer::Target::ArrayBuffer));
    let index_view = fields.push_buffer("indices", index_bytes);
    fields.buffer_view[index_view].target =
        Some(Checked::Valid(json::buffer::Target::ElementArrayBuffer));

    for (object_index, object_ranges) in flattened.ranges.iter().enumerate() {
        let mut primitives = Vec::new();

        for range in object_ranges {
            let slice =
                &flattened.positions[range.first_entry..range.first_entry + range.entry_count];
            let mut min = [f32::MAX; 3];
            let mut max = [f32::MIN; 3];
            for p in slice {
                for axis in 0..3 {
                    min[axis] = min[axis].min(p[axis]);
                    max[axis] = max[axis].max(p[axis]);
                }
            }

            let position_accessor = fields.accessor.len();
            fields.accessor.push(Accessor {
                buffer_view: Some(Index::new(position_view as u32)),
                byte_offset: Some(USize64((range.first_entry * 12) as u64)),
                component_type: Checked::Valid(GenericComponentType(ComponentType::F32)),
                count: USize64(range.entry_count as u64),
                min: Some(json!(min)),
                max: Some(json!(max)),
                name: Some(format!("object_{}_positions", object_index)),
                normalized: false,
                sparse: None,
                type_: Checked::Valid(Type::Vec3),
                extensions: None,
                extras: None,
            });

            let uv_accessor = fields.accessor.len();
            fields.accessor.push(Accessor {
                buffer_view: Some(Index::new(uv_view as u32)),
                byte_offset: Some(USize64((range.first_entry * 8) as u64)),
                component_type: Checked::Valid(GenericComponentType(ComponentType::F32)),
                count: USize64(range.entry_count as u64),
                min: None,
                max: None,
                name: Some(format!("object_{}_texcoords", object_index)),
                normalized: false,
                sparse: None,
                type_: Checked::Valid(Type::Vec2),
                extensions: None,
                extras: None,
            });

            let index_accessor = fields.accessor.len();
            fields.accessor.push(Accessor {
                buffer_view: Some(Index::new(index_view as u32)),
                byte_offset: Some(USize64((range.first_entry * 4) as u64)),
                component_type: Checked::Valid(GenericComponentType(ComponentType::U32)),
                count: USize64(range.entry_count as u64),
                min: None,
                max: None,
                name: Some(format!("object_{}_indices", object_index)),
                normalized: false,
                sparse: None,
                type_: Checked::Valid(Type::Scalar),
                extensions: None,
                extras: None,
            });

            let material = if range.semi_transparent {
                blend_material
            } else {
                opaque_material
            };

            primitives.push(Primitive {
                attributes: BTreeMap::from([
                    (
                        Checked::Valid(Semantic::Positions),
                        Index::new(position_accessor as u32),
                    ),
                    (
                        Checked::Valid(Semantic::TexCoords(0)),
                        Index::new(uv_accessor as u32),
                    ),
                ]),
                indices: Some(Index::new(index_accessor as u32)),
                material: Some(Index::new(material as u32)),
                mode: Checked::Valid(Mode::Triangles),
                targets: None,
                extensions: None,
                extras: None,
            });
        }

        let mesh_index = if primitives.is_empty() {
            None
        } else {
            fields.meshes.push(json::Mesh {
                name: Some(format!("object_{}", object_index)),
                primitives,
                weights: None,
                extensions: None,
                extras: None,
            });
            Some(Index::new((fields.meshes.len() - 1) as u32))
        };

        fields.nodes.push(object_node(model, object_index, mesh_index));
    }
}

/// Embeds the atlas PNG and returns (opaque, blend) material indices.
fn push_atlas_material(
    fields: &mut GltfFieldsToAggregate,
    atlas: &TextureAtlas,
) -> anyhow::Result<(usize, usize)> {
    let png = atlas.to_png_bytes()?;
    let image_index = fields.image.len();
    fields.image.push(json::Image {
        name: Some("atlas".to_string()),
        buffer_view: None,
        mime_type: Some(MimeType("image/png".to_string())),
        uri: Some(format!(
            "data:image/png;base64,{}",
            BASE64_STANDARD.encode(&png)
        )),
        extensions: None,
        extras: None,
    });

    // Nearest filtering: the atlas is paletted pixel art and slot borders
    // must not bleed into each other.
    let sampler_index = fields.sampler.len();
    fields.sampler.push(json::texture::Sampler {
        mag_filter: Some(Checked::Valid(MagFilter::Nearest)),
        min_filter: Some(Checked::Valid(MinFilter::Nearest)),
        wrap_s: Checked::Valid(WrappingMode::ClampToEdge),
        wrap_t: Checked::Valid(WrappingMode::ClampToEdge),
        ..Default::default()
    });

    let texture_index = fields.texture.len();
    fields.texture.push(json::Texture {
        name: Some("atlas".to_string()),
        sampler: Some(Index::new(sampler_index as u32)),
        source: Index::new(image_index as u32),
        extensions: None,
        extras: None,
    });

    let mut push_material = |name: &str, alpha_mode: AlphaMode| -> usize {
        let index = fields.material.len();
        fields.material.push(json::Material {
            name: Some(name.to_string()),
            alpha_mode: Checked::Valid(alpha_mode),
            double_sided: true,
            pbr_metallic_roughness: PbrMetallicRoughness {
                base_color_factor: PbrBaseColorFactor([1.0, 1.0, 1.0, 1.0]),
                base_color_texture: Some(json::texture::Info {
                    index: Index::new(texture_index as u32),
                    tex_coord: 0,
                    extensions: None,
                    extras: None,
                }),
                metallic_factor: StrengthFactor(0.0),
                roughness_factor: StrengthFactor(1.0),
                metallic_roughness_texture: None,
                extensions: None,
                extras: None,
            },
            ..Default::default()
        });
        index
    };

    let opaque = push_material("atlas_opaque", AlphaMode::Opaque);
    let blend = push_material("atlas_blend", AlphaMode::Blend);
    Ok((opaque, blend))
}

/// Emits one glTF animation per sub-animation: shared step input accessor,
/// rotation/translation/scale channels per object.
fn push_animation_set(fields: &mut GltfFieldsToAggregate, set: &DecodedAnimationSet) {
    for (sub_index, sub) in set.animation.sub_animations.iter().enumerate() {
        let tracks = &set.tracks[sub_index];
        let frame_count = sub.frame_count();
        if frame_count == 0 {
            continue;
        }

        let times: Vec<f32> = (0..frame_count).map(|f| f as f32 / FRAME_RATE).collect();
        let time_bytes: &[u8] = bytemuck::cast_slice(&times);
        let input_view = fields.push_buffer(
            &format!("anim_{}{}_times", set.label, sub.label),
            time_bytes,
        );
        let input_accessor = fields.accessor.len();
        fields.accessor.push(Accessor {
            buffer_view: Some(Index::new(input_view as u32)),
            byte_offset: Some(USize64(0)),
            component_type: Checked::Valid(GenericComponentType(ComponentType::F32)),
            count: USize64(frame_count as u64),
            min: Some(json!([0.0])),
            max: Some(json!([times[frame_count - 1]])),
            name: Some(format!("anim_{}{}_times", set.label, sub.label)),
            normalized: false,
            sparse: None,
            type_: Checked::Valid(Type::Scalar),
            extensions: None,
            extras: None,
        });

        let mut channels: Vec<Channel> = Vec::new();
        let mut samplers: Vec<Sampler> = Vec::new();

        for (object, track) in tracks.iter().enumerate() {
            let mut push_output =
                |fields: &mut GltfFieldsToAggregate, kind: &str, bytes: &[u8], ty: Type| -> usize {
                    let name = format!("anim_{}{}_obj{}_{}", set.label, sub.label, object, kind);
                    let view = fields.push_buffer(&name, bytes);
                    let accessor = fields.accessor.len();
                    fields.accessor.push(Accessor {
                        buffer_view: Some(Index::new(view as u32)),
                        byte_offset: Some(USize64(0)),
                        component_type: Checked::Valid(GenericComponentType(ComponentType::F32)),
                        count: USize64(frame_count as u64),
                        min: None,
                        max: None,
                        name: Some(name),
                        normalized: false,
                        sparse: None,
                        type_: Checked::Valid(ty),
                        extensions: None,
                        extras: None,
                    });
                    accessor
                };

            let rotation_accessor = push_output(
                fields,
                "rotation",
                bytemuck::cast_slice(&track.rotations),
                Type::Vec4,
            );
            let translation_accessor = push_output(
                fields,
                "translation",
                bytemuck::cast_slice(&track.translations),
                Type::Vec3,
            );
            let scale_accessor = push_output(
                fields,
                "scale",
                bytemuck::cast_slice(&track.scales),
                Type::Vec3,
            );

            for (property, output) in [
                (Property::Rotation, rotation_accessor),
                (Property::Translation, translation_accessor),
                (Property::Scale, scale_accessor),
            ] {
                let sampler_index = samplers.len();
                samplers.push(Sampler {
                    input: Index::new(input_accessor as u32),
                    interpolation: Checked::Valid(Interpolation::Step),
                    output: Index::new(output as u32),
                    extensions: None,
                    extras: None,
                });
                channels.push(Channel {
                    sampler: Index::new(sampler_index as u32),
                    target: Target {
                        node: Index::new(object as u32),
                        path: Checked::Valid(property),
                        extensions: None,
                        extras: None,
                    },
                    extensions: None,
                    extras: None,
                });
            }
        }

        fields.animation.push(json::Animation {
            name: Some(format!("{}{}", set.label, sub.label)),
            channels,
            samplers,
            extensions: None,
            extras: None,
        });
    }
}

/// Serializes the document. The caller only gets here with a fully decoded
/// entry, so a partially written file can only come from the OS failing
/// mid-write, never from bad disc data.
pub fn write_gltf(root: &Root, path: &std::path::Path) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(root).context("serializing glTF document")?;
    std::fs::write(path, text)
        .with_context(|| format!("writing glTF to {}", path.display()))?;
    Ok(())
}
