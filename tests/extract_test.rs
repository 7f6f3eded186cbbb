// End-to-end extraction over a synthetic disc image: one single-object model
// with one textured quad and a two-frame animation, laid out with real sector
// geometry so the whole decode path crosses metadata gaps.

use base64::{prelude::BASE64_STANDARD, Engine};
use gltf::json::accessor::Accessor;
use gltf::json::animation::Interpolation;
use gltf::json::validation::Checked;
use gltf::json::Root;
use std::io::Cursor;

use psx_rip_tools::disc::LogicalDisc;
use psx_rip_tools::scene;

#[path = "common/mod.rs"]
mod common;

use common::{u32le, DiscImageBuilder};

const MODEL_SECTOR: usize = 2;
const ANIM_SECTOR: usize = 20;

/// Model header and per-object data, all offsets relative to the base sector.
fn write_model(builder: &mut DiscImageBuilder) {
    let mut header = Vec::new();
    header.extend_from_slice(&u32le(0x1000)); // texture sheet offset
    header.extend_from_slice(&u32le(0)); // reserved
    header.extend_from_slice(&u32le(1)); // object count
    header.extend_from_slice(&u32le(0x100)); // vertex offsets
    header.extend_from_slice(&u32le(0)); // normal offsets
    header.extend_from_slice(&u32le(0x200)); // face offsets
    header.extend_from_slice(&u32le(0)); // skeleton depths
    builder.write_in_sector(MODEL_SECTOR, 0, &header);

    // A unit quad in fixed-point model space.
    let mut vertices = Vec::new();
    vertices.extend_from_slice(&u32le(4));
    vertices.extend_from_slice(&[0, 0]); // reserved bytes before the records
    for (x, y, z) in [(0i16, 0i16, 0i16), (4096, 0, 0), (4096, 4096, 0), (0, 4096, 0)] {
        vertices.extend_from_slice(&x.to_le_bytes());
        vertices.extend_from_slice(&y.to_le_bytes());
        vertices.extend_from_slice(&z.to_le_bytes());
    }
    builder.write_in_sector(MODEL_SECTOR, 0x100, &vertices);

    // No semi-transparent faces, one opaque quad, no tris.
    let mut faces = Vec::new();
    faces.extend_from_slice(&u32le(0));
    faces.extend_from_slice(&u32le(1));
    faces.extend_from_slice(&[0, 1, 2, 3]); // vertex indices
    faces.extend_from_slice(&[0, 0, 0, 0]); // normal indices
    faces.extend_from_slice(&[0, 0, 127, 0, 127, 255, 0, 255]); // per-corner UVs
    faces.extend_from_slice(&[0, 0, 0, 0]); // palette, clut, command, pad
    faces.extend_from_slice(&u32le(0));
    faces.extend_from_slice(&u32le(0));
    builder.write_in_sector(MODEL_SECTOR, 0x200, &faces);

    // The all-zero sheet decodes to opaque black; reserving the space is
    // enough for the atlas path. 64 header bytes precede the texels.
    builder.write_in_sector(MODEL_SECTOR, 0x1000 + 64 + 0x4000 - 1, &[0]);
}

/// Two raw keyframes (identity, 90 degrees about Z) and one sub-animation
/// whose frame table plays them in order.
fn write_animation(builder: &mut DiscImageBuilder) {
    let mut header = Vec::new();
    header.extend_from_slice(&u32le(0)); // reserved, must be zero
    header.extend_from_slice(&u32le(0x100)); // object 0 transform stream
    header.extend_from_slice(&u32le(0x40)); // slot 'a'
    header.extend_from_slice(&u32le(1)); // end of slots
    builder.write_in_sector(ANIM_SECTOR, 0, &header);

    builder.write_in_sector(ANIM_SECTOR, 0x40, &[0, 1, 0xFE]);

    let identity = common::raw_transform([4096, 0, 0, 0, 4096, 0, 0, 0, 4096], [0, 0, 0]);
    let z_quarter = common::raw_transform([0, 4096, 0, -4096, 0, 0, 0, 0, 4096], [0, 0, 0]);
    builder.write_in_sector(ANIM_SECTOR, 0x100, &identity);
    builder.write_in_sector(ANIM_SECTOR, 0x100 + 24, &z_quarter);
}

fn rip_synthetic_model() -> Root {
    let mut builder = DiscImageBuilder::new();
    write_model(&mut builder);
    write_animation(&mut builder);

    let mut disc = LogicalDisc::open(Cursor::new(builder.build())).expect("open disc");
    scene::extract_model(
        &mut disc,
        "hero",
        MODEL_SECTOR as u64,
        &[(ANIM_SECTOR as u64, 'a')],
        None,
    )
    .expect("extract model")
}

fn accessor_named<'a>(root: &'a Root, name: &str) -> &'a Accessor {
    root.accessors
        .iter()
        .find(|a| a.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("no accessor named {}", name))
}

fn decode_buffer_of(root: &Root, accessor: &Accessor) -> Vec<u8> {
    let view = &root.buffer_views[accessor.buffer_view.unwrap().value()];
    let buffer = &root.buffers[view.buffer.value()];
    let uri = buffer.uri.as_ref().expect("embedded buffer");
    let b64 = uri
        .strip_prefix("data:application/octet-stream;base64,")
        .expect("data URI");
    BASE64_STANDARD.decode(b64).expect("valid padded base64")
}

#[test]
fn single_quad_model_produces_one_node_one_mesh_two_triangles() {
    let root = rip_synthetic_model();

    assert_eq!(root.nodes.len(), 1);
    assert_eq!(root.meshes.len(), 1);
    assert_eq!(root.meshes[0].primitives.len(), 1);
    assert_eq!(root.scenes[0].nodes.len(), 1);

    // One quad flattens to two triangles: six corner entries.
    let positions = accessor_named(&root, "object_0_positions");
    assert_eq!(positions.count.0, 6);
    let indices = accessor_named(&root, "object_0_indices");
    assert_eq!(indices.count.0, 6);
}

#[test]
fn animation_has_step_channels_and_quarter_turn_second_frame() {
    let root = rip_synthetic_model();

    assert_eq!(root.animations.len(), 1);
    let anim = &root.animations[0];
    assert_eq!(anim.name.as_deref(), Some("aa"));
    // Rotation, translation and scale for the single object.
    assert_eq!(anim.channels.len(), 3);
    assert_eq!(anim.samplers.len(), 3);
    for sampler in &anim.samplers {
        assert_eq!(sampler.interpolation, Checked::Valid(Interpolation::Step));
    }

    let times = accessor_named(&root, "anim_aa_times");
    assert_eq!(times.count.0, 2);

    let rotations = accessor_named(&root, "anim_aa_obj0_rotation");
    assert_eq!(rotations.count.0, 2);
    let bytes = decode_buffer_of(&root, rotations);
    let floats: &[f32] = bytemuck::cast_slice(&bytes);
    assert_eq!(floats.len(), 8);

    // Frame 0 is identity.
    assert!(floats[0].abs() < 1e-4 && floats[1].abs() < 1e-4 && floats[2].abs() < 1e-4);
    assert!((floats[3] - 1.0).abs() < 1e-4);
    // Frame 1 is a quarter turn about Z.
    let half = std::f32::consts::FRAC_1_SQRT_2;
    assert!(floats[4].abs() < 1e-4 && floats[5].abs() < 1e-4);
    assert!((floats[6] - half).abs() < 1e-4, "z = {}", floats[6]);
    assert!((floats[7] - half).abs() < 1e-4, "w = {}", floats[7]);
}

#[test]
fn every_embedded_buffer_decodes_as_padded_base64() {
    let root = rip_synthetic_model();
    assert!(!root.buffers.is_empty());
    for buffer in &root.buffers {
        let uri = buffer.uri.as_ref().expect("embedded buffer");
        let b64 = uri
            .split_once("base64,")
            .map(|(_, b)| b)
            .expect("data URI");
        let decoded = BASE64_STANDARD.decode(b64).expect("strict base64 with padding");
        assert_eq!(decoded.len() as u64, buffer.byte_length.0);
    }
}

#[test]
fn buffer_encoding_pads_per_rfc_4648() {
    // 0, 2 and 1 trailing pad characters for lengths 0, 1 and 2 mod 3.
    assert_eq!(BASE64_STANDARD.encode([1u8, 2, 3]), "AQID");
    assert_eq!(BASE64_STANDARD.encode([1u8, 2, 3, 4]), "AQIDBA==");
    assert_eq!(BASE64_STANDARD.encode([1u8, 2, 3, 4, 5]), "AQIDBAU=");
}

#[test]
fn written_gltf_is_valid_json_with_asset_version() {
    let root = rip_synthetic_model();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("hero.gltf");
    scene::write_gltf(&root, &path).expect("write");

    let text = std::fs::read_to_string(&path).expect("read back");
    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    assert_eq!(value["asset"]["version"], "2.0");
    assert_eq!(value["scenes"][0]["name"], "hero");
}
