//! Shared helpers for the engine integration tests.
//!
//! Every test runs on the headless backend, which records the commands a
//! frame issues instead of submitting them to a GPU.

#![allow(dead_code)]

use deferred_engine::backend::{DeviceLimits, HeadlessBackend};
use deferred_engine::error::EngineResult;
use deferred_engine::resources::{Material, MeshData, Model, Texture, TextureData};
use deferred_engine::scene::Transform;
use deferred_engine::{Engine, EngineConfig, SetupContext};
use glam::Vec3;

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 600;

/// Upload `data` as a model with one material for every submesh.
pub fn add_model(
    ctx: &mut SetupContext<'_, HeadlessBackend>,
    data: &MeshData,
) -> EngineResult<usize> {
    let texture = Texture::upload(ctx.backend, &TextureData::white())?;
    let texture = ctx.assets.add_texture(texture);
    let material = ctx.assets.add_material(Material::new(&data.name, texture));
    let mesh = ctx.assets.add_mesh(data.upload(ctx.backend)?);
    Ok(ctx.assets.add_model(Model {
        name: data.name.clone(),
        mesh,
        materials: vec![material; data.submeshes.len()],
    }))
}

/// `entities` cubes on the X axis followed by `lights` point lights.
pub fn setup_scene(
    ctx: &mut SetupContext<'_, HeadlessBackend>,
    entities: usize,
    lights: usize,
) -> EngineResult<()> {
    let cube = add_model(ctx, &MeshData::cube())?;
    let sphere = add_model(ctx, &MeshData::sphere(8, 6))?;

    for i in 0..entities {
        let transform = Transform::from_position(Vec3::new(i as f32 * 2.0, 0.0, -5.0));
        ctx.scene.add_entity(transform.matrix(), cube);
    }
    for i in 0..lights {
        ctx.scene
            .add_point_light(sphere, Vec3::new(i as f32, 3.0, -2.0), Vec3::ONE);
    }
    Ok(())
}

pub fn backend() -> HeadlessBackend {
    HeadlessBackend::new(WIDTH, HEIGHT)
}

pub fn backend_with_alignment(alignment: u64) -> HeadlessBackend {
    HeadlessBackend::with_limits(
        WIDTH,
        HEIGHT,
        DeviceLimits {
            uniform_offset_alignment: alignment,
            ..Default::default()
        },
    )
}

/// Engine over the headless backend with a simple scene.
pub fn engine(entities: usize, lights: usize) -> Engine<HeadlessBackend> {
    Engine::init(backend(), EngineConfig::default(), |ctx| {
        setup_scene(ctx, entities, lights)
    })
    .unwrap()
}
