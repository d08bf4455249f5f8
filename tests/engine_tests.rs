//! Engine integration tests on the headless backend.
//!
//! # Test Categories
//!
//! - **Scene Tests**: light/marker pairing and uniform arena layout
//! - **Pass Tests**: command sequences of the forward and deferred modes
//! - **Lifecycle Tests**: resize, overflow and initialization failures

mod common;

use common::{backend, backend_with_alignment, engine, setup_scene, HEIGHT, WIDTH};
use deferred_engine::backend::{Command, GraphicsBackend, HeadlessBackend, VertexArrayHandle};
use deferred_engine::error::EngineError;
use deferred_engine::pipeline::shaders::{SHOW_DEPTH, SHOW_NORMALS};
use deferred_engine::resources::{
    Material, MeshData, Model, Texture, TextureData, Vertex, VertexBufferAttribute,
    VertexBufferLayout,
};
use deferred_engine::scene::{CameraInput, LightKind, LIGHT_MARKER_SCALE, LOCAL_BLOCK_SIZE};
use deferred_engine::{Engine, EngineConfig, RenderMode};
use glam::{Mat4, Vec3};
use rstest::rstest;

fn bound_vertex_arrays(commands: &[Command]) -> Vec<VertexArrayHandle> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::BindVertexArray(handle) => Some(*handle),
            _ => None,
        })
        .collect()
}

fn draw_count(commands: &[Command]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, Command::DrawIndexed { .. }))
        .count()
}

// ============================================================================
// Scene Tests
// ============================================================================

#[test]
fn test_lights_get_marker_entities() {
    let engine = engine(2, 3);
    let scene = engine.scene();

    assert_eq!(scene.entities().len(), 5);
    for (i, light) in scene.lights().iter().enumerate() {
        let marker = &scene.entities()[light.entity()];
        assert_eq!(light.entity(), 2 + i);
        assert_eq!(marker.world_matrix.w_axis.truncate(), light.position);
        assert!((marker.world_matrix.x_axis.x - LIGHT_MARKER_SCALE).abs() < 1e-6);
    }
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(4)]
fn test_global_block_layout(#[case] lights: usize) {
    let mut engine = engine(1, lights);
    engine.render().unwrap();

    let global = engine.scene().global_params();
    assert_eq!(global.offset, 0);
    assert_eq!(global.size, 16 + 64 * lights as u64);
    assert_eq!(engine.uniforms().read_u32(12), Some(lights as u32));
}

#[rstest]
#[case(64)]
#[case(256)]
fn test_entity_blocks_are_aligned(#[case] alignment: u64) {
    let mut engine = Engine::init(
        backend_with_alignment(alignment),
        EngineConfig::default(),
        |ctx| setup_scene(ctx, 3, 2),
    )
    .unwrap();
    engine.render().unwrap();

    let global_end = engine.scene().global_params().end();
    let mut previous_end = global_end;
    for entity in engine.scene().entities() {
        let local = entity.local_params();
        assert_eq!(local.offset % alignment, 0);
        assert_eq!(local.size, LOCAL_BLOCK_SIZE);
        assert!(local.offset >= previous_end);
        assert_eq!(engine.uniforms().read_mat4(local.offset), Some(entity.world_matrix));
        previous_end = local.end();
    }
}

#[test]
fn test_two_light_records() {
    let mut engine = Engine::init(backend(), EngineConfig::default(), |ctx| {
        setup_scene(ctx, 1, 0)?;
        let model = ctx.scene.entities()[0].model;
        ctx.scene
            .add_point_light(model, Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 0.0, 0.0));
        ctx.scene.add_directional_light(
            model,
            Vec3::new(7.0, 2.0, 3.0),
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::ONE,
        );
        Ok(())
    })
    .unwrap();
    engine.render().unwrap();

    let uniforms = engine.uniforms();
    assert_eq!(uniforms.read_u32(12), Some(2));

    assert_eq!(uniforms.read_u32(16), Some(LightKind::Point as u32));
    assert_eq!(uniforms.read_vec3(32), Some(Vec3::new(1.0, 0.0, 0.0)));
    assert_eq!(uniforms.read_vec3(64), Some(Vec3::new(1.0, 2.0, 3.0)));

    assert_eq!(uniforms.read_u32(80), Some(LightKind::Directional as u32));
    assert_eq!(uniforms.read_vec3(112), Some(Vec3::new(-1.0, -1.0, 0.0)));
    assert_eq!(uniforms.read_vec3(128), Some(Vec3::new(7.0, 2.0, 3.0)));
}

#[test]
fn test_moved_light_moves_marker() {
    let mut engine = engine(1, 1);
    let target = Vec3::new(4.0, 5.0, 6.0);
    if let Some(light) = engine.scene_mut().light_mut(0) {
        light.position = target;
    }
    engine.render().unwrap();

    let marker = engine.scene().lights()[0].entity();
    assert_eq!(
        engine.scene().entities()[marker].world_matrix.w_axis.truncate(),
        target
    );
    assert_eq!(engine.uniforms().read_vec3(16 + 48), Some(target));
}

#[test]
fn test_update_moves_camera() {
    let mut engine = engine(1, 0);
    let input = CameraInput {
        forward: true,
        ..Default::default()
    };
    engine.update(&input, 0.5);

    let position = engine.scene().camera.position;
    assert!((position.z + 2.05 * 0.5).abs() < 1e-5);
    assert_eq!(engine.delta_time(), 0.5);
    assert!((engine.fps() - 2.0).abs() < 1e-5);
}

// ============================================================================
// Pass Tests
// ============================================================================

#[test]
fn test_deferred_fills_gbuffer_then_composes() {
    let mut engine = engine(2, 1);
    engine.render().unwrap();

    let gbuffer = engine.gbuffer().framebuffer();
    let commands = engine.backend().commands();
    assert_eq!(commands[0], Command::BindFramebuffer(Some(gbuffer)));
    assert_eq!(
        commands[1],
        Command::SetViewport {
            x: 0.0,
            y: 0.0,
            width: WIDTH as f32,
            height: HEIGHT as f32
        }
    );

    // Three entities in the G-buffer, one quad on screen
    assert_eq!(draw_count(commands), 4);
    assert!(commands.contains(&Command::BindFramebuffer(None)));
}

#[rstest]
#[case(RenderMode::Deferred, false, false)]
#[case(RenderMode::Depth, true, false)]
#[case(RenderMode::Normals, false, true)]
fn test_composition_sequence(
    #[case] mode: RenderMode,
    #[case] show_depth: bool,
    #[case] show_normals: bool,
) {
    let mut engine = engine(1, 1);
    engine.set_mode(mode);
    engine.render().unwrap();

    let attachments = engine.gbuffer().attachments();
    let commands = engine.backend().commands();
    let start = commands
        .iter()
        .position(|c| *c == Command::BindFramebuffer(None))
        .unwrap();
    let composition = &commands[start..];

    let textures: Vec<_> = composition
        .iter()
        .filter_map(|c| match c {
            Command::BindTexture { unit, texture } => Some((*unit, *texture)),
            _ => None,
        })
        .collect();
    let expected: Vec<_> = attachments
        .iter()
        .enumerate()
        .map(|(unit, texture)| (unit as u32, *texture))
        .collect();
    assert_eq!(textures, expected);

    assert!(composition.contains(&Command::SetUniformBool {
        name: SHOW_DEPTH.to_string(),
        value: show_depth
    }));
    assert!(composition.contains(&Command::SetUniformBool {
        name: SHOW_NORMALS.to_string(),
        value: show_normals
    }));
    assert_eq!(
        composition.last(),
        Some(&Command::DrawIndexed {
            indices: 0..6,
            base_vertex: 0,
            instances: 0..1
        })
    );
}

#[test]
fn test_forward_draws_to_screen_only() {
    let mut engine = engine(2, 2);
    engine.set_mode(RenderMode::Forward);
    engine.render().unwrap();

    let commands = engine.backend().commands();
    assert_eq!(commands[0], Command::BindFramebuffer(None));
    assert!(!commands
        .iter()
        .any(|c| matches!(c, Command::BindFramebuffer(Some(_)))));
    assert!(!commands
        .iter()
        .any(|c| matches!(c, Command::SetUniformBool { .. })));
    assert_eq!(draw_count(commands), 4);
}

#[test]
fn test_modes_use_their_own_vertex_arrays() {
    let mut engine = engine(1, 0);
    let created = engine.backend().vertex_array_count();

    engine.render().unwrap();
    let deferred = bound_vertex_arrays(engine.backend().commands());

    engine.set_mode(RenderMode::Forward);
    engine.render().unwrap();
    let forward = bound_vertex_arrays(engine.backend().commands());

    // The cube is drawn with a different program in each mode
    assert_ne!(deferred[0], forward[0]);
    let deferred_desc = engine.backend().vertex_array(deferred[0]).unwrap();
    let forward_desc = engine.backend().vertex_array(forward[0]).unwrap();
    assert_ne!(deferred_desc.program, forward_desc.program);

    // Everything was resolved during init
    assert_eq!(engine.backend().vertex_array_count(), created);
    assert_eq!(engine.bindings().len(), created);
}

/// Cube with a unit plane appended as a second submesh, each with its own
/// material, as the only entity of the scene.
fn two_submesh_engine() -> Engine<HeadlessBackend> {
    Engine::init(backend(), EngineConfig::default(), |ctx| {
        let mut data = MeshData::cube();
        data.append(&MeshData::plane(1.0, 1.0, 1));

        let mut materials = Vec::new();
        for name in ["cube", "plane"] {
            let texture = Texture::upload(ctx.backend, &TextureData::white())?;
            let texture = ctx.assets.add_texture(texture);
            materials.push(ctx.assets.add_material(Material::new(name, texture)));
        }
        let mesh = ctx.assets.add_mesh(data.upload(ctx.backend)?);
        let model = ctx.assets.add_model(Model {
            name: "cube_and_plane".to_string(),
            mesh,
            materials,
        });
        ctx.scene.add_entity(Mat4::IDENTITY, model);
        Ok(())
    })
    .unwrap()
}

#[rstest]
#[case(RenderMode::Forward)]
#[case(RenderMode::Deferred)]
fn test_each_submesh_draws_with_its_material(#[case] mode: RenderMode) {
    let mut engine = two_submesh_engine();
    engine.set_mode(mode);
    engine.render().unwrap();

    let assets = engine.assets();
    let model = assets.model(engine.scene().entities()[0].model).unwrap();
    let albedo: Vec<_> = model
        .materials
        .iter()
        .map(|&m| {
            let material = assets.material(m).unwrap();
            assets.texture(material.albedo_texture).unwrap().handle
        })
        .collect();

    // Only the geometry pass; composition rebinds unit 0 on screen
    let commands = engine.backend().commands();
    let geometry = match mode {
        RenderMode::Forward => commands,
        _ => {
            let end = commands
                .iter()
                .position(|c| *c == Command::BindFramebuffer(None))
                .unwrap();
            &commands[..end]
        }
    };
    let draws: Vec<_> = geometry
        .iter()
        .filter(|c| {
            matches!(
                c,
                Command::BindVertexArray(_)
                    | Command::BindTexture { unit: 0, .. }
                    | Command::DrawIndexed { .. }
            )
        })
        .cloned()
        .collect();

    let vertex_arrays = bound_vertex_arrays(&draws);
    assert_eq!(vertex_arrays.len(), 2);
    assert_ne!(vertex_arrays[0], vertex_arrays[1]);
    assert_eq!(
        draws,
        vec![
            Command::BindVertexArray(vertex_arrays[0]),
            Command::BindTexture {
                unit: 0,
                texture: albedo[0]
            },
            Command::DrawIndexed {
                indices: 0..36,
                base_vertex: 0,
                instances: 0..1
            },
            Command::BindVertexArray(vertex_arrays[1]),
            Command::BindTexture {
                unit: 0,
                texture: albedo[1]
            },
            Command::DrawIndexed {
                indices: 36..42,
                base_vertex: 0,
                instances: 0..1
            },
        ]
    );
}

#[test]
fn test_frames_are_counted() {
    let mut engine = engine(1, 1);
    for _ in 0..3 {
        engine.render().unwrap();
    }
    assert_eq!(engine.frame_count(), 3);
    assert_eq!(engine.backend().frame_count(), 3);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_resize_rebuilds_gbuffer() {
    let mut engine = engine(1, 0);
    let old_albedo = engine.gbuffer().albedo();

    engine.resize(1024, 512).unwrap();

    assert_eq!(engine.gbuffer().size(), (1024, 512));
    assert!(engine.backend().texture(old_albedo).is_none());
    let albedo = engine.backend().texture(engine.gbuffer().albedo()).unwrap();
    assert_eq!((albedo.width, albedo.height), (1024, 512));
    assert!(engine
        .backend()
        .framebuffer_status(engine.gbuffer().framebuffer())
        .is_complete());
}

#[test]
fn test_zero_resize_is_ignored() {
    let mut engine = engine(1, 0);
    engine.resize(0, 0).unwrap();
    assert_eq!(engine.gbuffer().size(), (WIDTH, HEIGHT));
    assert_eq!(engine.backend().surface_size(), (WIDTH, HEIGHT));
}

#[test]
fn test_uniform_overflow_fails_render() {
    let config = EngineConfig {
        uniform_buffer_size: Some(256),
        ..Default::default()
    };
    let mut engine = Engine::init(backend(), config, |ctx| setup_scene(ctx, 3, 0)).unwrap();

    let result = engine.render();
    assert!(matches!(result, Err(EngineError::UniformBufferOverflow { .. })));
    assert_eq!(engine.frame_count(), 0);
}

#[test]
fn test_missing_vertex_attribute_fails_init() {
    let result = Engine::init(backend(), EngineConfig::default(), |ctx| {
        let vertices = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let mut data = MeshData::new("positions_only");
        data.add_submesh_raw(
            VertexBufferLayout {
                attributes: vec![VertexBufferAttribute {
                    location: 0,
                    component_count: 3,
                    offset: 0,
                }],
                stride: 12,
            },
            bytemuck::cast_slice(&vertices),
            &[0, 1, 2],
        );
        let model = common::add_model(ctx, &data)?;
        ctx.scene.add_entity(glam::Mat4::IDENTITY, model);
        Ok(())
    });

    assert!(matches!(
        result,
        Err(EngineError::MissingVertexAttribute { location: 1, .. })
    ));
}

#[test]
fn test_zero_sized_surface_fails_init() {
    let result = Engine::init(HeadlessBackend::new(0, 600), EngineConfig::default(), |_| Ok(()));
    assert!(matches!(result, Err(EngineError::InvalidDisplaySize { .. })));
}

#[test]
fn test_standard_vertex_size() {
    assert_eq!(
        VertexBufferLayout::standard().stride,
        std::mem::size_of::<Vertex>() as u64
    );
}
