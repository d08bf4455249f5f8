//! Deferred rendering demo
//!
//! Run with:
//!   cargo run --bin deferred-demo
//!   cargo run --bin deferred-demo -- --mode forward
//!
//! Controls:
//!   WASD     - Move camera
//!   1        - Forward shading
//!   2        - Deferred shading
//!   3        - G-buffer depth
//!   4        - G-buffer normals
//!   Escape   - Exit

use clap::Parser;
use deferred_engine::{
    backend::GraphicsBackend,
    error::EngineResult,
    resources::{Material, MeshData, Model, Texture, TextureData},
    scene::{Transform, LIGHT_MARKER_SCALE},
    window::{self, Window},
    Engine, EngineConfig, RenderMode, SetupContext, WgpuBackend,
};
use glam::Vec3;
use std::time::Instant;
use winit::event_loop::EventLoop;

/// Deferred shading demo with switchable G-buffer views.
#[derive(Parser, Debug)]
#[command(name = "deferred-demo", version)]
struct Args {
    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Render mode to start in: forward, deferred, depth or normals.
    #[arg(long, default_value = "deferred")]
    mode: RenderMode,

    /// Disable vertical sync (may cause tearing).
    #[arg(long)]
    no_vsync: bool,

    /// Uniform arena size in bytes (defaults to the device limit).
    #[arg(long)]
    uniform_buffer_size: Option<u64>,
}

/// Entities of the demo scene: position and uniform scale.
const ENTITIES: [(Vec3, f32); 5] = [
    (Vec3::new(0.0, 0.0, 2.0), 0.45),
    (Vec3::new(2.0, 0.0, 2.0), 0.45),
    (Vec3::new(3.0, -2.0, 2.0), 0.05),
    (Vec3::new(0.0, -12.0, -6.0), 0.85),
    (Vec3::new(0.0, -12.0, -16.0), 0.85),
];

const GROUND_POSITION: Vec3 = Vec3::new(0.0, -5.0, 0.0);

/// Directional lights: marker position, direction, color.
const DIRECTIONAL_LIGHTS: [(Vec3, Vec3, Vec3); 2] = [
    (Vec3::new(7.0, 2.0, 3.0), Vec3::new(-1.0, -1.0, 0.0), Vec3::ONE),
    (Vec3::new(4.0, 1.0, 1.0), Vec3::new(1.0, 1.0, 0.0), Vec3::ONE),
];

/// Point lights: position, color.
const POINT_LIGHTS: [(Vec3, Vec3); 8] = [
    (Vec3::new(2.0, 1.0, 1.0), Vec3::new(0.0, 1.0, 0.0)),
    (Vec3::new(-2.0, 1.0, 1.0), Vec3::new(0.0, 1.0, 0.0)),
    (Vec3::new(0.0, 2.0, -8.0), Vec3::ONE),
    (Vec3::new(6.0, 4.0, 5.0), Vec3::new(1.0, 0.0, 0.0)),
    (Vec3::new(2.0, 2.0, 2.0), Vec3::new(0.0, 0.0, 1.0)),
    (Vec3::new(0.0, 8.0, -32.0), Vec3::new(1.0, 0.0, 0.0)),
    (Vec3::new(13.0, 8.0, -37.0), Vec3::new(0.0, 1.0, 0.0)),
    (Vec3::new(-10.0, 7.0, -37.0), Vec3::new(0.0, 0.0, 1.0)),
];

fn add_model<B: GraphicsBackend>(
    ctx: &mut SetupContext<'_, B>,
    data: &MeshData,
    material: usize,
) -> EngineResult<usize> {
    let mesh = ctx.assets.add_mesh(data.upload(ctx.backend)?);
    Ok(ctx.assets.add_model(Model {
        name: data.name.clone(),
        mesh,
        materials: vec![material; data.submeshes.len()],
    }))
}

fn build_scene<B: GraphicsBackend>(ctx: &mut SetupContext<'_, B>) -> EngineResult<()> {
    let checker = Texture::upload(
        ctx.backend,
        &TextureData::checkerboard(64, [220, 220, 220, 255], [70, 70, 70, 255]),
    )?;
    let checker = ctx.assets.add_texture(checker);
    let white = Texture::upload(ctx.backend, &TextureData::white())?;
    let white = ctx.assets.add_texture(white);

    let checker_material = ctx.assets.add_material(Material::new("checker", checker));
    let marker_material = ctx.assets.add_material(Material::new("marker", white));

    let cube = add_model(ctx, &MeshData::cube(), checker_material)?;
    let ground = add_model(ctx, &MeshData::plane(40.0, 40.0, 8), checker_material)?;
    let sphere = add_model(ctx, &MeshData::sphere(24, 16), marker_material)?;
    let quad = add_model(ctx, &MeshData::plane(1.0, 1.0, 1), marker_material)?;

    for (position, scale) in ENTITIES {
        let transform = Transform::from_position_scale(position, Vec3::splat(scale));
        ctx.scene.add_entity(transform.matrix(), cube);
    }
    ctx.scene
        .add_entity(Transform::from_position(GROUND_POSITION).matrix(), ground);

    for (position, direction, color) in DIRECTIONAL_LIGHTS {
        ctx.scene
            .add_directional_light(quad, position, direction, color);
    }
    for (position, color) in POINT_LIGHTS {
        ctx.scene.add_point_light(sphere, position, color);
    }

    ctx.scene.camera.position = Vec3::new(0.0, 1.0, 10.0);
    log::info!(
        "Demo scene: {} entities, {} lights (markers scaled by {})",
        ctx.scene.entities().len(),
        ctx.scene.lights().len(),
        LIGHT_MARKER_SCALE
    );
    Ok(())
}

fn title(mode: RenderMode, fps: f32) -> String {
    format!("Deferred Demo - {} - {:.0} FPS", mode, fps)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = EngineConfig {
        title: title(args.mode, 0.0),
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        initial_mode: args.mode,
        uniform_buffer_size: args.uniform_buffer_size,
        ..Default::default()
    };

    let event_loop = EventLoop::new()?;
    let window = Window::new(&event_loop, &config.title, config.width, config.height)?;
    let backend = WgpuBackend::new(window.window_arc(), config.vsync)?;
    let mut engine = Engine::init(backend, config, build_scene)?;

    println!("Controls: WASD move, 1-4 switch mode, Escape exit");

    let mut last_frame = Instant::now();
    let mut last_title = Instant::now();
    window::run(event_loop, window, move |window| {
        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        if window.was_resized() {
            let (width, height) = window.dimensions();
            if let Err(e) = engine.resize(width, height) {
                log::error!("Resize failed: {}", e);
                return false;
            }
            window.clear_resize_flag();
        }
        if let Some(mode) = window.take_requested_mode() {
            engine.set_mode(mode);
        }

        engine.update(&window.camera_input(), dt);
        if let Err(e) = engine.render() {
            log::error!("Render failed: {}", e);
            return false;
        }

        if now.duration_since(last_title).as_secs_f32() > 0.5 {
            window.set_title(&title(engine.mode(), engine.fps()));
            last_title = now;
        }
        true
    })?;

    Ok(())
}
