//! Main engine orchestrator

use crate::backend::{BackendError, GraphicsBackend};
use crate::error::{EngineError, EngineResult};
use crate::pipeline::{GBuffer, RenderMode, Renderer};
use crate::resources::{Assets, BindingCache, UniformBuffer};
use crate::scene::{Camera, CameraController, CameraInput, FlyController, Scene};
use crate::EngineConfig;

/// What a setup callback may populate before the first frame.
pub struct SetupContext<'a, B: GraphicsBackend> {
    pub backend: &'a mut B,
    pub assets: &'a mut Assets,
    pub scene: &'a mut Scene,
}

/// The main graphics engine
///
/// Owns the backend and every piece of frame state. `update` applies input,
/// `render` packs the frame's uniforms and records the passes of the current
/// [`RenderMode`].
pub struct Engine<B: GraphicsBackend> {
    backend: B,
    assets: Assets,
    scene: Scene,
    uniforms: UniformBuffer,
    renderer: Renderer,
    controller: FlyController,
    config: EngineConfig,
    delta_time: f32,
    fps: f32,
    frame_count: u64,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Create the engine on `backend` and let `setup` load assets and build
    /// the scene.
    ///
    /// Every vertex array the scene needs is resolved before returning, so
    /// attribute mismatches are reported here.
    pub fn init<F>(mut backend: B, config: EngineConfig, setup: F) -> EngineResult<Self>
    where
        F: FnOnce(&mut SetupContext<'_, B>) -> EngineResult<()>,
    {
        log::info!("Initializing engine on {}", backend.device_info());

        let (width, height) = backend.surface_size();
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDisplaySize { width, height });
        }

        let mut assets = Assets::new();
        let mut renderer = Renderer::new(
            &mut backend,
            &mut assets,
            config.initial_mode,
            config.clear_color,
            config.gbuffer_clear_color,
        )?;

        let mut scene = Scene::new(Camera {
            fov_y_degrees: config.fov_y_degrees,
            near: config.z_near,
            far: config.z_far,
            ..Default::default()
        });
        setup(&mut SetupContext {
            backend: &mut backend,
            assets: &mut assets,
            scene: &mut scene,
        })?;

        let limits = backend.limits();
        let capacity = config
            .uniform_buffer_size
            .unwrap_or(limits.max_uniform_block_size);
        let uniforms = UniformBuffer::create(&mut backend, capacity)?;

        renderer.warm_up(&mut backend, &assets, &scene)?;
        let controller = FlyController::new().with_speed(config.move_speed);

        log::info!(
            "Engine ready: {} entities, {} lights, mode {}, {} camera",
            scene.entities().len(),
            scene.lights().len(),
            renderer.mode(),
            controller.name()
        );

        Ok(Self {
            backend,
            assets,
            scene,
            uniforms,
            renderer,
            controller,
            config,
            delta_time: 0.0,
            fps: 0.0,
            frame_count: 0,
        })
    }

    /// Apply camera input for a frame that took `dt` seconds.
    pub fn update(&mut self, input: &CameraInput, dt: f32) {
        self.delta_time = dt;
        if dt > 0.0 {
            let instant = 1.0 / dt;
            self.fps = if self.fps == 0.0 {
                instant
            } else {
                self.fps * 0.9 + instant * 0.1
            };
        }
        self.controller.update(&mut self.scene.camera, input, dt);
    }

    /// Pack the frame's uniforms and render it.
    pub fn render(&mut self) -> EngineResult<()> {
        let (width, height) = self.backend.surface_size();
        let aspect = width as f32 / height.max(1) as f32;
        let alignment = self.backend.limits().uniform_offset_alignment;

        self.scene
            .update_entity_buffer(&mut self.backend, &mut self.uniforms, alignment, aspect)?;

        match self.backend.begin_frame() {
            Ok(()) => {}
            Err(BackendError::SurfaceLost) => {
                log::warn!("Surface lost, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.renderer
            .render(&mut self.backend, &self.assets, &self.scene, &self.uniforms)?;
        self.backend.end_frame()?;

        self.frame_count += 1;
        log::trace!("Frame {} rendered in {} mode", self.frame_count, self.renderer.mode());
        Ok(())
    }

    /// Handle a window resize. Zero sizes (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> EngineResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.backend.resize(width, height);
        let (width, height) = self.backend.surface_size();
        self.renderer.resize(&mut self.backend, width, height)
    }

    pub fn mode(&self) -> RenderMode {
        self.renderer.mode()
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        self.renderer.set_mode(mode);
    }

    pub fn gbuffer(&self) -> &GBuffer {
        self.renderer.gbuffer()
    }

    pub fn bindings(&self) -> &BindingCache {
        self.renderer.bindings()
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    pub fn uniforms(&self) -> &UniformBuffer {
        &self.uniforms
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device_info(&self) -> String {
        self.backend.device_info()
    }

    /// Seconds taken by the last frame
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Smoothed frames per second
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
