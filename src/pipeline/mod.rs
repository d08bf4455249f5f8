//! Forward and deferred rendering pipeline
//!
//! Forward mode draws the scene straight to the screen. The deferred modes
//! run in two passes:
//! 1. Geometry pass - renders the scene into the G-buffer (MRT)
//! 2. Composition pass - full-screen quad reading the G-buffer, either lit or
//!    showing the depth or normal attachment

pub mod composition_pass;
pub mod gbuffer;
pub mod geometry_pass;
pub mod shaders;

pub use composition_pass::{screen_quad, CompositionPass};
pub use gbuffer::{GBuffer, GBUFFER_COLOR_FORMATS, GBUFFER_DEPTH_FORMAT};

use std::fmt;
use std::str::FromStr;

use crate::backend::GraphicsBackend;
use crate::error::EngineResult;
use crate::resources::{Assets, BindingCache, Program, UniformBuffer};
use crate::scene::Scene;

/// What the renderer draws each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderMode {
    /// Lit geometry straight into the default framebuffer
    Forward,
    /// G-buffer fill followed by a lit composition pass
    #[default]
    Deferred,
    /// G-buffer depth shown in grayscale
    Depth,
    /// G-buffer normals shown as colors
    Normals,
}

impl RenderMode {
    pub const ALL: [RenderMode; 4] = [
        RenderMode::Forward,
        RenderMode::Deferred,
        RenderMode::Depth,
        RenderMode::Normals,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RenderMode::Forward => "Forward",
            RenderMode::Deferred => "Deferred",
            RenderMode::Depth => "Depth",
            RenderMode::Normals => "Normals",
        }
    }

    pub fn uses_gbuffer(&self) -> bool {
        !matches!(self, RenderMode::Forward)
    }

    pub fn show_depth(&self) -> bool {
        matches!(self, RenderMode::Depth)
    }

    pub fn show_normals(&self) -> bool {
        matches!(self, RenderMode::Normals)
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RenderMode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown render mode '{}', expected one of: forward, deferred, depth, normals",
                    s
                )
            })
    }
}

/// Owns the passes and the render targets, and sequences them per mode.
#[derive(Debug)]
pub struct Renderer {
    mode: RenderMode,
    forward_program: usize,
    gbuffer_program: usize,
    composition: CompositionPass,
    gbuffer: GBuffer,
    bindings: BindingCache,
    clear_color: [f32; 4],
    gbuffer_clear_color: [f32; 4],
}

impl Renderer {
    /// Load the pass programs and the quad into `assets` and build the G-buffer.
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        assets: &mut Assets,
        mode: RenderMode,
        clear_color: [f32; 4],
        gbuffer_clear_color: [f32; 4],
    ) -> EngineResult<Self> {
        let forward_program =
            assets.add_program(Program::load(backend, shaders::forward_program())?);
        let gbuffer_program =
            assets.add_program(Program::load(backend, shaders::gbuffer_program())?);
        let composition_program =
            assets.add_program(Program::load(backend, shaders::composition_program())?);
        let quad_mesh = assets.add_mesh(screen_quad(backend)?);

        let (width, height) = backend.surface_size();
        let gbuffer = GBuffer::build(backend, width, height)?;

        Ok(Self {
            mode,
            forward_program,
            gbuffer_program,
            composition: CompositionPass::new(quad_mesh, composition_program),
            gbuffer,
            bindings: BindingCache::new(),
            clear_color,
            gbuffer_clear_color,
        })
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        if mode != self.mode {
            log::info!("Render mode: {} -> {}", self.mode, mode);
        }
        self.mode = mode;
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn bindings(&self) -> &BindingCache {
        &self.bindings
    }

    pub fn forward_program<'a>(&self, assets: &'a Assets) -> EngineResult<&'a Program> {
        assets.program(self.forward_program)
    }

    pub fn gbuffer_program<'a>(&self, assets: &'a Assets) -> EngineResult<&'a Program> {
        assets.program(self.gbuffer_program)
    }

    pub fn composition_program<'a>(&self, assets: &'a Assets) -> EngineResult<&'a Program> {
        self.composition.program(assets)
    }

    /// Resolve every vertex array the scene needs in any mode.
    ///
    /// Attribute mismatches surface here instead of mid-frame.
    pub fn warm_up<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        assets: &Assets,
        scene: &Scene,
    ) -> EngineResult<()> {
        for program in [self.forward_program, self.gbuffer_program] {
            let program = assets.program(program)?;
            geometry_pass::resolve_scene(backend, assets, scene, &mut self.bindings, program)?;
        }
        self.composition.resolve(backend, assets, &mut self.bindings)?;
        log::debug!("Resolved {} vertex arrays", self.bindings.len());
        Ok(())
    }

    /// Rebuild the size-dependent targets.
    pub fn resize<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> EngineResult<()> {
        if self.gbuffer.resize(backend, width, height)? {
            log::debug!("G-Buffer resized to {}x{}", width, height);
        }
        Ok(())
    }

    /// Record the passes of the current mode.
    pub fn render<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        assets: &Assets,
        scene: &Scene,
        uniforms: &UniformBuffer,
    ) -> EngineResult<()> {
        if !self.mode.uses_gbuffer() {
            let (width, height) = backend.surface_size();
            let program = assets.program(self.forward_program)?;

            backend.bind_framebuffer(None);
            backend.set_viewport(0.0, 0.0, width as f32, height as f32);
            backend.clear(self.clear_color, 1.0);
            backend.use_program(program.handle);
            return geometry_pass::draw_scene(
                backend,
                assets,
                scene,
                uniforms,
                &mut self.bindings,
                program,
            );
        }

        let (width, height) = self.gbuffer.size();
        let program = assets.program(self.gbuffer_program)?;

        backend.bind_framebuffer(Some(self.gbuffer.framebuffer()));
        backend.set_viewport(0.0, 0.0, width as f32, height as f32);
        backend.clear(self.gbuffer_clear_color, 1.0);
        backend.use_program(program.handle);
        geometry_pass::draw_scene(backend, assets, scene, uniforms, &mut self.bindings, program)?;

        self.composition.draw(
            backend,
            assets,
            scene,
            uniforms,
            &mut self.bindings,
            &self.gbuffer,
            self.mode,
            self.clear_color,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("forward", RenderMode::Forward)]
    #[case("Deferred", RenderMode::Deferred)]
    #[case("DEPTH", RenderMode::Depth)]
    #[case("normals", RenderMode::Normals)]
    fn test_parse_mode(#[case] input: &str, #[case] expected: RenderMode) {
        assert_eq!(input.parse::<RenderMode>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown_mode() {
        assert!("wireframe".parse::<RenderMode>().is_err());
    }

    #[test]
    fn test_mode_flags() {
        assert!(!RenderMode::Forward.uses_gbuffer());
        for mode in &RenderMode::ALL[1..] {
            assert!(mode.uses_gbuffer());
        }
        assert!(RenderMode::Depth.show_depth() && !RenderMode::Depth.show_normals());
        assert!(RenderMode::Normals.show_normals() && !RenderMode::Normals.show_depth());
        assert!(!RenderMode::Deferred.show_depth() && !RenderMode::Deferred.show_normals());
    }
}
