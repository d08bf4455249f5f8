//! Deferred Engine - a small forward/deferred renderer
//!
//! The engine draws a scene of textured meshes lit by directional and point
//! lights, either directly (forward) or through a G-buffer that a full-screen
//! composition pass resolves (deferred). The G-buffer depth and normal
//! attachments can be inspected with dedicated modes.
//!
//! # Features
//! - Uniform arena packing camera, lights and per-entity transforms each frame
//! - Vertex arrays resolved per (submesh, program) from shader introspection
//! - Four-target G-buffer with a completeness-checked framebuffer
//! - Backend trait with a wgpu implementation and a headless recorder

pub mod backend;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod window;

pub use backend::{GraphicsBackend, HeadlessBackend, WgpuBackend};
pub use engine::{Engine, SetupContext};
pub use error::{EngineError, EngineResult};
pub use pipeline::RenderMode;
pub use window::Window;

/// Configuration for initializing the graphics engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    pub initial_mode: RenderMode,
    /// Clear color of the default framebuffer
    pub clear_color: [f32; 4],
    /// Clear color of the G-buffer attachments
    pub gbuffer_clear_color: [f32; 4],
    /// Vertical field of view in degrees
    pub fov_y_degrees: f32,
    pub z_near: f32,
    pub z_far: f32,
    /// Camera speed in units per second
    pub move_speed: f32,
    /// Uniform arena capacity in bytes. Defaults to the device's maximum
    /// uniform block size.
    pub uniform_buffer_size: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Engine".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            initial_mode: RenderMode::Deferred,
            clear_color: [0.1, 0.1, 0.1, 1.0],
            gbuffer_clear_color: [0.0, 0.0, 0.0, 0.0],
            fov_y_degrees: 60.0,
            z_near: 0.1,
            z_far: 1000.0,
            move_speed: 2.05,
            uniform_buffer_size: None,
        }
    }
}
