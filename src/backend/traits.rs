//! Core backend abstraction traits
//!
//! The engine core talks to the GPU through a small bind-and-draw surface:
//! framebuffers, programs, vertex arrays, ranges of the uniform arena and
//! texture units. Backends translate that state into their own API.

use crate::backend::types::*;
use std::ops::Range;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Invalid draw state: {0}")]
    InvalidDrawState(String),
    #[error("Unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a set of render target attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub(crate) u64);

/// Handle to a vertex array (vertex layout bound for one program)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexArrayHandle(pub(crate) u64);

impl ProgramHandle {
    /// Stable numeric id of the program.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Human readable adapter and API description
    fn device_info(&self) -> String;

    /// Limits relevant to uniform packing and framebuffers
    fn limits(&self) -> DeviceLimits;

    /// Resize the default framebuffer
    fn resize(&mut self, width: u32, height: u32);

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<()>;

    /// Submit recorded work and present
    fn end_frame(&mut self) -> BackendResult<()>;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Create a texture together with its sampling state
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Write tightly packed data to mip level 0 of a texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Group textures into a render target
    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor)
        -> BackendResult<FramebufferHandle>;

    /// Completeness of a framebuffer created earlier
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;

    /// Destroy a framebuffer (attachments are left alive)
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Create a program from validated WGSL
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    /// Bind vertex and index buffers to a program's inputs
    fn create_vertex_array(&mut self, desc: &VertexArrayDescriptor)
        -> BackendResult<VertexArrayHandle>;

    // Command recording

    /// Select the draw target; `None` is the default framebuffer
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    /// Clear every attachment of the bound framebuffer
    fn clear(&mut self, color: [f32; 4], depth: f32);

    /// Set viewport
    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32);

    /// Make a program current
    fn use_program(&mut self, program: ProgramHandle);

    /// Bind a range of a buffer to a uniform block slot
    fn bind_uniform_range(
        &mut self,
        slot: UniformSlot,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    );

    /// Bind a texture to a texture unit
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    /// Set a boolean uniform of the current program
    fn set_uniform_bool(&mut self, name: &str, value: bool);

    /// Make a vertex array current
    fn bind_vertex_array(&mut self, vertex_array: VertexArrayHandle);

    /// Draw indexed primitives with the current state
    ///
    /// Fails when the current state cannot form a draw: no program, a vertex
    /// array created for another program, or an unbound uniform block or
    /// texture unit the program reads.
    fn draw_indexed(
        &mut self,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> BackendResult<()>;
}
