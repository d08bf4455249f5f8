//! Headless backend for tests and tooling.
//!
//! Performs no GPU work. Resources are kept as their descriptors (buffers keep
//! their bytes) and every command issued during a frame is recorded so callers
//! can inspect exactly what a render pass would have submitted.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::ops::Range;

/// A recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BindFramebuffer(Option<FramebufferHandle>),
    Clear {
        color: [f32; 4],
        depth: f32,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    UseProgram(ProgramHandle),
    BindUniformRange {
        slot: UniformSlot,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    BindTexture {
        unit: u32,
        texture: TextureHandle,
    },
    SetUniformBool {
        name: String,
        value: bool,
    },
    BindVertexArray(VertexArrayHandle),
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

const MAX_TEXTURE_UNITS: usize = 8;

/// Bound state a draw is validated against.
#[derive(Debug, Default)]
struct DrawState {
    program: Option<ProgramHandle>,
    uniforms: [bool; 2],
    textures: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    vertex_array: Option<VertexArrayHandle>,
}

/// Recording backend.
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    limits: DeviceLimits,

    buffers: HashMap<u64, (BufferDescriptor, Vec<u8>)>,
    textures: HashMap<u64, TextureDescriptor>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    programs: HashMap<u64, ProgramDescriptor>,
    vertex_arrays: HashMap<u64, VertexArrayDescriptor>,

    next_buffer_id: u64,
    next_texture_id: u64,
    next_framebuffer_id: u64,
    next_program_id: u64,
    next_vertex_array_id: u64,

    in_frame: bool,
    frames: u64,
    commands: Vec<Command>,
    draw_state: DrawState,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, DeviceLimits::default())
    }

    pub fn with_limits(width: u32, height: u32, limits: DeviceLimits) -> Self {
        Self {
            width,
            height,
            limits,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_framebuffer_id: 1,
            next_program_id: 1,
            next_vertex_array_id: 1,
            in_frame: false,
            frames: 0,
            commands: Vec::new(),
            draw_state: DrawState::default(),
        }
    }

    /// Commands recorded since the last `begin_frame`.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of frames ended so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Total vertex arrays ever created.
    pub fn vertex_array_count(&self) -> usize {
        self.vertex_arrays.len()
    }

    pub fn vertex_array(&self, handle: VertexArrayHandle) -> Option<&VertexArrayDescriptor> {
        self.vertex_arrays.get(&handle.0)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&handle.0)
    }

    pub fn framebuffer(&self, handle: FramebufferHandle) -> Option<&FramebufferDescriptor> {
        self.framebuffers.get(&handle.0)
    }

    pub fn program(&self, handle: ProgramHandle) -> Option<&ProgramDescriptor> {
        self.programs.get(&handle.0)
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, handle: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&handle.0).map(|(_, data)| data.as_slice())
    }

    fn validate_draw(&self) -> BackendResult<()> {
        let program = self
            .draw_state
            .program
            .ok_or_else(|| BackendError::InvalidDrawState("no current program".into()))?;
        let desc = self.programs.get(&program.0).ok_or(BackendError::UnknownHandle {
            kind: "program",
            id: program.0,
        })?;
        let vertex_array = self
            .draw_state
            .vertex_array
            .and_then(|h| self.vertex_arrays.get(&h.0))
            .ok_or_else(|| BackendError::InvalidDrawState("no current vertex array".into()))?;
        if vertex_array.program != program {
            return Err(BackendError::InvalidDrawState(format!(
                "Vertex array was created for program {} but program {} is current",
                vertex_array.program.0, program.0
            )));
        }
        if !self.draw_state.uniforms[UniformSlot::Global.index() as usize] {
            return Err(BackendError::InvalidDrawState("global block is not bound".into()));
        }
        let local_bound = self.draw_state.uniforms[UniformSlot::Local.index() as usize];
        if desc.uses_local_block && !local_bound {
            return Err(BackendError::InvalidDrawState("local block is not bound".into()));
        }
        for unit in 0..desc.textures.len() {
            let bound = self.draw_state.textures.get(unit).copied().flatten();
            if !bound.is_some_and(|t| self.textures.contains_key(&t.0)) {
                return Err(BackendError::InvalidDrawState(format!(
                    "texture unit {} is not bound",
                    unit
                )));
            }
        }
        Ok(())
    }

    fn record(&mut self, command: Command) {
        log::trace!("HeadlessBackend: {:?}", command);
        self.commands.push(command);
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn device_info(&self) -> String {
        "Headless (no GPU)".to_string()
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        self.commands.clear();
        self.in_frame = true;
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.in_frame {
            self.frames += 1;
        }
        self.in_frame = false;
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        self.create_buffer_init(desc, &vec![0; desc.size as usize])
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if data.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        log::trace!(
            "HeadlessBackend: creating buffer {:?} (size: {})",
            desc.label,
            data.len()
        );
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, (desc.clone(), data.to_vec()));
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some((_, contents)) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("HeadlessBackend: write to unknown buffer {}", buffer.0);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            log::warn!(
                "HeadlessBackend: write of {} bytes at {} overruns buffer of {} bytes",
                data.len(),
                offset,
                contents.len()
            );
            return;
        }
        contents[start..end].copy_from_slice(data);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        log::trace!(
            "HeadlessBackend: writing {} bytes ({}x{}) to texture {}",
            data.len(),
            width,
            height,
            texture.0
        );
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> BackendResult<FramebufferHandle> {
        let id = self.next_framebuffer_id;
        self.next_framebuffer_id += 1;
        self.framebuffers.insert(id, desc.clone());
        Ok(FramebufferHandle(id))
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        match self.framebuffers.get(&framebuffer.0) {
            Some(desc) => check_framebuffer(desc, &self.limits, |h| self.textures.get(&h.0)),
            None => FramebufferStatus::MissingAttachment,
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let id = self.next_program_id;
        self.next_program_id += 1;
        self.programs.insert(id, desc.clone());
        Ok(ProgramHandle(id))
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor,
    ) -> BackendResult<VertexArrayHandle> {
        if !self.programs.contains_key(&desc.program.0) {
            return Err(BackendError::UnknownHandle {
                kind: "program",
                id: desc.program.0,
            });
        }
        for buffer in [desc.vertex_buffer, desc.index_buffer] {
            if !self.buffers.contains_key(&buffer.0) {
                return Err(BackendError::UnknownHandle {
                    kind: "buffer",
                    id: buffer.0,
                });
            }
        }
        let id = self.next_vertex_array_id;
        self.next_vertex_array_id += 1;
        self.vertex_arrays.insert(id, desc.clone());
        Ok(VertexArrayHandle(id))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.record(Command::BindFramebuffer(framebuffer));
    }

    fn clear(&mut self, color: [f32; 4], depth: f32) {
        self.record(Command::Clear { color, depth });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.record(Command::SetViewport { x, y, width, height });
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.draw_state.program = Some(program);
        self.record(Command::UseProgram(program));
    }

    fn bind_uniform_range(
        &mut self,
        slot: UniformSlot,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) {
        self.draw_state.uniforms[slot.index() as usize] = true;
        self.record(Command::BindUniformRange {
            slot,
            buffer,
            offset,
            size,
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        match self.draw_state.textures.get_mut(unit as usize) {
            Some(slot) => *slot = Some(texture),
            None => log::warn!("HeadlessBackend: texture unit {} is out of range", unit),
        }
        self.record(Command::BindTexture { unit, texture });
    }

    fn set_uniform_bool(&mut self, name: &str, value: bool) {
        self.record(Command::SetUniformBool {
            name: name.to_string(),
            value,
        });
    }

    fn bind_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.draw_state.vertex_array = Some(vertex_array);
        self.record(Command::BindVertexArray(vertex_array));
    }

    fn draw_indexed(
        &mut self,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> BackendResult<()> {
        self.validate_draw()?;
        self.record(Command::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(backend: &mut HeadlessBackend, label: &str) -> ProgramHandle {
        backend
            .create_program(&ProgramDescriptor {
                label: label.to_string(),
                source: String::new(),
                vertex_entry: "vs_main".to_string(),
                fragment_entry: "fs_main".to_string(),
                output: ProgramOutput::Screen { depth_test: true },
                uses_local_block: true,
                textures: vec![TextureBinding::Sampled],
                flags: vec![],
                cull_mode: CullMode::Back,
            })
            .unwrap()
    }

    /// Two programs, a vertex array built for the first, and a uniform
    /// buffer plus texture bound so only the program pairing can fail.
    fn draw_setup() -> (HeadlessBackend, ProgramHandle, ProgramHandle, VertexArrayHandle) {
        let mut backend = HeadlessBackend::new(4, 4);
        let first = program(&mut backend, "first");
        let second = program(&mut backend, "second");
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 64,
                usage: BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::UNIFORM,
            })
            .unwrap();
        let vertex_array = backend
            .create_vertex_array(&VertexArrayDescriptor {
                label: None,
                program: first,
                vertex_buffer: buffer,
                index_buffer: buffer,
                index_format: IndexFormat::Uint32,
                stride: 12,
                base_offset: 0,
                attributes: vec![VertexArrayAttribute {
                    location: 0,
                    component_count: 3,
                    offset: 0,
                }],
            })
            .unwrap();
        let texture = backend.create_texture(&TextureDescriptor::default()).unwrap();

        backend.begin_frame().unwrap();
        backend.bind_framebuffer(None);
        backend.bind_uniform_range(UniformSlot::Global, buffer, 0, 16);
        backend.bind_uniform_range(UniformSlot::Local, buffer, 16, 16);
        backend.bind_texture(0, texture);
        backend.bind_vertex_array(vertex_array);
        (backend, first, second, vertex_array)
    }

    #[test]
    fn test_draw_with_matching_program_is_recorded() {
        let (mut backend, first, _, _) = draw_setup();
        backend.use_program(first);
        backend.draw_indexed(0..3, 0, 0..1).unwrap();
        assert_eq!(
            backend.commands().last(),
            Some(&Command::DrawIndexed {
                indices: 0..3,
                base_vertex: 0,
                instances: 0..1,
            })
        );
    }

    #[test]
    fn test_vertex_array_of_another_program_fails_draw() {
        let (mut backend, _, second, _) = draw_setup();
        backend.use_program(second);
        let result = backend.draw_indexed(0..3, 0, 0..1);
        assert!(matches!(result, Err(BackendError::InvalidDrawState(_))));
        assert!(!backend
            .commands()
            .iter()
            .any(|c| matches!(c, Command::DrawIndexed { .. })));
    }

    #[test]
    fn test_draw_without_program_fails() {
        let (mut backend, _, _, _) = draw_setup();
        let result = backend.draw_indexed(0..3, 0, 0..1);
        assert!(matches!(result, Err(BackendError::InvalidDrawState(_))));
    }

    #[test]
    fn test_unbound_texture_unit_fails_draw() {
        let mut backend = HeadlessBackend::new(4, 4);
        let first = program(&mut backend, "first");
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 64,
                usage: BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::UNIFORM,
            })
            .unwrap();
        let vertex_array = backend
            .create_vertex_array(&VertexArrayDescriptor {
                label: None,
                program: first,
                vertex_buffer: buffer,
                index_buffer: buffer,
                index_format: IndexFormat::Uint16,
                stride: 12,
                base_offset: 0,
                attributes: vec![],
            })
            .unwrap();
        backend.use_program(first);
        backend.bind_uniform_range(UniformSlot::Global, buffer, 0, 16);
        backend.bind_uniform_range(UniformSlot::Local, buffer, 16, 16);
        backend.bind_vertex_array(vertex_array);
        let result = backend.draw_indexed(0..3, 0, 0..1);
        assert!(matches!(result, Err(BackendError::InvalidDrawState(_))));
    }

    #[test]
    fn test_buffer_write_round_trip() {
        let mut backend = HeadlessBackend::new(4, 4);
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })
            .unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(
            backend.buffer_contents(buffer).unwrap(),
            &[0, 0, 0, 0, 1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_overrunning_write_is_ignored() {
        let mut backend = HeadlessBackend::new(4, 4);
        let buffer = backend
            .create_buffer_init(
                &BufferDescriptor {
                    label: None,
                    size: 4,
                    usage: BufferUsage::UNIFORM,
                },
                &[9; 4],
            )
            .unwrap();
        backend.write_buffer(buffer, 2, &[0; 4]);
        assert_eq!(backend.buffer_contents(buffer).unwrap(), &[9; 4]);
    }

    #[test]
    fn test_begin_frame_resets_command_log() {
        let mut backend = HeadlessBackend::new(4, 4);
        backend.begin_frame().unwrap();
        backend.clear([0.0; 4], 1.0);
        assert_eq!(backend.commands().len(), 1);
        backend.end_frame().unwrap();
        backend.begin_frame().unwrap();
        assert!(backend.commands().is_empty());
        assert_eq!(backend.frame_count(), 1);
    }

    #[test]
    fn test_zero_sized_texture_rejected() {
        let mut backend = HeadlessBackend::new(4, 4);
        let result = backend.create_texture(&TextureDescriptor {
            width: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(BackendError::TextureCreationFailed(_))));
    }
}
