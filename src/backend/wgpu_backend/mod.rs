//! wgpu backend implementation
//!
//! The bind-and-draw state of [`GraphicsBackend`] is resolved into wgpu
//! objects at each draw call:
//! - pipelines are cached per (program, vertex layout), one per vertex array
//!   layout a program is used with
//! - uniform arena ranges bind through dynamic offsets on cached bind groups
//! - the texture units of a program form its group 2 bind group, cached per
//!   texture set
//!
//! Commands between two framebuffer binds are buffered and replayed in a
//! single render pass when the target changes or the frame ends.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Smallest binding of the global block: header plus one light record.
/// Runtime-sized arrays need room for at least one element.
const GLOBALS_MIN_BINDING_SIZE: u64 = 80;
const MAX_TEXTURE_UNITS: usize = 8;
const SAMPLER_BINDING_BASE: u32 = 8;
const FLAGS_BINDING: u32 = 16;
const MAX_FLAGS: usize = 4;
const FLAGS_BLOCK_SIZE: u64 = 16;
const SCREEN_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetPipeline(u64),
    SetBindGroup {
        index: u32,
        bind_group: u64,
        offsets: Vec<u32>,
    },
    SetVertexBuffer { buffer: BufferHandle, offset: u64 },
    SetIndexBuffer {
        buffer: BufferHandle,
        format: IndexFormat,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    framebuffer: Option<FramebufferHandle>,
    clear: Option<([f32; 4], f32)>,
    has_draws: bool,
    commands: Vec<RenderCommand>,
}

impl PendingRenderPass {
    fn new(framebuffer: Option<FramebufferHandle>) -> Self {
        Self {
            framebuffer,
            clear: None,
            has_draws: false,
            commands: Vec::new(),
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    desc: TextureDescriptor,
}

struct GpuProgram {
    desc: ProgramDescriptor,
    module: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    texture_layout: wgpu::BindGroupLayout,
    flags_buffer: Option<wgpu::Buffer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u64,
    stride: u64,
    /// (location, component count, offset relative to the base offset)
    attributes: Vec<(u32, u32, u64)>,
}

struct GpuVertexArray {
    program: ProgramHandle,
    pipeline: u64,
    vertex_buffer: BufferHandle,
    base_offset: u64,
    index_buffer: BufferHandle,
    index_format: IndexFormat,
}

#[derive(Debug, Clone, Copy)]
struct UniformRange {
    buffer: BufferHandle,
    offset: u64,
    size: u64,
}

/// GL-style current state, resolved at each draw.
#[derive(Default)]
struct DrawState {
    program: Option<ProgramHandle>,
    uniforms: [Option<UniformRange>; 2],
    textures: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    vertex_array: Option<VertexArrayHandle>,
    viewport: Option<[f32; 4]>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    current_texture: Option<wgpu::SurfaceTexture>,
    depth_view: wgpu::TextureView,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, GpuTexture>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    programs: HashMap<u64, GpuProgram>,
    vertex_arrays: HashMap<u64, GpuVertexArray>,
    pipelines: HashMap<u64, wgpu::RenderPipeline>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,

    // Caches keyed by what the objects were built from
    pipeline_cache: HashMap<PipelineKey, u64>,
    uniform_bind_groups: HashMap<(UniformSlot, u64, u64), u64>,
    texture_bind_groups: HashMap<(u64, Vec<u64>), u64>,

    // Layouts shared by every program
    globals_layout: wgpu::BindGroupLayout,
    locals_layout: wgpu::BindGroupLayout,
    empty_layout: wgpu::BindGroupLayout,
    empty_bind_group: u64,

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_framebuffer_id: u64,
    next_program_id: u64,
    next_vertex_array_id: u64,
    next_pipeline_id: u64,
    next_bind_group_id: u64,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,
    pending_render_pass: Option<PendingRenderPass>,
    draw_state: DrawState,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }

    fn convert_index_format(format: IndexFormat) -> wgpu::IndexFormat {
        match format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }

    fn convert_cull_mode(mode: CullMode) -> Option<wgpu::Face> {
        match mode {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        }
    }

    fn vertex_format(component_count: u32) -> Option<wgpu::VertexFormat> {
        match component_count {
            1 => Some(wgpu::VertexFormat::Float32),
            2 => Some(wgpu::VertexFormat::Float32x2),
            3 => Some(wgpu::VertexFormat::Float32x3),
            4 => Some(wgpu::VertexFormat::Float32x4),
            _ => None,
        }
    }

    /// Clamp to device limits while maintaining aspect ratio
    fn clamp_surface_size(device: &wgpu::Device, width: u32, height: u32) -> (u32, u32) {
        let max_size = device.limits().max_texture_dimension_2d;
        if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            )
        } else {
            (width.max(1), height.max(1))
        }
    }

    fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Default Depth Buffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SCREEN_DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }
}

impl WgpuBackend {
    /// Create the backend for a window, blocking until the device is ready
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    /// Async initialization, wrapped by `new`
    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window.clone()).await?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed("Surface reports no supported formats".into())
            })?;

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let (width, height) = Self::clamp_surface_size(&device, size.width, size.height);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let depth_view = Self::create_depth_view(&device, width, height);

        let globals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Globals Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let locals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Locals Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let empty_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Empty Layout"),
            entries: &[],
        });
        let empty = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Empty Bind Group"),
            layout: &empty_layout,
            entries: &[],
        });

        let mut bind_groups = HashMap::new();
        bind_groups.insert(1, empty);

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            current_texture: None,
            depth_view,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            pipelines: HashMap::new(),
            bind_groups,
            pipeline_cache: HashMap::new(),
            uniform_bind_groups: HashMap::new(),
            texture_bind_groups: HashMap::new(),
            globals_layout,
            locals_layout,
            empty_layout,
            empty_bind_group: 1,
            next_buffer_id: 1,
            next_texture_id: 1,
            next_framebuffer_id: 1,
            next_program_id: 1,
            next_vertex_array_id: 1,
            next_pipeline_id: 1,
            next_bind_group_id: 2,
            encoder: None,
            pending_render_pass: None,
            draw_state: DrawState::default(),
        })
    }

    /// Native initialization
    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        // On Windows, try Vulkan first to avoid D3D12 debug layer validation errors
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::Backends::all()
        } else {
            #[cfg(target_os = "windows")]
            {
                wgpu::Backends::VULKAN
            }
            #[cfg(not(target_os = "windows"))]
            {
                wgpu::Backends::all()
            }
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await;

        // If no adapter found with preferred backend, try with all backends
        let fallback = adapter.is_none() && backends != wgpu::Backends::all();
        let (instance, surface, adapter) = if fallback {
            log::warn!("Preferred backend not available, falling back to all backends");
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let surface = instance
                .create_surface(window.clone())
                .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| {
                    BackendError::InitializationFailed("No suitable adapter found".into())
                })?;
            (instance, surface, adapter)
        } else {
            let adapter = adapter.ok_or_else(|| {
                BackendError::InitializationFailed("No suitable adapter found".into())
            })?;
            (instance, surface, adapter)
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Graphics Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }

    fn insert_bind_group(&mut self, bind_group: wgpu::BindGroup) -> u64 {
        let id = self.next_bind_group_id;
        self.next_bind_group_id += 1;
        self.bind_groups.insert(id, bind_group);
        id
    }

    fn record(&mut self, command: RenderCommand) {
        let pass = self
            .pending_render_pass
            .get_or_insert_with(|| PendingRenderPass::new(None));
        if matches!(command, RenderCommand::DrawIndexed { .. }) {
            pass.has_draws = true;
        }
        pass.commands.push(command);
    }

    /// Pipeline for a program with one vertex layout, created on first use.
    fn pipeline_for(&mut self, key: PipelineKey) -> BackendResult<u64> {
        if let Some(id) = self.pipeline_cache.get(&key) {
            return Ok(*id);
        }

        let program = self.programs.get(&key.program).ok_or(BackendError::UnknownHandle {
            kind: "program",
            id: key.program,
        })?;

        let attributes = key
            .attributes
            .iter()
            .map(|&(location, component_count, offset)| {
                let format = Self::vertex_format(component_count).ok_or_else(|| {
                    BackendError::PipelineCreationFailed(format!(
                        "Location {} has {} components",
                        location, component_count
                    ))
                })?;
                Ok(wgpu::VertexAttribute {
                    format,
                    offset,
                    shader_location: location,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: key.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let (color_formats, depth_stencil) = match &program.desc.output {
            ProgramOutput::Screen { depth_test } => (
                vec![self.surface_config.format],
                Some(wgpu::DepthStencilState {
                    format: SCREEN_DEPTH_FORMAT,
                    depth_write_enabled: *depth_test,
                    depth_compare: if *depth_test {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
            ),
            ProgramOutput::Offscreen {
                color_formats,
                depth_format,
            } => (
                color_formats
                    .iter()
                    .copied()
                    .map(Self::convert_texture_format)
                    .collect(),
                depth_format.map(|format| wgpu::DepthStencilState {
                    format: Self::convert_texture_format(format),
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
            ),
        };

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = color_formats
            .into_iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.desc.label.as_str()),
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: &program.desc.vertex_entry,
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: &program.desc.fragment_entry,
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Self::convert_cull_mode(program.desc.cull_mode),
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        log::debug!(
            "Created pipeline for program '{}' (stride {}, {} attributes)",
            program.desc.label,
            key.stride,
            key.attributes.len()
        );

        let id = self.next_pipeline_id;
        self.next_pipeline_id += 1;
        self.pipelines.insert(id, pipeline);
        self.pipeline_cache.insert(key, id);
        Ok(id)
    }

    /// Bind group and dynamic offset for a uniform arena range.
    fn uniform_bind_group(
        &mut self,
        slot: UniformSlot,
        range: UniformRange,
    ) -> BackendResult<(u64, u32)> {
        let buffer = self.buffers.get(&range.buffer.0).ok_or(BackendError::UnknownHandle {
            kind: "buffer",
            id: range.buffer.0,
        })?;

        let size = match slot {
            UniformSlot::Global => range.size.max(GLOBALS_MIN_BINDING_SIZE),
            UniformSlot::Local => range.size,
        };
        let size = size.min(buffer.size().saturating_sub(range.offset));
        let key = (slot, range.buffer.0, size);
        if let Some(id) = self.uniform_bind_groups.get(&key) {
            return Ok((*id, range.offset as u32));
        }

        let (label, layout) = match slot {
            UniformSlot::Global => ("Globals Bind Group", &self.globals_layout),
            UniformSlot::Local => ("Locals Bind Group", &self.locals_layout),
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: 0,
                    size: NonZeroU64::new(size),
                }),
            }],
        });

        let id = self.insert_bind_group(bind_group);
        self.uniform_bind_groups.insert(key, id);
        Ok((id, range.offset as u32))
    }

    /// Group 2 bind group of a program for the currently bound texture units.
    fn texture_bind_group(&mut self, program: ProgramHandle) -> BackendResult<u64> {
        let gpu_program = self.programs.get(&program.0).ok_or(BackendError::UnknownHandle {
            kind: "program",
            id: program.0,
        })?;

        let mut texture_ids = Vec::with_capacity(gpu_program.desc.textures.len());
        for unit in 0..gpu_program.desc.textures.len() {
            let texture = self.draw_state.textures[unit].ok_or_else(|| {
                BackendError::InvalidDrawState(format!("texture unit {} is not bound", unit))
            })?;
            texture_ids.push(texture.0);
        }

        let key = (program.0, texture_ids);
        if let Some(id) = self.texture_bind_groups.get(&key) {
            return Ok(*id);
        }

        let mut entries = Vec::new();
        let units = key.1.iter().zip(&gpu_program.desc.textures);
        for (unit, (texture_id, binding)) in units.enumerate() {
            let texture = self.textures.get(texture_id).ok_or(BackendError::UnknownHandle {
                kind: "texture",
                id: *texture_id,
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: unit as u32,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            if *binding == TextureBinding::Sampled {
                entries.push(wgpu::BindGroupEntry {
                    binding: SAMPLER_BINDING_BASE + unit as u32,
                    resource: wgpu::BindingResource::Sampler(&texture.sampler),
                });
            }
        }
        if let Some(flags) = &gpu_program.flags_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: FLAGS_BINDING,
                resource: flags.as_entire_binding(),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(gpu_program.desc.label.as_str()),
            layout: &gpu_program.texture_layout,
            entries: &entries,
        });

        let id = self.insert_bind_group(bind_group);
        self.texture_bind_groups.insert(key, id);
        Ok(id)
    }

    /// Turn the current draw state into pass commands.
    fn prepare_draw(&mut self) -> BackendResult<Vec<RenderCommand>> {
        let program = self
            .draw_state
            .program
            .ok_or_else(|| BackendError::InvalidDrawState("no current program".into()))?;
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
        let pipeline = vertex_array.pipeline;
        let vertex_buffer = vertex_array.vertex_buffer;
        let base_offset = vertex_array.base_offset;
        let index_buffer = vertex_array.index_buffer;
        let index_format = vertex_array.index_format;

        let uses_local_block = self
            .programs
            .get(&program.0)
            .map(|p| p.desc.uses_local_block)
            .unwrap_or(false);

        let global = self.draw_state.uniforms[UniformSlot::Global.index() as usize]
            .ok_or_else(|| BackendError::InvalidDrawState("global block is not bound".into()))?;
        let (globals, globals_offset) = self.uniform_bind_group(UniformSlot::Global, global)?;

        let (locals, locals_offsets) = if uses_local_block {
            let local = self.draw_state.uniforms[UniformSlot::Local.index() as usize]
                .ok_or_else(|| BackendError::InvalidDrawState("local block is not bound".into()))?;
            let (bind_group, offset) = self.uniform_bind_group(UniformSlot::Local, local)?;
            (bind_group, vec![offset])
        } else {
            (self.empty_bind_group, Vec::new())
        };

        let textures = self.texture_bind_group(program)?;

        Ok(vec![
            RenderCommand::SetPipeline(pipeline),
            RenderCommand::SetBindGroup {
                index: 0,
                bind_group: globals,
                offsets: vec![globals_offset],
            },
            RenderCommand::SetBindGroup {
                index: 1,
                bind_group: locals,
                offsets: locals_offsets,
            },
            RenderCommand::SetBindGroup {
                index: 2,
                bind_group: textures,
                offsets: Vec::new(),
            },
            RenderCommand::SetVertexBuffer {
                buffer: vertex_buffer,
                offset: base_offset,
            },
            RenderCommand::SetIndexBuffer {
                buffer: index_buffer,
                format: index_format,
            },
        ])
    }

    /// Replay the pending pass into the frame encoder.
    fn flush_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };

        let Some(mut encoder) = self.encoder.take() else {
            return;
        };

        let swapchain_view: Option<wgpu::TextureView> = self
            .current_texture
            .as_ref()
            .map(|tex| tex.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        {
            let (color_views, depth_view): (Vec<&wgpu::TextureView>, Option<&wgpu::TextureView>) =
                match pending.framebuffer {
                    None => (swapchain_view.iter().collect(), Some(&self.depth_view)),
                    Some(framebuffer) => match self.framebuffers.get(&framebuffer.0) {
                        Some(desc) => (
                            desc.color_attachments
                                .iter()
                                .filter_map(|h| self.textures.get(&h.0).map(|t| &t.view))
                                .collect(),
                            desc.depth_attachment
                                .and_then(|h| self.textures.get(&h.0))
                                .map(|t| &t.view),
                        ),
                        None => {
                            log::warn!("Dropping pass for unknown framebuffer {}", framebuffer.0);
                            (Vec::new(), None)
                        }
                    },
                };

            if !color_views.is_empty() {
                let (color_load, depth_load) = match pending.clear {
                    Some((color, depth)) => (
                        wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        wgpu::LoadOp::Clear(depth),
                    ),
                    None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
                };

                let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
                    .into_iter()
                    .map(|view| {
                        Some(wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: color_load,
                                store: wgpu::StoreOp::Store,
                            },
                        })
                    })
                    .collect();

                let depth_attachment =
                    depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    });

                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(if pending.framebuffer.is_some() {
                        "Offscreen Pass"
                    } else {
                        "Screen Pass"
                    }),
                    color_attachments: &color_attachments,
                    depth_stencil_attachment: depth_attachment,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });

                // Execute buffered commands
                for cmd in &pending.commands {
                    match cmd {
                        RenderCommand::SetPipeline(id) => {
                            if let Some(pipeline) = self.pipelines.get(id) {
                                render_pass.set_pipeline(pipeline);
                            }
                        }
                        RenderCommand::SetBindGroup {
                            index,
                            bind_group,
                            offsets,
                        } => {
                            if let Some(bg) = self.bind_groups.get(bind_group) {
                                render_pass.set_bind_group(*index, bg, offsets);
                            }
                        }
                        RenderCommand::SetVertexBuffer { buffer, offset } => {
                            if let Some(buf) = self.buffers.get(&buffer.0) {
                                render_pass.set_vertex_buffer(0, buf.slice(*offset..));
                            }
                        }
                        RenderCommand::SetIndexBuffer { buffer, format } => {
                            if let Some(buf) = self.buffers.get(&buffer.0) {
                                render_pass.set_index_buffer(
                                    buf.slice(..),
                                    Self::convert_index_format(*format),
                                );
                            }
                        }
                        RenderCommand::SetViewport {
                            x,
                            y,
                            width,
                            height,
                        } => {
                            render_pass.set_viewport(*x, *y, *width, *height, 0.0, 1.0);
                        }
                        RenderCommand::DrawIndexed {
                            indices,
                            base_vertex,
                            instances,
                        } => {
                            render_pass.draw_indexed(
                                indices.clone(),
                                *base_vertex,
                                instances.clone(),
                            );
                        }
                    }
                }
            }
        }

        // Put encoder back
        self.encoder = Some(encoder);
    }

    /// Forget cached bind groups that reference a texture.
    fn invalidate_texture_bind_groups(&mut self, texture: u64) {
        let stale: Vec<u64> = self
            .texture_bind_groups
            .iter()
            .filter(|((_, textures), _)| textures.contains(&texture))
            .map(|(_, id)| *id)
            .collect();
        self.texture_bind_groups
            .retain(|(_, textures), _| !textures.contains(&texture));
        for id in stale {
            self.bind_groups.remove(&id);
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn device_info(&self) -> String {
        let info = self.adapter.get_info();
        format!("{} ({:?})", info.name, info.backend)
    }

    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            max_uniform_block_size: limits.max_uniform_buffer_binding_size as u64,
            uniform_offset_alignment: limits
                .min_uniform_buffer_offset_alignment
                .max(limits.min_storage_buffer_offset_alignment) as u64,
            max_color_attachments: limits.max_color_attachments,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let (width, height) = Self::clamp_surface_size(&self.device, width, height);
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
            self.depth_view = Self::create_depth_view(&self.device, width, height);
            log::debug!("Surface resized to {}x{}", width, height);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                return Err(BackendError::SurfaceLost);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
            Err(e) => return Err(BackendError::AcquireImageFailed(e.to_string())),
        };

        self.current_texture = Some(output);
        self.pending_render_pass = None;
        self.draw_state = DrawState::default();
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.flush_render_pass();

        // Submit any pending commands
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }

        // Present the swapchain
        if let Some(texture) = self.current_texture.take() {
            texture.present();
        }

        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
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
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(buf, offset, data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: Self::convert_address_mode(desc.sampler.address_mode_u),
            address_mode_v: Self::convert_address_mode(desc.sampler.address_mode_v),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: Self::convert_filter_mode(desc.sampler.mag_filter),
            min_filter: Self::convert_filter_mode(desc.sampler.min_filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                sampler,
                desc: desc.clone(),
            },
        );

        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        if let Some(tex) = self.textures.get(&texture.0) {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &tex.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(width * tex.desc.format.bytes_per_pixel()),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.invalidate_texture_bind_groups(texture.0);
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
            Some(desc) => check_framebuffer(desc, &self.limits(), |h| {
                self.textures.get(&h.0).map(|t| &t.desc)
            }),
            None => FramebufferStatus::MissingAttachment,
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        if desc.textures.len() > MAX_TEXTURE_UNITS {
            return Err(BackendError::PipelineCreationFailed(format!(
                "'{}' uses {} texture units, at most {} are supported",
                desc.label,
                desc.textures.len(),
                MAX_TEXTURE_UNITS
            )));
        }
        if desc.flags.len() > MAX_FLAGS {
            return Err(BackendError::PipelineCreationFailed(format!(
                "'{}' declares {} flags, at most {} are supported",
                desc.label,
                desc.flags.len(),
                MAX_FLAGS
            )));
        }

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label.as_str()),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });

        let mut entries = Vec::new();
        for (unit, binding) in desc.textures.iter().enumerate() {
            let sample_type = match binding {
                TextureBinding::Sampled => wgpu::TextureSampleType::Float { filterable: true },
                TextureBinding::Fetched => wgpu::TextureSampleType::Float { filterable: false },
                TextureBinding::FetchedDepth => wgpu::TextureSampleType::Depth,
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: unit as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            if *binding == TextureBinding::Sampled {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: SAMPLER_BINDING_BASE + unit as u32,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
        }
        let flags_buffer = if desc.flags.is_empty() {
            None
        } else {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: FLAGS_BINDING,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(FLAGS_BLOCK_SIZE),
                },
                count: None,
            });
            Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label.as_str()),
                size: FLAGS_BLOCK_SIZE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }))
        };

        let texture_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label.as_str()),
                entries: &entries,
            });

        let locals_layout = if desc.uses_local_block {
            &self.locals_layout
        } else {
            &self.empty_layout
        };
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label.as_str()),
                bind_group_layouts: &[&self.globals_layout, locals_layout, &texture_layout],
                push_constant_ranges: &[],
            });

        let id = self.next_program_id;
        self.next_program_id += 1;
        self.programs.insert(
            id,
            GpuProgram {
                desc: desc.clone(),
                module,
                layout,
                texture_layout,
                flags_buffer,
            },
        );

        Ok(ProgramHandle(id))
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor,
    ) -> BackendResult<VertexArrayHandle> {
        for buffer in [desc.vertex_buffer, desc.index_buffer] {
            if !self.buffers.contains_key(&buffer.0) {
                return Err(BackendError::UnknownHandle {
                    kind: "buffer",
                    id: buffer.0,
                });
            }
        }

        let mut attributes: Vec<(u32, u32, u64)> = desc
            .attributes
            .iter()
            .map(|a| {
                (
                    a.location,
                    a.component_count,
                    a.offset.saturating_sub(desc.base_offset),
                )
            })
            .collect();
        attributes.sort_unstable();

        let pipeline = self.pipeline_for(PipelineKey {
            program: desc.program.0,
            stride: desc.stride,
            attributes,
        })?;

        let id = self.next_vertex_array_id;
        self.next_vertex_array_id += 1;
        self.vertex_arrays.insert(
            id,
            GpuVertexArray {
                program: desc.program,
                pipeline,
                vertex_buffer: desc.vertex_buffer,
                base_offset: desc.base_offset,
                index_buffer: desc.index_buffer,
                index_format: desc.index_format,
            },
        );

        Ok(VertexArrayHandle(id))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.flush_render_pass();
        self.draw_state.viewport = None;
        self.pending_render_pass = Some(PendingRenderPass::new(framebuffer));
    }

    fn clear(&mut self, color: [f32; 4], depth: f32) {
        let reuse = matches!(&self.pending_render_pass, Some(pass) if !pass.has_draws);
        if !reuse {
            // Clearing after draws needs a fresh pass on the same target
            let target = self.pending_render_pass.as_ref().and_then(|p| p.framebuffer);
            self.flush_render_pass();
            self.pending_render_pass = Some(PendingRenderPass::new(target));
            if let Some([x, y, width, height]) = self.draw_state.viewport {
                self.record(RenderCommand::SetViewport { x, y, width, height });
            }
        }
        if let Some(pass) = self.pending_render_pass.as_mut() {
            pass.clear = Some((color, depth));
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.draw_state.viewport = Some([x, y, width, height]);
        self.record(RenderCommand::SetViewport { x, y, width, height });
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.draw_state.program = Some(program);
    }

    fn bind_uniform_range(
        &mut self,
        slot: UniformSlot,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) {
        self.draw_state.uniforms[slot.index() as usize] = Some(UniformRange {
            buffer,
            offset,
            size,
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        match self.draw_state.textures.get_mut(unit as usize) {
            Some(slot) => *slot = Some(texture),
            None => log::warn!("Texture unit {} is out of range", unit),
        }
    }

    fn set_uniform_bool(&mut self, name: &str, value: bool) {
        let Some(program) = self
            .draw_state
            .program
            .and_then(|p| self.programs.get(&p.0))
        else {
            log::warn!("set_uniform_bool('{}') without a current program", name);
            return;
        };
        let Some(index) = program.desc.flags.iter().position(|f| f == name) else {
            log::warn!("Program '{}' has no flag '{}'", program.desc.label, name);
            return;
        };
        if let Some(buffer) = &program.flags_buffer {
            self.queue
                .write_buffer(buffer, index as u64 * 4, bytemuck::bytes_of(&(value as u32)));
        }
    }

    fn bind_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.draw_state.vertex_array = Some(vertex_array);
    }

    fn draw_indexed(
        &mut self,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> BackendResult<()> {
        for command in self.prepare_draw()? {
            self.record(command);
        }
        self.record(RenderCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
        Ok(())
    }
}
