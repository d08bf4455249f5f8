//! Common types shared between backends

use crate::backend::traits::{BufferHandle, ProgramHandle, TextureHandle};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    Depth24Plus,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth24Plus)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TextureFormat::Rgba16Float)
    }

    /// Bits stored per color channel (or per depth sample).
    pub fn bits_per_channel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => 8,
            TextureFormat::Rgba16Float => 16,
            TextureFormat::Depth24Plus => 24,
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Depth24Plus => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const INDEX: Self = Self(1 << 4);
    pub const VERTEX: Self = Self(1 << 5);
    pub const UNIFORM: Self = Self(1 << 6);
    pub const STORAGE: Self = Self(1 << 7);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampling state owned by a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDescriptor {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
}

impl SamplerDescriptor {
    /// Point sampling without wraparound, used for render targets.
    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
        }
    }

    pub fn linear_repeat() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
        }
    }
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self::linear_repeat()
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub sampler: SamplerDescriptor,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            sampler: SamplerDescriptor::default(),
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Limits the core needs to lay out its uniform arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest uniform block a single binding may cover.
    pub max_uniform_block_size: u64,
    /// Minimum alignment of a bound uniform range offset.
    pub uniform_offset_alignment: u64,
    pub max_color_attachments: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_uniform_block_size: 64 * 1024,
            uniform_offset_alignment: 256,
            max_color_attachments: 8,
        }
    }
}

/// Framebuffer attachments, all sized identically.
#[derive(Debug, Clone)]
pub struct FramebufferDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<TextureHandle>,
    pub depth_attachment: Option<TextureHandle>,
}

/// Result of a framebuffer completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    /// No attachment at all.
    MissingAttachment,
    /// Attachment refers to a texture the backend does not know.
    UnknownAttachment { index: usize },
    /// Attachment texture cannot be rendered to.
    NotRenderable { index: usize },
    /// Color slot holds a depth format, or the depth slot a color format.
    WrongFormatClass { index: usize },
    MismatchedDimensions,
    TooManyColorAttachments,
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        *self == FramebufferStatus::Complete
    }
}

/// Check the attachment set of a framebuffer.
///
/// `lookup` maps a texture handle to its descriptor. Depth is reported at
/// index `color_attachments.len()`.
pub fn check_framebuffer<'a, F>(
    desc: &FramebufferDescriptor,
    limits: &DeviceLimits,
    lookup: F,
) -> FramebufferStatus
where
    F: Fn(TextureHandle) -> Option<&'a TextureDescriptor>,
{
    if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
        return FramebufferStatus::MissingAttachment;
    }
    if desc.color_attachments.len() > limits.max_color_attachments as usize {
        return FramebufferStatus::TooManyColorAttachments;
    }

    let attachments = desc
        .color_attachments
        .iter()
        .map(|h| (*h, false))
        .chain(desc.depth_attachment.map(|h| (h, true)));

    let mut size: Option<(u32, u32)> = None;
    for (index, (handle, is_depth_slot)) in attachments.enumerate() {
        let Some(texture) = lookup(handle) else {
            return FramebufferStatus::UnknownAttachment { index };
        };
        if !texture.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return FramebufferStatus::NotRenderable { index };
        }
        if texture.format.is_depth() != is_depth_slot {
            return FramebufferStatus::WrongFormatClass { index };
        }
        match size {
            None => size = Some((texture.width, texture.height)),
            Some(s) if s != (texture.width, texture.height) => {
                return FramebufferStatus::MismatchedDimensions;
            }
            Some(_) => {}
        }
    }

    FramebufferStatus::Complete
}

/// Binding slot of a uniform arena range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformSlot {
    /// Frame-wide block: camera and lights.
    Global,
    /// Per-draw block: entity transforms.
    Local,
}

impl UniformSlot {
    pub fn index(&self) -> u32 {
        match self {
            UniformSlot::Global => 0,
            UniformSlot::Local => 1,
        }
    }
}

/// How a program reads the texture bound at a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureBinding {
    /// Filtered sampling through the texture's own sampler.
    Sampled,
    /// Unfiltered texel fetch of a color texture.
    Fetched,
    /// Unfiltered texel fetch of a depth texture.
    FetchedDepth,
}

/// Where a program's fragment output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramOutput {
    /// The default framebuffer (swapchain plus its depth buffer).
    Screen { depth_test: bool },
    /// An off-screen framebuffer with the given attachment formats.
    Offscreen {
        color_formats: Vec<TextureFormat>,
        depth_format: Option<TextureFormat>,
    },
}

/// Program creation parameters. The source has already been validated.
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: String,
    pub source: String,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub output: ProgramOutput,
    /// Whether the program reads the per-draw block at group 1.
    pub uses_local_block: bool,
    /// Texture units in order, starting at unit 0.
    pub textures: Vec<TextureBinding>,
    /// Boolean uniforms, in the order of their slots in the flags block.
    pub flags: Vec<String>,
    pub cull_mode: CullMode,
}

/// One attribute of a vertex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexArrayAttribute {
    pub location: u32,
    pub component_count: u32,
    /// Byte offset from the start of the vertex buffer.
    pub offset: u64,
}

/// Vertex array creation parameters.
#[derive(Debug, Clone)]
pub struct VertexArrayDescriptor {
    pub label: Option<String>,
    pub program: ProgramHandle,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_format: IndexFormat,
    pub stride: u64,
    /// Base offset of the submesh's vertices; every attribute offset is at
    /// least this large.
    pub base_offset: u64,
    pub attributes: Vec<VertexArrayAttribute>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn target(width: u32, height: u32, format: TextureFormat) -> TextureDescriptor {
        TextureDescriptor {
            width,
            height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            sampler: SamplerDescriptor::nearest_clamp(),
            ..Default::default()
        }
    }

    fn status(
        textures: &HashMap<u64, TextureDescriptor>,
        desc: &FramebufferDescriptor,
    ) -> FramebufferStatus {
        check_framebuffer(desc, &DeviceLimits::default(), |h| textures.get(&h.0))
    }

    #[test]
    fn test_format_classes() {
        assert!(TextureFormat::Depth24Plus.is_depth());
        assert!(!TextureFormat::Rgba16Float.is_depth());
        assert!(TextureFormat::Rgba16Float.is_float());
        assert_eq!(TextureFormat::Rgba8Unorm.bits_per_channel(), 8);
        assert_eq!(TextureFormat::Rgba16Float.bits_per_channel(), 16);
    }

    #[test]
    fn test_complete_framebuffer() {
        let mut textures = HashMap::new();
        textures.insert(1, target(64, 32, TextureFormat::Rgba8Unorm));
        textures.insert(2, target(64, 32, TextureFormat::Depth24Plus));
        let desc = FramebufferDescriptor {
            label: None,
            color_attachments: vec![TextureHandle(1)],
            depth_attachment: Some(TextureHandle(2)),
        };
        assert!(status(&textures, &desc).is_complete());
    }

    #[test]
    fn test_mismatched_dimensions() {
        let mut textures = HashMap::new();
        textures.insert(1, target(64, 32, TextureFormat::Rgba8Unorm));
        textures.insert(2, target(32, 32, TextureFormat::Rgba16Float));
        let desc = FramebufferDescriptor {
            label: None,
            color_attachments: vec![TextureHandle(1), TextureHandle(2)],
            depth_attachment: None,
        };
        assert_eq!(status(&textures, &desc), FramebufferStatus::MismatchedDimensions);
    }

    #[test]
    fn test_depth_in_color_slot() {
        let mut textures = HashMap::new();
        textures.insert(1, target(8, 8, TextureFormat::Depth24Plus));
        let desc = FramebufferDescriptor {
            label: None,
            color_attachments: vec![TextureHandle(1)],
            depth_attachment: None,
        };
        assert_eq!(
            status(&textures, &desc),
            FramebufferStatus::WrongFormatClass { index: 0 }
        );
    }

    #[test]
    fn test_missing_and_unknown_attachments() {
        let textures = HashMap::new();
        let empty = FramebufferDescriptor {
            label: None,
            color_attachments: vec![],
            depth_attachment: None,
        };
        assert_eq!(status(&textures, &empty), FramebufferStatus::MissingAttachment);

        let dangling = FramebufferDescriptor {
            label: None,
            color_attachments: vec![TextureHandle(7)],
            depth_attachment: None,
        };
        assert_eq!(
            status(&textures, &dangling),
            FramebufferStatus::UnknownAttachment { index: 0 }
        );
    }

    #[test]
    fn test_sampled_texture_is_not_renderable() {
        let mut textures = HashMap::new();
        textures.insert(1, TextureDescriptor::default());
        let desc = FramebufferDescriptor {
            label: None,
            color_attachments: vec![TextureHandle(1)],
            depth_attachment: None,
        };
        assert_eq!(
            status(&textures, &desc),
            FramebufferStatus::NotRenderable { index: 0 }
        );
    }
}
