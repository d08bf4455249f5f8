//! G-Buffer render targets for deferred rendering
//!
//! Four color attachments plus depth, all at display resolution:
//! - 0: albedo (RGBA8)
//! - 1: world-space normal (RGBA16F)
//! - 2: world-space position (RGBA16F)
//! - 3: view direction (RGBA16F)
//! - depth: 24-bit, sampled by the composition pass

use crate::backend::{
    FramebufferDescriptor, FramebufferHandle, GraphicsBackend, SamplerDescriptor,
    TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
};
use crate::error::{EngineError, EngineResult};

/// Formats of the color attachments, in attachment order.
pub const GBUFFER_COLOR_FORMATS: [TextureFormat; 4] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
];

pub const GBUFFER_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24Plus;

const ATTACHMENT_NAMES: [&str; 4] = ["albedo", "normal", "position", "view_direction"];

/// Off-screen framebuffer the geometry pass writes in deferred modes.
#[derive(Debug)]
pub struct GBuffer {
    framebuffer: FramebufferHandle,
    colors: [TextureHandle; 4],
    depth: TextureHandle,
    width: u32,
    height: u32,
}

impl GBuffer {
    /// Allocate every attachment and check the framebuffer is complete.
    pub fn build<B: GraphicsBackend>(
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> EngineResult<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDisplaySize { width, height });
        }

        let colors = [
            create_target(backend, ATTACHMENT_NAMES[0], width, height, GBUFFER_COLOR_FORMATS[0])?,
            create_target(backend, ATTACHMENT_NAMES[1], width, height, GBUFFER_COLOR_FORMATS[1])?,
            create_target(backend, ATTACHMENT_NAMES[2], width, height, GBUFFER_COLOR_FORMATS[2])?,
            create_target(backend, ATTACHMENT_NAMES[3], width, height, GBUFFER_COLOR_FORMATS[3])?,
        ];
        let depth = create_target(backend, "depth", width, height, GBUFFER_DEPTH_FORMAT)?;

        let framebuffer = backend.create_framebuffer(&FramebufferDescriptor {
            label: Some("G-Buffer".to_string()),
            color_attachments: colors.to_vec(),
            depth_attachment: Some(depth),
        })?;

        let status = backend.framebuffer_status(framebuffer);
        if !status.is_complete() {
            log::error!("G-Buffer framebuffer is incomplete: {:?}", status);
            return Err(EngineError::IncompleteFramebuffer {
                label: "G-Buffer".to_string(),
                status,
            });
        }

        log::debug!("Built G-Buffer at {}x{}", width, height);
        Ok(Self {
            framebuffer,
            colors,
            depth,
            width,
            height,
        })
    }

    /// Rebuild at a new size. Returns false when the size is unchanged.
    pub fn resize<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> EngineResult<bool> {
        if (width, height) == (self.width, self.height) {
            return Ok(false);
        }
        let rebuilt = Self::build(backend, width, height)?;
        let old = std::mem::replace(self, rebuilt);
        old.destroy(backend);
        Ok(true)
    }

    /// Release the framebuffer and its attachments.
    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_framebuffer(self.framebuffer);
        for texture in self.colors {
            backend.destroy_texture(texture);
        }
        backend.destroy_texture(self.depth);
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn color_attachments(&self) -> &[TextureHandle; 4] {
        &self.colors
    }

    pub fn color_attachment(&self, index: usize) -> Option<TextureHandle> {
        self.colors.get(index).copied()
    }

    pub fn depth_attachment(&self) -> TextureHandle {
        self.depth
    }

    pub fn albedo(&self) -> TextureHandle {
        self.colors[0]
    }

    pub fn normal(&self) -> TextureHandle {
        self.colors[1]
    }

    pub fn position(&self) -> TextureHandle {
        self.colors[2]
    }

    pub fn view_direction(&self) -> TextureHandle {
        self.colors[3]
    }

    /// All attachments in composition texture unit order.
    pub fn attachments(&self) -> [TextureHandle; 5] {
        [
            self.colors[0],
            self.colors[1],
            self.colors[2],
            self.colors[3],
            self.depth,
        ]
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn create_target<B: GraphicsBackend>(
    backend: &mut B,
    name: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> EngineResult<TextureHandle> {
    let handle = backend.create_texture(&TextureDescriptor {
        label: Some(format!("gbuffer_{}", name)),
        width,
        height,
        format,
        usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        sampler: SamplerDescriptor::nearest_clamp(),
    })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FilterMode, AddressMode, HeadlessBackend};
    use rstest::rstest;

    #[rstest]
    #[case(1, 1)]
    #[case(800, 600)]
    #[case(1920, 1080)]
    #[case(3, 4096)]
    fn test_attachment_formats(#[case] width: u32, #[case] height: u32) {
        let mut backend = HeadlessBackend::new(width, height);
        let gbuffer = GBuffer::build(&mut backend, width, height).unwrap();

        let albedo = backend.texture(gbuffer.albedo()).unwrap();
        assert_eq!(albedo.format.bits_per_channel(), 8);
        assert!(!albedo.format.is_float());

        for handle in &gbuffer.color_attachments()[1..] {
            let texture = backend.texture(*handle).unwrap();
            assert_eq!(texture.format, TextureFormat::Rgba16Float);
            assert_eq!((texture.width, texture.height), (width, height));
        }

        let depth = backend.texture(gbuffer.depth_attachment()).unwrap();
        assert!(depth.format.is_depth());
        assert!(depth.usage.contains(TextureUsage::TEXTURE_BINDING));

        let fb = backend.framebuffer(gbuffer.framebuffer()).unwrap();
        assert_eq!(fb.color_attachments.len(), 4);
        assert_eq!(fb.depth_attachment, Some(gbuffer.depth_attachment()));
        assert!(backend.framebuffer_status(gbuffer.framebuffer()).is_complete());
    }

    #[test]
    fn test_attachments_sample_nearest_clamped() {
        let mut backend = HeadlessBackend::new(64, 64);
        let gbuffer = GBuffer::build(&mut backend, 64, 64).unwrap();
        for handle in gbuffer.attachments() {
            let sampler = backend.texture(handle).unwrap().sampler;
            assert_eq!(sampler.min_filter, FilterMode::Nearest);
            assert_eq!(sampler.mag_filter, FilterMode::Nearest);
            assert_eq!(sampler.address_mode_u, AddressMode::ClampToEdge);
            assert_eq!(sampler.address_mode_v, AddressMode::ClampToEdge);
        }
    }

    #[rstest]
    #[case(0, 600)]
    #[case(800, 0)]
    fn test_zero_size_rejected(#[case] width: u32, #[case] height: u32) {
        let mut backend = HeadlessBackend::new(800, 600);
        assert!(matches!(
            GBuffer::build(&mut backend, width, height),
            Err(EngineError::InvalidDisplaySize { .. })
        ));
    }

    #[test]
    fn test_too_few_color_slots_is_incomplete() {
        let limits = crate::backend::DeviceLimits {
            max_color_attachments: 2,
            ..Default::default()
        };
        let mut backend = HeadlessBackend::with_limits(64, 64, limits);
        let err = GBuffer::build(&mut backend, 64, 64).unwrap_err();
        assert!(matches!(err, EngineError::IncompleteFramebuffer { .. }));
    }

    #[test]
    fn test_resize_rebuilds_and_releases() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut gbuffer = GBuffer::build(&mut backend, 64, 64).unwrap();
        let old = gbuffer.attachments();
        let old_framebuffer = gbuffer.framebuffer();

        assert!(!gbuffer.resize(&mut backend, 64, 64).unwrap());
        assert!(gbuffer.resize(&mut backend, 128, 32).unwrap());

        assert_eq!(gbuffer.size(), (128, 32));
        assert!(backend.texture(old[0]).is_none());
        assert!(backend.framebuffer(old_framebuffer).is_none());
        let albedo = backend.texture(gbuffer.albedo()).unwrap();
        assert_eq!((albedo.width, albedo.height), (128, 32));
    }
}
