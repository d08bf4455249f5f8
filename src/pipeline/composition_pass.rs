//! Composition pass for the deferred modes
//!
//! Resolves the G-buffer onto the screen with one full-screen quad. Depending
//! on the mode the program shades with the scene lights, or visualizes the
//! depth or normal attachment.

use crate::backend::{
    BufferDescriptor, BufferUsage, GraphicsBackend, IndexFormat, UniformSlot,
};
use crate::error::EngineResult;
use crate::resources::{
    Assets, BindingCache, Mesh, Program, SubMesh, SubMeshKey, UniformBuffer,
    VertexBufferAttribute, VertexBufferLayout,
};
use crate::scene::Scene;

use super::gbuffer::GBuffer;
use super::shaders::{SHOW_DEPTH, SHOW_NORMALS};
use super::RenderMode;

/// Quad corners in clip space: position xyz then uv.
#[rustfmt::skip]
const QUAD_VERTICES: [f32; 20] = [
    -1.0, -1.0, 0.0,   0.0, 0.0,
     1.0, -1.0, 0.0,   1.0, 0.0,
     1.0,  1.0, 0.0,   1.0, 1.0,
    -1.0,  1.0, 0.0,   0.0, 1.0,
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Upload the full-screen quad. It has a single submesh with
/// position at location 0 and uv at location 1.
pub fn screen_quad<B: GraphicsBackend>(backend: &mut B) -> EngineResult<Mesh> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
    let index_bytes: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);

    let vertex_buffer = backend.create_buffer_init(
        &BufferDescriptor {
            label: Some("Screen Quad Vertices".to_string()),
            size: vertex_bytes.len() as u64,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        },
        vertex_bytes,
    )?;
    let index_buffer = backend.create_buffer_init(
        &BufferDescriptor {
            label: Some("Screen Quad Indices".to_string()),
            size: index_bytes.len() as u64,
            usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
        },
        index_bytes,
    )?;

    Ok(Mesh {
        name: "screen_quad".to_string(),
        vertex_buffer,
        index_buffer,
        index_format: IndexFormat::Uint16,
        submeshes: vec![SubMesh {
            layout: VertexBufferLayout {
                attributes: vec![
                    VertexBufferAttribute {
                        location: 0,
                        component_count: 3,
                        offset: 0,
                    },
                    VertexBufferAttribute {
                        location: 1,
                        component_count: 2,
                        offset: 12,
                    },
                ],
                stride: 20,
            },
            vertex_offset: 0,
            index_offset: 0,
            index_count: QUAD_INDICES.len() as u32,
        }],
    })
}

/// Full-screen G-buffer resolve.
#[derive(Debug, Clone, Copy)]
pub struct CompositionPass {
    /// Index of the quad in [`Assets::meshes`]
    quad_mesh: usize,
    /// Index of the composition program in [`Assets::programs`]
    program: usize,
}

impl CompositionPass {
    pub fn new(quad_mesh: usize, program: usize) -> Self {
        Self { quad_mesh, program }
    }

    pub fn program<'a>(&self, assets: &'a Assets) -> EngineResult<&'a Program> {
        assets.program(self.program)
    }

    /// Create the quad's vertex array ahead of the first frame.
    pub fn resolve<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        assets: &Assets,
        bindings: &mut BindingCache,
    ) -> EngineResult<()> {
        let mesh = assets.mesh(self.quad_mesh)?;
        bindings.resolve(
            backend,
            SubMeshKey::new(self.quad_mesh, 0),
            mesh,
            assets.program(self.program)?,
        )?;
        Ok(())
    }

    /// Draw the quad into the default framebuffer.
    #[allow(clippy::too_many_arguments)]
    pub fn draw<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        assets: &Assets,
        scene: &Scene,
        uniforms: &UniformBuffer,
        bindings: &mut BindingCache,
        gbuffer: &GBuffer,
        mode: RenderMode,
        clear_color: [f32; 4],
    ) -> EngineResult<()> {
        let program = assets.program(self.program)?;
        let quad = assets.mesh(self.quad_mesh)?;
        let (width, height) = backend.surface_size();

        backend.bind_framebuffer(None);
        backend.set_viewport(0.0, 0.0, width as f32, height as f32);
        backend.clear(clear_color, 1.0);
        backend.use_program(program.handle);

        let global = scene.global_params();
        backend.bind_uniform_range(
            UniformSlot::Global,
            uniforms.handle(),
            global.offset,
            global.size,
        );

        for (unit, texture) in gbuffer.attachments().into_iter().enumerate() {
            backend.bind_texture(unit as u32, texture);
        }
        backend.set_uniform_bool(SHOW_DEPTH, mode.show_depth());
        backend.set_uniform_bool(SHOW_NORMALS, mode.show_normals());

        let vertex_array =
            bindings.resolve(backend, SubMeshKey::new(self.quad_mesh, 0), quad, program)?;
        backend.bind_vertex_array(vertex_array);
        for submesh in &quad.submeshes {
            backend.draw_indexed(submesh.index_range(), 0, 0..1)?;
        }
        Ok(())
    }
}
