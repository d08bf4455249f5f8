//! Mesh data structures and generation
//!
//! A mesh owns one vertex buffer and one `u32` index buffer shared by all of
//! its submeshes. Each submesh records where its vertices start inside the
//! vertex buffer (`vertex_offset`, in bytes) and which slice of the index
//! buffer it draws. Indices are local to the submesh.

use crate::backend::*;
use crate::error::EngineResult;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::ops::Range;

/// Standard vertex with position, normal and UV
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

/// One attribute of a vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBufferAttribute {
    pub location: u32,
    pub component_count: u32,
    /// Byte offset inside one vertex.
    pub offset: u64,
}

/// Layout of an interleaved vertex stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub attributes: Vec<VertexBufferAttribute>,
    pub stride: u64,
}

impl VertexBufferLayout {
    /// Layout of [`Vertex`]: position at 0, normal at 1, UV at 2.
    pub fn standard() -> Self {
        Self {
            attributes: vec![
                VertexBufferAttribute {
                    location: 0,
                    component_count: 3,
                    offset: 0,
                },
                VertexBufferAttribute {
                    location: 1,
                    component_count: 3,
                    offset: 12,
                },
                VertexBufferAttribute {
                    location: 2,
                    component_count: 2,
                    offset: 24,
                },
            ],
            stride: std::mem::size_of::<Vertex>() as u64,
        }
    }
}

/// Contiguous range of a mesh drawn with one material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMesh {
    pub layout: VertexBufferLayout,
    /// Byte offset of the first vertex in the shared vertex buffer.
    pub vertex_offset: u64,
    /// First index, in elements, in the shared index buffer.
    pub index_offset: u32,
    pub index_count: u32,
}

impl SubMesh {
    pub fn index_range(&self) -> Range<u32> {
        self.index_offset..self.index_offset + self.index_count
    }
}

/// CPU-side mesh ready for upload
#[derive(Debug, Clone)]
pub struct MeshData {
    pub name: String,
    pub vertex_bytes: Vec<u8>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<SubMesh>,
}

impl MeshData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertex_bytes: Vec::new(),
            indices: Vec::new(),
            submeshes: Vec::new(),
        }
    }

    /// Append a submesh of standard vertices.
    pub fn add_submesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> usize {
        self.add_submesh_raw(
            VertexBufferLayout::standard(),
            bytemuck::cast_slice(vertices),
            indices,
        )
    }

    /// Append a submesh with an arbitrary layout.
    pub fn add_submesh_raw(
        &mut self,
        layout: VertexBufferLayout,
        vertex_bytes: &[u8],
        indices: &[u32],
    ) -> usize {
        let submesh = SubMesh {
            layout,
            vertex_offset: self.vertex_bytes.len() as u64,
            index_offset: self.indices.len() as u32,
            index_count: indices.len() as u32,
        };
        self.vertex_bytes.extend_from_slice(vertex_bytes);
        self.indices.extend_from_slice(indices);
        self.submeshes.push(submesh);
        self.submeshes.len() - 1
    }

    /// Append every submesh of `other`, keeping its layouts.
    pub fn append(&mut self, other: &MeshData) {
        for submesh in &other.submeshes {
            let end = other
                .submeshes
                .iter()
                .map(|s| s.vertex_offset)
                .filter(|&o| o > submesh.vertex_offset)
                .min()
                .unwrap_or(other.vertex_bytes.len() as u64);
            let bytes = &other.vertex_bytes[submesh.vertex_offset as usize..end as usize];
            let indices = &other.indices[submesh.index_offset as usize
                ..(submesh.index_offset + submesh.index_count) as usize];
            self.add_submesh_raw(submesh.layout.clone(), bytes, indices);
        }
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Calculate triangle count
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn single(name: &str, vertices: &[Vertex], indices: &[u32]) -> Self {
        let mut mesh = Self::new(name);
        mesh.add_submesh(vertices, indices);
        mesh
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, right, up) in faces {
            let base = vertices.len() as u32;
            let center = normal * 0.5;
            let corners = [
                (center - right * 0.5 - up * 0.5, Vec2::new(0.0, 1.0)),
                (center + right * 0.5 - up * 0.5, Vec2::new(1.0, 1.0)),
                (center + right * 0.5 + up * 0.5, Vec2::new(1.0, 0.0)),
                (center - right * 0.5 + up * 0.5, Vec2::new(0.0, 0.0)),
            ];
            for (position, uv) in corners {
                vertices.push(Vertex {
                    position,
                    normal,
                    uv,
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::single("cube", &vertices, &indices)
    }

    /// Create a UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        let mut vertices = Vec::new();
        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                vertices.push(Vertex {
                    position: Vec3::new(x * 0.5, y * 0.5, z * 0.5),
                    normal: Vec3::new(x, y, z).normalize_or_zero(),
                    uv: Vec2::new(
                        segment as f32 / segments as f32,
                        ring as f32 / rings as f32,
                    ),
                });
            }
        }

        let mut indices = Vec::new();
        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        Self::single("sphere", &vertices, &indices)
    }

    /// Create a plane on the XZ axis
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        let mut vertices = Vec::new();
        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                vertices.push(Vertex {
                    position: Vec3::new(
                        -half_width + x as f32 * step_x,
                        0.0,
                        -half_depth + z as f32 * step_z,
                    ),
                    normal: Vec3::Y,
                    uv: Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32),
                });
            }
        }

        let mut indices = Vec::new();
        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        Self::single("plane", &vertices, &indices)
    }

    /// Upload to GPU buffers.
    pub fn upload<B: GraphicsBackend>(&self, backend: &mut B) -> EngineResult<Mesh> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", self.name)),
                size: self.vertex_bytes.len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            &self.vertex_bytes,
        )?;
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", self.name)),
                size: (self.indices.len() * 4) as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(&self.indices),
        )?;
        log::debug!(
            "Uploaded mesh '{}': {} submeshes, {} triangles",
            self.name,
            self.submeshes.len(),
            self.triangle_count()
        );

        Ok(Mesh {
            name: self.name.clone(),
            vertex_buffer,
            index_buffer,
            index_format: IndexFormat::Uint32,
            submeshes: self.submeshes.clone(),
        })
    }
}

/// A mesh living in GPU buffers
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_format: IndexFormat,
    pub submeshes: Vec<SubMesh>,
}
