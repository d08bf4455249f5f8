//! Vertex array resolution and caching.
//!
//! A vertex array ties one submesh's vertex stream to one program's inputs.
//! Arrays are created lazily the first time a (submesh, program) pair is drawn
//! and cached for as long as both live. The cache is keyed by program handle,
//! not by render mode, so two programs never share an array.

use crate::backend::*;
use crate::error::{EngineError, EngineResult};
use crate::resources::{Mesh, Program, SubMesh};
use std::collections::HashMap;

/// Identity of a submesh: mesh index in the asset list plus submesh index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubMeshKey {
    pub mesh: usize,
    pub submesh: usize,
}

impl SubMeshKey {
    pub fn new(mesh: usize, submesh: usize) -> Self {
        Self { mesh, submesh }
    }
}

/// How one shader input reads the vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundAttribute {
    pub location: u32,
    /// Number of float components.
    pub component_count: u32,
    pub stride: u64,
    /// Byte offset from the start of the shared vertex buffer.
    pub offset: u64,
}

/// A cached vertex array.
#[derive(Debug, Clone)]
pub struct VertexBinding {
    pub handle: VertexArrayHandle,
    pub program: ProgramHandle,
    /// Vertex buffer of the mesh the array was built from.
    pub vertex_buffer: BufferHandle,
    pub attributes: Vec<BoundAttribute>,
}

/// Match every program input against the submesh's attributes by location.
pub fn match_attributes(
    mesh_name: &str,
    submesh_index: usize,
    submesh: &SubMesh,
    program: &Program,
) -> EngineResult<Vec<BoundAttribute>> {
    program
        .shader_layout
        .attributes
        .iter()
        .map(|input| {
            let mut candidates = submesh
                .layout
                .attributes
                .iter()
                .filter(|a| a.location == input.location);

            let Some(attribute) = candidates.next() else {
                return Err(EngineError::MissingVertexAttribute {
                    mesh: mesh_name.to_string(),
                    submesh: submesh_index,
                    program: program.name.clone(),
                    location: input.location,
                });
            };
            if candidates.next().is_some() {
                return Err(EngineError::DuplicateVertexAttribute {
                    mesh: mesh_name.to_string(),
                    submesh: submesh_index,
                    location: input.location,
                });
            }

            Ok(BoundAttribute {
                location: input.location,
                component_count: attribute.component_count,
                stride: submesh.layout.stride,
                offset: attribute.offset + submesh.vertex_offset,
            })
        })
        .collect()
}

/// Vertex arrays keyed by (submesh, program).
#[derive(Debug, Default)]
pub struct BindingCache {
    bindings: HashMap<(SubMeshKey, ProgramHandle), VertexBinding>,
}

impl BindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, key: SubMeshKey, program: ProgramHandle) -> Option<&VertexBinding> {
        self.bindings.get(&(key, program))
    }

    /// Return the vertex array for a submesh and program, creating it on first use.
    ///
    /// `key.mesh` must be the asset index of `mesh`; the cache trusts it and
    /// hands back whatever array was built under that key.
    pub fn resolve<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        key: SubMeshKey,
        mesh: &Mesh,
        program: &Program,
    ) -> EngineResult<VertexArrayHandle> {
        let submesh = mesh.submeshes.get(key.submesh).ok_or(EngineError::MissingResource {
            kind: "submesh",
            index: key.submesh,
        })?;
        if let Some(binding) = self.bindings.get(&(key, program.handle)) {
            debug_assert_eq!(
                binding.vertex_buffer, mesh.vertex_buffer,
                "{:?} was cached for another mesh than '{}'",
                key, mesh.name
            );
            return Ok(binding.handle);
        }

        let attributes = match_attributes(&mesh.name, key.submesh, submesh, program)?;

        let handle = backend.create_vertex_array(&VertexArrayDescriptor {
            label: Some(format!("{}[{}] x {}", mesh.name, key.submesh, program.name)),
            program: program.handle,
            vertex_buffer: mesh.vertex_buffer,
            index_buffer: mesh.index_buffer,
            index_format: mesh.index_format,
            stride: submesh.layout.stride,
            base_offset: submesh.vertex_offset,
            attributes: attributes
                .iter()
                .map(|a| VertexArrayAttribute {
                    location: a.location,
                    component_count: a.component_count,
                    offset: a.offset,
                })
                .collect(),
        })?;
        log::debug!(
            "Created vertex array {:?} for {}[{}] with program '{}'",
            handle,
            mesh.name,
            key.submesh,
            program.name
        );

        self.bindings.insert(
            (key, program.handle),
            VertexBinding {
                handle,
                program: program.handle,
                vertex_buffer: mesh.vertex_buffer,
                attributes,
            },
        );
        Ok(handle)
    }

    /// Drop every binding created for a program. Returns how many were removed.
    pub fn invalidate_program(&mut self, program: ProgramHandle) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|(_, p), _| *p != program);
        before - self.bindings.len()
    }
}
