//! Scene geometry pass
//!
//! Draws every entity with the active program. Used on its own in forward
//! mode and as the G-buffer fill in the deferred modes.

use crate::backend::{GraphicsBackend, UniformSlot};
use crate::error::{EngineError, EngineResult};
use crate::resources::{Assets, BindingCache, Program, SubMeshKey, UniformBuffer};
use crate::scene::Scene;

/// Draw all entities of `scene` with `program`.
///
/// The framebuffer and program must already be bound. The global block is
/// bound once; each entity binds its own block and each submesh its vertex
/// array and albedo texture before drawing its index range.
pub fn draw_scene<B: GraphicsBackend>(
    backend: &mut B,
    assets: &Assets,
    scene: &Scene,
    uniforms: &UniformBuffer,
    bindings: &mut BindingCache,
    program: &Program,
) -> EngineResult<()> {
    let global = scene.global_params();
    backend.bind_uniform_range(UniformSlot::Global, uniforms.handle(), global.offset, global.size);

    let mut draws = 0;
    for entity in scene.entities() {
        let local = entity.local_params();
        backend.bind_uniform_range(UniformSlot::Local, uniforms.handle(), local.offset, local.size);

        let model = assets.model(entity.model)?;
        let mesh = assets.mesh(model.mesh)?;
        for (index, submesh) in mesh.submeshes.iter().enumerate() {
            let vertex_array =
                bindings.resolve(backend, SubMeshKey::new(model.mesh, index), mesh, program)?;
            let material = model
                .materials
                .get(index)
                .ok_or(EngineError::MissingResource {
                    kind: "submesh material",
                    index,
                })
                .and_then(|&m| assets.material(m))?;
            let albedo = assets.texture(material.albedo_texture)?;

            backend.bind_vertex_array(vertex_array);
            backend.bind_texture(0, albedo.handle);
            backend.draw_indexed(submesh.index_range(), 0, 0..1)?;
            draws += 1;
        }
    }

    log::trace!("Geometry pass '{}': {} draws", program.name, draws);
    Ok(())
}

/// Create the vertex arrays every entity needs with `program`.
pub fn resolve_scene<B: GraphicsBackend>(
    backend: &mut B,
    assets: &Assets,
    scene: &Scene,
    bindings: &mut BindingCache,
    program: &Program,
) -> EngineResult<()> {
    for entity in scene.entities() {
        let model = assets.model(entity.model)?;
        let mesh = assets.mesh(model.mesh)?;
        for index in 0..mesh.submeshes.len() {
            bindings.resolve(backend, SubMeshKey::new(model.mesh, index), mesh, program)?;
        }
    }
    Ok(())
}
