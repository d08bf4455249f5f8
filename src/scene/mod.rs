//! Scene management
//!
//! The scene owns the camera, the entity list and the light list. Lights are
//! always paired with a small marker entity so they show up when rendered.
//! Neither list is ever reordered or shrunk, so indices stay valid for the
//! lifetime of the scene.

mod camera;
mod camera_controller;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use light::*;
pub use transform::*;

use glam::{Mat4, Vec3};

use crate::backend::GraphicsBackend;
use crate::error::{EngineError, EngineResult};
use crate::resources::{UniformBuffer, UniformSpan, UniformWriter};

/// Size of the per-entity block: world matrix followed by world-view-projection.
pub const LOCAL_BLOCK_SIZE: u64 = 128;

/// A renderable object in the scene
#[derive(Debug, Clone)]
pub struct Entity {
    pub world_matrix: Mat4,
    /// Index into [`crate::resources::Assets::models`]
    pub model: usize,
    local_params: UniformSpan,
}

impl Entity {
    pub fn new(world_matrix: Mat4, model: usize) -> Self {
        Self {
            world_matrix,
            model,
            local_params: UniformSpan::default(),
        }
    }

    /// Arena range holding this entity's matrices for the current frame.
    pub fn local_params(&self) -> UniformSpan {
        self.local_params
    }
}

/// The scene containing all renderable content
#[derive(Debug, Default)]
pub struct Scene {
    pub camera: Camera,
    entities: Vec<Entity>,
    lights: Vec<Light>,
    global_params: UniformSpan,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            ..Default::default()
        }
    }

    /// Add an entity and return its index
    pub fn add_entity(&mut self, world_matrix: Mat4, model: usize) -> usize {
        self.entities.push(Entity::new(world_matrix, model));
        self.entities.len() - 1
    }

    /// Add a point light with a marker entity drawn with `model`.
    ///
    /// Returns the index of the new light.
    pub fn add_point_light(&mut self, model: usize, position: Vec3, color: Vec3) -> usize {
        self.push_light(LightKind::Point, model, position, Vec3::ONE, color)
    }

    /// Add a directional light. `position` only places its marker entity.
    pub fn add_directional_light(
        &mut self,
        model: usize,
        position: Vec3,
        direction: Vec3,
        color: Vec3,
    ) -> usize {
        self.push_light(LightKind::Directional, model, position, direction, color)
    }

    fn push_light(
        &mut self,
        kind: LightKind,
        model: usize,
        position: Vec3,
        direction: Vec3,
        color: Vec3,
    ) -> usize {
        let entity = self.add_entity(marker_matrix(position), model);
        self.lights
            .push(Light::new(kind, color, direction, position, entity));
        log::debug!(
            "Added {:?} light {} with marker entity {}",
            kind,
            self.lights.len() - 1,
            entity
        );
        self.lights.len() - 1
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity(&self, index: usize) -> Option<&Entity> {
        self.entities.get(index)
    }

    pub fn entity_mut(&mut self, index: usize) -> Option<&mut Entity> {
        self.entities.get_mut(index)
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Mutable access to a light. Its marker follows on the next buffer update.
    pub fn light_mut(&mut self, index: usize) -> Option<&mut Light> {
        self.lights.get_mut(index)
    }

    /// Arena range of the global block for the current frame.
    pub fn global_params(&self) -> UniformSpan {
        self.global_params
    }

    /// Pack this frame's shader constants into `uniforms` and upload them.
    ///
    /// The global block (camera position, light count, lights) is written at
    /// the start of the arena. Each entity block follows, starting on a
    /// multiple of `block_alignment`. Spans are only updated when every block
    /// fits.
    pub fn update_entity_buffer<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        uniforms: &mut UniformBuffer,
        block_alignment: u64,
        aspect: f32,
    ) -> EngineResult<()> {
        for light in &self.lights {
            let entity = self
                .entities
                .get_mut(light.entity())
                .ok_or(EngineError::MissingResource {
                    kind: "entity",
                    index: light.entity(),
                })?;
            entity.world_matrix = marker_matrix(light.position);
        }

        let view_projection = self.camera.view_projection_matrix(aspect);

        let mut writer = uniforms.map();
        let (global, locals) = match self.pack(&mut writer, view_projection, block_alignment) {
            Ok(packed) => packed,
            Err(e) => {
                writer.abandon();
                return Err(e);
            }
        };
        writer.unmap(backend);

        self.global_params = global;
        for (entity, span) in self.entities.iter_mut().zip(locals) {
            entity.local_params = span;
        }
        Ok(())
    }

    fn pack(
        &self,
        writer: &mut UniformWriter<'_>,
        view_projection: Mat4,
        block_alignment: u64,
    ) -> EngineResult<(UniformSpan, Vec<UniformSpan>)> {
        let global_offset = writer.head();
        writer.push_vec3(self.camera.position)?;
        writer.push_u32(self.lights.len() as u32)?;
        for light in &self.lights {
            writer.align(16)?;
            writer.push_u32(light.kind as u32)?;
            writer.push_vec3(light.color)?;
            writer.push_vec3(light.direction)?;
            writer.push_vec3(light.position)?;
        }
        writer.align(16)?;
        let global = UniformSpan::new(global_offset, writer.head() - global_offset);

        let mut locals = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            let offset = writer.align(block_alignment)?;
            writer.push_mat4(&entity.world_matrix)?;
            writer.push_mat4(&(view_projection * entity.world_matrix))?;
            locals.push(UniformSpan::new(offset, writer.head() - offset));
        }

        Ok((global, locals))
    }
}

fn marker_matrix(position: Vec3) -> Mat4 {
    Transform::from_position_scale(position, Vec3::splat(LIGHT_MARKER_SCALE)).matrix()
}
