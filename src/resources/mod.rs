//! Resource management
//!
//! Meshes, textures, materials and programs live in one [`Assets`] store and
//! are referred to by index. Entries are only ever appended.

mod material;
mod mesh;
mod program;
mod texture;
pub mod uniform_buffer;
pub mod vertex_binding;

pub use material::*;
pub use mesh::*;
pub use program::*;
pub use texture::*;
pub use uniform_buffer::{UniformBuffer, UniformSpan, UniformWriter};
pub use vertex_binding::{BindingCache, BoundAttribute, SubMeshKey, VertexBinding};

use crate::error::{EngineError, EngineResult};

/// A mesh with one material per submesh.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub mesh: usize,
    pub materials: Vec<usize>,
}

/// Index-addressed asset store
#[derive(Debug, Default)]
pub struct Assets {
    textures: Vec<Texture>,
    materials: Vec<Material>,
    meshes: Vec<Mesh>,
    models: Vec<Model>,
    programs: Vec<Program>,
}

macro_rules! asset_list {
    ($add:ident, $get:ident, $all:ident, $field:ident, $ty:ty, $kind:literal) => {
        pub fn $add(&mut self, value: $ty) -> usize {
            self.$field.push(value);
            self.$field.len() - 1
        }

        pub fn $get(&self, index: usize) -> EngineResult<&$ty> {
            self.$field.get(index).ok_or(EngineError::MissingResource {
                kind: $kind,
                index,
            })
        }

        pub fn $all(&self) -> &[$ty] {
            &self.$field
        }
    };
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    asset_list!(add_texture, texture, textures, textures, Texture, "texture");
    asset_list!(add_material, material, materials, materials, Material, "material");
    asset_list!(add_mesh, mesh, meshes, meshes, Mesh, "mesh");
    asset_list!(add_model, model, models, models, Model, "model");
    asset_list!(add_program, program, programs, programs, Program, "program");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_append_order() {
        let mut assets = Assets::new();
        assert_eq!(assets.add_material(Material::new("a", 0)), 0);
        assert_eq!(assets.add_material(Material::new("b", 0)), 1);
        assert_eq!(assets.material(1).unwrap().name, "b");
        assert!(matches!(
            assets.model(0),
            Err(EngineError::MissingResource {
                kind: "model",
                index: 0,
            })
        ));
    }
}
