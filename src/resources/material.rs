//! Material definitions

/// Surface description used by the geometry pass.
///
/// Only the albedo slot is consumed; lighting is computed from the G-buffer.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    /// Index into the asset texture list.
    pub albedo_texture: usize,
}

impl Material {
    pub fn new(name: &str, albedo_texture: usize) -> Self {
        Self {
            name: name.to_string(),
            albedo_texture,
        }
    }
}
