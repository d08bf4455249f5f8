//! Light types for the scene

use glam::Vec3;

/// Uniform scale of the marker entity drawn at a light's position.
pub const LIGHT_MARKER_SCALE: f32 = 0.15;

/// Bytes of the global block before the light array (camera position + count).
pub const GLOBAL_HEADER_SIZE: u64 = 16;

/// Bytes of one packed light record: kind, color, direction, position.
pub const LIGHT_RECORD_SIZE: u64 = 64;

/// Light kind, as read by the shaders
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional = 0,
    Point = 1,
}

/// A light and the index of the entity that marks it in the scene.
#[derive(Debug, Clone)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub direction: Vec3,
    pub position: Vec3,
    entity: usize,
}

impl Light {
    pub(crate) fn new(
        kind: LightKind,
        color: Vec3,
        direction: Vec3,
        position: Vec3,
        entity: usize,
    ) -> Self {
        Self {
            kind,
            color,
            direction,
            position,
            entity,
        }
    }

    /// Index of the paired marker entity. Fixed at creation.
    pub fn entity(&self) -> usize {
        self.entity
    }
}
