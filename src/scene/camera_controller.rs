//! Camera controller system
//!
//! WASD fly-through: W/S move along the camera front, A/D strafe along the
//! right vector derived from the camera up.

use glam::Vec3;

use super::Camera;

/// Input state for camera controllers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraInput {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
}

/// Abstract camera controller trait
pub trait CameraController {
    /// Update the camera based on input and delta time
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32);

    /// Get the controller name for debugging
    fn name(&self) -> &'static str;
}

/// Moves the camera without changing where it looks.
#[derive(Debug, Clone)]
pub struct FlyController {
    /// Movement speed in units per second
    pub move_speed: f32,
}

impl Default for FlyController {
    fn default() -> Self {
        Self { move_speed: 2.05 }
    }
}

impl FlyController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom speed settings
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.move_speed = speed;
        self
    }
}

impl CameraController for FlyController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        let step = self.move_speed * dt;
        let front = camera.front;
        let strafe = front.cross(camera.up()).normalize_or_zero();

        let mut delta = Vec3::ZERO;
        if input.forward {
            delta += front;
        }
        if input.backward {
            delta -= front;
        }
        if input.left {
            delta -= strafe;
        }
        if input.right {
            delta += strafe;
        }

        camera.position += delta * step;
    }

    fn name(&self) -> &'static str {
        "Fly"
    }
}
