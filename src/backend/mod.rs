//! Backend abstraction layer
//!
//! Provides the [`GraphicsBackend`] trait the renderer draws through, a wgpu
//! implementation for windowed rendering and a headless one that records
//! commands for tests.

pub mod headless;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use headless::{Command, HeadlessBackend};
pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuBackend;
