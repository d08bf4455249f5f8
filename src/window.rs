//! Window management using winit
//!
//! Besides size and close tracking the window keeps the movement keys that
//! are held down and the render mode last picked with the number keys.

use crate::pipeline::RenderMode;
use crate::scene::CameraInput;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
    input: CameraInput,
    requested_mode: Option<RenderMode>,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(
        event_loop: &EventLoop<()>,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, OsError> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)?,
        );
        let size = window.inner_size();

        Ok(Self {
            window,
            width: size.width,
            height: size.height,
            resized: false,
            close_requested: false,
            input: CameraInput::default(),
            requested_mode: None,
        })
    }

    /// Get the raw window for backend initialization
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check if window was resized since last frame
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    /// Clear the resize flag
    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    /// Check if close was requested
    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Movement keys currently held
    pub fn camera_input(&self) -> CameraInput {
        self.input
    }

    /// Render mode picked since the last call, if any
    pub fn take_requested_mode(&mut self) -> Option<RenderMode> {
        self.requested_mode.take()
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => self.handle_key(*code, *state == ElementState::Pressed),
            WindowEvent::Focused(false) => {
                // Key releases are not delivered while unfocused
                self.input = CameraInput::default();
            }
            _ => {}
        }
    }

    fn handle_key(&mut self, code: KeyCode, pressed: bool) {
        match code {
            KeyCode::KeyW => self.input.forward = pressed,
            KeyCode::KeyS => self.input.backward = pressed,
            KeyCode::KeyA => self.input.left = pressed,
            KeyCode::KeyD => self.input.right = pressed,
            KeyCode::Escape if pressed => self.close_requested = true,
            _ if pressed => {
                if let Some(mode) = mode_for_key(code) {
                    self.requested_mode = Some(mode);
                }
            }
            _ => {}
        }
    }

    /// Request a redraw
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Number keys 1 to 4 select the render modes in order.
pub fn mode_for_key(code: KeyCode) -> Option<RenderMode> {
    match code {
        KeyCode::Digit1 | KeyCode::Numpad1 => Some(RenderMode::Forward),
        KeyCode::Digit2 | KeyCode::Numpad2 => Some(RenderMode::Deferred),
        KeyCode::Digit3 | KeyCode::Numpad3 => Some(RenderMode::Depth),
        KeyCode::Digit4 | KeyCode::Numpad4 => Some(RenderMode::Normals),
        _ => None,
    }
}

/// Run the event loop, calling `callback` once per iteration.
///
/// The loop exits when the window is closed or `callback` returns `false`.
pub fn run<F>(
    event_loop: EventLoop<()>,
    mut window: Window,
    mut callback: F,
) -> Result<(), EventLoopError>
where
    F: FnMut(&mut Window) -> bool + 'static,
{
    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);
                if window.should_close() {
                    elwt.exit();
                }
            }
            Event::AboutToWait => {
                if !callback(&mut window) {
                    elwt.exit();
                    return;
                }
                window.request_redraw();
            }
            _ => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_keys_select_modes() {
        assert_eq!(mode_for_key(KeyCode::Digit1), Some(RenderMode::Forward));
        assert_eq!(mode_for_key(KeyCode::Digit2), Some(RenderMode::Deferred));
        assert_eq!(mode_for_key(KeyCode::Numpad3), Some(RenderMode::Depth));
        assert_eq!(mode_for_key(KeyCode::Digit4), Some(RenderMode::Normals));
        assert_eq!(mode_for_key(KeyCode::Digit5), None);
    }
}
