//! Window-system collaborator.
//!
//! The renderer only sees the window through the traits below; [`Window`] is
//! the winit implementation used by the viewer.

use ash::vk;
use std::collections::VecDeque;
use std::os::raw::c_char;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event as WinitEvent, KeyEvent, MouseScrollDelta, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::PhysicalKey;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::{Fullscreen, WindowBuilder};

pub use winit::event::MouseButton;
pub use winit::keyboard::KeyCode;

use crate::config::WindowConfig;
use crate::error::Result;

/// Size queries the frame loop needs every tick.
pub trait WindowState {
    /// Framebuffer size in physical pixels.
    fn framebuffer_size(&self) -> (u32, u32);

    fn is_minimized(&self) -> bool {
        let (width, height) = self.framebuffer_size();
        width == 0 || height == 0
    }
}

/// What the device context needs to put a Vulkan surface on a window.
pub trait SurfaceSource: WindowState {
    fn required_extensions(&self) -> Result<Vec<*const c_char>>;

    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;
}

/// Input side of the window, drained once per tick.
pub trait EventSource {
    fn poll_events(&mut self);

    fn should_close(&self) -> bool;

    fn drain_events(&mut self) -> Vec<Event>;
}

/// Pump events until the window has a drawable area, sleeping `interval`
/// between polls. Returns `false` if the window is closed first.
///
/// Events received while waiting stay queued for the next drain.
pub fn wait_until_drawable<W>(window: &mut W, interval: Duration) -> bool
where
    W: WindowState + EventSource,
{
    if window.is_minimized() {
        debug!("waiting for the window to become drawable");
    }
    while window.is_minimized() {
        window.poll_events();
        if window.should_close() {
            return false;
        }
        std::thread::sleep(interval);
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Resized { width: u32, height: u32 },
    CloseRequested,
    KeyPressed(KeyCode),
    KeyReleased(KeyCode),
    CursorMoved { x: f64, y: f64 },
    MouseButton { button: MouseButton, pressed: bool },
    Scroll { dx: f64, dy: f64 },
}

impl Event {
    fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::Resized(size) => Some(Event::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::CloseRequested => Some(Event::CloseRequested),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat: false,
                        ..
                    },
                ..
            } => Some(match state {
                ElementState::Pressed => Event::KeyPressed(*code),
                ElementState::Released => Event::KeyReleased(*code),
            }),
            WindowEvent::CursorMoved { position, .. } => Some(Event::CursorMoved {
                x: position.x,
                y: position.y,
            }),
            WindowEvent::MouseInput { state, button, .. } => Some(Event::MouseButton {
                button: *button,
                pressed: *state == ElementState::Pressed,
            }),
            WindowEvent::MouseWheel { delta, .. } => Some(match delta {
                MouseScrollDelta::LineDelta(dx, dy) => Event::Scroll {
                    dx: *dx as f64,
                    dy: *dy as f64,
                },
                MouseScrollDelta::PixelDelta(pos) => Event::Scroll { dx: pos.x, dy: pos.y },
            }),
            _ => None,
        }
    }
}

/// A single winit window driven by polling instead of a callback loop.
pub struct Window {
    event_loop: EventLoop<()>,
    window: Arc<winit::window::Window>,
    events: VecDeque<Event>,
    close_requested: bool,
}

impl Window {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;

        let mut builder = WindowBuilder::new()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);
        if config.fullscreen {
            builder = builder.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = Arc::new(builder.build(&event_loop)?);

        let size = window.inner_size();
        info!(
            title = %config.title,
            width = size.width,
            height = size.height,
            scale_factor = window.scale_factor(),
            "window created"
        );

        Ok(Self {
            event_loop,
            window,
            events: VecDeque::new(),
            close_requested: false,
        })
    }

    pub fn raw(&self) -> &Arc<winit::window::Window> {
        &self.window
    }
}

impl WindowState for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn is_minimized(&self) -> bool {
        let (width, height) = self.framebuffer_size();
        width == 0 || height == 0 || self.window.is_minimized().unwrap_or(false)
    }
}

impl SurfaceSource for Window {
    fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display = self.window.display_handle()?.as_raw();
        Ok(ash_window::enumerate_required_extensions(display)?.to_vec())
    }

    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        let display = self.window.display_handle()?.as_raw();
        let handle = self.window.window_handle()?.as_raw();
        // the window is owned by the application and outlives the surface
        let surface = unsafe { ash_window::create_surface(entry, instance, display, handle, None)? };
        Ok(surface)
    }
}

impl EventSource for Window {
    fn poll_events(&mut self) {
        let events = &mut self.events;
        let mut close_requested = false;
        let status = self
            .event_loop
            .pump_events(Some(Duration::ZERO), |event, _target| {
                if let WinitEvent::WindowEvent { event, .. } = event {
                    if let Some(event) = Event::from_window_event(&event) {
                        if event == Event::CloseRequested {
                            close_requested = true;
                        }
                        events.push_back(event);
                    }
                }
            });

        if close_requested || matches!(status, PumpStatus::Exit(_)) {
            debug!("window close requested");
            self.close_requested = true;
        }
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }

    fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u32, u32);

    impl WindowState for Fixed {
        fn framebuffer_size(&self) -> (u32, u32) {
            (self.0, self.1)
        }
    }

    #[test]
    fn zero_area_counts_as_minimized() {
        assert!(Fixed(0, 720).is_minimized());
        assert!(Fixed(1280, 0).is_minimized());
        assert!(!Fixed(1280, 720).is_minimized());
    }

    #[test]
    fn window_events_map_to_typed_events() {
        let resized = WindowEvent::Resized(PhysicalSize::new(800, 600));
        assert_eq!(
            Event::from_window_event(&resized),
            Some(Event::Resized { width: 800, height: 600 })
        );
        assert_eq!(
            Event::from_window_event(&WindowEvent::CloseRequested),
            Some(Event::CloseRequested)
        );
        assert_eq!(Event::from_window_event(&WindowEvent::Focused(true)), None);
    }

    /// Minimized until it has been polled `restore_after` times.
    struct Restoring {
        polls: u32,
        restore_after: u32,
        close_after: Option<u32>,
    }

    impl WindowState for Restoring {
        fn framebuffer_size(&self) -> (u32, u32) {
            if self.polls >= self.restore_after {
                (1280, 720)
            } else {
                (0, 0)
            }
        }
    }

    impl EventSource for Restoring {
        fn poll_events(&mut self) {
            self.polls += 1;
        }

        fn should_close(&self) -> bool {
            self.close_after.is_some_and(|n| self.polls >= n)
        }

        fn drain_events(&mut self) -> Vec<Event> {
            Vec::new()
        }
    }

    #[test]
    fn waits_until_a_minimized_window_is_restored() {
        let mut window = Restoring {
            polls: 0,
            restore_after: 3,
            close_after: None,
        };
        assert!(wait_until_drawable(&mut window, Duration::ZERO));
        assert_eq!(window.polls, 3);

        // already drawable: no polling at all
        assert!(wait_until_drawable(&mut window, Duration::ZERO));
        assert_eq!(window.polls, 3);
    }

    #[test]
    fn closing_while_minimized_stops_the_wait() {
        let mut window = Restoring {
            polls: 0,
            restore_after: u32::MAX,
            close_after: Some(2),
        };
        assert!(!wait_until_drawable(&mut window, Duration::ZERO));
        assert_eq!(window.polls, 2);
    }
}
