//! GLFW window wrapper: owns the native window, creates the Vulkan
//! surface, and is the sole producer into an [`EventQueue`].

use ash::vk;
use thiserror::Error;

use crate::events::{Action, Event, EventQueue, InputEvent, WindowEvent};

/// Errors creating or driving the native window.
#[derive(Debug, Error)]
pub enum WindowError {
    /// GLFW failed to initialize.
    #[error("failed to initialize GLFW: {0}")]
    InitFailed(String),
    /// GLFW failed to create the window.
    #[error("failed to create window: {0}")]
    CreateFailed(String),
    /// Vulkan surface creation failed.
    #[error("surface creation failed: {0}")]
    Surface(#[from] vk::Result),
}

fn to_action(action: glfw::Action) -> Action {
    match action {
        glfw::Action::Press => Action::Press,
        glfw::Action::Release => Action::Release,
        glfw::Action::Repeat => Action::Repeat,
    }
}

/// Owns the GLFW window handle and its `glfw` context. Polls native
/// events each frame and drains them into an owned [`EventQueue`];
/// application code consumes via [`Window::events`].
pub struct Window {
    glfw: glfw::Glfw,
    handle: glfw::Window,
    receiver: std::sync::mpsc::Receiver<(f64, glfw::WindowEvent)>,
    queue: EventQueue,
}

impl Window {
    /// Create a window of `width` x `height` titled `title`.
    pub fn new(width: u32, height: u32, title: &str) -> Result<Self, WindowError> {
        let mut glfw_ctx = glfw::init(glfw::fail_on_errors).map_err(|e| WindowError::InitFailed(e.to_string()))?;
        glfw_ctx.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));

        let (mut handle, receiver) = glfw_ctx
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or_else(|| WindowError::CreateFailed(title.to_string()))?;

        handle.set_key_polling(true);
        handle.set_mouse_button_polling(true);
        handle.set_cursor_pos_polling(true);
        handle.set_scroll_polling(true);
        handle.set_char_polling(true);
        handle.set_framebuffer_size_polling(true);
        handle.set_focus_polling(true);
        handle.set_close_polling(true);
        handle.set_iconify_polling(true);

        Ok(Self { glfw: glfw_ctx, handle, receiver, queue: EventQueue::new() })
    }

    /// Vulkan instance extensions GLFW requires for surface creation on
    /// this platform.
    pub fn required_instance_extensions(&self) -> Vec<String> {
        self.glfw.get_required_instance_extensions().unwrap_or_default()
    }

    /// Create a `VkSurfaceKHR` for this window.
    pub fn create_surface(&self, instance: &ash::Instance) -> Result<vk::SurfaceKHR, WindowError> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self.handle.create_window_surface(instance.handle(), std::ptr::null(), &mut surface);
        if result != vk::Result::SUCCESS.as_raw() {
            return Err(WindowError::Surface(vk::Result::from_raw(result)));
        }
        Ok(surface)
    }

    /// Current framebuffer size.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (w, h) = self.handle.get_framebuffer_size();
        (w as u32, h as u32)
    }

    /// Whether the user has requested the window close.
    pub fn should_close(&self) -> bool {
        self.handle.should_close()
    }

    /// Poll native events and push them into the internal queue. Must
    /// be called once per frame before draining via [`Window::events`].
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        let events: Vec<glfw::WindowEvent> = glfw::flush_messages(&self.receiver).map(|(_, e)| e).collect();
        for event in events {
            if let Some(translated) = translate(event) {
                // Overflow here means the application isn't draining
                // fast enough; surface it loudly rather than silently
                // dropping input.
                if let Err(e) = self.queue.push(translated) {
                    log::error!("event queue overflow, dropping event: {e}");
                }
            }
        }
    }

    /// Pop the next queued event, if any.
    pub fn next_event(&mut self) -> Option<Event> {
        self.queue.next_event()
    }
}

fn translate(event: glfw::WindowEvent) -> Option<Event> {
    use glfw::WindowEvent as G;
    match event {
        G::Key(key, scancode, action, mods) => Some(Event::Input(InputEvent::Key {
            key_code: key as i32,
            scancode,
            action: to_action(action),
            mods: mods.bits(),
        })),
        G::MouseButton(button, action, mods) => {
            Some(Event::Input(InputEvent::MouseButton { button: button as i32, action: to_action(action), mods: mods.bits() }))
        }
        G::CursorPos(x, y) => Some(Event::Input(InputEvent::CursorMoved { x, y })),
        G::Scroll(x, y) => Some(Event::Input(InputEvent::Scroll { x_offset: x, y_offset: y })),
        G::Char(c) => Some(Event::Input(InputEvent::CharTyped { codepoint: c as u32 })),
        G::FramebufferSize(w, h) => Some(Event::Window(WindowEvent::Resized { width: w as u32, height: h as u32 })),
        G::Focus(focused) => Some(Event::Window(WindowEvent::FocusChanged { focused })),
        G::Close => Some(Event::Window(WindowEvent::CloseRequested)),
        G::Iconify(iconified) => Some(Event::Window(WindowEvent::Minimized { minimized: iconified })),
        _ => None,
    }
}
