//! GLFW-based window management for samples that present
//!
//! The window is created without a client API and is not resizable: samples
//! record their command buffers once against a fixed swapchain extent.

use std::ffi::CString;
use thiserror::Error;

use ash::vk;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialised
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// GLFW refused to create the window
    #[error("Window creation failed")]
    CreationFailed,

    /// GLFW error
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result alias for window operations
pub type WindowResult<T> = Result<T, WindowError>;

impl From<WindowError> for super::VulkanError {
    fn from(err: WindowError) -> Self {
        Self::Window(err.to_string())
    }
}

/// GLFW window wrapper
pub struct Window {
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    glfw: glfw::Glfw,
}

impl Window {
    /// Create a fixed-size window with no client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::GlfwError("Vulkan loader not found by GLFW".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(false));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);

        Ok(Self { window, events, glfw })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Pump the event queue; Escape closes the window
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        for (_, event) in glfw::flush_messages(&self.events) {
            if let glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) = event {
                self.window.set_should_close(true);
            }
        }
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Seconds since GLFW was initialised
    pub fn time(&self) -> f64 {
        self.glfw.get_time()
    }

    /// Instance extensions GLFW needs to create a surface
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<CString>> {
        let names = self
            .glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))?;

        names
            .into_iter()
            .map(|name| CString::new(name).map_err(|e| WindowError::GlfwError(e.to_string())))
            .collect()
    }

    /// Create a Vulkan surface for this window
    pub fn create_vulkan_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("glfwCreateWindowSurface failed: {result:?}")))
        }
    }
}
