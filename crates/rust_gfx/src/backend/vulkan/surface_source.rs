//! Boundary between the Vulkan backend and the window system

use std::ffi::{CStr, CString};

use ash::{vk, Entry, Instance};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::error::{GfxError, GfxResult};
use crate::graphics::Extent2D;

/// A window the Vulkan backend can present to
pub trait SurfaceSource {
    /// Instance extensions the window system needs
    fn required_extensions(&self) -> GfxResult<Vec<CString>>;

    /// Create a presentation surface for this window
    fn create_surface(&self, entry: &Entry, instance: &Instance) -> GfxResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels
    fn framebuffer_extent(&self) -> Extent2D;
}

/// Any window exposing raw handles, with its framebuffer size supplied by the caller
pub struct RawWindowSource<'a, W> {
    window: &'a W,
    extent: Extent2D,
}

impl<'a, W: HasRawWindowHandle + HasRawDisplayHandle> RawWindowSource<'a, W> {
    /// Wrap `window`, whose framebuffer currently measures `extent`
    pub fn new(window: &'a W, extent: Extent2D) -> Self {
        Self { window, extent }
    }
}

impl<W: HasRawWindowHandle + HasRawDisplayHandle> SurfaceSource for RawWindowSource<'_, W> {
    fn required_extensions(&self) -> GfxResult<Vec<CString>> {
        let names = ash_window::enumerate_required_extensions(self.window.raw_display_handle())?;
        Ok(names
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) }.to_owned())
            .collect())
    }

    fn create_surface(&self, entry: &Entry, instance: &Instance) -> GfxResult<vk::SurfaceKHR> {
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
        }
        .map_err(|err| GfxError::Backend(format!("surface creation failed: {err:?}")))
    }

    fn framebuffer_extent(&self) -> Extent2D {
        self.extent
    }
}
