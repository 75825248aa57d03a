// Presentation surface - Wayland window connection
//
// The windowing side hands us opaque display/surface pointers through
// raw-window-handle; we only turn them into a VkSurfaceKHR.

use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::VulkanInstance;
use crate::error::RendererError;

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
}

impl Surface {
    /// Create a Wayland surface for the given window
    ///
    /// # Safety
    /// The handles must stay valid for the lifetime of the returned surface.
    pub unsafe fn new(
        instance: &VulkanInstance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let surface = match (display_handle, window_handle) {
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr().cast())
                    .surface(window.surface.as_ptr().cast());
                let wayland_loader = ash::extensions::khr::WaylandSurface::new(
                    &instance.entry,
                    &instance.instance,
                );
                wayland_loader
                    .create_wayland_surface(&create_info, None)
                    .map_err(RendererError::creating("Wayland surface"))?
            }
            _ => return Err(RendererError::UnsupportedWindowSystem.into()),
        };

        log::info!("Created Wayland surface");

        Ok(Self {
            surface,
            loader: ash::extensions::khr::Surface::new(&instance.entry, &instance.instance),
        })
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool, vk::Result> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )
        }
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, vk::Result> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
    }

    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, vk::Result> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, vk::Result> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}
