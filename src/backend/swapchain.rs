// Swapchain - Window presentation
//
// Picks format, present mode, image count and extent from what the surface
// advertises, then creates the swapchain and one color view per image.

use anyhow::Result;
use ash::vk;

use super::device::QueueFamilyIndices;
use super::release::{build_scoped, DeviceObject, ReleaseStack};
use super::{Surface, VulkanDevice};
use crate::error::RendererError;

/// Surface capability snapshot of one adapter
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Prefer 8-bit BGRA sRGB wherever it appears, otherwise take the first entry
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX if advertised, otherwise FIFO (always supported, even if unlisted)
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum, clamped to the maximum when there is one (0 = unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        image_count.min(caps.max_image_count)
    } else {
        image_count
    }
}

/// Use the surface's fixed extent if it has one; Wayland leaves it to us
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: desired.width.clamp(min.width, max.width.max(min.width)),
        height: desired.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// Exclusive when one family does both jobs, concurrent across both otherwise
pub fn image_sharing(indices: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if indices.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![indices.graphics, indices.present],
        )
    }
}

/// Everything derived from the surface before the swapchain is created
#[derive(Debug, Clone, Copy)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub extent: vk::Extent2D,
}

impl SwapchainConfig {
    pub fn choose(support: &SurfaceSupport, desired: vk::Extent2D) -> Result<Self, RendererError> {
        let surface_format =
            choose_surface_format(&support.formats).ok_or(RendererError::NoSurfaceFormats)?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            image_count: choose_image_count(&support.capabilities),
            extent: choose_extent(&support.capabilities, desired),
        })
    }
}

/// Result of asking for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Ready { index: u32, suboptimal: bool },
    OutOfDate,
}

/// How the swapchain reported a present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    /// Index-aligned with `images`
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create the swapchain and its views
    ///
    /// The returned stack owns the swapchain and views. If any step fails,
    /// whatever was created is destroyed before the error is returned.
    pub fn new(
        device: &VulkanDevice,
        surface: &Surface,
        desired: vk::Extent2D,
    ) -> Result<(Self, ReleaseStack)> {
        let config = SwapchainConfig::choose(&device.support, desired)?;

        log::info!(
            "Creating swapchain: {}x{}, {:?} / {:?}, present mode {:?}, {} images requested",
            config.extent.width,
            config.extent.height,
            config.surface_format.format,
            config.surface_format.color_space,
            config.present_mode,
            config.image_count
        );

        build_scoped(device, |stack| {
            let (sharing_mode, family_indices) = image_sharing(device.queue_families);

            let create_info = vk::SwapchainCreateInfoKHR::builder()
                .surface(surface.surface)
                .min_image_count(config.image_count)
                .image_format(config.surface_format.format)
                .image_color_space(config.surface_format.color_space)
                .image_extent(config.extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .image_sharing_mode(sharing_mode)
                .queue_family_indices(&family_indices)
                .pre_transform(device.support.capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(config.present_mode)
                .clipped(true)
                .old_swapchain(vk::SwapchainKHR::null());

            let swapchain = unsafe {
                device
                    .swapchain_loader
                    .create_swapchain(&create_info, None)
            }
            .map_err(RendererError::creating("swapchain"))?;
            stack.push(DeviceObject::Swapchain(swapchain));

            let images = unsafe { device.swapchain_loader.get_swapchain_images(swapchain) }
                .map_err(RendererError::creating("swapchain images"))?;

            log::info!("Created swapchain with {} images", images.len());

            let mut image_views = Vec::with_capacity(images.len());
            for &image in &images {
                let view = create_color_view(device, image, config.surface_format.format)?;
                stack.push(DeviceObject::ImageView(view));
                image_views.push(view);
            }

            Ok(Self {
                swapchain,
                images,
                image_views,
                format: config.surface_format.format,
                extent: config.extent,
            })
        })
    }

    /// Acquire next image for rendering, waiting without a timeout
    pub fn acquire_next_image(
        &self,
        device: &VulkanDevice,
        semaphore: vk::Semaphore,
    ) -> Result<Acquire, RendererError> {
        let result = unsafe {
            device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquire::Ready { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(RendererError::frame("acquire next image")(e)),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        device: &VulkanDevice,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentStatus, RendererError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            device
                .swapchain_loader
                .queue_present(device.present_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(RendererError::frame("queue present")(e)),
        }
    }
}

fn create_color_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    let view = unsafe { device.device.create_image_view(&create_info, None) }
        .map_err(RendererError::creating("image view"))?;
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    const BGRA_SRGB: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    #[test]
    fn preferred_format_found_anywhere_in_list() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            BGRA_SRGB,
        ];
        assert_eq!(choose_surface_format(&formats), Some(BGRA_SRGB));
    }

    #[test]
    fn first_format_when_preferred_missing() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn mailbox_anywhere_wins() {
        let modes = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_even_when_unlisted() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_is_min_plus_one_clamped_to_max() {
        for min in 1..6 {
            for max in 1..8 {
                if max < min {
                    continue;
                }
                assert_eq!(choose_image_count(&caps(min, max)), (min + 1).min(max));
            }
            assert_eq!(choose_image_count(&caps(min, 0)), min + 1);
        }
    }

    #[test]
    fn fixed_surface_extent_overrides_desired() {
        let mut fixed = caps(2, 0);
        fixed.current_extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let desired = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&fixed, desired), fixed.current_extent);
        assert_eq!(choose_extent(&caps(2, 0), desired), desired);
    }

    #[test]
    fn desired_extent_is_clamped() {
        let desired = vk::Extent2D {
            width: 10_000,
            height: 0,
        };
        assert_eq!(
            choose_extent(&caps(2, 0), desired),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn sharing_follows_queue_families() {
        let (mode, families) = image_sharing(QueueFamilyIndices {
            graphics: 0,
            present: 0,
        });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(families.is_empty());

        let (mode, families) = image_sharing(QueueFamilyIndices {
            graphics: 0,
            present: 1,
        });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(families, vec![0, 1]);
    }

    #[test]
    fn two_image_minimum_unbounded_fifo_only() {
        let support = SurfaceSupport {
            capabilities: caps(2, 0),
            formats: vec![BGRA_SRGB],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let config = SwapchainConfig::choose(
            &support,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();

        assert_eq!(config.image_count, 3);
        assert_eq!(config.surface_format, BGRA_SRGB);
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn no_formats_is_a_capability_error() {
        let support = SurfaceSupport {
            capabilities: caps(2, 0),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let err = SwapchainConfig::choose(&support, vk::Extent2D::default()).unwrap_err();
        assert!(matches!(err, RendererError::NoSurfaceFormats));
    }
}
