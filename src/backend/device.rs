// Vulkan Device - adapter selection and logical device
//
// Responsibilities:
// - Probe every physical device against the target surface
// - Pick the first adapter with graphics + present queues, the swapchain
//   extension and at least one surface format and present mode
// - Logical device with one queue per distinct family

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::{CStr, CString};
use thiserror::Error;

use super::release::{DeviceObject, Destroyer};
use super::swapchain::SurfaceSupport;
use super::{Surface, VulkanInstance};
use crate::error::RendererError;

/// Device extensions every candidate must expose
fn required_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Graphics and present queue family indices of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Scan families in order, keeping the first graphics-capable and the first
    /// present-capable index. Stops as soon as both are known.
    pub fn find(families: &[QueueFamilyProbe]) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if graphics.is_none() && family.supports_graphics() {
                graphics = Some(index);
            }
            if present.is_none() && family.present {
                present = Some(index);
            }
            if let (Some(graphics), Some(present)) = (graphics, present) {
                return Some(Self { graphics, present });
            }
        }

        None
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// What we know about one queue family of a candidate
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyProbe {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Can present to the target surface
    pub present: bool,
}

impl QueueFamilyProbe {
    fn supports_graphics(&self) -> bool {
        self.queue_count > 0 && self.flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

/// Everything the selector needs to judge one physical device
#[derive(Debug, Clone)]
pub struct AdapterProbe {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: Vec<QueueFamilyProbe>,
    pub extensions: Vec<CString>,
    pub support: SurfaceSupport,
    /// First query that failed; the fields above are then incomplete
    pub query_error: Option<vk::Result>,
}

/// Why a candidate was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Unsuitable {
    #[error("adapter query failed: {0}")]
    QueryFailed(vk::Result),
    #[error("no graphics queue family")]
    NoGraphicsQueue,
    #[error("no queue family can present to the surface")]
    NoPresentQueue,
    #[error("missing device extension {0}")]
    MissingExtension(String),
    #[error("no supported surface formats")]
    NoSurfaceFormats,
    #[error("no supported present modes")]
    NoPresentModes,
}

impl AdapterProbe {
    /// Query a physical device against the surface
    ///
    /// A failing query does not abort selection: it is kept on the probe and
    /// rejects just this candidate.
    pub fn query(instance: &ash::Instance, surface: &Surface, handle: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let mut probe = Self {
            handle,
            name,
            queue_families: Vec::new(),
            extensions: Vec::new(),
            support: SurfaceSupport::default(),
            query_error: None,
        };
        if let Err(result) = probe.fill(instance, surface) {
            probe.query_error = Some(result);
        }
        probe
    }

    fn fill(&mut self, instance: &ash::Instance, surface: &Surface) -> Result<(), vk::Result> {
        let handle = self.handle;

        let family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        self.queue_families = family_properties
            .iter()
            .enumerate()
            .map(|(index, family)| {
                Ok(QueueFamilyProbe {
                    flags: family.queue_flags,
                    queue_count: family.queue_count,
                    present: surface.supports_present(handle, index as u32)?,
                })
            })
            .collect::<Result<Vec<_>, vk::Result>>()?;

        self.extensions = unsafe { instance.enumerate_device_extension_properties(handle) }?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect();

        self.support = SurfaceSupport {
            capabilities: surface.capabilities(handle)?,
            formats: surface.formats(handle)?,
            present_modes: surface.present_modes(handle)?,
        };

        Ok(())
    }

    /// Check the four suitability conditions for this candidate
    pub fn check(&self) -> Result<QueueFamilyIndices, Unsuitable> {
        if let Some(result) = self.query_error {
            return Err(Unsuitable::QueryFailed(result));
        }

        let indices = QueueFamilyIndices::find(&self.queue_families).ok_or_else(|| {
            if self.queue_families.iter().any(QueueFamilyProbe::supports_graphics) {
                Unsuitable::NoPresentQueue
            } else {
                Unsuitable::NoGraphicsQueue
            }
        })?;

        for required in required_extensions() {
            if !self.extensions.iter().any(|ext| ext.as_c_str() == required) {
                return Err(Unsuitable::MissingExtension(
                    required.to_string_lossy().into_owned(),
                ));
            }
        }

        if self.support.formats.is_empty() {
            return Err(Unsuitable::NoSurfaceFormats);
        }
        if self.support.present_modes.is_empty() {
            return Err(Unsuitable::NoPresentModes);
        }

        Ok(indices)
    }
}

/// Return the index of the first fully suitable candidate, in order
pub fn select_adapter(
    candidates: &[AdapterProbe],
) -> Result<(usize, QueueFamilyIndices), RendererError> {
    if candidates.is_empty() {
        return Err(RendererError::NoAdapters);
    }

    for (index, candidate) in candidates.iter().enumerate() {
        match candidate.check() {
            Ok(indices) => return Ok((index, indices)),
            Err(reason) => log::warn!("Skipping GPU {}: {}", candidate.name, reason),
        }
    }

    Err(RendererError::NoSuitableAdapter {
        candidates: candidates.len(),
    })
}

/// Distinct queue families to create queues on
pub fn queue_create_families(indices: QueueFamilyIndices) -> Vec<u32> {
    if indices.is_shared() {
        vec![indices.graphics]
    } else {
        vec![indices.graphics, indices.present]
    }
}

/// Logical device plus what we kept from the chosen adapter
pub struct VulkanDevice {
    pub device: ash::Device,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    /// Surface capability snapshot of the chosen adapter
    pub support: SurfaceSupport,
}

impl VulkanDevice {
    pub fn new(instance: &VulkanInstance, surface: &Surface) -> Result<Self> {
        let handles = unsafe { instance.instance.enumerate_physical_devices() }
            .map_err(RendererError::driver("physical device list"))?;

        let candidates: Vec<AdapterProbe> = handles
            .into_iter()
            .map(|handle| AdapterProbe::query(&instance.instance, surface, handle))
            .collect();

        let (chosen, queue_families) = select_adapter(&candidates)?;
        let candidate = candidates
            .into_iter()
            .nth(chosen)
            .context("Selected adapter vanished")?;

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(candidate.handle)
        };
        log::info!("Selected GPU: {}", candidate.name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics {}, present {}",
            queue_families.graphics,
            queue_families.present
        );

        let device = Self::create_logical_device(
            &instance.instance,
            candidate.handle,
            queue_families,
        )?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let swapchain_loader = ash::extensions::khr::Swapchain::new(&instance.instance, &device);

        Ok(Self {
            device,
            swapchain_loader,
            queue_families,
            graphics_queue,
            present_queue,
            support: candidate.support,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> =
            queue_create_families(queue_families)
                .into_iter()
                .map(|family| {
                    vk::DeviceQueueCreateInfo::builder()
                        .queue_family_index(family)
                        .queue_priorities(&queue_priorities)
                        .build()
                })
                .collect();

        let extensions: Vec<_> = required_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(RendererError::creating("logical device"))?;

        Ok(device)
    }
}

impl Destroyer for VulkanDevice {
    fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.device_wait_idle() }
    }

    unsafe fn destroy(&self, object: DeviceObject) {
        let device = &self.device;
        match object {
            DeviceObject::Swapchain(swapchain) => {
                self.swapchain_loader.destroy_swapchain(swapchain, None)
            }
            DeviceObject::ImageView(view) => device.destroy_image_view(view, None),
            DeviceObject::RenderPass(pass) => device.destroy_render_pass(pass, None),
            DeviceObject::ShaderModule(module) => device.destroy_shader_module(module, None),
            DeviceObject::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
            DeviceObject::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
            DeviceObject::Framebuffer(framebuffer) => device.destroy_framebuffer(framebuffer, None),
            DeviceObject::CommandPool(pool) => device.destroy_command_pool(pool, None),
            DeviceObject::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
            DeviceObject::Fence(fence) => device.destroy_fence(fence, None),
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = Destroyer::wait_idle(self) {
            log::warn!("Device wait idle failed: {}", e);
        }

        unsafe { self.device.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags, present: bool) -> QueueFamilyProbe {
        QueueFamilyProbe {
            flags,
            queue_count: 1,
            present,
        }
    }

    fn bgra_support() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    fn probe(raw: u64, families: Vec<QueueFamilyProbe>) -> AdapterProbe {
        AdapterProbe {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu{}", raw),
            queue_families: families,
            extensions: vec![CString::from(c"VK_KHR_swapchain")],
            support: bgra_support(),
            query_error: None,
        }
    }

    fn suitable(raw: u64) -> AdapterProbe {
        probe(raw, vec![family(vk::QueueFlags::GRAPHICS, true)])
    }

    #[test]
    fn graphics_and_present_on_one_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        let indices = QueueFamilyIndices::find(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 1 });
        assert!(indices.is_shared());
    }

    #[test]
    fn earliest_family_wins_for_each_capability() {
        let families = [
            family(vk::QueueFlags::COMPUTE, true),
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::GRAPHICS, true),
        ];
        let indices = QueueFamilyIndices::find(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 0 });
        assert!(!indices.is_shared());
    }

    #[test]
    fn empty_graphics_family_does_not_count() {
        let families = [QueueFamilyProbe {
            flags: vk::QueueFlags::GRAPHICS,
            queue_count: 0,
            present: true,
        }];
        assert_eq!(QueueFamilyIndices::find(&families), None);
    }

    #[test]
    fn rejection_reasons() {
        let no_graphics = probe(1, vec![family(vk::QueueFlags::COMPUTE, true)]);
        assert_eq!(no_graphics.check(), Err(Unsuitable::NoGraphicsQueue));

        let no_present = probe(2, vec![family(vk::QueueFlags::GRAPHICS, false)]);
        assert_eq!(no_present.check(), Err(Unsuitable::NoPresentQueue));

        let mut no_swapchain = suitable(3);
        no_swapchain.extensions.clear();
        assert_eq!(
            no_swapchain.check(),
            Err(Unsuitable::MissingExtension("VK_KHR_swapchain".into()))
        );

        let mut no_formats = suitable(4);
        no_formats.support.formats.clear();
        assert_eq!(no_formats.check(), Err(Unsuitable::NoSurfaceFormats));

        let mut no_modes = suitable(5);
        no_modes.support.present_modes.clear();
        assert_eq!(no_modes.check(), Err(Unsuitable::NoPresentModes));
    }

    #[test]
    fn no_adapters_differs_from_no_suitable_adapter() {
        assert!(matches!(select_adapter(&[]), Err(RendererError::NoAdapters)));

        let mut bad = suitable(1);
        bad.support.formats.clear();
        assert!(matches!(
            select_adapter(&[bad]),
            Err(RendererError::NoSuitableAdapter { candidates: 1 })
        ));
    }

    #[test]
    fn first_suitable_candidate_is_checked_immediately() {
        let mut first = suitable(1);
        first.extensions.clear();
        let candidates = vec![first, suitable(2), suitable(3)];

        let (index, _) = select_adapter(&candidates).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn selection_is_deterministic() {
        let candidates = vec![
            probe(1, vec![family(vk::QueueFlags::TRANSFER, true)]),
            probe(
                2,
                vec![
                    family(vk::QueueFlags::GRAPHICS, false),
                    family(vk::QueueFlags::empty(), true),
                ],
            ),
            suitable(3),
        ];

        let first = select_adapter(&candidates).unwrap();
        for _ in 0..10 {
            assert_eq!(select_adapter(&candidates).unwrap(), first);
        }
        assert_eq!(first, (1, QueueFamilyIndices { graphics: 0, present: 1 }));
    }

    fn failed_query(raw: u64, result: vk::Result) -> AdapterProbe {
        AdapterProbe {
            queue_families: Vec::new(),
            extensions: Vec::new(),
            support: SurfaceSupport::default(),
            query_error: Some(result),
            ..suitable(raw)
        }
    }

    #[test]
    fn failed_query_rejects_only_that_candidate() {
        let lost = failed_query(2, vk::Result::ERROR_SURFACE_LOST_KHR);
        assert_eq!(
            lost.check(),
            Err(Unsuitable::QueryFailed(vk::Result::ERROR_SURFACE_LOST_KHR))
        );

        // Suitable adapter ahead of a broken one still wins
        let candidates = vec![suitable(1), lost.clone()];
        assert_eq!(select_adapter(&candidates).unwrap().0, 0);

        // And a broken one ahead of a suitable one is skipped
        let candidates = vec![lost, suitable(3)];
        assert_eq!(select_adapter(&candidates).unwrap().0, 1);
    }

    #[test]
    fn only_failed_queries_is_no_suitable_adapter() {
        let candidates = vec![
            failed_query(1, vk::Result::ERROR_SURFACE_LOST_KHR),
            failed_query(2, vk::Result::ERROR_OUT_OF_HOST_MEMORY),
        ];
        assert!(matches!(
            select_adapter(&candidates),
            Err(RendererError::NoSuitableAdapter { candidates: 2 })
        ));
    }

    #[test]
    fn queues_are_deduplicated() {
        assert_eq!(
            queue_create_families(QueueFamilyIndices { graphics: 0, present: 0 }),
            vec![0]
        );
        assert_eq!(
            queue_create_families(QueueFamilyIndices { graphics: 0, present: 2 }),
            vec![0, 2]
        );
    }
}
