// Synchronization primitives
//
// One set for the single frame in flight: the fence is CPU/GPU backpressure,
// the semaphores order acquire -> draw -> present on the GPU.

use anyhow::Result;
use ash::vk;

use super::release::{DeviceObject, ReleaseStack};
use super::VulkanDevice;
use crate::error::RendererError;

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice, stack: &mut ReleaseStack) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // First wait must not block

        let image_available = unsafe { device.device.create_semaphore(&semaphore_info, None) }
            .map_err(RendererError::creating("image available semaphore"))?;
        stack.push(DeviceObject::Semaphore(image_available));

        let render_finished = unsafe { device.device.create_semaphore(&semaphore_info, None) }
            .map_err(RendererError::creating("render finished semaphore"))?;
        stack.push(DeviceObject::Semaphore(render_finished));

        let in_flight_fence = unsafe { device.device.create_fence(&fence_info, None) }
            .map_err(RendererError::creating("in-flight fence"))?;
        stack.push(DeviceObject::Fence(in_flight_fence));

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }
}
