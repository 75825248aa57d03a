// Command pool and the single per-frame command buffer
//
// The buffer is reset and re-recorded every frame for the acquired image.

use anyhow::Result;
use ash::vk;

use super::release::{DeviceObject, ReleaseStack};
use super::VulkanDevice;
use crate::error::RendererError;

/// What one frame's draw targets
#[derive(Debug, Clone, Copy)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// The per-frame command buffer. Its pool only lives on the release stack.
pub struct CommandResources {
    pub buffer: vk::CommandBuffer,
}

impl CommandResources {
    pub fn new(device: &VulkanDevice, stack: &mut ReleaseStack) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            // RESET: the buffer is reset individually every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(RendererError::creating("command pool"))?;
        stack.push(DeviceObject::CommandPool(pool));

        // Freed together with the pool
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .map_err(RendererError::creating("command buffer"))?
            .into_iter()
            .next()
            .ok_or(RendererError::ResourceCreation {
                what: "command buffer",
                result: vk::Result::ERROR_UNKNOWN,
            })?;

        Ok(Self { buffer })
    }

    /// Reset the buffer and record the triangle draw into it
    pub fn record(&self, device: &ash::Device, target: &DrawTarget) -> Result<(), RendererError> {
        let cmd = self.buffer;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(RendererError::frame("reset command buffer"))?;

            let begin_info = vk::CommandBufferBeginInfo::builder();
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(RendererError::frame("begin command buffer"))?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: target.clear_color,
                },
            }];

            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(target.render_pass)
                .framebuffer(target.framebuffer)
                .render_area(full_rect(target.extent))
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
            device.cmd_set_viewport(cmd, 0, &[full_viewport(target.extent)]);
            device.cmd_set_scissor(cmd, 0, &[full_rect(target.extent)]);

            // 3 vertices, 1 instance: positions come from the vertex shader
            device.cmd_draw(cmd, 3, 1, 0, 0);

            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .map_err(RendererError::frame("end command buffer"))?;
        }

        Ok(())
    }
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_whole_extent() {
        let viewport = full_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn scissor_starts_at_origin() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let rect = full_rect(extent);
        assert_eq!((rect.offset.x, rect.offset.y), (0, 0));
        assert_eq!((rect.extent.width, rect.extent.height), (1280, 720));
    }
}
