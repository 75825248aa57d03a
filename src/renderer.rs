// =============================================================================
// RENDERER - owns every Vulkan object for one window
// =============================================================================
//
// Creation order:
//   instance -> surface -> device -> swapchain + views -> render pass
//   -> framebuffers -> pipeline -> command pool/buffer -> sync objects
//
// Teardown runs the other way: device objects come off the release stack
// after the device is idle, then the device, surface and instance drop.

use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::command::{CommandResources, DrawTarget};
use crate::backend::pipeline::{GraphicsPipeline, RenderTargets};
use crate::backend::release::{build_scoped, ReleaseStack};
use crate::backend::swapchain::{Acquire, PresentStatus};
use crate::backend::sync::FrameSync;
use crate::backend::{Surface, Swapchain, VulkanDevice, VulkanInstance};
use crate::config::Config;
use crate::error::RendererError;
use crate::frame::{FrameLoop, FrameOps, FrameOutcome, FrameStats};

/// IMPORTANT: Field order matters for Drop. `resources` is released by hand
/// in `drop`, then the device, surface and instance go in that order.
pub struct Renderer {
    frame_loop: FrameLoop,
    clear_color: [f32; 4],

    sync: FrameSync,
    commands: CommandResources,
    targets: RenderTargets,
    pipeline: GraphicsPipeline,
    swapchain: Swapchain,
    resources: ReleaseStack,

    device: VulkanDevice,
    // Held until after the device drops
    _surface: Surface,
    _instance: VulkanInstance,
}

impl Renderer {
    /// Bring up everything needed to draw into the window
    ///
    /// # Safety
    /// The display and window handles must outlive the renderer.
    pub unsafe fn new(
        config: &Config,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let instance = VulkanInstance::new(&config.window.title, config.validation_enabled())?;
        let surface = Surface::new(&instance, display_handle, window_handle)?;
        let device = VulkanDevice::new(&instance, &surface)?;

        let ((swapchain, targets, pipeline, commands, sync), resources) =
            build_scoped(&device, |stack| {
                let (swapchain, swapchain_objects) = Swapchain::new(&device, &surface, extent)?;
                stack.absorb(swapchain_objects);

                let targets = RenderTargets::new(&device, &swapchain, stack)?;
                let pipeline =
                    GraphicsPipeline::new(&device, targets.render_pass, &config.shaders, stack)?;
                let commands = CommandResources::new(&device, stack)?;
                let sync = FrameSync::new(&device, stack)?;

                Ok((swapchain, targets, pipeline, commands, sync))
            })?;

        log::info!(
            "Vulkan initialized: {} device objects live",
            resources.len()
        );

        Ok(Self {
            frame_loop: FrameLoop::new(),
            clear_color: config.graphics.clear_color,
            sync,
            commands,
            targets,
            pipeline,
            swapchain,
            resources,
            device,
            _surface: surface,
            _instance: instance,
        })
    }

    /// Run one iteration of the frame loop
    pub fn draw_frame(&mut self) -> FrameOutcome {
        let mut frame = VulkanFrame {
            device: &self.device,
            swapchain: &self.swapchain,
            targets: &self.targets,
            pipeline: &self.pipeline,
            commands: &self.commands,
            sync: &self.sync,
            clear_color: self.clear_color,
        };
        self.frame_loop.tick(&mut frame)
    }

    pub fn stats(&self) -> FrameStats {
        self.frame_loop.stats()
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let stats = self.frame_loop.stats();
        log::info!(
            "Cleaning up Vulkan resources ({} presented, {} stale, {} dropped)",
            stats.presented,
            stats.stale,
            stats.dropped
        );
        log::debug!("Frame loop stopped in {:?}", self.frame_loop.state());

        self.resources.release(&self.device);
    }
}

// =============================================================================
// PER-FRAME GPU WORK
// =============================================================================

/// Borrowed view of the renderer for a single tick
struct VulkanFrame<'a> {
    device: &'a VulkanDevice,
    swapchain: &'a Swapchain,
    targets: &'a RenderTargets,
    pipeline: &'a GraphicsPipeline,
    commands: &'a CommandResources,
    sync: &'a FrameSync,
    clear_color: [f32; 4],
}

impl FrameOps for VulkanFrame<'_> {
    fn wait_for_fence(&mut self) -> Result<(), RendererError> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.sync.in_flight_fence], true, u64::MAX)
        }
        .map_err(RendererError::frame("wait for in-flight fence"))
    }

    fn reset_fence(&mut self) -> Result<(), RendererError> {
        unsafe { self.device.device.reset_fences(&[self.sync.in_flight_fence]) }
            .map_err(RendererError::frame("reset in-flight fence"))
    }

    fn acquire_image(&mut self) -> Result<Acquire, RendererError> {
        self.swapchain
            .acquire_next_image(self.device, self.sync.image_available)
    }

    fn record(&mut self, image_index: u32) -> Result<(), RendererError> {
        let target = DrawTarget {
            render_pass: self.targets.render_pass,
            framebuffer: self.targets.framebuffer(image_index)?,
            pipeline: self.pipeline.pipeline,
            extent: self.targets.extent,
            clear_color: self.clear_color,
        };
        self.commands.record(&self.device.device, &target)
    }

    fn submit(&mut self, wait_image_available: bool) -> Result<(), RendererError> {
        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.commands.buffer];
        let signal_semaphores = [self.sync.render_finished];

        // A held image's signal was already consumed by the re-arm submit
        let waits = if wait_image_available { 1 } else { 0 };
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores[..waits])
            .wait_dst_stage_mask(&wait_stages[..waits])
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                self.sync.in_flight_fence,
            )
        }
        .map_err(RendererError::frame("queue submit"))
    }

    fn present(&mut self, image_index: u32) -> Result<PresentStatus, RendererError> {
        self.swapchain
            .present(self.device, image_index, &[self.sync.render_finished])
    }

    fn rearm_fence(&mut self, consume_image_available: bool) -> Result<(), RendererError> {
        // A batch with no command buffers still signals the fence once the
        // queue drains, and unsignals image-available when it waits on it
        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let waits = if consume_image_available { 1 } else { 0 };
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores[..waits])
            .wait_dst_stage_mask(&wait_stages[..waits]);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                self.sync.in_flight_fence,
            )
        }
        .map_err(RendererError::frame("re-arm fence submit"))
    }
}
