// Render pass, framebuffers and the fixed triangle pipeline
//
// One color attachment, one subpass, one framebuffer per swapchain view.
// The pipeline has no vertex input: the vertex shader carries the triangle.

use anyhow::Result;
use ash::vk;

use super::release::{DeviceObject, ReleaseStack};
use super::shader::{create_shader_module, load_spirv};
use super::{Swapchain, VulkanDevice};
use crate::config::ShaderConfig;
use crate::error::RendererError;

/// Render pass plus one framebuffer per swapchain image
pub struct RenderTargets {
    pub render_pass: vk::RenderPass,
    /// Index-aligned with the swapchain images
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
}

impl RenderTargets {
    pub fn new(
        device: &VulkanDevice,
        swapchain: &Swapchain,
        stack: &mut ReleaseStack,
    ) -> Result<Self> {
        let render_pass = create_render_pass(device, swapchain.format)?;
        stack.push(DeviceObject::RenderPass(render_pass));

        let mut framebuffers = Vec::with_capacity(swapchain.image_views.len());
        for &view in &swapchain.image_views {
            let framebuffer = create_framebuffer(device, render_pass, view, swapchain.extent)?;
            stack.push(DeviceObject::Framebuffer(framebuffer));
            framebuffers.push(framebuffer);
        }

        log::info!("Created render pass and {} framebuffers", framebuffers.len());

        Ok(Self {
            render_pass,
            framebuffers,
            extent: swapchain.extent,
        })
    }

    /// Framebuffer paired with the given swapchain image
    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer, RendererError> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or(RendererError::ImageIndexOutOfRange {
                index: image_index,
                count: self.framebuffers.len(),
            })
    }
}

/// Create a render pass with a single presentable color attachment
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The layout transition must wait for the acquire semaphore, which is
    // waited on at COLOR_ATTACHMENT_OUTPUT
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .map_err(RendererError::creating("render pass"))?;
    Ok(render_pass)
}

fn create_framebuffer(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let attachments = &[view];
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
        .map_err(RendererError::creating("framebuffer"))?;
    Ok(framebuffer)
}

/// The one graphics pipeline we draw with. Its layout and shader modules
/// only live on the release stack.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Load both shaders and build the pipeline against `render_pass`
    pub fn new(
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
        shaders: &ShaderConfig,
        stack: &mut ReleaseStack,
    ) -> Result<Self> {
        let vert_code = load_spirv(&shaders.vertex)?;
        let frag_code = load_spirv(&shaders.fragment)?;

        let vert_shader = create_shader_module(device, &vert_code)?;
        stack.push(DeviceObject::ShaderModule(vert_shader));
        let frag_shader = create_shader_module(device, &frag_code)?;
        stack.push(DeviceObject::ShaderModule(frag_shader));

        let entry_point = c"main";

        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_shader)
            .name(entry_point)
            .build();

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_shader)
            .name(entry_point)
            .build();

        let shader_stages = &[vert_stage, frag_stage];

        // No vertex buffers
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set at record time
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(RendererError::creating("pipeline layout"))?;
        stack.push(DeviceObject::PipelineLayout(layout));

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, result)| RendererError::creating("graphics pipeline")(result))?;

        let pipeline = pipelines[0];
        stack.push(DeviceObject::Pipeline(pipeline));

        log::info!("Created triangle pipeline");

        Ok(Self { pipeline })
    }
}
