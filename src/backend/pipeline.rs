// Graphics pipeline creation
//
// One render pass (single color attachment, one subpass) and one fixed
// pipeline drawing a full-screen triangle whose positions live in the
// vertex shader. Viewport and scissor are dynamic so a swapchain resize
// never invalidates the pipeline.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::device::VulkanContext;
use super::shader::{ShaderModule, ShaderPaths};

/// Create a render pass for a single swapchain color attachment
pub fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);

    // Don't write the attachment before the acquire semaphore has been waited on
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }.context("Failed to create render pass")
}

/// Fixed-function state for the triangle pipeline, kept separate from the
/// create call so the settings can be inspected.
pub struct FixedFunctionState {
    pub dynamic_states: [vk::DynamicState; 2],
    pub input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'static>,
    pub rasterizer: vk::PipelineRasterizationStateCreateInfo<'static>,
    pub multisampling: vk::PipelineMultisampleStateCreateInfo<'static>,
    pub color_blend_attachment: vk::PipelineColorBlendAttachmentState,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            dynamic_states: [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            input_assembly: vk::PipelineInputAssemblyStateCreateInfo::default()
                .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
                .primitive_restart_enable(false),
            rasterizer: vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(false)
                .rasterizer_discard_enable(false)
                .polygon_mode(vk::PolygonMode::FILL)
                .line_width(1.0)
                .cull_mode(vk::CullModeFlags::BACK)
                .front_face(vk::FrontFace::CLOCKWISE)
                .depth_bias_enable(false),
            multisampling: vk::PipelineMultisampleStateCreateInfo::default()
                .sample_shading_enable(false)
                .rasterization_samples(vk::SampleCountFlags::TYPE_1),
            color_blend_attachment: vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false),
        }
    }
}

/// Render pass, layout and pipeline; destroyed in that reverse order.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    ctx: Arc<VulkanContext>,
}

impl GraphicsPipeline {
    /// Build the pipeline for swapchain images of `format`.
    ///
    /// `load_shader` is the host's byte-blob loader; a failed load aborts
    /// creation. Shader modules are released as soon as the pipeline exists.
    pub fn new<L>(ctx: Arc<VulkanContext>, format: vk::Format, paths: &ShaderPaths, load_shader: &L) -> Result<Self>
    where
        L: Fn(&Path) -> Result<Vec<u8>> + ?Sized,
    {
        let device = &ctx.device;

        let vert_shader = ShaderModule::load(device, &paths.vertex, load_shader)?;
        let frag_shader = ShaderModule::load(device, &paths.fragment, load_shader)?;

        let render_pass = create_render_pass(device, format)?;

        // No descriptor sets, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_render_pass(render_pass, None) };
                return Err(e).context("Failed to create pipeline layout");
            }
        };

        let pipeline = match Self::create_pipeline(device, render_pass, layout, &vert_shader, &frag_shader) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    device.destroy_pipeline_layout(layout, None);
                    device.destroy_render_pass(render_pass, None);
                }
                return Err(e);
            }
        };

        log::info!("Created graphics pipeline for format {:?}", format);

        drop(vert_shader);
        drop(frag_shader);

        Ok(Self {
            pipeline,
            layout,
            render_pass,
            ctx,
        })
    }

    fn create_pipeline(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        vert_shader: &ShaderModule<'_>,
        frag_shader: &ShaderModule<'_>,
    ) -> Result<vk::Pipeline> {
        let entry_point = c"main";

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_shader.handle)
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader.handle)
                .name(entry_point),
        ];

        let state = FixedFunctionState::default();

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&state.dynamic_states);

        // Positions are baked into the vertex shader
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default();

        // Counts only; the actual rects are set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let color_blend_attachments = [state.color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&state.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&state.rasterizer)
            .multisample_state(&state.multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create pipeline")?
        };

        Ok(pipelines[0])
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            let device = &self.ctx.device;
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_and_scissor_are_dynamic() {
        let state = FixedFunctionState::default();
        assert!(state.dynamic_states.contains(&vk::DynamicState::VIEWPORT));
        assert!(state.dynamic_states.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn rasterizer_culls_back_faces_clockwise() {
        let state = FixedFunctionState::default();
        assert_eq!(state.input_assembly.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(state.rasterizer.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(state.rasterizer.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.rasterizer.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(state.multisampling.rasterization_samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn blending_disabled_with_all_channels_written() {
        let state = FixedFunctionState::default();
        assert_eq!(state.color_blend_attachment.blend_enable, vk::FALSE);
        assert_eq!(state.color_blend_attachment.color_write_mask, vk::ColorComponentFlags::RGBA);
    }
}
