// Renderer - composes the backend into a drawable whole
//
// INIT ORDER:  context -> swapchain -> pipeline -> framebuffers -> commands -> sync
// DROP ORDER:  wait idle -> sync -> command pool -> swapchain -> pipeline -> context
//
// The context is shared through `Arc`, so it is released only once every
// other component is gone.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use crate::backend::device::{ContextConfig, VulkanContext};
use crate::backend::frame::{AcquireOutcome, FrameBackend, FrameLoop, FrameStatus, PresentOutcome, ResizeFlag};
use crate::backend::pipeline::GraphicsPipeline;
use crate::backend::shader::ShaderPaths;
use crate::backend::swapchain::Swapchain;
use crate::backend::sync::{CommandResources, FrameSyncSet};

/// Host-side callback reporting the framebuffer size in pixels.
pub type FramebufferSizeFn = dyn Fn() -> (u32, u32);

/// Everything the renderer needs besides the window callbacks.
#[derive(Debug, Clone)]
pub struct RendererOptions {
    pub context: ContextConfig,
    pub shaders: ShaderPaths,
    pub clear_color: [f32; 4],
}

pub struct Renderer {
    frame_loop: FrameLoop,
    gpu: GpuResources,
}

impl Renderer {
    /// Stand up the whole rendering core.
    ///
    /// * `required_extensions` - instance extensions needed by the window system
    /// * `create_surface` - builds the presentation surface for the new instance
    /// * `framebuffer_size` - queried at every swapchain (re)creation
    /// * `load_shader` - reads a SPIR-V blob; its errors are fatal
    pub fn new<S, F, L>(
        options: &RendererOptions,
        required_extensions: &[&CStr],
        create_surface: S,
        framebuffer_size: F,
        load_shader: &L,
    ) -> Result<Self>
    where
        S: FnOnce(&ash::Entry, &ash::Instance) -> Result<vk::SurfaceKHR>,
        F: Fn() -> (u32, u32) + 'static,
        L: Fn(&Path) -> Result<Vec<u8>> + ?Sized,
    {
        let ctx = Arc::new(VulkanContext::new(&options.context, required_extensions, create_surface)?);

        let mut swapchain = Swapchain::new(Arc::clone(&ctx), framebuffer_size())?;
        let pipeline = GraphicsPipeline::new(Arc::clone(&ctx), swapchain.format(), &options.shaders, load_shader)?;
        swapchain.create_framebuffers(pipeline.render_pass)?;

        let commands = CommandResources::new(Arc::clone(&ctx))?;
        let sync = FrameSyncSet::new(Arc::clone(&ctx))?;

        log::info!("Renderer initialized");

        Ok(Self {
            frame_loop: FrameLoop::new(ResizeFlag::default()),
            gpu: GpuResources {
                sync,
                commands,
                swapchain,
                pipeline,
                framebuffer_size: Box::new(framebuffer_size),
                clear_color: options.clear_color,
                ctx,
            },
        })
    }

    /// Draw and present one frame.
    pub fn draw_frame(&mut self) -> Result<FrameStatus> {
        self.frame_loop.draw_frame(&mut self.gpu)
    }

    /// Handle for the window's resize event handler.
    pub fn resize_flag(&self) -> ResizeFlag {
        self.frame_loop.resize_flag()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frame_loop.frames_presented()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.gpu.swapchain.extent()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.gpu.ctx.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer...");
        // Nothing may be destroyed while the GPU still references it
        if let Err(e) = self.gpu.ctx.wait_idle() {
            log::error!("Failed to wait for device idle: {:?}", e);
        }
    }
}

/// GPU objects the frame loop drives. Field order is drop order.
struct GpuResources {
    sync: FrameSyncSet,
    commands: CommandResources,
    swapchain: Swapchain,
    pipeline: GraphicsPipeline,
    framebuffer_size: Box<FramebufferSizeFn>,
    clear_color: [f32; 4],
    ctx: Arc<VulkanContext>,
}

impl FrameBackend for GpuResources {
    fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
        let fence = self.sync.frame(slot).in_flight_fence;
        unsafe { self.ctx.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("Failed to wait for in-flight fence")
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        let fence = self.sync.frame(slot).in_flight_fence;
        unsafe { self.ctx.device.reset_fences(&[fence]) }.context("Failed to reset in-flight fence")
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.swapchain.acquire_next_image(self.sync.frame(slot).image_available)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let device = &self.ctx.device;
        let cmd = self.commands.buffer(slot);
        let extent = self.swapchain.extent();
        let framebuffer = self.swapchain.framebuffers[image_index as usize];

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::default();
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin recording command buffer")?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue { float32: self.clear_color },
            }];
            let render_area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.pipeline.render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            // Full-screen triangle, vertices come from gl_VertexIndex
            device.cmd_draw(cmd, 3, 1, 0, 0);

            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .context("Failed to record command buffer")?;
        }

        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let sync = self.sync.frame(slot);
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.commands.buffer(slot)];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, &[submit_info], sync.in_flight_fence)
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.sync.frame(slot).render_finished;
        self.swapchain
            .present(self.ctx.present_queue, image_index, &[render_finished])
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let size = (self.framebuffer_size)();
        log::debug!("Recreating swapchain for framebuffer {}x{}", size.0, size.1);
        self.swapchain.recreate(size, self.pipeline.render_pass)
    }
}
