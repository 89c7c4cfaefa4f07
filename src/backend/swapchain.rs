// Swapchain - Window presentation
//
// Owns the chain of presentable images plus everything derived from them
// (image views, framebuffers). On resize or a stale present the whole set
// is torn down and rebuilt; instance, device and surface are untouched.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::caps::SurfaceSupport;
use super::device::VulkanContext;
use super::error::RendererError;
use super::frame::{AcquireOutcome, PresentOutcome};
use super::selector::QueueIndices;

/// Mailbox when available, otherwise FIFO (always supported).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Index of BGRA8 sRGB / sRGB-nonlinear, else 0 (the first listed format
/// is always presentable).
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> usize {
    formats
        .iter()
        .position(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(0)
}

/// The surface's current extent, unless it is the "window decides" sentinel.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        let (width, height) = framebuffer_size;
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 = no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        image_count.min(caps.max_image_count)
    } else {
        image_count
    }
}

/// Everything decided before the swapchain create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format_index: usize,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// `support` must list at least one format (guaranteed by device selection).
    pub fn new(support: &SurfaceSupport, framebuffer_size: (u32, u32)) -> Self {
        let format_index = choose_surface_format(&support.formats);
        let surface_format = support.formats[format_index];
        Self {
            format_index,
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, framebuffer_size),
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        }
    }

    pub fn create_info<'a>(
        &self,
        surface: vk::SurfaceKHR,
        queue_family_indices: &'a [u32],
        sharing_mode: vk::SharingMode,
    ) -> vk::SwapchainCreateInfoKHR<'a> {
        vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(self.image_count)
            .image_format(self.format)
            .image_color_space(self.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices)
            .pre_transform(self.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
    }
}

/// What swapchain (re)creation asks of the surface.
pub trait SurfaceState {
    /// Formats and present modes captured when the device was probed.
    fn snapshot(&self) -> &SurfaceSupport;
    /// Capabilities as they are now; the current extent follows the window.
    fn current_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR>;
}

impl SurfaceState for VulkanContext {
    fn snapshot(&self) -> &SurfaceSupport {
        &self.physical_device.surface
    }

    fn current_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        self.surface_capabilities()
    }
}

impl SwapchainPlan {
    /// Plan against live capabilities and the probe-time format/mode lists.
    pub fn query<S: SurfaceState + ?Sized>(surface: &S, framebuffer_size: (u32, u32)) -> Result<Self> {
        let snapshot = surface.snapshot();
        let support = SurfaceSupport {
            capabilities: surface.current_capabilities()?,
            formats: snapshot.formats.clone(),
            present_modes: snapshot.present_modes.clone(),
        };
        Ok(Self::new(&support, framebuffer_size))
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub plan: SwapchainPlan,
    ctx: Arc<VulkanContext>,
}

impl Swapchain {
    /// Create the swapchain and its image views. Framebuffers follow once
    /// a render pass exists (`create_framebuffers`).
    pub fn new(ctx: Arc<VulkanContext>, framebuffer_size: (u32, u32)) -> Result<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(&ctx.instance, &ctx.device);

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            plan: SwapchainPlan::query(&*ctx, framebuffer_size)?,
            ctx,
        };
        swapchain.create_swapchain()?;
        swapchain.create_image_views()?;

        Ok(swapchain)
    }

    fn create_swapchain(&mut self) -> Result<()> {
        let plan = &self.plan;
        log::debug!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images",
            plan.extent.width,
            plan.extent.height,
            plan.format,
            plan.color_space,
            plan.present_mode,
            plan.image_count
        );

        let queues: QueueIndices = self.ctx.queue_indices;
        let (sharing_mode, family_indices) = queues.sharing_mode();
        let create_info = plan.create_info(self.ctx.surface, &family_indices, sharing_mode);

        self.swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;
        self.images = unsafe { self.swapchain_loader.get_swapchain_images(self.swapchain) }
            .context("Failed to get swapchain images")?;

        log::info!("Created swapchain with {} images", self.images.len());
        Ok(())
    }

    fn create_image_views(&mut self) -> Result<()> {
        let format = self.plan.format;

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::default()
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

            // Pushed one at a time so Drop cleans up a partial set
            let view = unsafe { self.ctx.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            self.image_views.push(view);
        }

        Ok(())
    }

    /// One framebuffer per image view, sized to the current extent.
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        for &view in &self.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.plan.extent.width)
                .height(self.plan.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.ctx.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create swapchain framebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    /// Wait for the GPU to drain, then rebuild swapchain -> views -> framebuffers.
    pub fn recreate(&mut self, framebuffer_size: (u32, u32), render_pass: vk::RenderPass) -> Result<()> {
        self.ctx.wait_idle()?;
        self.destroy_resources();

        self.plan = SwapchainPlan::query(&*self.ctx, framebuffer_size)?;
        self.create_swapchain()?;
        self.create_image_views()?;
        self.create_framebuffers(render_pass)?;

        Ok(())
    }

    fn destroy_resources(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.ctx.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                self.ctx.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn format(&self) -> vk::Format {
        self.plan.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering; blocks without timeout.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RendererError::Present(e).into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_resources();
    }
}
