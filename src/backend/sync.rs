// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU sync, plus the command
// pool whose buffers are re-recorded every frame. One slot per frame in
// flight; slot `i` owns semaphores, fence and command buffer `i`.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::VulkanContext;
use super::MAX_FRAMES_IN_FLIGHT;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the very first wait returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        Self::create_with(
            || unsafe { device.create_semaphore(&semaphore_info, None) }.map_err(anyhow::Error::from),
            || unsafe { device.create_fence(&fence_info, None) }.map_err(anyhow::Error::from),
            |semaphore| unsafe { device.destroy_semaphore(semaphore, None) },
        )
    }

    /// Create semaphores then fence; on failure the semaphores already
    /// created are destroyed before returning.
    fn create_with<S, F, D>(mut create_semaphore: S, create_fence: F, mut destroy_semaphore: D) -> Result<Self>
    where
        S: FnMut() -> Result<vk::Semaphore>,
        F: FnOnce() -> Result<vk::Fence>,
        D: FnMut(vk::Semaphore),
    {
        let image_available = create_semaphore().context("Failed to create image-available semaphore")?;

        let render_finished = match create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                destroy_semaphore(image_available);
                return Err(e).context("Failed to create render-finished semaphore");
            }
        };

        let in_flight_fence = match create_fence() {
            Ok(fence) => fence,
            Err(e) => {
                destroy_semaphore(render_finished);
                destroy_semaphore(image_available);
                return Err(e).context("Failed to create in-flight fence");
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Exactly `MAX_FRAMES_IN_FLIGHT` sync slots.
pub struct FrameSyncSet {
    frames: Vec<FrameSync>,
    ctx: Arc<VulkanContext>,
}

impl FrameSyncSet {
    pub fn new(ctx: Arc<VulkanContext>) -> Result<Self> {
        let mut set = Self {
            frames: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            ctx,
        };
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let sync = FrameSync::new(&set.ctx.device)?;
            set.frames.push(sync);
        }
        Ok(set)
    }

    pub fn frame(&self, slot: usize) -> &FrameSync {
        &self.frames[slot]
    }
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        for sync in &self.frames {
            sync.destroy(&self.ctx.device);
        }
    }
}

/// Command pool on the graphics family with one primary buffer per slot.
pub struct CommandResources {
    pub pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
    ctx: Arc<VulkanContext>,
}

impl CommandResources {
    pub fn new(ctx: Arc<VulkanContext>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.queue_indices.graphics);

        let pool = unsafe { ctx.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

        let buffers = match unsafe { ctx.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { ctx.device.destroy_command_pool(pool, None) };
                return Err(e).context("Failed to allocate command buffers");
            }
        };

        Ok(Self { pool, buffers, ctx })
    }

    pub fn buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.buffers[slot]
    }
}

impl Drop for CommandResources {
    fn drop(&mut self) {
        // Buffers are freed with the pool
        unsafe { self.ctx.device.destroy_command_pool(self.pool, None) };
    }
}
