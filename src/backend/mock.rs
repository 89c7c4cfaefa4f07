// Scripted stand-in for the GPU, used to drive the frame loop in tests.
//
// Fences follow the real state machine (signaled -> reset -> pending ->
// signaled) and panic on misuse, so protocol bugs show up as test failures
// instead of hangs.

use anyhow::Result;
use ash::vk;
use std::collections::VecDeque;

use super::caps::{PhysicalDeviceDescriptor, QueueCapabilities, QueueFamilyDescriptor, SurfaceSupport};
use super::error::RendererError;
use super::frame::{AcquireOutcome, FrameBackend, PresentOutcome};
use super::swapchain::{SurfaceState, SwapchainPlan};
use super::MAX_FRAMES_IN_FLIGHT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    WaitFence(usize),
    ResetFence(usize),
    Acquire(usize),
    Record(usize, u32),
    Submit(usize),
    Present(usize, u32),
    Recreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Reset,
    Pending,
}

pub struct MockGpu {
    pub calls: Vec<Call>,
    pub acquire_script: VecDeque<AcquireOutcome>,
    pub present_script: VecDeque<Result<PresentOutcome, vk::Result>>,
    pub recreations: usize,
    pub max_in_flight: usize,
    /// Probe-time snapshot.
    pub surface: SurfaceSupport,
    /// What a capabilities query returns now; starts equal to the snapshot.
    pub live_capabilities: vk::SurfaceCapabilitiesKHR,
    pub framebuffer_size: (u32, u32),
    /// Swapchain plans in creation order; the first is the initial swapchain.
    pub plans: Vec<SwapchainPlan>,
    fences: [FenceState; MAX_FRAMES_IN_FLIGHT],
    next_image: u32,
}

impl MockGpu {
    /// A GPU whose swapchain has `image_count` images (min count one below).
    pub fn new(image_count: u32) -> Self {
        let surface = bgra_srgb_surface(image_count.saturating_sub(1), vk::PresentModeKHR::FIFO);
        Self::with_surface(surface, (800, 600))
    }

    pub fn with_surface(surface: SurfaceSupport, framebuffer_size: (u32, u32)) -> Self {
        let mut gpu = Self {
            calls: Vec::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            recreations: 0,
            max_in_flight: 0,
            live_capabilities: surface.capabilities,
            surface,
            framebuffer_size,
            plans: Vec::new(),
            fences: [FenceState::Signaled; MAX_FRAMES_IN_FLIGHT],
            next_image: 0,
        };
        gpu.build_swapchain();
        gpu
    }

    fn build_swapchain(&mut self) {
        let plan = SwapchainPlan::query(&*self, self.framebuffer_size)
            .unwrap_or_else(|e| panic!("capabilities query failed: {e:#}"));
        self.plans.push(plan);
    }

    pub fn plan(&self) -> &SwapchainPlan {
        &self.plans[self.plans.len() - 1]
    }

    pub fn in_flight(&self) -> usize {
        self.fences.iter().filter(|&&f| f == FenceState::Pending).count()
    }

    pub fn submits(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, Call::Submit(_))).count()
    }

    pub fn presents(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, Call::Present(..))).count()
    }
}

impl FrameBackend for MockGpu {
    fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::WaitFence(slot));
        assert_ne!(
            self.fences[slot],
            FenceState::Reset,
            "waiting on a reset fence with no work submitted would block forever"
        );
        // GPU retires the slot's work
        self.fences[slot] = FenceState::Signaled;
        Ok(())
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::ResetFence(slot));
        assert_eq!(self.fences[slot], FenceState::Signaled, "reset of an unsignaled fence");
        self.fences[slot] = FenceState::Reset;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        if let Some(outcome) = self.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.plan().image_count;
        Ok(AcquireOutcome::Acquired { image_index, suboptimal: false })
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        self.calls.push(Call::Record(slot, image_index));
        assert!(image_index < self.plan().image_count);
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Submit(slot));
        assert_eq!(self.fences[slot], FenceState::Reset, "submit without resetting the fence");
        self.fences[slot] = FenceState::Pending;
        self.max_in_flight = self.max_in_flight.max(self.in_flight());
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.calls.push(Call::Present(slot, image_index));
        match self.present_script.pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(e)) => Err(RendererError::Present(e).into()),
            None => Ok(PresentOutcome::Presented),
        }
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.calls.push(Call::Recreate);
        self.recreations += 1;
        self.next_image = 0;
        self.build_swapchain();
        Ok(())
    }
}

impl SurfaceState for MockGpu {
    fn snapshot(&self) -> &SurfaceSupport {
        &self.surface
    }

    fn current_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(self.live_capabilities)
    }
}

pub fn bgra_srgb_surface(min_image_count: u32, present_mode: vk::PresentModeKHR) -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count,
            max_image_count: 0,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![present_mode],
    }
}

/// One discrete GPU, family 0 doing graphics and present.
pub fn discrete_device(surface: SurfaceSupport) -> PhysicalDeviceDescriptor {
    PhysicalDeviceDescriptor {
        handle: vk::PhysicalDevice::null(),
        name: "Mock Discrete GPU".into(),
        properties: vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension2_d: 16384,
                ..Default::default()
            },
            ..Default::default()
        },
        features: vk::PhysicalDeviceFeatures::default(),
        extensions: vec!["VK_KHR_swapchain".into()],
        queue_families: vec![QueueFamilyDescriptor {
            capabilities: QueueCapabilities::GRAPHICS
                | QueueCapabilities::COMPUTE
                | QueueCapabilities::TRANSFER
                | QueueCapabilities::PRESENT,
            queue_count: 1,
        }],
        surface,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::frame::{FrameLoop, FrameStatus, ResizeFlag};
    use crate::backend::selector::{resolve_queue_indices, select_device, QueueIndices};

    #[test]
    fn end_to_end_single_discrete_gpu() {
        let device = discrete_device(bgra_srgb_surface(2, vk::PresentModeKHR::FIFO));
        let devices = [device];

        let selected = select_device(&devices).unwrap();
        assert_eq!(selected, 0);

        let queues = resolve_queue_indices(&devices[selected]).unwrap();
        assert_eq!(queues, QueueIndices { graphics: 0, present: 0 });
        assert!(queues.is_shared());

        let mut gpu = MockGpu::with_surface(devices[selected].surface.clone(), (1280, 720));
        let plan = *gpu.plan();
        assert_eq!(plan.format_index, 0);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.extent, vk::Extent2D { width: 1280, height: 720 });

        let mut frames = FrameLoop::new(ResizeFlag::default());
        let status = frames.draw_frame(&mut gpu).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: false });
        assert_eq!(gpu.submits(), 1);
        assert_eq!(gpu.presents(), 1);
    }

    #[test]
    fn recreation_requeries_surface_and_is_idempotent() {
        let mut gpu = MockGpu::new(3);
        let initial = *gpu.plan();

        // Window grows and the driver now wants one more image
        gpu.framebuffer_size = (1920, 1080);
        gpu.live_capabilities.min_image_count = 3;

        gpu.recreate_swapchain().unwrap();
        gpu.recreate_swapchain().unwrap();

        let first = gpu.plans[1];
        let second = gpu.plans[2];
        assert_ne!(first, initial);
        assert_eq!(first.extent, vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!(first.image_count, 4);

        assert_eq!(first.extent, second.extent);
        assert_eq!(first.format, second.format);
        assert_eq!(first.color_space, second.color_space);
        assert_eq!(first.image_count, second.image_count);
        assert_eq!(first, second);
    }

    #[test]
    fn recreation_keeps_probe_time_formats_and_modes() {
        let mut gpu = MockGpu::with_surface(bgra_srgb_surface(2, vk::PresentModeKHR::MAILBOX), (640, 480));
        // Only capabilities are re-queried; the snapshot lists stay authoritative
        gpu.live_capabilities.current_extent = vk::Extent2D { width: 1024, height: 768 };

        gpu.recreate_swapchain().unwrap();
        let plan = *gpu.plan();
        assert_eq!(plan.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(plan.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(plan.extent, vk::Extent2D { width: 1024, height: 768 });
    }

    #[test]
    #[should_panic(expected = "reset of an unsignaled fence")]
    fn double_reset_is_caught() {
        let mut gpu = MockGpu::new(3);
        gpu.reset_fence(0).unwrap();
        gpu.reset_fence(0).unwrap();
    }
}
