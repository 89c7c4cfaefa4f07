// Frame loop
//
// FRAME FLOW (per call to `draw_frame`):
// 1. Wait on the active slot's fence (at most MAX_FRAMES_IN_FLIGHT in flight)
// 2. Acquire the next swapchain image
// 3. Reset the fence, re-record the slot's command buffer
// 4. Submit: wait image-available, signal render-finished + fence
// 5. Present, recreate the swapchain if stale or resized
// 6. Advance the slot
//
// The GPU side sits behind `FrameBackend` so the protocol can be driven
// without a device.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::MAX_FRAMES_IN_FLIGHT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Suboptimal images are still rendered; present reports it again.
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn is_stale(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// What a single `draw_frame` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { recreated: bool },
    /// Acquire reported an out-of-date swapchain; it was rebuilt and nothing was submitted.
    Skipped,
}

/// Resize notification shared with the window event handler.
///
/// The handler only sets it; the frame loop consumes it after present.
#[derive(Debug, Clone, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    pub fn notify(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// GPU operations one frame is made of, each addressed by in-flight slot.
pub trait FrameBackend {
    /// Block without timeout until the slot's previous submission retired.
    fn wait_for_fence(&mut self, slot: usize) -> Result<()>;
    fn reset_fence(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    /// Reset and re-record the slot's command buffer for `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    /// Non-stale, non-success results come back as `Err`.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
    fn recreate_swapchain(&mut self) -> Result<()>;
}

pub struct FrameLoop {
    slot: usize,
    state: FrameState,
    resize: ResizeFlag,
    frames_presented: u64,
}

impl FrameLoop {
    pub fn new(resize: ResizeFlag) -> Self {
        Self {
            slot: 0,
            state: FrameState::Idle,
            resize,
            frames_presented: 0,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn resize_flag(&self) -> ResizeFlag {
        self.resize.clone()
    }

    fn enter(&mut self, state: FrameState) {
        log::trace!("frame {}: {:?} -> {:?}", self.frames_presented, self.state, state);
        self.state = state;
    }

    pub fn draw_frame<B: FrameBackend + ?Sized>(&mut self, gpu: &mut B) -> Result<FrameStatus> {
        let slot = self.slot;

        // Step 1-2: throttle on this slot, then get an image
        self.enter(FrameState::Acquiring);
        gpu.wait_for_fence(slot)?;

        let image_index = match gpu.acquire_image(slot)? {
            AcquireOutcome::Acquired { image_index, .. } => image_index,
            AcquireOutcome::OutOfDate => {
                // Fence stays signaled so the retry doesn't block forever
                log::debug!("Swapchain out of date on acquire, recreating");
                self.resize.take();
                gpu.recreate_swapchain()?;
                self.enter(FrameState::Idle);
                return Ok(FrameStatus::Skipped);
            }
        };

        // Step 3: only reset once work is guaranteed to be submitted
        gpu.reset_fence(slot)?;
        self.enter(FrameState::Recording);
        gpu.record(slot, image_index)?;

        // Step 4
        gpu.submit(slot)?;
        self.enter(FrameState::Submitted);

        // Step 5
        self.enter(FrameState::Presenting);
        let outcome = gpu.present(slot, image_index)?;
        let resized = self.resize.take();

        let recreated = outcome.is_stale() || resized;
        if recreated {
            log::debug!("Recreating swapchain (present: {:?}, resized: {})", outcome, resized);
            gpu.recreate_swapchain()?;
        }

        // Step 6
        self.slot = (self.slot + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frames_presented += 1;
        self.enter(FrameState::Idle);

        Ok(FrameStatus::Presented { recreated })
    }
}
