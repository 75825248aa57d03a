// =============================================================================
// FRAME LOOP - one acquire/record/submit/present cycle per tick
// =============================================================================
//
// Idle -> WaitingOnFence -> Acquiring -> Recording -> Submitted -> Presenting -> Idle
//
// Failures at any step are logged and the frame is dropped; the next tick
// starts from Idle again. The loop never creates or destroys swapchain
// resources. Out-of-date and suboptimal swapchains are counted and reported.
//
// An image acquired by a dropped frame stays ours until it is presented, so
// the next tick draws into it instead of acquiring another one. Its
// image-available signal is consumed by the fence re-arm submit.

use crate::backend::swapchain::{Acquire, PresentStatus};
use crate::error::RendererError;

/// The GPU operations one tick is made of
pub trait FrameOps {
    /// Block on the in-flight fence, no timeout.
    fn wait_for_fence(&mut self) -> Result<(), RendererError>;
    fn reset_fence(&mut self) -> Result<(), RendererError>;
    /// Signals the image-available semaphore, no timeout.
    fn acquire_image(&mut self) -> Result<Acquire, RendererError>;
    fn record(&mut self, image_index: u32) -> Result<(), RendererError>;
    /// Signals render-finished and the fence. Waits on image-available only
    /// when `wait_image_available` is set.
    fn submit(&mut self, wait_image_available: bool) -> Result<(), RendererError>;
    /// Waits on render-finished.
    fn present(&mut self, image_index: u32) -> Result<PresentStatus, RendererError>;
    /// Signal the fence without doing any work, first consuming a pending
    /// image-available signal when `consume_image_available` is set.
    fn rearm_fence(&mut self, consume_image_available: bool) -> Result<(), RendererError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitingOnFence,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// The swapchain no longer matches the surface
    Stale,
    /// A step failed; nothing was shown
    Dropped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub stale: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub struct FrameLoop {
    state: FrameState,
    stats: FrameStats,
    fence_unsignaled: bool,
    /// Acquired by a dropped frame and not presented yet
    held_image: Option<u32>,
    /// image-available will be signaled and nothing has waited on it
    image_signal_pending: bool,
    warned_stale: bool,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
            stats: FrameStats::default(),
            fence_unsignaled: false,
            held_image: None,
            image_signal_pending: false,
            warned_stale: false,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Run one full frame
    pub fn tick<O: FrameOps>(&mut self, ops: &mut O) -> FrameOutcome {
        let outcome = match self.run(ops) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Dropping frame in {:?}: {}", self.state, e);
                FrameOutcome::Dropped
            }
        };

        // Reset without a matching submit would leave the next wait hanging
        if self.fence_unsignaled {
            match ops.rearm_fence(self.image_signal_pending) {
                Ok(()) => {
                    self.fence_unsignaled = false;
                    self.image_signal_pending = false;
                }
                Err(e) => log::error!("Failed to re-arm in-flight fence: {}", e),
            }
        }

        match outcome {
            FrameOutcome::Presented { .. } => self.stats.presented += 1,
            FrameOutcome::Stale => {
                self.stats.stale += 1;
                if !self.warned_stale {
                    log::warn!("Swapchain is out of date; recreation is not supported");
                    self.warned_stale = true;
                }
            }
            FrameOutcome::Dropped => self.stats.dropped += 1,
        }

        self.state = FrameState::Idle;
        outcome
    }

    fn run<O: FrameOps>(&mut self, ops: &mut O) -> Result<FrameOutcome, RendererError> {
        self.state = FrameState::WaitingOnFence;
        if !self.fence_unsignaled {
            ops.wait_for_fence()?;
            ops.reset_fence()?;
            self.fence_unsignaled = true;
        }

        self.state = FrameState::Acquiring;
        let (image_index, acquire_suboptimal) = match self.held_image {
            Some(index) => (index, false),
            None => match ops.acquire_image()? {
                Acquire::Ready { index, suboptimal } => {
                    self.held_image = Some(index);
                    self.image_signal_pending = true;
                    (index, suboptimal)
                }
                Acquire::OutOfDate => return Ok(FrameOutcome::Stale),
            },
        };

        self.state = FrameState::Recording;
        ops.record(image_index)?;

        ops.submit(self.image_signal_pending)?;
        self.fence_unsignaled = false;
        self.image_signal_pending = false;
        self.state = FrameState::Submitted;

        // Handed back to the presentation engine even if present reports an error
        self.state = FrameState::Presenting;
        self.held_image = None;
        let status = ops.present(image_index)?;

        if acquire_suboptimal || status != PresentStatus::Optimal {
            Ok(FrameOutcome::Stale)
        } else {
            Ok(FrameOutcome::Presented { image_index })
        }
    }
}
