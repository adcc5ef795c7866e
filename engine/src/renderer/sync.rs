use ash::vk;
use std::sync::Arc;
use tracing::{debug, info_span, trace, warn, Span};

use super::VulkanContext;
use crate::error::Result;

/// Synchronization objects owned by one frame slot.
#[derive(Debug, Clone, Copy)]
pub struct SyncSet {
    /// Signaled by the presentation engine once the acquired image is ready.
    pub acquire: vk::Semaphore,
    /// Signaled by the submission, waited on by present.
    pub present: vk::Semaphore,
    /// Signaled when the slot's submission finishes on the GPU.
    pub in_flight: vk::Fence,
}

/// Per-slot semaphores and fences for frames-in-flight rendering.
///
/// Fences start signaled so the first wait on every slot returns immediately.
pub struct FrameSynchronizer {
    ctx: Arc<VulkanContext>,
    sets: Vec<SyncSet>,
    span: Span,
}

impl FrameSynchronizer {
    pub fn new(ctx: Arc<VulkanContext>, frames_in_flight: usize) -> Result<Self> {
        let span = info_span!("frame_sync", frames_in_flight);
        let mut sync = Self {
            ctx,
            sets: Vec::with_capacity(frames_in_flight),
            span,
        };

        // on error, Drop releases the sets created so far
        for _ in 0..frames_in_flight {
            let set = sync.create_set()?;
            sync.sets.push(set);
        }

        debug!(parent: &sync.span, "created {} sync sets", sync.sets.len());
        Ok(sync)
    }

    fn create_set(&self) -> Result<SyncSet> {
        let device = &self.ctx.device;
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let acquire = device.create_semaphore(&semaphore_info, None)?;
            let present = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(acquire, None);
                    return Err(e.into());
                }
            };
            let in_flight = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(acquire, None);
                    device.destroy_semaphore(present, None);
                    return Err(e.into());
                }
            };
            Ok(SyncSet {
                acquire,
                present,
                in_flight,
            })
        }
    }

    /// Block until the slot's previous submission has retired.
    pub fn wait_for_slot(&self, slot: usize) -> Result<()> {
        let _guard = self.span.enter();
        trace!(slot, "waiting for fence");
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.sets[slot].in_flight], true, u64::MAX)?;
        }
        Ok(())
    }

    /// Unsignal the slot's fence. Only valid after [`Self::wait_for_slot`].
    pub fn reset_slot(&self, slot: usize) -> Result<()> {
        unsafe { self.ctx.device.reset_fences(&[self.sets[slot].in_flight])? };
        Ok(())
    }

    pub fn acquire_semaphore(&self, slot: usize) -> vk::Semaphore {
        self.sets[slot].acquire
    }

    pub fn present_semaphore(&self, slot: usize) -> vk::Semaphore {
        self.sets[slot].present
    }

    pub fn fence(&self, slot: usize) -> vk::Fence {
        self.sets[slot].in_flight
    }
}

impl Drop for FrameSynchronizer {
    fn drop(&mut self) {
        // semaphores may still be pending in the present queue
        if let Err(e) = self.ctx.wait_idle() {
            warn!(parent: &self.span, error = %e, "device did not go idle before sync teardown");
        }
        let device = &self.ctx.device;
        unsafe {
            for set in self.sets.drain(..) {
                device.destroy_semaphore(set.acquire, None);
                device.destroy_semaphore(set.present, None);
                device.destroy_fence(set.in_flight, None);
            }
        }
    }
}
