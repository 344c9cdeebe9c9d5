// SPDX-License-Identifier: CEPL-1.0
use crate::error::RenderResult;
use crate::gpu::Gpu;

/// Synchronization objects for one frame-in-flight slot.
pub struct FrameSync<G: Gpu> {
    /// Signaled by acquire once the image may be rendered into.
    pub image_available: G::Semaphore,
    /// Signaled by the submission, waited on by present.
    pub render_finished: G::Semaphore,
    /// Signaled when the slot's command buffer and per-frame buffers are
    /// free again. Created signaled so the first frame doesn't block.
    pub in_flight: G::Fence,
}

/// One [`FrameSync`] per slot. Survives swap chain rebuilds.
pub struct FrameSyncSet<G: Gpu> {
    slots: Vec<FrameSync<G>>,
}

impl<G: Gpu> FrameSyncSet<G> {
    pub fn new(gpu: &G, count: usize) -> RenderResult<Self> {
        let mut set = Self {
            slots: Vec::with_capacity(count),
        };
        for _ in 0..count {
            match Self::create_slot(gpu) {
                Ok(slot) => set.slots.push(slot),
                Err(e) => {
                    set.destroy(gpu);
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    fn create_slot(gpu: &G) -> RenderResult<FrameSync<G>> {
        let image_available = gpu.create_semaphore()?;
        let render_finished = match gpu.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        let in_flight = match gpu.create_fence(true) {
            Ok(f) => f,
            Err(e) => {
                gpu.destroy_semaphore(render_finished);
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        Ok(FrameSync {
            image_available,
            render_finished,
            in_flight,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &FrameSync<G> {
        &self.slots[index]
    }

    /// Blocks until every slot's last submission has retired.
    #[cfg(test)]
    pub fn wait_all(&self, gpu: &G) -> RenderResult<()> {
        for s in &self.slots {
            gpu.wait_for_fence(s.in_flight)?;
        }
        Ok(())
    }

    /// Releases every object. The caller ensures the device is idle.
    pub fn destroy(&mut self, gpu: &G) {
        for s in self.slots.drain(..) {
            gpu.destroy_fence(s.in_flight);
            gpu.destroy_semaphore(s.render_finished);
            gpu.destroy_semaphore(s.image_available);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpu;

    #[test]
    fn slots_start_signaled_and_distinct() {
        let gpu = MockGpu::new();
        let mut set = FrameSyncSet::new(&gpu, 2).unwrap();
        assert_eq!(set.len(), 2);
        assert_ne!(set.slot(0).in_flight, set.slot(1).in_flight);
        assert_ne!(set.slot(0).image_available, set.slot(0).render_finished);

        // pre-signaled: waiting on a fresh fence must not be a deadlock
        set.wait_all(&gpu).unwrap();

        set.destroy(&gpu);
        assert!(set.is_empty());
        assert_eq!(gpu.live_handles(), 0);
        assert!(gpu.violations().is_empty());
    }
}
