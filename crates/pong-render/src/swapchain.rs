// SPDX-License-Identifier: CEPL-1.0
//! Swap chain lifecycle: build, acquire, submit + present, rebuild, teardown.
//!
//! ```text
//! Uninitialized -> Ready -> Rebuilding -> Ready -> ... -> Destroyed
//! ```
//!
//! Out-of-date and suboptimal surfaces never leave this module as errors.
//! They become "no frame this tick" from [`SwapchainManager::acquire`] and
//! "not presented" from [`SwapchainManager::submit_and_present`].
use tracing::{debug, info};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{AcquireOutcome, ColorTarget, Gpu, PresentOutcome, Sharing, Submission, SwapchainDesc};
use crate::surface::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, Extent2D,
    PresentMode, SurfaceFormat,
};
use crate::sync::{FrameSync, FrameSyncSet};
use crate::window::{DrawableSurface, RenderSize};
use crate::MAX_FRAMES_IN_FLIGHT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Ready,
    /// Invalidated. The rebuild either runs right away or, if the window
    /// isn't drawable yet, on the next acquire.
    Rebuilding,
    Destroyed,
}

/// Per-chain resources. Released together, never individually.
struct ChainResources<G: Gpu> {
    chain: G::Swapchain,
    images: Vec<G::Image>,
    views: Vec<G::ImageView>,
    format: SurfaceFormat,
    present_mode: PresentMode,
    extent: Extent2D,
    msaa: Option<ColorTarget<G>>,
}

impl<G: Gpu> ChainResources<G> {
    fn release(self, gpu: &G) {
        if let Some(target) = self.msaa {
            gpu.destroy_color_target(target);
        }
        for view in self.views {
            gpu.destroy_image_view(view);
        }
        // images belong to the chain
        gpu.destroy_swapchain(self.chain);
    }
}

/// Everything the recorder needs to draw into one acquired image.
pub struct FrameTarget<G: Gpu> {
    pub image: G::Image,
    pub view: G::ImageView,
    pub msaa: Option<ColorTarget<G>>,
    pub extent: Extent2D,
}

pub struct SwapchainManager<G: Gpu> {
    state: SwapchainState,
    sync: FrameSyncSet<G>,
    resources: Option<ChainResources<G>>,
    generation: u64,
}

impl<G: Gpu> SwapchainManager<G> {
    /// Creates the frame sync set and the first chain. If the window isn't
    /// drawable yet the manager starts out `Rebuilding`.
    pub fn new(gpu: &G, window: &dyn DrawableSurface) -> RenderResult<Self> {
        let mut mgr = Self {
            state: SwapchainState::Uninitialized,
            sync: FrameSyncSet::new(gpu, MAX_FRAMES_IN_FLIGHT)?,
            resources: None,
            generation: 0,
        };
        match window.wait_until_drawable() {
            Some(size) => {
                if let Err(e) = mgr.build(gpu, size) {
                    mgr.destroy(gpu);
                    return Err(e);
                }
            }
            None => {
                debug!("window not drawable at startup; deferring swap chain build");
                mgr.state = SwapchainState::Rebuilding;
            }
        }
        Ok(mgr)
    }

    fn build(&mut self, gpu: &G, size: RenderSize) -> RenderResult<()> {
        let support = gpu.surface_support()?;
        let caps = &support.capabilities;
        let format = choose_surface_format(&support.formats)
            .ok_or_else(|| RenderError::backend("create_swapchain", "surface reports no formats"))?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(caps, size);
        let min_image_count = choose_image_count(caps);
        let profile = *gpu.profile();

        let desc = SwapchainDesc {
            min_image_count,
            format,
            extent,
            present_mode,
            sharing: Sharing::for_families(profile.graphics_family, profile.present_family),
            pre_transform: caps.current_transform,
        };
        let chain = gpu.create_swapchain(&desc)?;
        let mut res = ChainResources {
            chain,
            images: Vec::new(),
            views: Vec::new(),
            format,
            present_mode,
            extent,
            msaa: None,
        };
        if let Err(e) = Self::populate(gpu, &mut res) {
            res.release(gpu);
            return Err(e);
        }

        self.generation += 1;
        info!(
            generation = self.generation,
            format = ?format.format,
            present_mode = ?present_mode,
            width = extent.width,
            height = extent.height,
            images = res.images.len(),
            msaa = profile.max_samples.samples(),
            "swap chain built"
        );
        self.resources = Some(res);
        self.state = SwapchainState::Ready;
        Ok(())
    }

    fn populate(gpu: &G, res: &mut ChainResources<G>) -> RenderResult<()> {
        res.images = gpu.swapchain_images(res.chain)?;
        for &image in &res.images {
            res.views.push(gpu.create_image_view(image, res.format)?);
        }
        let profile = gpu.profile();
        if profile.multisampled() {
            res.msaa = Some(gpu.create_color_target(res.extent, res.format, profile.max_samples)?);
        }
        Ok(())
    }

    /// Waits for the slot to retire its last frame, then acquires the next
    /// image. `None` means there is no frame this tick.
    pub fn acquire(
        &mut self,
        gpu: &G,
        window: &dyn DrawableSurface,
        slot: usize,
    ) -> RenderResult<Option<u32>> {
        match self.state {
            SwapchainState::Destroyed | SwapchainState::Uninitialized => {
                return Err(RenderError::backend("acquire", "swap chain not available"));
            }
            SwapchainState::Rebuilding => {
                if !self.recreate(gpu, window)? {
                    return Ok(None);
                }
            }
            SwapchainState::Ready => {}
        }
        let Some(chain) = self.resources.as_ref().map(|r| r.chain) else {
            return Ok(None);
        };
        let sync = self.sync.slot(slot);
        let (fence, image_available) = (sync.in_flight, sync.image_available);

        gpu.wait_for_fence(fence)?;
        match gpu.acquire_next_image(chain, image_available)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!(slot, image_index, "suboptimal acquire, rendering anyway");
                }
                // only once work is certain to be submitted
                gpu.reset_fence(fence)?;
                Ok(Some(image_index))
            }
            AcquireOutcome::OutOfDate => {
                debug!(slot, "surface out of date on acquire; skipping frame");
                self.recreate(gpu, window)?;
                Ok(None)
            }
        }
    }

    /// Submits the recorded frame and presents it. Returns whether the image
    /// was presented; if not, the chain has been rebuilt (or scheduled for
    /// rebuild).
    pub fn submit_and_present(
        &mut self,
        gpu: &G,
        window: &dyn DrawableSurface,
        command_buffer: G::CommandBuffer,
        slot: usize,
        image_index: u32,
    ) -> RenderResult<bool> {
        let Some(chain) = self.resources.as_ref().map(|r| r.chain) else {
            return Err(RenderError::backend("submit", "swap chain not available"));
        };
        let sync = self.sync.slot(slot);
        let render_finished = sync.render_finished;
        gpu.submit(&Submission {
            command_buffer,
            wait: sync.image_available,
            signal: render_finished,
            fence: sync.in_flight,
        })?;

        match gpu.present(chain, image_index, render_finished)? {
            PresentOutcome::Presented => Ok(true),
            outcome => {
                debug!(slot, image_index, ?outcome, "rebuilding after present");
                self.recreate(gpu, window)?;
                Ok(false)
            }
        }
    }

    /// Releases the current chain and builds a new one. Returns `false` if
    /// the window isn't drawable; the manager then stays `Rebuilding` and
    /// the next acquire retries.
    ///
    /// Waits for device idle first, so it must not race any other queue
    /// work of this device.
    pub fn recreate(&mut self, gpu: &G, window: &dyn DrawableSurface) -> RenderResult<bool> {
        if self.state == SwapchainState::Destroyed {
            return Err(RenderError::backend("recreate", "swap chain destroyed"));
        }
        self.state = SwapchainState::Rebuilding;
        let Some(size) = window.wait_until_drawable() else {
            debug!("window not drawable; swap chain rebuild deferred");
            return Ok(false);
        };
        gpu.wait_idle()?;
        if let Some(old) = self.resources.take() {
            old.release(gpu);
        }
        self.build(gpu, size)?;
        Ok(true)
    }

    /// Releases the chain and the frame sync set. The device must be idle.
    pub fn destroy(&mut self, gpu: &G) {
        if self.state == SwapchainState::Destroyed {
            return;
        }
        if let Some(res) = self.resources.take() {
            res.release(gpu);
        }
        self.sync.destroy(gpu);
        self.state = SwapchainState::Destroyed;
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Bumped on every successful build.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn format(&self) -> Option<SurfaceFormat> {
        self.resources.as_ref().map(|r| r.format)
    }

    pub fn present_mode(&self) -> Option<PresentMode> {
        self.resources.as_ref().map(|r| r.present_mode)
    }

    pub fn extent(&self) -> Option<Extent2D> {
        self.resources.as_ref().map(|r| r.extent)
    }

    pub fn image_count(&self) -> usize {
        self.resources.as_ref().map_or(0, |r| r.images.len())
    }

    pub fn frame_sync(&self, slot: usize) -> &FrameSync<G> {
        self.sync.slot(slot)
    }

    pub fn frame_target(&self, image_index: u32) -> Option<FrameTarget<G>> {
        let res = self.resources.as_ref()?;
        let i = image_index as usize;
        Some(FrameTarget {
            image: *res.images.get(i)?,
            view: *res.views.get(i)?,
            msaa: res.msaa,
            extent: res.extent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceProfile, SampleCounts};
    use crate::mock::{CmdId, MockGpu, MockWindow, Script};
    use crate::surface::{PresentMode, PREFERRED_FORMAT};

    fn cmd(gpu: &MockGpu) -> CmdId {
        let pool = gpu.create_command_pool().unwrap();
        gpu.allocate_command_buffers(pool, 1).unwrap()[0]
    }

    /// acquire, empty record, submit + present on one slot.
    fn frame(
        gpu: &MockGpu,
        mgr: &mut SwapchainManager<MockGpu>,
        window: &MockWindow,
        cmd: CmdId,
        slot: usize,
    ) -> Option<bool> {
        let image = mgr.acquire(gpu, window, slot).unwrap()?;
        gpu.reset_command_buffer(cmd).unwrap();
        gpu.begin_command_buffer(cmd).unwrap();
        gpu.end_command_buffer(cmd).unwrap();
        Some(mgr.submit_and_present(gpu, window, cmd, slot, image).unwrap())
    }

    #[test]
    fn build_follows_surface_choices() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mgr = SwapchainManager::new(&gpu, &window).unwrap();

        assert_eq!(mgr.state(), SwapchainState::Ready);
        assert_eq!(mgr.format(), Some(PREFERRED_FORMAT));
        assert_eq!(mgr.present_mode(), Some(PresentMode::Mailbox));
        assert_eq!(mgr.extent(), Some(Extent2D::new(800, 600)));
        assert_eq!(mgr.image_count(), 3);

        let chains = gpu.chains();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].desc.sharing, Sharing::Exclusive);
        assert!(gpu.color_targets().is_empty());
    }

    #[test]
    fn split_families_use_concurrent_sharing() {
        let gpu = MockGpu::with_profile(DeviceProfile {
            graphics_family: 0,
            present_family: 2,
            max_samples: SampleCounts::TYPE_1,
        });
        let window = MockWindow::new(64, 64);
        SwapchainManager::new(&gpu, &window).unwrap();
        assert_eq!(gpu.chains()[0].desc.sharing, Sharing::Concurrent([0, 2]));
    }

    #[test]
    fn multisampled_device_gets_one_shared_target() {
        let gpu = MockGpu::with_profile(DeviceProfile {
            graphics_family: 0,
            present_family: 0,
            max_samples: SampleCounts::TYPE_4,
        });
        let window = MockWindow::new(320, 200);
        let mut mgr = SwapchainManager::new(&gpu, &window).unwrap();

        assert_eq!(
            gpu.color_targets(),
            vec![(Extent2D::new(320, 200), SampleCounts::TYPE_4)]
        );
        let a = mgr.frame_target(0).unwrap().msaa.unwrap();
        let b = mgr.frame_target(2).unwrap().msaa.unwrap();
        assert_eq!(a.view, b.view);

        window.resize(640, 400);
        assert!(mgr.recreate(&gpu, &window).unwrap());
        assert!(gpu.was_destroyed(a.view.0));
        assert_eq!(gpu.color_targets()[1], (Extent2D::new(640, 400), SampleCounts::TYPE_4));
    }

    #[test]
    fn out_of_date_acquire_rebuilds_and_keeps_sync_objects() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut mgr = SwapchainManager::new(&gpu, &window).unwrap();
        let cmd = cmd(&gpu);
        let fence = mgr.frame_sync(0).in_flight;
        let old_views: Vec<_> = (0..3).map(|i| mgr.frame_target(i).unwrap().view).collect();

        gpu.script_acquire(2, Script::OutOfDate);
        assert_eq!(frame(&gpu, &mut mgr, &window, cmd, 0), Some(true));
        assert_eq!(frame(&gpu, &mut mgr, &window, cmd, 1), None);

        assert_eq!(mgr.generation(), 2);
        assert_eq!(mgr.state(), SwapchainState::Ready);
        assert_eq!(mgr.frame_sync(0).in_flight, fence);
        for v in old_views {
            assert!(gpu.was_destroyed(v.0));
        }
        assert_eq!(frame(&gpu, &mut mgr, &window, cmd, 1), Some(true));
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn suboptimal_acquire_proceeds_without_rebuild() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut mgr = SwapchainManager::new(&gpu, &window).unwrap();
        let cmd = cmd(&gpu);

        gpu.script_acquire(1, Script::Suboptimal);
        assert_eq!(frame(&gpu, &mut mgr, &window, cmd, 0), Some(true));
        assert_eq!(mgr.generation(), 1);
    }

    #[test]
    fn suboptimal_or_out_of_date_present_rebuilds() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut mgr = SwapchainManager::new(&gpu, &window).unwrap();
        let cmd = cmd(&gpu);

        gpu.script_present(1, Script::Suboptimal);
        gpu.script_present(2, Script::OutOfDate);
        assert_eq!(frame(&gpu, &mut mgr, &window, cmd, 0), Some(false));
        assert_eq!(frame(&gpu, &mut mgr, &window, cmd, 1), Some(false));
        assert_eq!(frame(&gpu, &mut mgr, &window, cmd, 0), Some(true));
        assert_eq!(mgr.generation(), 3);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn fatal_outcomes_propagate() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut mgr = SwapchainManager::new(&gpu, &window).unwrap();

        gpu.script_acquire(1, Script::SurfaceLost);
        assert!(matches!(
            mgr.acquire(&gpu, &window, 0),
            Err(RenderError::SurfaceLost)
        ));

        gpu.script_acquire(2, Script::DeviceLost);
        let err = mgr.acquire(&gpu, &window, 0).unwrap_err();
        assert!(matches!(err, RenderError::DeviceLost));
        assert!(err.is_fatal());
    }

    #[test]
    fn minimised_window_defers_rebuild_to_next_acquire() {
        let gpu = MockGpu::new();
        let window = MockWindow::event_driven(800, 600);
        let mut mgr = SwapchainManager::new(&gpu, &window).unwrap();
        let idle_before = gpu.wait_idle_calls();

        window.resize(0, 0);
        gpu.script_acquire(1, Script::OutOfDate);
        assert_eq!(mgr.acquire(&gpu, &window, 0).unwrap(), None);
        assert_eq!(mgr.state(), SwapchainState::Rebuilding);
        assert_eq!(mgr.acquire(&gpu, &window, 0).unwrap(), None);
        assert_eq!(gpu.wait_idle_calls(), idle_before);

        window.resize(1024, 768);
        assert!(mgr.acquire(&gpu, &window, 0).unwrap().is_some());
        assert_eq!(mgr.state(), SwapchainState::Ready);
        assert_eq!(mgr.extent(), Some(Extent2D::new(1024, 768)));
        assert_eq!(mgr.generation(), 2);
    }

    #[test]
    fn blocking_rebuild_waits_for_nonzero_size() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut mgr = SwapchainManager::new(&gpu, &window).unwrap();

        window.resize(0, 0);
        window.queue_sizes([RenderSize::new(0, 0), RenderSize::new(300, 200)]);
        assert!(mgr.recreate(&gpu, &window).unwrap());
        assert_eq!(mgr.extent(), Some(Extent2D::new(300, 200)));
    }

    #[test]
    fn failed_build_releases_partial_chain() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        gpu.fail_next("create_image_view");
        assert!(SwapchainManager::new(&gpu, &window).is_err());
        assert_eq!(gpu.live_handles(), 0);
    }

    #[test]
    fn destroy_releases_everything_once() {
        let gpu = MockGpu::with_profile(DeviceProfile {
            graphics_family: 0,
            present_family: 0,
            max_samples: SampleCounts::TYPE_8,
        });
        let window = MockWindow::new(800, 600);
        let mut mgr = SwapchainManager::new(&gpu, &window).unwrap();
        gpu.wait_idle().unwrap();
        mgr.destroy(&gpu);
        mgr.destroy(&gpu);
        assert_eq!(mgr.state(), SwapchainState::Destroyed);
        assert_eq!(gpu.live_handles(), 0);
        assert!(gpu.violations().is_empty());
        assert!(mgr.acquire(&gpu, &window, 0).is_err());
    }
}
