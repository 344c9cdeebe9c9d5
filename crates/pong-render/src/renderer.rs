// SPDX-License-Identifier: CEPL-1.0
//! The per-tick frame loop: acquire, update buffers, record, submit, present.
use tracing::{debug, error, info};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{BufferUsage, Gpu};
use crate::layout::{
    quad_bytes, GameSnapshot, UniformData, INSTANCE_BYTES, QUAD_BYTES, UNIFORM_BYTES,
};
use crate::pipeline::{ball_pipeline, paddle_pipeline, ShaderSet};
use crate::recorder::{record_frame, DrawResources};
use crate::surface::Format;
use crate::swapchain::SwapchainManager;
use crate::window::{mailbox, DrawableSurface, SurfaceMailbox, SurfaceNotifier};
use crate::MAX_FRAMES_IN_FLIGHT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { slot: usize, image_index: u32 },
    /// Submitted but not shown; the swap chain was rebuilt.
    NotPresented { slot: usize },
    /// Nothing was acquired this tick.
    Skipped,
}

/// Pipelines and the descriptor sets allocated against their layout.
/// Rebuilt together whenever the chain's colour format changes.
struct PipelineSet<G: Gpu> {
    format: Format,
    paddle: G::Pipeline,
    ball: G::Pipeline,
    descriptor_pool: G::DescriptorPool,
    uniform_sets: Vec<G::DescriptorSet>,
}

impl<G: Gpu> PipelineSet<G> {
    fn compile(
        gpu: &G,
        shaders: &ShaderSet,
        format: Format,
        uniforms: &[G::Buffer],
    ) -> RenderResult<Self> {
        let samples = gpu.profile().max_samples;
        let paddle = gpu.compile_pipeline(&paddle_pipeline(shaders, format, samples))?;
        let ball = match gpu.compile_pipeline(&ball_pipeline(shaders, format, samples)) {
            Ok(p) => p,
            Err(e) => {
                gpu.destroy_pipeline(paddle);
                return Err(e);
            }
        };
        let (descriptor_pool, uniform_sets) =
            match gpu.create_uniform_sets(paddle, uniforms, UNIFORM_BYTES) {
                Ok(sets) => sets,
                Err(e) => {
                    gpu.destroy_pipeline(ball);
                    gpu.destroy_pipeline(paddle);
                    return Err(e);
                }
            };
        debug!(?format, samples = samples.samples(), "pipelines compiled");
        Ok(Self {
            format,
            paddle,
            ball,
            descriptor_pool,
            uniform_sets,
        })
    }

    fn release(self, gpu: &G) {
        gpu.destroy_descriptor_pool(self.descriptor_pool);
        gpu.destroy_pipeline(self.ball);
        gpu.destroy_pipeline(self.paddle);
    }
}

pub struct FrameRenderer<G: Gpu> {
    gpu: G,
    swapchain: SwapchainManager<G>,
    shaders: ShaderSet,
    command_pool: Option<G::CommandPool>,
    command_buffers: Vec<G::CommandBuffer>,
    geometry: Option<G::Buffer>,
    instance_buffers: Vec<G::Buffer>,
    uniform_buffers: Vec<G::Buffer>,
    pipelines: Option<PipelineSet<G>>,
    current_frame: usize,
    mailbox: SurfaceMailbox,
    notifier: SurfaceNotifier,
    clear_color: [f32; 4],
}

impl<G: Gpu> FrameRenderer<G> {
    pub fn new(gpu: G, window: &dyn DrawableSurface, shaders: ShaderSet) -> RenderResult<Self> {
        let swapchain = SwapchainManager::new(&gpu, window)?;
        let (notifier, mailbox) = mailbox();
        let mut renderer = Self {
            gpu,
            swapchain,
            shaders,
            command_pool: None,
            command_buffers: Vec::new(),
            geometry: None,
            instance_buffers: Vec::new(),
            uniform_buffers: Vec::new(),
            pipelines: None,
            current_frame: 0,
            mailbox,
            notifier,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        };
        // on error, Drop releases whatever was created so far
        renderer.create_resources()?;
        renderer.refresh_pipelines()?;
        info!(frames_in_flight = MAX_FRAMES_IN_FLIGHT, "frame renderer ready");
        Ok(renderer)
    }

    fn create_resources(&mut self) -> RenderResult<()> {
        let gpu = &self.gpu;
        let pool = gpu.create_command_pool()?;
        self.command_pool = Some(pool);
        self.command_buffers = gpu.allocate_command_buffers(pool, MAX_FRAMES_IN_FLIGHT as u32)?;

        let geometry = gpu.create_mapped_buffer(QUAD_BYTES, BufferUsage::VERTEX | BufferUsage::INDEX)?;
        self.geometry = Some(geometry);
        // never changes, so it is written once and only ever read
        gpu.write_buffer(geometry, 0, &quad_bytes())?;

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            self.instance_buffers
                .push(gpu.create_mapped_buffer(INSTANCE_BYTES, BufferUsage::VERTEX)?);
            self.uniform_buffers
                .push(gpu.create_mapped_buffer(UNIFORM_BYTES, BufferUsage::UNIFORM)?);
        }
        Ok(())
    }

    /// Compiles pipelines for the chain's current format if it changed.
    fn refresh_pipelines(&mut self) -> RenderResult<()> {
        let Some(format) = self.swapchain.format().map(|f| f.format) else {
            return Ok(());
        };
        if self.pipelines.as_ref().is_some_and(|p| p.format == format) {
            return Ok(());
        }
        if let Some(old) = self.pipelines.take() {
            info!(old = ?old.format, new = ?format, "swap chain format changed; recompiling pipelines");
            self.gpu.wait_idle()?;
            old.release(&self.gpu);
        }
        self.pipelines = Some(PipelineSet::compile(
            &self.gpu,
            &self.shaders,
            format,
            &self.uniform_buffers,
        )?);
        Ok(())
    }

    /// Runs one tick of the frame loop.
    pub fn draw_frame(
        &mut self,
        window: &dyn DrawableSurface,
        snapshot: &GameSnapshot,
    ) -> RenderResult<FrameStatus> {
        let resized = self.mailbox.take();
        let slot = self.current_frame;
        let generation = self.swapchain.generation();

        let Some(image_index) = self.swapchain.acquire(&self.gpu, window, slot)? else {
            debug!(slot, "no image this tick");
            self.refresh_pipelines()?;
            return Ok(FrameStatus::Skipped);
        };
        if self.swapchain.generation() != generation {
            self.refresh_pipelines()?;
        }

        // the slot's fence has been waited on, so the GPU is done with these
        let instances = snapshot.instances();
        self.gpu
            .write_buffer(self.instance_buffers[slot], 0, bytemuck::cast_slice(&instances))?;
        self.gpu.write_buffer(
            self.uniform_buffers[slot],
            0,
            bytemuck::bytes_of(&UniformData::standard()),
        )?;

        let cmd = self.command_buffers[slot];
        {
            let target = self
                .swapchain
                .frame_target(image_index)
                .ok_or_else(|| RenderError::backend("record", "acquired image out of range"))?;
            let pipelines = self
                .pipelines
                .as_ref()
                .ok_or_else(|| RenderError::backend("record", "pipelines not compiled"))?;
            let geometry = self
                .geometry
                .ok_or_else(|| RenderError::backend("record", "geometry buffer missing"))?;
            let resources = DrawResources {
                paddle_pipeline: pipelines.paddle,
                ball_pipeline: pipelines.ball,
                geometry,
                instances: self.instance_buffers[slot],
                uniform_set: pipelines.uniform_sets[slot],
                clear_color: self.clear_color,
            };
            record_frame(&self.gpu, cmd, &target, &resources)?;
        }

        let presented = self
            .swapchain
            .submit_and_present(&self.gpu, window, cmd, slot, image_index)?;
        self.current_frame = (slot + 1) % MAX_FRAMES_IN_FLIGHT;

        if !presented {
            self.refresh_pipelines()?;
            return Ok(FrameStatus::NotPresented { slot });
        }
        if resized {
            debug!("window resized; rebuilding swap chain");
            self.swapchain.recreate(&self.gpu, window)?;
            self.refresh_pipelines()?;
        }
        Ok(FrameStatus::Presented { slot, image_index })
    }

    /// Handle the platform uses to report that the surface changed size.
    pub fn notifier(&self) -> SurfaceNotifier {
        self.notifier.clone()
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn swapchain(&self) -> &SwapchainManager<G> {
        &self.swapchain
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn command_buffer(&self, slot: usize) -> G::CommandBuffer {
        self.command_buffers[slot]
    }

    pub fn instance_buffer(&self, slot: usize) -> G::Buffer {
        self.instance_buffers[slot]
    }
}

impl<G: Gpu> Drop for FrameRenderer<G> {
    fn drop(&mut self) {
        // Everything below may still be referenced by queued frames.
        if let Err(e) = self.gpu.wait_idle() {
            error!(error = %e, "wait_idle failed during renderer teardown");
        }
        let gpu = &self.gpu;
        let pipelines = self.pipelines.take();
        if let Some(p) = &pipelines {
            gpu.destroy_descriptor_pool(p.descriptor_pool);
        }
        for buffer in self.instance_buffers.drain(..).chain(self.uniform_buffers.drain(..)) {
            gpu.destroy_buffer(buffer);
        }
        if let Some(geometry) = self.geometry.take() {
            gpu.destroy_buffer(geometry);
        }
        if let Some(p) = pipelines {
            gpu.destroy_pipeline(p.ball);
            gpu.destroy_pipeline(p.paddle);
        }
        // command buffers go with their pool
        if let Some(pool) = self.command_pool.take() {
            gpu.destroy_command_pool(pool);
        }
        self.swapchain.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceProfile, SampleCounts};
    use crate::layout::InstanceData;
    use crate::mock::{MockGpu, MockWindow, Script};
    use crate::surface::{ColorSpace, SurfaceFormat};
    use crate::swapchain::SwapchainState;

    fn snapshot(t: f32) -> GameSnapshot {
        GameSnapshot {
            player: t,
            opponent: -t,
            ball: [t, t / 2.0],
        }
    }

    fn renderer(gpu: &MockGpu, window: &MockWindow) -> FrameRenderer<MockGpu> {
        FrameRenderer::new(gpu.clone(), window, ShaderSet::default()).unwrap()
    }

    fn slots(statuses: &[FrameStatus]) -> Vec<usize> {
        statuses
            .iter()
            .filter_map(|s| match s {
                FrameStatus::Presented { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn four_clean_frames_alternate_slots() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);

        let statuses: Vec<_> = (0..4)
            .map(|i| r.draw_frame(&window, &snapshot(i as f32 * 0.1)).unwrap())
            .collect();
        assert_eq!(slots(&statuses), vec![0, 1, 0, 1]);

        // image indices come from the chain's rotation, not the slot
        let images: Vec<_> = gpu.presents().iter().map(|p| p.image_index).collect();
        assert_eq!(images, vec![0, 1, 2, 0]);

        let submits = gpu.submits();
        assert_eq!(submits[0].fence, submits[2].fence);
        assert_ne!(submits[0].fence, submits[1].fence);
        assert_eq!(submits[1].command_buffer, r.command_buffer(1));
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn out_of_date_on_third_acquire_skips_once() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        gpu.script_acquire(3, Script::OutOfDate);

        let statuses: Vec<_> = (0..5)
            .map(|_| r.draw_frame(&window, &snapshot(0.0)).unwrap())
            .collect();
        assert!(matches!(statuses[0], FrameStatus::Presented { .. }));
        assert!(matches!(statuses[1], FrameStatus::Presented { .. }));
        assert_eq!(statuses[2], FrameStatus::Skipped);
        assert!(matches!(statuses[3], FrameStatus::Presented { .. }));
        assert!(matches!(statuses[4], FrameStatus::Presented { .. }));

        let chains = gpu.chains();
        assert_eq!(chains.len(), 2, "exactly one rebuild");
        let presents = gpu.presents();
        assert!(presents[2..].iter().all(|p| p.swapchain == chains[1].id));
        // skipped tick doesn't advance the slot
        assert_eq!(slots(&statuses), vec![0, 1, 0, 1]);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn rebuild_at_tick_five_of_ten_replaces_every_chain_handle() {
        let gpu = MockGpu::with_profile(DeviceProfile {
            graphics_family: 0,
            present_family: 0,
            max_samples: SampleCounts::TYPE_4,
        });
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        gpu.script_acquire(5, Script::OutOfDate);

        let old_target = r.swapchain().frame_target(0).unwrap();
        let old_msaa = old_target.msaa.unwrap();

        let statuses: Vec<_> = (0..10)
            .map(|i| r.draw_frame(&window, &snapshot(i as f32 / 10.0)).unwrap())
            .collect();
        let skipped = statuses.iter().filter(|s| **s == FrameStatus::Skipped).count();
        assert_eq!(skipped, 1);
        assert_eq!(statuses[4], FrameStatus::Skipped);
        assert_eq!(slots(&statuses).len(), 9);

        let chains = gpu.chains();
        assert_eq!(chains.len(), 2);
        for img in &chains[0].images {
            assert!(!chains[1].images.contains(img));
        }
        assert!(gpu.was_destroyed(old_target.view.0));
        assert!(gpu.was_destroyed(old_msaa.view.0));
        assert!(gpu.was_destroyed(old_msaa.image.0));

        for i in 0..3 {
            let t = r.swapchain().frame_target(i).unwrap();
            assert!(t.view.0 > old_msaa.memory.0, "handle reused: {:?}", t.view);
        }
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn slot_after_n_presents_is_n_mod_frames_in_flight() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        gpu.script_acquire(2, Script::OutOfDate);
        gpu.script_present(4, Script::Suboptimal);
        gpu.script_acquire(7, Script::OutOfDate);

        let mut submitted = 0;
        for _ in 0..12 {
            match r.draw_frame(&window, &snapshot(0.3)).unwrap() {
                FrameStatus::Skipped => {}
                _ => submitted += 1,
            }
            assert_eq!(r.current_frame(), submitted % MAX_FRAMES_IN_FLIGHT);
        }
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn present_out_of_date_still_advances_slot() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        gpu.script_present(1, Script::OutOfDate);

        assert_eq!(
            r.draw_frame(&window, &snapshot(0.0)).unwrap(),
            FrameStatus::NotPresented { slot: 0 }
        );
        assert_eq!(r.current_frame(), 1);
        assert_eq!(r.swapchain().generation(), 2);
        assert!(matches!(
            r.draw_frame(&window, &snapshot(0.0)).unwrap(),
            FrameStatus::Presented { slot: 1, .. }
        ));
    }

    #[test]
    fn instance_buffer_holds_the_snapshot() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        let snap = snapshot(0.4);
        r.draw_frame(&window, &snap).unwrap();

        let bytes = gpu.buffer_contents(r.instance_buffer(0));
        let expected: [InstanceData; 3] = snap.instances();
        assert_eq!(bytes, bytemuck::cast_slice::<_, u8>(&expected));
    }

    #[test]
    fn resize_notification_rebuilds_after_present() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        let notifier = r.notifier();

        window.resize(1024, 700);
        notifier.invalidate();
        notifier.invalidate();
        assert!(matches!(
            r.draw_frame(&window, &snapshot(0.0)).unwrap(),
            FrameStatus::Presented { .. }
        ));
        assert_eq!(r.swapchain().generation(), 2);
        assert_eq!(
            r.swapchain().extent(),
            Some(crate::surface::Extent2D::new(1024, 700))
        );

        r.draw_frame(&window, &snapshot(0.0)).unwrap();
        assert_eq!(r.swapchain().generation(), 2, "posts coalesced");
    }

    #[test]
    fn minimised_window_skips_until_restored() {
        let gpu = MockGpu::new();
        let window = MockWindow::event_driven(800, 600);
        let mut r = renderer(&gpu, &window);

        window.resize(0, 0);
        r.notifier().invalidate();
        r.draw_frame(&window, &snapshot(0.0)).unwrap();
        assert_eq!(r.swapchain().state(), SwapchainState::Rebuilding);

        for _ in 0..3 {
            assert_eq!(r.draw_frame(&window, &snapshot(0.0)).unwrap(), FrameStatus::Skipped);
        }
        window.resize(640, 480);
        assert!(matches!(
            r.draw_frame(&window, &snapshot(0.0)).unwrap(),
            FrameStatus::Presented { .. }
        ));
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn format_change_recompiles_pipelines() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        assert_eq!(gpu.pipelines().len(), 2);

        let mut support = crate::mock::default_support();
        support.formats = vec![SurfaceFormat {
            format: Format::R8G8B8A8Unorm,
            color_space: ColorSpace::SrgbNonlinear,
        }];
        gpu.set_surface_support(support);
        gpu.script_acquire(2, Script::OutOfDate);

        r.draw_frame(&window, &snapshot(0.0)).unwrap();
        assert_eq!(r.draw_frame(&window, &snapshot(0.0)).unwrap(), FrameStatus::Skipped);
        let pipelines = gpu.pipelines();
        assert_eq!(pipelines.len(), 4);
        assert!(pipelines[2..].iter().all(|p| p.format == Format::R8G8B8A8Unorm));
        assert!(gpu.was_destroyed(pipelines[0].id.0));

        // a same-format rebuild keeps them
        gpu.script_acquire(3, Script::OutOfDate);
        r.draw_frame(&window, &snapshot(0.0)).unwrap();
        assert_eq!(gpu.pipelines().len(), 4);
        assert!(matches!(
            r.draw_frame(&window, &snapshot(0.0)).unwrap(),
            FrameStatus::Presented { .. }
        ));
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn pipelines_use_device_sample_count() {
        let gpu = MockGpu::with_profile(DeviceProfile {
            graphics_family: 1,
            present_family: 1,
            max_samples: SampleCounts::TYPE_8,
        });
        let window = MockWindow::new(800, 600);
        let _r = renderer(&gpu, &window);
        let p = gpu.pipelines();
        assert!(p.iter().all(|p| p.samples == SampleCounts::TYPE_8));
        assert_eq!(p[1].push_constant_size, Some(104));
    }

    #[test]
    fn fatal_errors_propagate_from_the_loop() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        gpu.script_present(2, Script::DeviceLost);
        r.draw_frame(&window, &snapshot(0.0)).unwrap();
        let err = r.draw_frame(&window, &snapshot(0.0)).unwrap_err();
        assert!(matches!(err, RenderError::DeviceLost));
    }

    #[test]
    fn startup_failure_releases_everything() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(800, 600);
        gpu.fail_next("compile_pipeline");
        assert!(FrameRenderer::new(gpu.clone(), &window, ShaderSet::default()).is_err());
        assert_eq!(gpu.live_handles(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn drop_waits_idle_and_releases_everything() {
        let gpu = MockGpu::with_profile(DeviceProfile {
            graphics_family: 0,
            present_family: 1,
            max_samples: SampleCounts::TYPE_2,
        });
        let window = MockWindow::new(800, 600);
        let mut r = renderer(&gpu, &window);
        for _ in 0..3 {
            r.draw_frame(&window, &snapshot(0.5)).unwrap();
        }
        assert!(gpu.pending_work() > 0);
        drop(r);
        assert_eq!(gpu.pending_work(), 0);
        assert_eq!(gpu.live_handles(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }
}
