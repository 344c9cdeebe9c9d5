// SPDX-License-Identifier: CEPL-1.0
//! A simulated GPU that records what the engine asks of it and checks the
//! synchronization rules a real driver would leave undefined.
//!
//! Semantics:
//! - Binary semaphores must be signaled before they are waited on and
//!   unsignaled before they are signaled again.
//! - A fence must be reset before a submission uses it and may not be reset
//!   while its work is pending. Waiting on a fence no pending work will
//!   signal is a deadlock and fails.
//! - Submitted work completes in queue order, only when the CPU waits on a
//!   fence or on device idle.
//! - Buffers and command buffers referenced by pending work may not be
//!   rewritten or reset, and nothing may be destroyed while work is pending.
//! - Handles are never reused.
//!
//! Breaking a rule is recorded in [`MockGpu::violations`] rather than
//! panicking, so tests can assert on the whole run.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::device::{DeviceProfile, SampleCounts};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    AcquireOutcome, BufferUsage, ColorTarget, Gpu, ImageLayout, PresentOutcome, RenderTarget,
    Submission, SwapchainDesc,
};
use crate::pipeline::PipelineConfig;
use crate::surface::{
    Extent2D, Format, PresentMode, SurfaceCapabilities, SurfaceFormat, SurfaceSupport,
    EXTENT_UNDEFINED, PREFERRED_FORMAT,
};
use crate::window::{DrawableSurface, RenderSize};

macro_rules! handles {
    ($($name:ident),* $(,)?) => {$(
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    )*};
}

handles!(
    SemaphoreId,
    FenceId,
    SwapchainId,
    ImageId,
    ViewId,
    MemoryId,
    PoolId,
    CmdId,
    BufferId,
    PipelineId,
    DescriptorPoolId,
    DescriptorSetId,
);

/// Outcome forced onto a numbered acquire or present call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Script {
    OutOfDate,
    Suboptimal,
    SurfaceLost,
    DeviceLost,
}

/// One recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Transition {
        image: ImageId,
        from: ImageLayout,
        to: ImageLayout,
    },
    BeginRendering {
        view: ViewId,
        resolve: Option<ViewId>,
        extent: Extent2D,
    },
    EndRendering,
    BindPipeline(PipelineId),
    BindVertexBuffer {
        binding: u32,
        buffer: BufferId,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferId,
        offset: u64,
    },
    BindUniformSet(DescriptorSetId),
    SetViewport(Extent2D),
    SetScissor(Extent2D),
    PushConstants(Vec<u8>),
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitRecord {
    pub command_buffer: CmdId,
    pub wait: SemaphoreId,
    pub signal: SemaphoreId,
    pub fence: FenceId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    pub swapchain: SwapchainId,
    pub image_index: u32,
    pub image: ImageId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineRecord {
    pub id: PipelineId,
    pub label: &'static str,
    pub format: Format,
    pub samples: SampleCounts,
    pub push_constant_size: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChainRecord {
    pub id: SwapchainId,
    pub desc: SwapchainDesc,
    pub images: Vec<ImageId>,
}

struct Pending {
    fence: u64,
    cmd: u64,
    buffers: HashSet<u64>,
}

#[derive(Default)]
struct CmdState {
    recording: bool,
    commands: Vec<Command>,
    buffers: HashSet<u64>,
}

struct ChainState {
    images: Vec<ImageId>,
    next: usize,
}

struct MockState {
    next_id: u64,
    live: HashMap<u64, &'static str>,
    destroyed: HashSet<u64>,
    semaphores: HashMap<u64, bool>,
    fences: HashMap<u64, bool>,
    pending: VecDeque<Pending>,
    chains: HashMap<u64, ChainState>,
    buffers: HashMap<u64, Vec<u8>>,
    cmds: HashMap<u64, CmdState>,
    set_buffers: HashMap<u64, u64>,
    support: SurfaceSupport,
    acquire_calls: u64,
    present_calls: u64,
    acquire_script: HashMap<u64, Script>,
    present_script: HashMap<u64, Script>,
    fail_ops: HashSet<&'static str>,
    acquires: Vec<AcquireOutcome>,
    submits: Vec<SubmitRecord>,
    presents: Vec<PresentRecord>,
    chain_log: Vec<ChainRecord>,
    color_targets: Vec<(Extent2D, SampleCounts)>,
    pipelines: Vec<PipelineRecord>,
    wait_idle_calls: u32,
    violations: Vec<String>,
}

impl MockState {
    fn alloc(&mut self, kind: &'static str) -> u64 {
        self.next_id += 1;
        self.live.insert(self.next_id, kind);
        self.next_id
    }

    fn violate(&mut self, msg: String) {
        tracing::warn!(%msg, "simulated GPU rule broken");
        self.violations.push(msg);
    }

    fn release(&mut self, id: u64, kind: &'static str) -> bool {
        if !self.pending.is_empty() {
            self.violate(format!("{kind} {id} destroyed while work is pending"));
        }
        if self.is_live(id, kind) {
            self.live.remove(&id);
            self.destroyed.insert(id);
            true
        } else {
            self.violate(format!("destroy of unknown {kind} {id}"));
            false
        }
    }

    fn is_live(&self, id: u64, kind: &'static str) -> bool {
        self.live.get(&id) == Some(&kind)
    }

    fn fail(&mut self, op: &'static str) -> RenderResult<()> {
        if self.fail_ops.remove(op) {
            Err(RenderError::backend(op, "injected failure"))
        } else {
            Ok(())
        }
    }

    fn complete_front(&mut self) {
        if let Some(work) = self.pending.pop_front() {
            self.fences.insert(work.fence, true);
        }
    }

    fn pending_uses_buffer(&self, buffer: u64) -> bool {
        self.pending.iter().any(|p| p.buffers.contains(&buffer))
    }

    fn record(&mut self, cmd: CmdId, command: Command) {
        let mut bad = false;
        match self.cmds.get_mut(&cmd.0) {
            Some(state) if state.recording => state.commands.push(command),
            _ => bad = true,
        }
        if bad {
            self.violate(format!("command recorded into {cmd:?} outside begin/end"));
        }
    }

    fn reference_buffer(&mut self, cmd: CmdId, buffer: u64) {
        if let Some(state) = self.cmds.get_mut(&cmd.0) {
            state.buffers.insert(buffer);
        }
    }
}

/// Cloning shares the underlying state, so a test can keep a handle after
/// moving one into the renderer.
#[derive(Clone)]
pub struct MockGpu {
    profile: DeviceProfile,
    state: Rc<RefCell<MockState>>,
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: Extent2D::new(EXTENT_UNDEFINED, EXTENT_UNDEFINED),
            min_image_extent: Extent2D::new(1, 1),
            max_image_extent: Extent2D::new(4096, 4096),
            current_transform: 1,
        },
        formats: vec![PREFERRED_FORMAT],
        present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
    }
}

impl MockGpu {
    /// Single queue family, no multisampling.
    pub fn new() -> Self {
        Self::with_profile(DeviceProfile {
            graphics_family: 0,
            present_family: 0,
            max_samples: SampleCounts::TYPE_1,
        })
    }

    pub fn with_profile(profile: DeviceProfile) -> Self {
        let state = MockState {
            next_id: 0,
            live: HashMap::new(),
            destroyed: HashSet::new(),
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            pending: VecDeque::new(),
            chains: HashMap::new(),
            buffers: HashMap::new(),
            cmds: HashMap::new(),
            set_buffers: HashMap::new(),
            support: default_support(),
            acquire_calls: 0,
            present_calls: 0,
            acquire_script: HashMap::new(),
            present_script: HashMap::new(),
            fail_ops: HashSet::new(),
            acquires: Vec::new(),
            submits: Vec::new(),
            presents: Vec::new(),
            chain_log: Vec::new(),
            color_targets: Vec::new(),
            pipelines: Vec::new(),
            wait_idle_calls: 0,
            violations: Vec::new(),
        };
        Self {
            profile,
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn set_surface_support(&self, support: SurfaceSupport) {
        self.state.borrow_mut().support = support;
    }

    /// Forces the outcome of the `call`-th acquire (1-based, counted over
    /// the GPU's lifetime).
    pub fn script_acquire(&self, call: u64, script: Script) {
        self.state.borrow_mut().acquire_script.insert(call, script);
    }

    pub fn script_present(&self, call: u64, script: Script) {
        self.state.borrow_mut().present_script.insert(call, script);
    }

    /// The next call to `op` (a `Gpu` method name) fails.
    pub fn fail_next(&self, op: &'static str) {
        self.state.borrow_mut().fail_ops.insert(op);
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn live_handles(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn was_destroyed(&self, id: u64) -> bool {
        self.state.borrow().destroyed.contains(&id)
    }

    pub fn acquires(&self) -> Vec<AcquireOutcome> {
        self.state.borrow().acquires.clone()
    }

    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.state.borrow().submits.clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state.borrow().presents.clone()
    }

    pub fn chains(&self) -> Vec<ChainRecord> {
        self.state.borrow().chain_log.clone()
    }

    pub fn color_targets(&self) -> Vec<(Extent2D, SampleCounts)> {
        self.state.borrow().color_targets.clone()
    }

    pub fn pipelines(&self) -> Vec<PipelineRecord> {
        self.state.borrow().pipelines.clone()
    }

    pub fn wait_idle_calls(&self) -> u32 {
        self.state.borrow().wait_idle_calls
    }

    pub fn pending_work(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn commands(&self, cmd: CmdId) -> Vec<Command> {
        self.state
            .borrow()
            .cmds
            .get(&cmd.0)
            .map(|c| c.commands.clone())
            .unwrap_or_default()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Vec<u8> {
        self.state
            .borrow()
            .buffers
            .get(&buffer.0)
            .cloned()
            .unwrap_or_default()
    }
}

impl Gpu for MockGpu {
    type Semaphore = SemaphoreId;
    type Fence = FenceId;
    type Swapchain = SwapchainId;
    type Image = ImageId;
    type ImageView = ViewId;
    type Memory = MemoryId;
    type CommandPool = PoolId;
    type CommandBuffer = CmdId;
    type Buffer = BufferId;
    type Pipeline = PipelineId;
    type DescriptorPool = DescriptorPoolId;
    type DescriptorSet = DescriptorSetId;

    fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        let mut s = self.state.borrow_mut();
        s.fail("surface_support")?;
        Ok(s.support.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<SwapchainId> {
        let mut s = self.state.borrow_mut();
        s.fail("create_swapchain")?;
        let id = s.alloc("swapchain");
        let images: Vec<_> = (0..desc.min_image_count)
            .map(|_| {
                s.next_id += 1;
                ImageId(s.next_id)
            })
            .collect();
        s.chain_log.push(ChainRecord {
            id: SwapchainId(id),
            desc: *desc,
            images: images.clone(),
        });
        s.chains.insert(id, ChainState { images, next: 0 });
        Ok(SwapchainId(id))
    }

    fn swapchain_images(&self, chain: SwapchainId) -> RenderResult<Vec<ImageId>> {
        let s = self.state.borrow();
        s.chains
            .get(&chain.0)
            .map(|c| c.images.clone())
            .ok_or_else(|| RenderError::backend("swapchain_images", "unknown swapchain"))
    }

    fn destroy_swapchain(&self, chain: SwapchainId) {
        let mut s = self.state.borrow_mut();
        if s.release(chain.0, "swapchain") {
            s.chains.remove(&chain.0);
        }
    }

    fn create_image_view(&self, image: ImageId, _format: SurfaceFormat) -> RenderResult<ViewId> {
        let mut s = self.state.borrow_mut();
        s.fail("create_image_view")?;
        let known = s.chains.values().any(|c| c.images.contains(&image));
        if !known {
            s.violate(format!("view created for {image:?} outside a live swapchain"));
        }
        Ok(ViewId(s.alloc("image_view")))
    }

    fn destroy_image_view(&self, view: ViewId) {
        self.state.borrow_mut().release(view.0, "image_view");
    }

    fn create_color_target(
        &self,
        extent: Extent2D,
        _format: SurfaceFormat,
        samples: SampleCounts,
    ) -> RenderResult<ColorTarget<Self>> {
        let mut s = self.state.borrow_mut();
        s.fail("create_color_target")?;
        s.color_targets.push((extent, samples));
        Ok(ColorTarget {
            image: ImageId(s.alloc("image")),
            view: ViewId(s.alloc("image_view")),
            memory: MemoryId(s.alloc("memory")),
        })
    }

    fn destroy_color_target(&self, target: ColorTarget<Self>) {
        let mut s = self.state.borrow_mut();
        s.release(target.view.0, "image_view");
        s.release(target.image.0, "image");
        s.release(target.memory.0, "memory");
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreId> {
        let mut s = self.state.borrow_mut();
        s.fail("create_semaphore")?;
        let id = s.alloc("semaphore");
        s.semaphores.insert(id, false);
        Ok(SemaphoreId(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        let mut s = self.state.borrow_mut();
        if s.release(semaphore.0, "semaphore") {
            s.semaphores.remove(&semaphore.0);
        }
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceId> {
        let mut s = self.state.borrow_mut();
        s.fail("create_fence")?;
        let id = s.alloc("fence");
        s.fences.insert(id, signaled);
        Ok(FenceId(id))
    }

    fn destroy_fence(&self, fence: FenceId) {
        let mut s = self.state.borrow_mut();
        if s.release(fence.0, "fence") {
            s.fences.remove(&fence.0);
        }
    }

    fn wait_for_fence(&self, fence: FenceId) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        if !s.is_live(fence.0, "fence") {
            s.violate(format!("wait on unknown {fence:?}"));
            return Err(RenderError::backend("wait_for_fence", "unknown fence"));
        }
        if s.fences.get(&fence.0) == Some(&true) {
            return Ok(());
        }
        if !s.pending.iter().any(|p| p.fence == fence.0) {
            s.violate(format!("deadlock: wait on unsignaled {fence:?} with no pending work"));
            return Err(RenderError::backend("wait_for_fence", "deadlock"));
        }
        while s.fences.get(&fence.0) != Some(&true) {
            s.complete_front();
        }
        Ok(())
    }

    fn reset_fence(&self, fence: FenceId) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        if s.pending.iter().any(|p| p.fence == fence.0) {
            s.violate(format!("{fence:?} reset while its work is pending"));
        }
        s.fences.insert(fence.0, false);
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        s.fail("wait_idle")?;
        while !s.pending.is_empty() {
            s.complete_front();
        }
        s.wait_idle_calls += 1;
        Ok(())
    }

    fn acquire_next_image(
        &self,
        chain: SwapchainId,
        signal: SemaphoreId,
    ) -> RenderResult<AcquireOutcome> {
        let mut s = self.state.borrow_mut();
        s.acquire_calls += 1;
        let call = s.acquire_calls;
        if !s.chains.contains_key(&chain.0) {
            s.violate(format!("acquire from retired {chain:?}"));
            return Err(RenderError::backend("acquire_next_image", "unknown swapchain"));
        }
        let script = s.acquire_script.remove(&call);
        let outcome = match script {
            Some(Script::OutOfDate) => AcquireOutcome::OutOfDate,
            Some(Script::SurfaceLost) => return Err(RenderError::SurfaceLost),
            Some(Script::DeviceLost) => return Err(RenderError::DeviceLost),
            Some(Script::Suboptimal) | None => {
                if s.semaphores.get(&signal.0) != Some(&false) {
                    s.violate(format!("acquire signals {signal:?} which is already signaled"));
                }
                s.semaphores.insert(signal.0, true);
                let state = s
                    .chains
                    .get_mut(&chain.0)
                    .ok_or_else(|| RenderError::backend("acquire_next_image", "unknown swapchain"))?;
                let image_index = state.next as u32;
                state.next = (state.next + 1) % state.images.len().max(1);
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: script == Some(Script::Suboptimal),
                }
            }
        };
        s.acquires.push(outcome);
        Ok(outcome)
    }

    fn submit(&self, sub: &Submission<Self>) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        s.fail("submit")?;
        if s.fences.get(&sub.fence.0) != Some(&false) {
            s.violate(format!("{:?} submitted without being reset", sub.fence));
        }
        if s.semaphores.get(&sub.wait.0) != Some(&true) {
            s.violate(format!("submission waits on unsignaled {:?}", sub.wait));
        }
        if s.semaphores.get(&sub.signal.0) != Some(&false) {
            s.violate(format!("submission signals already signaled {:?}", sub.signal));
        }
        let (recording, buffers) = match s.cmds.get(&sub.command_buffer.0) {
            Some(c) => (c.recording, c.buffers.clone()),
            None => (false, HashSet::new()),
        };
        if recording {
            s.violate(format!("{:?} submitted while recording", sub.command_buffer));
        }
        s.semaphores.insert(sub.wait.0, false);
        s.semaphores.insert(sub.signal.0, true);
        s.pending.push_back(Pending {
            fence: sub.fence.0,
            cmd: sub.command_buffer.0,
            buffers,
        });
        s.submits.push(SubmitRecord {
            command_buffer: sub.command_buffer,
            wait: sub.wait,
            signal: sub.signal,
            fence: sub.fence,
        });
        Ok(())
    }

    fn present(
        &self,
        chain: SwapchainId,
        image_index: u32,
        wait: SemaphoreId,
    ) -> RenderResult<PresentOutcome> {
        let mut s = self.state.borrow_mut();
        s.present_calls += 1;
        let call = s.present_calls;
        if s.semaphores.get(&wait.0) != Some(&true) {
            s.violate(format!("present waits on unsignaled {wait:?}"));
        }
        s.semaphores.insert(wait.0, false);
        let image = match s.chains.get(&chain.0) {
            Some(c) => c.images.get(image_index as usize).copied(),
            None => None,
        };
        let Some(image) = image else {
            s.violate(format!("present of {chain:?} image {image_index} which does not exist"));
            return Err(RenderError::backend("present", "unknown image"));
        };
        let outcome = match s.present_script.remove(&call) {
            Some(Script::OutOfDate) => PresentOutcome::OutOfDate,
            Some(Script::Suboptimal) => PresentOutcome::Suboptimal,
            Some(Script::SurfaceLost) => return Err(RenderError::SurfaceLost),
            Some(Script::DeviceLost) => return Err(RenderError::DeviceLost),
            None => PresentOutcome::Presented,
        };
        s.presents.push(PresentRecord {
            swapchain: chain,
            image_index,
            image,
        });
        Ok(outcome)
    }

    fn create_command_pool(&self) -> RenderResult<PoolId> {
        let mut s = self.state.borrow_mut();
        s.fail("create_command_pool")?;
        Ok(PoolId(s.alloc("command_pool")))
    }

    fn destroy_command_pool(&self, pool: PoolId) {
        self.state.borrow_mut().release(pool.0, "command_pool");
    }

    fn allocate_command_buffers(&self, pool: PoolId, count: u32) -> RenderResult<Vec<CmdId>> {
        let mut s = self.state.borrow_mut();
        s.fail("allocate_command_buffers")?;
        if !s.is_live(pool.0, "command_pool") {
            return Err(RenderError::backend("allocate_command_buffers", "unknown pool"));
        }
        Ok((0..count)
            .map(|_| {
                // freed with their pool, so not tracked as live handles
                s.next_id += 1;
                let id = s.next_id;
                s.cmds.insert(id, CmdState::default());
                CmdId(id)
            })
            .collect())
    }

    fn reset_command_buffer(&self, cmd: CmdId) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        if s.pending.iter().any(|p| p.cmd == cmd.0) {
            s.violate(format!("{cmd:?} reset while its submission is pending"));
        }
        match s.cmds.get_mut(&cmd.0) {
            Some(c) => {
                *c = CmdState::default();
                Ok(())
            }
            None => Err(RenderError::backend("reset_command_buffer", "unknown command buffer")),
        }
    }

    fn begin_command_buffer(&self, cmd: CmdId) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        let mut bad = false;
        match s.cmds.get_mut(&cmd.0) {
            Some(c) if !c.recording && c.commands.is_empty() => c.recording = true,
            Some(c) => {
                bad = true;
                c.recording = true;
            }
            None => return Err(RenderError::backend("begin_command_buffer", "unknown command buffer")),
        }
        if bad {
            s.violate(format!("{cmd:?} begun without a reset"));
        }
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CmdId) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        s.fail("end_command_buffer")?;
        match s.cmds.get_mut(&cmd.0) {
            Some(c) if c.recording => {
                c.recording = false;
                Ok(())
            }
            _ => Err(RenderError::backend("end_command_buffer", "not recording")),
        }
    }

    fn cmd_transition_image(&self, cmd: CmdId, image: ImageId, from: ImageLayout, to: ImageLayout) {
        self.state
            .borrow_mut()
            .record(cmd, Command::Transition { image, from, to });
    }

    fn cmd_begin_rendering(&self, cmd: CmdId, target: &RenderTarget<Self>) {
        let mut s = self.state.borrow_mut();
        let views = [Some(target.view), target.resolve];
        for v in views.into_iter().flatten() {
            if !s.is_live(v.0, "image_view") {
                s.violate(format!("rendering into destroyed {v:?}"));
            }
        }
        s.record(
            cmd,
            Command::BeginRendering {
                view: target.view,
                resolve: target.resolve,
                extent: target.extent,
            },
        );
    }

    fn cmd_end_rendering(&self, cmd: CmdId) {
        self.state.borrow_mut().record(cmd, Command::EndRendering);
    }

    fn cmd_bind_pipeline(&self, cmd: CmdId, pipeline: PipelineId) {
        self.state
            .borrow_mut()
            .record(cmd, Command::BindPipeline(pipeline));
    }

    fn cmd_bind_vertex_buffer(&self, cmd: CmdId, binding: u32, buffer: BufferId, offset: u64) {
        let mut s = self.state.borrow_mut();
        s.reference_buffer(cmd, buffer.0);
        s.record(
            cmd,
            Command::BindVertexBuffer {
                binding,
                buffer,
                offset,
            },
        );
    }

    fn cmd_bind_index_buffer(&self, cmd: CmdId, buffer: BufferId, offset: u64) {
        let mut s = self.state.borrow_mut();
        s.reference_buffer(cmd, buffer.0);
        s.record(cmd, Command::BindIndexBuffer { buffer, offset });
    }

    fn cmd_bind_uniform_set(&self, cmd: CmdId, _pipeline: PipelineId, set: DescriptorSetId) {
        let mut s = self.state.borrow_mut();
        if let Some(buffer) = s.set_buffers.get(&set.0).copied() {
            s.reference_buffer(cmd, buffer);
        }
        s.record(cmd, Command::BindUniformSet(set));
    }

    fn cmd_set_viewport(&self, cmd: CmdId, extent: Extent2D) {
        self.state
            .borrow_mut()
            .record(cmd, Command::SetViewport(extent));
    }

    fn cmd_set_scissor(&self, cmd: CmdId, extent: Extent2D) {
        self.state
            .borrow_mut()
            .record(cmd, Command::SetScissor(extent));
    }

    fn cmd_push_constants(&self, cmd: CmdId, _pipeline: PipelineId, bytes: &[u8]) {
        self.state
            .borrow_mut()
            .record(cmd, Command::PushConstants(bytes.to_vec()));
    }

    fn cmd_draw_indexed(
        &self,
        cmd: CmdId,
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    ) {
        self.state.borrow_mut().record(
            cmd,
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_instance,
            },
        );
    }

    fn create_mapped_buffer(&self, size: u64, _usage: BufferUsage) -> RenderResult<BufferId> {
        let mut s = self.state.borrow_mut();
        s.fail("create_mapped_buffer")?;
        let id = s.alloc("buffer");
        s.buffers.insert(id, vec![0; size as usize]);
        Ok(BufferId(id))
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        if s.pending_uses_buffer(buffer.0) {
            s.violate(format!("{buffer:?} written while the GPU may read it"));
        }
        let data = s
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| RenderError::backend("write_buffer", "unknown buffer"))?;
        let start = offset as usize;
        let end = start + bytes.len();
        if end > data.len() {
            return Err(RenderError::backend("write_buffer", "write past end of buffer"));
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        let mut s = self.state.borrow_mut();
        if s.release(buffer.0, "buffer") {
            s.buffers.remove(&buffer.0);
        }
    }

    fn compile_pipeline(&self, config: &PipelineConfig<'_>) -> RenderResult<PipelineId> {
        let mut s = self.state.borrow_mut();
        s.fail("compile_pipeline")?;
        let id = PipelineId(s.alloc("pipeline"));
        s.pipelines.push(PipelineRecord {
            id,
            label: config.label,
            format: config.color_format,
            samples: config.samples,
            push_constant_size: config.push_constants.map(|p| p.size),
        });
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        self.state.borrow_mut().release(pipeline.0, "pipeline");
    }

    fn create_uniform_sets(
        &self,
        _pipeline: PipelineId,
        buffers: &[BufferId],
        _range: u64,
    ) -> RenderResult<(DescriptorPoolId, Vec<DescriptorSetId>)> {
        let mut s = self.state.borrow_mut();
        s.fail("create_uniform_sets")?;
        let pool = DescriptorPoolId(s.alloc("descriptor_pool"));
        let sets = buffers
            .iter()
            .map(|b| {
                s.next_id += 1;
                let id = s.next_id;
                s.set_buffers.insert(id, b.0);
                DescriptorSetId(id)
            })
            .collect();
        Ok((pool, sets))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolId) {
        self.state.borrow_mut().release(pool.0, "descriptor_pool");
    }
}

/// Window stand-in. Blocking mode plays queued sizes as if resize events
/// arrived while waiting.
pub struct MockWindow {
    size: Cell<RenderSize>,
    queued: RefCell<VecDeque<RenderSize>>,
    blocking: bool,
    waits: Cell<u32>,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Cell::new(RenderSize::new(width, height)),
            queued: RefCell::new(VecDeque::new()),
            blocking: true,
            waits: Cell::new(0),
        }
    }

    /// `wait_until_drawable` returns `None` instead of blocking.
    pub fn event_driven(width: u32, height: u32) -> Self {
        Self {
            blocking: false,
            ..Self::new(width, height)
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.size.set(RenderSize::new(width, height));
    }

    /// Sizes reported one by one while a blocking wait is in progress.
    pub fn queue_sizes(&self, sizes: impl IntoIterator<Item = RenderSize>) {
        self.queued.borrow_mut().extend(sizes);
    }

    pub fn wait_calls(&self) -> u32 {
        self.waits.get()
    }
}

impl DrawableSurface for MockWindow {
    fn drawable_size(&self) -> RenderSize {
        self.size.get()
    }

    fn wait_until_drawable(&self) -> Option<RenderSize> {
        self.waits.set(self.waits.get() + 1);
        if !self.blocking {
            let size = self.size.get();
            return (!size.is_zero()).then_some(size);
        }
        loop {
            let size = self.size.get();
            if !size.is_zero() {
                return Some(size);
            }
            let next = self.queued.borrow_mut().pop_front()?;
            self.size.set(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_on_unsubmitted_fence_is_a_deadlock() {
        let gpu = MockGpu::new();
        let fence = gpu.create_fence(false).unwrap();
        assert!(gpu.wait_for_fence(fence).is_err());
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn double_signal_of_semaphore_is_flagged() {
        let gpu = MockGpu::new();
        let chain = gpu
            .create_swapchain(&SwapchainDesc {
                min_image_count: 2,
                format: PREFERRED_FORMAT,
                extent: Extent2D::new(4, 4),
                present_mode: PresentMode::Fifo,
                sharing: crate::gpu::Sharing::Exclusive,
                pre_transform: 1,
            })
            .unwrap();
        let sem = gpu.create_semaphore().unwrap();
        gpu.acquire_next_image(chain, sem).unwrap();
        assert!(gpu.violations().is_empty());
        gpu.acquire_next_image(chain, sem).unwrap();
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn images_rotate_round_robin() {
        let gpu = MockGpu::new();
        let chain = gpu
            .create_swapchain(&SwapchainDesc {
                min_image_count: 3,
                format: PREFERRED_FORMAT,
                extent: Extent2D::new(4, 4),
                present_mode: PresentMode::Fifo,
                sharing: crate::gpu::Sharing::Exclusive,
                pre_transform: 1,
            })
            .unwrap();
        let sem = gpu.create_semaphore().unwrap();
        let mut seen = Vec::new();
        for _ in 0..4 {
            if let AcquireOutcome::Acquired { image_index, .. } =
                gpu.acquire_next_image(chain, sem).unwrap()
            {
                seen.push(image_index);
            }
            // consume the signal the way a present would
            gpu.present(chain, *seen.last().unwrap(), sem).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn blocking_window_plays_queued_sizes() {
        let w = MockWindow::new(0, 0);
        w.queue_sizes([RenderSize::new(0, 10), RenderSize::new(640, 480)]);
        assert_eq!(w.wait_until_drawable(), Some(RenderSize::new(640, 480)));

        let e = MockWindow::event_driven(0, 0);
        assert_eq!(e.wait_until_drawable(), None);
    }

    #[test]
    fn double_destroy_is_flagged() {
        let gpu = MockGpu::new();
        let sem = gpu.create_semaphore().unwrap();
        gpu.destroy_semaphore(sem);
        gpu.destroy_semaphore(sem);
        assert_eq!(gpu.violations().len(), 1);
        assert!(gpu.was_destroyed(sem.0));
    }
}
