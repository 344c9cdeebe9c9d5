// SPDX-License-Identifier: CEPL-1.0
//! The seam between the presentation engine and a concrete GPU API.
//!
//! Every component above this module talks to the device only through
//! [`Gpu`]. The Vulkan backend implements it with `ash`; the simulated GPU in
//! [`crate::mock`] implements it with bookkeeping that checks the
//! synchronization rules.
use std::fmt::Debug;

use bitflags::bitflags;

use crate::device::{DeviceProfile, SampleCounts};
use crate::error::RenderResult;
use crate::pipeline::PipelineConfig;
use crate::surface::{Extent2D, PresentMode, SurfaceFormat, SurfaceSupport};

/// Marker for opaque backend handles.
pub trait Handle: Copy + Eq + Debug {}
impl<T: Copy + Eq + Debug> Handle for T {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sharing {
    Exclusive,
    /// Images are shared between the graphics and the present family.
    Concurrent([u32; 2]),
}

impl Sharing {
    pub fn for_families(graphics: u32, present: u32) -> Self {
        if graphics == present {
            Self::Exclusive
        } else {
            Self::Concurrent([graphics, present])
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub format: SurfaceFormat,
    pub extent: Extent2D,
    pub present_mode: PresentMode,
    pub sharing: Sharing,
    pub pre_transform: u32,
}

/// A device-local image with its view and backing memory.
pub struct ColorTarget<G: Gpu + ?Sized> {
    pub image: G::Image,
    pub view: G::ImageView,
    pub memory: G::Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// One graphics-queue submission. The wait happens at the colour attachment
/// output stage.
pub struct Submission<G: Gpu + ?Sized> {
    pub command_buffer: G::CommandBuffer,
    pub wait: G::Semaphore,
    pub signal: G::Semaphore,
    pub fence: G::Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageLayout {
    Undefined,
    ColorAttachment,
    PresentSrc,
}

/// Attachment for a dynamic rendering pass. With `resolve` set, `view` is
/// the multisampled target and `resolve` receives the averaged result.
pub struct RenderTarget<G: Gpu + ?Sized> {
    pub view: G::ImageView,
    pub resolve: Option<G::ImageView>,
    pub extent: Extent2D,
    pub clear: [f32; 4],
}

// `derive` would bound `G` itself; only the handles need to be Copy.
macro_rules! copy_bundle {
    ($($name:ident),*) => {$(
        impl<G: Gpu + ?Sized> Clone for $name<G> {
            fn clone(&self) -> Self {
                *self
            }
        }
        impl<G: Gpu + ?Sized> Copy for $name<G> {}
    )*};
}
copy_bundle!(ColorTarget, Submission, RenderTarget);

impl<G: Gpu + ?Sized> Debug for ColorTarget<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorTarget")
            .field("image", &self.image)
            .field("view", &self.view)
            .field("memory", &self.memory)
            .finish()
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
    }
}

pub trait Gpu {
    type Semaphore: Handle;
    type Fence: Handle;
    type Swapchain: Handle;
    type Image: Handle;
    type ImageView: Handle;
    type Memory: Handle;
    type CommandPool: Handle;
    type CommandBuffer: Handle;
    type Buffer: Handle;
    type Pipeline: Handle;
    type DescriptorPool: Handle;
    type DescriptorSet: Handle;

    fn profile(&self) -> &DeviceProfile;

    /// Fresh capability snapshot for the presentation surface.
    fn surface_support(&self) -> RenderResult<SurfaceSupport>;

    // swap chain

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<Self::Swapchain>;
    fn swapchain_images(&self, chain: Self::Swapchain) -> RenderResult<Vec<Self::Image>>;
    fn destroy_swapchain(&self, chain: Self::Swapchain);
    fn create_image_view(
        &self,
        image: Self::Image,
        format: SurfaceFormat,
    ) -> RenderResult<Self::ImageView>;
    fn destroy_image_view(&self, view: Self::ImageView);
    fn create_color_target(
        &self,
        extent: Extent2D,
        format: SurfaceFormat,
        samples: SampleCounts,
    ) -> RenderResult<ColorTarget<Self>>;
    fn destroy_color_target(&self, target: ColorTarget<Self>);

    // synchronization

    fn create_semaphore(&self) -> RenderResult<Self::Semaphore>;
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);
    fn create_fence(&self, signaled: bool) -> RenderResult<Self::Fence>;
    fn destroy_fence(&self, fence: Self::Fence);
    /// Blocks without timeout until the fence is signaled.
    fn wait_for_fence(&self, fence: Self::Fence) -> RenderResult<()>;
    fn reset_fence(&self, fence: Self::Fence) -> RenderResult<()>;
    fn wait_idle(&self) -> RenderResult<()>;

    // queue operations

    fn acquire_next_image(
        &self,
        chain: Self::Swapchain,
        signal: Self::Semaphore,
    ) -> RenderResult<AcquireOutcome>;
    fn submit(&self, submission: &Submission<Self>) -> RenderResult<()>;
    fn present(
        &self,
        chain: Self::Swapchain,
        image_index: u32,
        wait: Self::Semaphore,
    ) -> RenderResult<PresentOutcome>;

    // command buffers

    fn create_command_pool(&self) -> RenderResult<Self::CommandPool>;
    fn destroy_command_pool(&self, pool: Self::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: Self::CommandPool,
        count: u32,
    ) -> RenderResult<Vec<Self::CommandBuffer>>;
    fn reset_command_buffer(&self, cmd: Self::CommandBuffer) -> RenderResult<()>;
    fn begin_command_buffer(&self, cmd: Self::CommandBuffer) -> RenderResult<()>;
    fn end_command_buffer(&self, cmd: Self::CommandBuffer) -> RenderResult<()>;

    // recording

    fn cmd_transition_image(
        &self,
        cmd: Self::CommandBuffer,
        image: Self::Image,
        from: ImageLayout,
        to: ImageLayout,
    );
    fn cmd_begin_rendering(&self, cmd: Self::CommandBuffer, target: &RenderTarget<Self>);
    fn cmd_end_rendering(&self, cmd: Self::CommandBuffer);
    fn cmd_bind_pipeline(&self, cmd: Self::CommandBuffer, pipeline: Self::Pipeline);
    fn cmd_bind_vertex_buffer(
        &self,
        cmd: Self::CommandBuffer,
        binding: u32,
        buffer: Self::Buffer,
        offset: u64,
    );
    /// Indices are `u16`.
    fn cmd_bind_index_buffer(&self, cmd: Self::CommandBuffer, buffer: Self::Buffer, offset: u64);
    fn cmd_bind_uniform_set(
        &self,
        cmd: Self::CommandBuffer,
        pipeline: Self::Pipeline,
        set: Self::DescriptorSet,
    );
    fn cmd_set_viewport(&self, cmd: Self::CommandBuffer, extent: Extent2D);
    fn cmd_set_scissor(&self, cmd: Self::CommandBuffer, extent: Extent2D);
    fn cmd_push_constants(&self, cmd: Self::CommandBuffer, pipeline: Self::Pipeline, bytes: &[u8]);
    fn cmd_draw_indexed(
        &self,
        cmd: Self::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    );

    // buffers, pipelines, descriptors

    /// Host-visible, host-coherent, mapped for its whole lifetime.
    fn create_mapped_buffer(&self, size: u64, usage: BufferUsage) -> RenderResult<Self::Buffer>;
    fn write_buffer(&self, buffer: Self::Buffer, offset: u64, bytes: &[u8]) -> RenderResult<()>;
    fn destroy_buffer(&self, buffer: Self::Buffer);
    fn compile_pipeline(&self, config: &PipelineConfig<'_>) -> RenderResult<Self::Pipeline>;
    fn destroy_pipeline(&self, pipeline: Self::Pipeline);
    /// One uniform-buffer descriptor set per buffer, each covering `range`
    /// bytes, laid out for `pipeline`'s set 0.
    fn create_uniform_sets(
        &self,
        pipeline: Self::Pipeline,
        buffers: &[Self::Buffer],
        range: u64,
    ) -> RenderResult<(Self::DescriptorPool, Vec<Self::DescriptorSet>)>;
    fn destroy_descriptor_pool(&self, pool: Self::DescriptorPool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharing_follows_family_equality() {
        assert_eq!(Sharing::for_families(0, 0), Sharing::Exclusive);
        assert_eq!(Sharing::for_families(0, 2), Sharing::Concurrent([0, 2]));
    }
}
