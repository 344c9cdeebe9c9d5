// SPDX-License-Identifier: CEPL-1.0
use crate::error::RenderResult;
use crate::gpu::{Gpu, ImageLayout, RenderTarget};
use crate::layout::{
    BallPushConstants, BALL_FIRST_INSTANCE, PADDLE_INSTANCES, QUAD_INDEX_COUNT, QUAD_INDEX_OFFSET,
};
use crate::swapchain::FrameTarget;

/// Bindable state for one frame slot.
pub struct DrawResources<G: Gpu> {
    pub paddle_pipeline: G::Pipeline,
    pub ball_pipeline: G::Pipeline,
    /// Quad vertices, then indices at [`QUAD_INDEX_OFFSET`].
    pub geometry: G::Buffer,
    pub instances: G::Buffer,
    pub uniform_set: G::DescriptorSet,
    pub clear_color: [f32; 4],
}

/// Re-records `cmd` for one frame. Nothing is submitted.
pub fn record_frame<G: Gpu>(
    gpu: &G,
    cmd: G::CommandBuffer,
    target: &FrameTarget<G>,
    res: &DrawResources<G>,
) -> RenderResult<()> {
    gpu.reset_command_buffer(cmd)?;
    gpu.begin_command_buffer(cmd)?;

    gpu.cmd_transition_image(
        cmd,
        target.image,
        ImageLayout::Undefined,
        ImageLayout::ColorAttachment,
    );
    let attachment = match &target.msaa {
        Some(msaa) => {
            // contents are cleared each pass, nothing to preserve
            gpu.cmd_transition_image(
                cmd,
                msaa.image,
                ImageLayout::Undefined,
                ImageLayout::ColorAttachment,
            );
            RenderTarget {
                view: msaa.view,
                resolve: Some(target.view),
                extent: target.extent,
                clear: res.clear_color,
            }
        }
        None => RenderTarget {
            view: target.view,
            resolve: None,
            extent: target.extent,
            clear: res.clear_color,
        },
    };
    gpu.cmd_begin_rendering(cmd, &attachment);

    gpu.cmd_bind_pipeline(cmd, res.paddle_pipeline);
    gpu.cmd_bind_vertex_buffer(cmd, 0, res.geometry, 0);
    gpu.cmd_bind_vertex_buffer(cmd, 1, res.instances, 0);
    gpu.cmd_bind_index_buffer(cmd, res.geometry, QUAD_INDEX_OFFSET);
    gpu.cmd_set_viewport(cmd, target.extent);
    gpu.cmd_set_scissor(cmd, target.extent);
    gpu.cmd_bind_uniform_set(cmd, res.paddle_pipeline, res.uniform_set);
    gpu.cmd_draw_indexed(cmd, QUAD_INDEX_COUNT, PADDLE_INSTANCES, 0);

    // push constant ranges differ, so set 0 has to be bound again
    gpu.cmd_bind_pipeline(cmd, res.ball_pipeline);
    gpu.cmd_bind_uniform_set(cmd, res.ball_pipeline, res.uniform_set);
    let push = BallPushConstants::new(target.extent);
    gpu.cmd_push_constants(cmd, res.ball_pipeline, bytemuck::bytes_of(&push));
    gpu.cmd_draw_indexed(cmd, QUAD_INDEX_COUNT, 1, BALL_FIRST_INSTANCE);

    gpu.cmd_end_rendering(cmd);
    gpu.cmd_transition_image(
        cmd,
        target.image,
        ImageLayout::ColorAttachment,
        ImageLayout::PresentSrc,
    );
    gpu.end_command_buffer(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceProfile, SampleCounts};
    use crate::gpu::BufferUsage;
    use crate::mock::{Command, MockGpu, MockWindow};
    use crate::pipeline::{ball_pipeline, paddle_pipeline, ShaderSet};
    use crate::surface::{Extent2D, Format};
    use crate::swapchain::SwapchainManager;

    fn resources(gpu: &MockGpu) -> DrawResources<MockGpu> {
        let shaders = ShaderSet::default();
        let paddle = gpu
            .compile_pipeline(&paddle_pipeline(&shaders, Format::B8G8R8A8Srgb, SampleCounts::TYPE_1))
            .unwrap();
        let ball = gpu
            .compile_pipeline(&ball_pipeline(&shaders, Format::B8G8R8A8Srgb, SampleCounts::TYPE_1))
            .unwrap();
        let geometry = gpu.create_mapped_buffer(44, BufferUsage::VERTEX | BufferUsage::INDEX).unwrap();
        let instances = gpu.create_mapped_buffer(84, BufferUsage::VERTEX).unwrap();
        let uniform = gpu.create_mapped_buffer(192, BufferUsage::UNIFORM).unwrap();
        let (_, sets) = gpu.create_uniform_sets(paddle, &[uniform], 192).unwrap();
        DrawResources {
            paddle_pipeline: paddle,
            ball_pipeline: ball,
            geometry,
            instances,
            uniform_set: sets[0],
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn single_sample_frame_command_order() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(640, 480);
        let mgr = SwapchainManager::new(&gpu, &window).unwrap();
        let pool = gpu.create_command_pool().unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];
        let res = resources(&gpu);
        let target = mgr.frame_target(1).unwrap();

        record_frame(&gpu, cmd, &target, &res).unwrap();
        let extent = Extent2D::new(640, 480);
        let push = BallPushConstants::new(extent);

        assert_eq!(
            gpu.commands(cmd),
            vec![
                Command::Transition {
                    image: target.image,
                    from: ImageLayout::Undefined,
                    to: ImageLayout::ColorAttachment,
                },
                Command::BeginRendering {
                    view: target.view,
                    resolve: None,
                    extent,
                },
                Command::BindPipeline(res.paddle_pipeline),
                Command::BindVertexBuffer {
                    binding: 0,
                    buffer: res.geometry,
                    offset: 0,
                },
                Command::BindVertexBuffer {
                    binding: 1,
                    buffer: res.instances,
                    offset: 0,
                },
                Command::BindIndexBuffer {
                    buffer: res.geometry,
                    offset: 32,
                },
                Command::SetViewport(extent),
                Command::SetScissor(extent),
                Command::BindUniformSet(res.uniform_set),
                Command::DrawIndexed {
                    index_count: 6,
                    instance_count: 2,
                    first_instance: 0,
                },
                Command::BindPipeline(res.ball_pipeline),
                Command::BindUniformSet(res.uniform_set),
                Command::PushConstants(bytemuck::bytes_of(&push).to_vec()),
                Command::DrawIndexed {
                    index_count: 6,
                    instance_count: 1,
                    first_instance: 2,
                },
                Command::EndRendering,
                Command::Transition {
                    image: target.image,
                    from: ImageLayout::ColorAttachment,
                    to: ImageLayout::PresentSrc,
                },
            ]
        );
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn multisampled_frame_resolves_into_swap_image() {
        let gpu = MockGpu::with_profile(DeviceProfile {
            graphics_family: 0,
            present_family: 0,
            max_samples: SampleCounts::TYPE_4,
        });
        let window = MockWindow::new(640, 480);
        let mgr = SwapchainManager::new(&gpu, &window).unwrap();
        let pool = gpu.create_command_pool().unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];
        let res = resources(&gpu);
        let target = mgr.frame_target(0).unwrap();
        let msaa = target.msaa.unwrap();

        record_frame(&gpu, cmd, &target, &res).unwrap();
        let cmds = gpu.commands(cmd);
        assert_eq!(
            cmds[1],
            Command::Transition {
                image: msaa.image,
                from: ImageLayout::Undefined,
                to: ImageLayout::ColorAttachment,
            }
        );
        assert_eq!(
            cmds[2],
            Command::BeginRendering {
                view: msaa.view,
                resolve: Some(target.view),
                extent: Extent2D::new(640, 480),
            }
        );
    }

    #[test]
    fn rerecording_resets_previous_contents() {
        let gpu = MockGpu::new();
        let window = MockWindow::new(100, 100);
        let mgr = SwapchainManager::new(&gpu, &window).unwrap();
        let pool = gpu.create_command_pool().unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];
        let res = resources(&gpu);
        let target = mgr.frame_target(0).unwrap();

        record_frame(&gpu, cmd, &target, &res).unwrap();
        let first = gpu.commands(cmd).len();
        record_frame(&gpu, cmd, &target, &res).unwrap();
        assert_eq!(gpu.commands(cmd).len(), first);
        assert!(gpu.violations().is_empty());
    }
}
