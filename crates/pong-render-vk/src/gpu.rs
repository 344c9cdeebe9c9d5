// SPDX-License-Identifier: CEPL-1.0
//! `ash` implementation of the engine's GPU seam.
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use pong_render::device::{select_device, DeviceProfile, SampleCounts};
use pong_render::gpu::{
    AcquireOutcome, BufferUsage, ColorTarget, Gpu, ImageLayout, PresentOutcome, RenderTarget,
    Sharing, Submission, SwapchainDesc,
};
use pong_render::pipeline::PipelineConfig;
use pong_render::surface::{Extent2D, SurfaceFormat, SurfaceSupport};
use pong_render::{RenderError, RenderResult};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::convert::*;
use crate::device::{create_logical_device, enumerate_candidates};
use crate::instance::InstanceContext;

/// Host-visible buffer with its memory mapped for the buffer's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VkBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    size: u64,
}

/// A graphics pipeline together with the layouts it was built against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    push_stages: vk::ShaderStageFlags,
}

const SUBRANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

// STRICT TEARDOWN ORDER:
// - everything created through the `Gpu` trait is released by its owner
//   (the frame renderer) before this is dropped
// - device
// - surface, debug messenger, instance (`InstanceContext`)
pub struct VkGpu {
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    phys: vk::PhysicalDevice,
    profile: DeviceProfile,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    ctx: InstanceContext,
}

impl VkGpu {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();

        unsafe {
            let ctx = InstanceContext::new(dh, wh, validation)?;
            let candidates = enumerate_candidates(&ctx.instance, &ctx.surface_loader, ctx.surface)?;
            let (phys, profile) = select_device(&candidates).context("device selection")?;
            let logical = create_logical_device(&ctx.instance, phys, &profile)?;

            let memory_props = ctx.instance.get_physical_device_memory_properties(phys);
            let swapchain_loader = swapchain::Device::new(&ctx.instance, &logical.device);
            info!(
                shared_queue = profile.shares_family(),
                "vk: logical device ready"
            );
            Ok(Self {
                device: logical.device,
                swapchain_loader,
                graphics_queue: logical.graphics_queue,
                present_queue: logical.present_queue,
                phys,
                profile,
                memory_props,
                ctx,
            })
        }
    }

    fn find_memory_type(&self, type_bits: u32, req: vk::MemoryPropertyFlags) -> Option<u32> {
        let mem = &self.memory_props;
        (0..mem.memory_type_count).find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize].property_flags.contains(req)
        })
    }

    unsafe fn allocate(
        &self,
        req: vk::MemoryRequirements,
        props: vk::MemoryPropertyFlags,
    ) -> RenderResult<vk::DeviceMemory> {
        let mem_type = self
            .find_memory_type(req.memory_type_bits, props)
            .ok_or_else(|| RenderError::backend("allocate_memory", "no suitable memory type"))?;
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        self.device
            .allocate_memory(&mai, None)
            .map_err(|e| vk_error("allocate_memory", e))
    }

    unsafe fn create_shader_module(&self, code: &[u32]) -> RenderResult<vk::ShaderModule> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: std::mem::size_of_val(code),
            ..Default::default()
        };
        self.device
            .create_shader_module(&ci, None)
            .map_err(|e| vk_error("create_shader_module", e))
    }

    unsafe fn create_uniform_set_layout(
        &self,
        stage: vk::ShaderStageFlags,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: stage,
            ..Default::default()
        };
        let ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &binding,
            ..Default::default()
        };
        self.device
            .create_descriptor_set_layout(&ci, None)
            .map_err(|e| vk_error("create_descriptor_set_layout", e))
    }

    unsafe fn build_pipeline(
        &self,
        config: &PipelineConfig<'_>,
        layout: vk::PipelineLayout,
        vs: vk::ShaderModule,
        fs: vk::ShaderModule,
    ) -> RenderResult<vk::Pipeline> {
        let entry = c"main";

        // --- Shader stage infos ---
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        // --- Fixed-function pipeline states ---
        let vb = config.bindings.map(|b| vk::VertexInputBindingDescription {
            binding: b.binding,
            stride: b.stride,
            input_rate: input_rate_to_vk(b.rate),
        });
        let va = config.attributes.map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: a.binding,
            format: attribute_format_to_vk(a.format),
            offset: a.offset,
        });
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: vb.len() as u32,
            p_vertex_binding_descriptions: vb.as_ptr(),
            vertex_attribute_description_count: va.len() as u32,
            p_vertex_attribute_descriptions: va.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        // Dynamic state (viewport/scissor set at record time)
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: samples_to_vk(config.samples),
            sample_shading_enable: vk::FALSE,
            ..Default::default()
        };
        // Color blend (no blending; write all RGBA)
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        // STRICT: the attachment format MUST match the current swap chain.
        let color_format = format_to_vk(config.color_format);
        let rendering = vk::PipelineRenderingCreateInfo {
            s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
            color_attachment_count: 1,
            p_color_attachment_formats: &color_format,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            p_next: (&rendering as *const _) as *const _,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            ..Default::default()
        };

        match self.device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        ) {
            Ok(p) => Ok(p[0]),
            Err((_, err)) => Err(vk_error("create_graphics_pipelines", err)),
        }
    }
}

impl Drop for VkGpu {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
        // `ctx` drops after this: surface, messenger, instance.
    }
}

impl Gpu for VkGpu {
    type Semaphore = vk::Semaphore;
    type Fence = vk::Fence;
    type Swapchain = vk::SwapchainKHR;
    type Image = vk::Image;
    type ImageView = vk::ImageView;
    type Memory = vk::DeviceMemory;
    type CommandPool = vk::CommandPool;
    type CommandBuffer = vk::CommandBuffer;
    type Buffer = VkBuffer;
    type Pipeline = VkPipeline;
    type DescriptorPool = vk::DescriptorPool;
    type DescriptorSet = vk::DescriptorSet;

    fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        let loader = &self.ctx.surface_loader;
        let surface = self.ctx.surface;
        unsafe {
            let caps = loader
                .get_physical_device_surface_capabilities(self.phys, surface)
                .map_err(|e| vk_error("get_physical_device_surface_capabilities", e))?;
            let formats = loader
                .get_physical_device_surface_formats(self.phys, surface)
                .map_err(|e| vk_error("get_physical_device_surface_formats", e))?;
            let modes = loader
                .get_physical_device_surface_present_modes(self.phys, surface)
                .map_err(|e| vk_error("get_physical_device_surface_present_modes", e))?;
            Ok(SurfaceSupport {
                capabilities: capabilities_from_vk(&caps),
                formats: formats.into_iter().map(surface_format_from_vk).collect(),
                present_modes: modes.into_iter().map(present_mode_from_vk).collect(),
            })
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        let (sharing_mode, families): (_, &[u32]) = match &desc.sharing {
            Sharing::Exclusive => (vk::SharingMode::EXCLUSIVE, &[][..]),
            Sharing::Concurrent(f) => (vk::SharingMode::CONCURRENT, f.as_slice()),
        };
        // image_usage must match how the images are used; we only render to them
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.ctx.surface,
            min_image_count: desc.min_image_count,
            image_format: format_to_vk(desc.format.format),
            image_color_space: color_space_to_vk(desc.format.color_space),
            image_extent: extent_to_vk(desc.extent),
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: vk::SurfaceTransformFlagsKHR::from_raw(desc.pre_transform),
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: present_mode_to_vk(desc.present_mode),
            clipped: vk::TRUE,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.create_swapchain(&swap_info, None) }
            .map_err(|e| vk_error("create_swapchain", e))
    }

    fn swapchain_images(&self, chain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(chain) }
            .map_err(|e| vk_error("get_swapchain_images", e))
    }

    fn destroy_swapchain(&self, chain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(chain, None) }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: SurfaceFormat,
    ) -> RenderResult<vk::ImageView> {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: format_to_vk(format.format),
            subresource_range: SUBRANGE,
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&iv_info, None) }
            .map_err(|e| vk_error("create_image_view", e))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_color_target(
        &self,
        extent: Extent2D,
        format: SurfaceFormat,
        samples: SampleCounts,
    ) -> RenderResult<ColorTarget<Self>> {
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: format_to_vk(format.format),
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: samples_to_vk(samples),
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        unsafe {
            let image = self
                .device
                .create_image(&ici, None)
                .map_err(|e| vk_error("create_image", e))?;
            let req = self.device.get_image_memory_requirements(image);
            let memory = match self.allocate(req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
                Ok(m) => m,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(e);
                }
            };
            let bound = self
                .device
                .bind_image_memory(image, memory, 0)
                .map_err(|e| vk_error("bind_image_memory", e))
                .and_then(|_| self.create_image_view(image, format));
            match bound {
                Ok(view) => Ok(ColorTarget {
                    image,
                    view,
                    memory,
                }),
                Err(e) => {
                    self.device.destroy_image(image, None);
                    self.device.free_memory(memory, None);
                    Err(e)
                }
            }
        }
    }

    fn destroy_color_target(&self, target: ColorTarget<Self>) {
        unsafe {
            self.device.destroy_image_view(target.view, None);
            self.device.destroy_image(target.image, None);
            self.device.free_memory(target.memory, None);
        }
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_semaphore(&ci, None) }
            .map_err(|e| vk_error("create_semaphore", e))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&ci, None) }.map_err(|e| vk_error("create_fence", e))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(|e| vk_error("wait_for_fences", e))
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(|e| vk_error("reset_fences", e))
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| vk_error("device_wait_idle", e))
    }

    fn acquire_next_image(
        &self,
        chain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquireOutcome> {
        let acquired = unsafe {
            self.swapchain_loader
                .acquire_next_image(chain, u64::MAX, signal, vk::Fence::null())
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(vk_error("acquire_next_image", e)),
        }
    }

    fn submit(&self, submission: &Submission<Self>) -> RenderResult<()> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &submission.wait,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &submission.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &submission.signal,
            ..Default::default()
        };
        unsafe {
            self.device.queue_submit(
                self.graphics_queue,
                std::slice::from_ref(&submit),
                submission.fence,
            )
        }
        .map_err(|e| vk_error("queue_submit", e))
    }

    fn present(
        &self,
        chain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<PresentOutcome> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &chain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.present_queue, &present) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(vk_error("queue_present", e)),
        }
    }

    fn create_command_pool(&self) -> RenderResult<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: self.profile.graphics_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        unsafe { self.device.create_command_pool(&pool_info, None) }
            .map_err(|e| vk_error("create_command_pool", e))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| vk_error("allocate_command_buffers", e))
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| vk_error("reset_command_buffer", e))
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd, &begin) }
            .map_err(|e| vk_error("begin_command_buffer", e))
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| vk_error("end_command_buffer", e))
    }

    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        from: ImageLayout,
        to: ImageLayout,
    ) {
        let (src, dst) = barrier_scopes(from, to);
        let barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: src.stage,
            src_access_mask: src.access,
            dst_stage_mask: dst.stage,
            dst_access_mask: dst.access,
            old_layout: layout_to_vk(from),
            new_layout: layout_to_vk(to),
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: SUBRANGE,
            ..Default::default()
        };
        let dep = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &barrier,
            ..Default::default()
        };
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dep) }
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, target: &RenderTarget<Self>) {
        // a multisampled attachment is only needed until it is resolved
        let (store_op, resolve_mode, resolve_image_view) = match target.resolve {
            Some(view) => (
                vk::AttachmentStoreOp::DONT_CARE,
                vk::ResolveModeFlags::AVERAGE,
                view,
            ),
            None => (
                vk::AttachmentStoreOp::STORE,
                vk::ResolveModeFlags::NONE,
                vk::ImageView::null(),
            ),
        };
        let color_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: target.view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            resolve_mode,
            resolve_image_view,
            resolve_image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: target.clear,
                },
            },
            ..Default::default()
        };
        let rendering_info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: extent_to_vk(target.extent),
            },
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &color_att,
            ..Default::default()
        };
        unsafe { self.device.cmd_begin_rendering(cmd, &rendering_info) }
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_rendering(cmd) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: VkPipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline)
        }
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: vk::CommandBuffer,
        binding: u32,
        buffer: VkBuffer,
        offset: u64,
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, binding, &[buffer.buffer], &[offset])
        }
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: VkBuffer, offset: u64) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer.buffer, offset, vk::IndexType::UINT16)
        }
    }

    fn cmd_bind_uniform_set(
        &self,
        cmd: vk::CommandBuffer,
        pipeline: VkPipeline,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                0,
                std::slice::from_ref(&set),
                &[],
            )
        }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, extent: Extent2D) {
        // Y is flipped by the projection, not here.
        let vp = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe { self.device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp)) }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, extent: Extent2D) {
        let sc = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: extent_to_vk(extent),
        };
        unsafe { self.device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&sc)) }
    }

    fn cmd_push_constants(&self, cmd: vk::CommandBuffer, pipeline: VkPipeline, bytes: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(cmd, pipeline.layout, pipeline.push_stages, 0, bytes)
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, first_instance)
        }
    }

    fn create_mapped_buffer(&self, size: u64, usage: BufferUsage) -> RenderResult<VkBuffer> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: buffer_usage_to_vk(usage),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let buffer = self
                .device
                .create_buffer(&bci, None)
                .map_err(|e| vk_error("create_buffer", e))?;
            let req = self.device.get_buffer_memory_requirements(buffer);
            let memory = match self.allocate(
                req,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ) {
                Ok(m) => m,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };
            let mapped = self
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .and_then(|_| {
                    self.device
                        .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                })
                .map_err(|e| vk_error("map_memory", e));
            match mapped {
                Ok(ptr) => Ok(VkBuffer {
                    buffer,
                    memory,
                    mapped: ptr.cast(),
                    size,
                }),
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    self.device.free_memory(memory, None);
                    Err(e)
                }
            }
        }
    }

    fn write_buffer(&self, buffer: VkBuffer, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        let end = offset.checked_add(bytes.len() as u64);
        if !end.is_some_and(|end| end <= buffer.size) {
            return Err(RenderError::backend(
                "write_buffer",
                format!(
                    "{} bytes at {offset} overflow a {}-byte buffer",
                    bytes.len(),
                    buffer.size
                ),
            ));
        }
        // host-coherent: no flush needed
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                buffer.mapped.add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: VkBuffer) {
        unsafe {
            self.device.unmap_memory(buffer.memory);
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn compile_pipeline(&self, config: &PipelineConfig<'_>) -> RenderResult<VkPipeline> {
        unsafe {
            let set_layout = self.create_uniform_set_layout(stage_to_vk(config.uniform_stage))?;

            let push_range = config.push_constants.map(|r| vk::PushConstantRange {
                stage_flags: stage_to_vk(r.stage),
                offset: 0,
                size: r.size,
            });
            let layout_info = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                set_layout_count: 1,
                p_set_layouts: &set_layout,
                push_constant_range_count: push_range.iter().len() as u32,
                p_push_constant_ranges: push_range
                    .as_ref()
                    .map_or(std::ptr::null(), |r| r as *const _),
                ..Default::default()
            };
            let layout = match self.device.create_pipeline_layout(&layout_info, None) {
                Ok(l) => l,
                Err(e) => {
                    self.device.destroy_descriptor_set_layout(set_layout, None);
                    return Err(vk_error("create_pipeline_layout", e));
                }
            };

            // modules are only needed until the pipeline exists
            let built = self.create_shader_module(config.vertex_spirv).and_then(|vs| {
                let res = self
                    .create_shader_module(config.fragment_spirv)
                    .and_then(|fs| {
                        let res = self.build_pipeline(config, layout, vs, fs);
                        self.device.destroy_shader_module(fs, None);
                        res
                    });
                self.device.destroy_shader_module(vs, None);
                res
            });

            match built {
                Ok(pipeline) => {
                    debug!(label = config.label, format = ?config.color_format, "vk: pipeline built");
                    Ok(VkPipeline {
                        pipeline,
                        layout,
                        set_layout,
                        push_stages: push_range.map_or(vk::ShaderStageFlags::empty(), |r| {
                            r.stage_flags
                        }),
                    })
                }
                Err(e) => {
                    self.device.destroy_pipeline_layout(layout, None);
                    self.device.destroy_descriptor_set_layout(set_layout, None);
                    Err(e)
                }
            }
        }
    }

    fn destroy_pipeline(&self, pipeline: VkPipeline) {
        unsafe {
            self.device.destroy_pipeline(pipeline.pipeline, None);
            self.device.destroy_pipeline_layout(pipeline.layout, None);
            self.device
                .destroy_descriptor_set_layout(pipeline.set_layout, None);
        }
    }

    fn create_uniform_sets(
        &self,
        pipeline: VkPipeline,
        buffers: &[VkBuffer],
        range: u64,
    ) -> RenderResult<(vk::DescriptorPool, Vec<vk::DescriptorSet>)> {
        let count = buffers.len() as u32;
        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        };
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        unsafe {
            let pool = self
                .device
                .create_descriptor_pool(&pool_info, None)
                .map_err(|e| vk_error("create_descriptor_pool", e))?;

            let layouts = vec![pipeline.set_layout; buffers.len()];
            let alloc_info = vk::DescriptorSetAllocateInfo {
                s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
                descriptor_pool: pool,
                descriptor_set_count: count,
                p_set_layouts: layouts.as_ptr(),
                ..Default::default()
            };
            let sets = match self.device.allocate_descriptor_sets(&alloc_info) {
                Ok(s) => s,
                Err(e) => {
                    self.device.destroy_descriptor_pool(pool, None);
                    return Err(vk_error("allocate_descriptor_sets", e));
                }
            };

            // infos must stay alive until the update call
            let infos: Vec<_> = buffers
                .iter()
                .map(|b| vk::DescriptorBufferInfo {
                    buffer: b.buffer,
                    offset: 0,
                    range,
                })
                .collect();
            let writes: Vec<_> = sets
                .iter()
                .zip(&infos)
                .map(|(&set, info)| vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: info,
                    ..Default::default()
                })
                .collect();
            self.device.update_descriptor_sets(&writes, &[]);
            Ok((pool, sets))
        }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }
}
