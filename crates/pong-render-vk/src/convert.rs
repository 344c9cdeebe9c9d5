// SPDX-License-Identifier: CEPL-1.0
//! Mapping between the engine's backend-neutral values and `ash` types.
use ash::vk;
use pong_render::device::SampleCounts;
use pong_render::gpu::{BufferUsage, ImageLayout};
use pong_render::pipeline::{AttributeFormat, InputRate, ShaderStage};
use pong_render::surface::{
    ColorSpace, Extent2D, Format, PresentMode, SurfaceCapabilities, SurfaceFormat,
};
use pong_render::RenderError;

/// Native failure codes into the engine's taxonomy. `op` names the call
/// that failed.
pub fn vk_error(op: &'static str, result: vk::Result) -> RenderError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::OutOfDate,
        other => RenderError::backend(op, format!("{other:?}")),
    }
}

pub fn format_to_vk(format: Format) -> vk::Format {
    match format {
        Format::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Other(raw) => vk::Format::from_raw(raw),
    }
}

pub fn format_from_vk(format: vk::Format) -> Format {
    match format {
        vk::Format::B8G8R8A8_SRGB => Format::B8G8R8A8Srgb,
        vk::Format::B8G8R8A8_UNORM => Format::B8G8R8A8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::R8G8B8A8Srgb,
        vk::Format::R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
        other => Format::Other(other.as_raw()),
    }
}

pub fn color_space_to_vk(space: ColorSpace) -> vk::ColorSpaceKHR {
    match space {
        ColorSpace::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        ColorSpace::Other(raw) => vk::ColorSpaceKHR::from_raw(raw),
    }
}

pub fn surface_format_from_vk(f: vk::SurfaceFormatKHR) -> SurfaceFormat {
    SurfaceFormat {
        format: format_from_vk(f.format),
        color_space: match f.color_space {
            vk::ColorSpaceKHR::SRGB_NONLINEAR => ColorSpace::SrgbNonlinear,
            other => ColorSpace::Other(other.as_raw()),
        },
    }
}

pub fn present_mode_to_vk(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        PresentMode::Other(raw) => vk::PresentModeKHR::from_raw(raw),
    }
}

pub fn present_mode_from_vk(mode: vk::PresentModeKHR) -> PresentMode {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => PresentMode::Immediate,
        vk::PresentModeKHR::MAILBOX => PresentMode::Mailbox,
        vk::PresentModeKHR::FIFO => PresentMode::Fifo,
        vk::PresentModeKHR::FIFO_RELAXED => PresentMode::FifoRelaxed,
        other => PresentMode::Other(other.as_raw()),
    }
}

pub fn extent_to_vk(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

fn extent_from_vk(extent: vk::Extent2D) -> Extent2D {
    Extent2D::new(extent.width, extent.height)
}

pub fn capabilities_from_vk(caps: &vk::SurfaceCapabilitiesKHR) -> SurfaceCapabilities {
    SurfaceCapabilities {
        min_image_count: caps.min_image_count,
        max_image_count: caps.max_image_count,
        current_extent: extent_from_vk(caps.current_extent),
        min_image_extent: extent_from_vk(caps.min_image_extent),
        max_image_extent: extent_from_vk(caps.max_image_extent),
        current_transform: caps.current_transform.as_raw(),
    }
}

pub fn samples_to_vk(samples: SampleCounts) -> vk::SampleCountFlags {
    vk::SampleCountFlags::from_raw(samples.bits())
}

pub fn samples_from_vk(flags: vk::SampleCountFlags) -> SampleCounts {
    SampleCounts::from_bits_truncate(flags.as_raw())
}

pub fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    flags
}

pub fn stage_to_vk(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
    }
}

pub fn attribute_format_to_vk(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
    }
}

pub fn input_rate_to_vk(rate: InputRate) -> vk::VertexInputRate {
    match rate {
        InputRate::Vertex => vk::VertexInputRate::VERTEX,
        InputRate::Instance => vk::VertexInputRate::INSTANCE,
    }
}

pub fn layout_to_vk(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Stage and access masks for one side of a layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierScope {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

/// Source and destination scopes for `from -> to`.
///
/// Leaving `Undefined` waits at colour-attachment output, the stage the
/// image-available semaphore is waited at, so the transition cannot run
/// before the presentation engine has released the image.
pub fn barrier_scopes(from: ImageLayout, to: ImageLayout) -> (BarrierScope, BarrierScope) {
    let color_out = vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;
    let src = match from {
        ImageLayout::Undefined => BarrierScope {
            stage: color_out,
            access: vk::AccessFlags2::NONE,
        },
        ImageLayout::ColorAttachment => BarrierScope {
            stage: color_out,
            access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        },
        ImageLayout::PresentSrc => BarrierScope {
            stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            access: vk::AccessFlags2::NONE,
        },
    };
    let dst = match to {
        ImageLayout::ColorAttachment => BarrierScope {
            stage: color_out,
            access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags2::COLOR_ATTACHMENT_READ,
        },
        ImageLayout::PresentSrc | ImageLayout::Undefined => BarrierScope {
            stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            access: vk::AccessFlags2::NONE,
        },
    };
    (src, dst)
}
