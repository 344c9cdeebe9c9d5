// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline descriptions.
//!
//! A [`PipelineConfig`] is a finished value: everything a backend needs to
//! compile the pipeline is in it, and compiling has no other inputs.
use std::mem::size_of;

use crate::device::SampleCounts;
use crate::layout::{BallPushConstants, InstanceData, Vertex, INSTANCE_STRIDE, VERTEX_STRIDE};
use crate::surface::Format;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputRate {
    Vertex,
    Instance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub rate: InputRate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeFormat {
    Float2,
    Float3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: AttributeFormat,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stage: ShaderStage,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig<'a> {
    pub label: &'static str,
    pub vertex_spirv: &'a [u32],
    pub fragment_spirv: &'a [u32],
    pub bindings: [VertexBinding; 2],
    pub attributes: [VertexAttribute; 4],
    pub color_format: Format,
    pub samples: SampleCounts,
    /// Stage that reads the uniform buffer at set 0, binding 0.
    pub uniform_stage: ShaderStage,
    pub push_constants: Option<PushConstantRange>,
}

/// SPIR-V for the two pipelines. The vertex stage is shared.
#[derive(Clone, Debug, Default)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub paddle_fragment: Vec<u32>,
    pub ball_fragment: Vec<u32>,
}

pub const QUAD_BINDINGS: [VertexBinding; 2] = [
    VertexBinding {
        binding: 0,
        stride: VERTEX_STRIDE,
        rate: InputRate::Vertex,
    },
    VertexBinding {
        binding: 1,
        stride: INSTANCE_STRIDE,
        rate: InputRate::Instance,
    },
];

pub const QUAD_ATTRIBUTES: [VertexAttribute; 4] = [
    VertexAttribute {
        location: 0,
        binding: 0,
        format: AttributeFormat::Float2,
        offset: std::mem::offset_of!(Vertex, position) as u32,
    },
    VertexAttribute {
        location: 1,
        binding: 1,
        format: AttributeFormat::Float2,
        offset: std::mem::offset_of!(InstanceData, offset) as u32,
    },
    VertexAttribute {
        location: 2,
        binding: 1,
        format: AttributeFormat::Float2,
        offset: std::mem::offset_of!(InstanceData, dimension) as u32,
    },
    VertexAttribute {
        location: 3,
        binding: 1,
        format: AttributeFormat::Float3,
        offset: std::mem::offset_of!(InstanceData, color) as u32,
    },
];

pub fn paddle_pipeline(
    shaders: &ShaderSet,
    color_format: Format,
    samples: SampleCounts,
) -> PipelineConfig<'_> {
    PipelineConfig {
        label: "paddle",
        vertex_spirv: &shaders.vertex,
        fragment_spirv: &shaders.paddle_fragment,
        bindings: QUAD_BINDINGS,
        attributes: QUAD_ATTRIBUTES,
        color_format,
        samples,
        uniform_stage: ShaderStage::Vertex,
        push_constants: None,
    }
}

pub fn ball_pipeline(
    shaders: &ShaderSet,
    color_format: Format,
    samples: SampleCounts,
) -> PipelineConfig<'_> {
    PipelineConfig {
        label: "ball",
        fragment_spirv: &shaders.ball_fragment,
        push_constants: Some(PushConstantRange {
            stage: ShaderStage::Fragment,
            size: size_of::<BallPushConstants>() as u32,
        }),
        ..paddle_pipeline(shaders, color_format, samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_match_instance_layout() {
        let offsets: Vec<_> = QUAD_ATTRIBUTES.iter().map(|a| (a.location, a.offset)).collect();
        assert_eq!(offsets, vec![(0, 0), (1, 0), (2, 8), (3, 16)]);
        assert_eq!(QUAD_BINDINGS[1].stride, 28);
        assert_eq!(QUAD_BINDINGS[1].rate, InputRate::Instance);
    }

    #[test]
    fn ball_differs_only_in_fragment_and_push_constants() {
        let shaders = ShaderSet {
            vertex: vec![1],
            paddle_fragment: vec![2],
            ball_fragment: vec![3],
        };
        let paddle = paddle_pipeline(&shaders, Format::B8G8R8A8Srgb, SampleCounts::TYPE_4);
        let ball = ball_pipeline(&shaders, Format::B8G8R8A8Srgb, SampleCounts::TYPE_4);
        assert_eq!(paddle.push_constants, None);
        assert_eq!(
            ball.push_constants,
            Some(PushConstantRange {
                stage: ShaderStage::Fragment,
                size: 104
            })
        );
        assert_eq!(ball.fragment_spirv, &[3]);
        assert_eq!(ball.vertex_spirv, paddle.vertex_spirv);
        assert_eq!(ball.samples, paddle.samples);
    }
}
