// SPDX-License-Identifier: CEPL-1.0
//! Byte layouts shared between the CPU and the shaders.
//!
//! Every struct here is `#[repr(C)]` plain-old-data and is copied into
//! mapped GPU memory with `bytemuck`. Field order, offsets and strides are
//! part of the contract with the vertex/fragment shaders and the pipeline
//! vertex-input description; the tests pin them.
use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::surface::Extent2D;

/// Binding 0, per-vertex. Location 0: `vec2 position` at offset 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
}

/// Binding 1, per-instance.
///
/// | location | field       | type   | offset |
/// |----------|-------------|--------|--------|
/// | 1        | `offset`    | `vec2` | 0      |
/// | 2        | `dimension` | `vec2` | 8      |
/// | 3        | `color`     | `vec3` | 16     |
///
/// Stride 28, tightly packed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub offset: [f32; 2],
    pub dimension: [f32; 2],
    pub color: [f32; 3],
}

/// Set 0, binding 0, vertex stage. Three column-major `mat4`, 192 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformData {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

/// Fragment-stage push constants for the ball: six palette entries
/// (`vec4` each, offset 0) then the framebuffer size (`vec2`, offset 96).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BallPushConstants {
    pub color: [[f32; 4]; 6],
    pub resolution: [f32; 2],
}

pub const VERTEX_STRIDE: u32 = size_of::<Vertex>() as u32;
pub const INSTANCE_STRIDE: u32 = size_of::<InstanceData>() as u32;

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex { position: [-1.0, -1.0] },
    Vertex { position: [1.0, -1.0] },
    Vertex { position: [1.0, 1.0] },
    Vertex { position: [-1.0, 1.0] },
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Indices follow the vertices in the same buffer.
pub const QUAD_INDEX_OFFSET: u64 = size_of::<[Vertex; 4]>() as u64;
pub const QUAD_BYTES: u64 = QUAD_INDEX_OFFSET + size_of::<[u16; 6]>() as u64;
pub const QUAD_INDEX_COUNT: u32 = QUAD_INDICES.len() as u32;

/// Instance order: player paddle, opponent paddle, ball.
pub const INSTANCE_COUNT: usize = 3;
pub const PADDLE_INSTANCES: u32 = 2;
pub const BALL_FIRST_INSTANCE: u32 = 2;
pub const INSTANCE_BYTES: u64 = (INSTANCE_COUNT * size_of::<InstanceData>()) as u64;
pub const UNIFORM_BYTES: u64 = size_of::<UniformData>() as u64;

pub const PLAYER_X: f32 = -0.9;
pub const OPPONENT_X: f32 = 0.9;
pub const PADDLE_SIZE: [f32; 2] = [0.02, 0.2];
pub const BALL_SIZE: [f32; 2] = [0.05, 0.05];

/// Read-only view of the game the renderer draws each tick. Positions are
/// in normalized device units; paddles only move vertically.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GameSnapshot {
    pub player: f32,
    pub opponent: f32,
    pub ball: [f32; 2],
}

impl GameSnapshot {
    pub fn instances(&self) -> [InstanceData; INSTANCE_COUNT] {
        [
            InstanceData {
                offset: [PLAYER_X, self.player],
                dimension: PADDLE_SIZE,
                color: [0.5, 0.0, 0.0],
            },
            InstanceData {
                offset: [OPPONENT_X, self.opponent],
                dimension: PADDLE_SIZE,
                color: [0.0, 0.5, 0.0],
            },
            InstanceData {
                offset: self.ball,
                dimension: BALL_SIZE,
                color: [0.0, 0.0, 0.5],
            },
        ]
    }
}

/// Vertex and index bytes for the shared quad, in upload order.
pub fn quad_bytes() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(QUAD_BYTES as usize);
    bytes.extend_from_slice(bytemuck::cast_slice(&QUAD_VERTICES));
    bytes.extend_from_slice(bytemuck::cast_slice(&QUAD_INDICES));
    bytes
}

impl UniformData {
    /// Identity model/view and a projection that flips Y so +Y is up on
    /// screen.
    pub fn standard() -> Self {
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            view: Mat4::IDENTITY.to_cols_array_2d(),
            projection: Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0)).to_cols_array_2d(),
        }
    }
}

impl BallPushConstants {
    pub fn new(extent: Extent2D) -> Self {
        let mut color = [[0.0, 0.0, 0.0, 1.0]; 6];
        for (i, c) in color.iter_mut().enumerate() {
            c[i % 3] = 0.5;
        }
        Self {
            color,
            resolution: [extent.width as f32, extent.height as f32],
        }
    }
}

// Compile-time layout contract.
const _: () = {
    assert!(size_of::<Vertex>() == 8);
    assert!(size_of::<InstanceData>() == 28);
    assert!(offset_of!(InstanceData, offset) == 0);
    assert!(offset_of!(InstanceData, dimension) == 8);
    assert!(offset_of!(InstanceData, color) == 16);
    assert!(size_of::<UniformData>() == 192);
    assert!(size_of::<BallPushConstants>() == 104);
    assert!(offset_of!(BallPushConstants, resolution) == 96);
};
