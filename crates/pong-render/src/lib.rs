// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame presentation engine.
//!
//! Backends implement [`gpu::Gpu`]; everything else (device selection
//! policy, swap chain lifecycle, frame pacing, command recording) is written
//! once against that trait.
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod device;
pub mod error;
pub mod gpu;
pub mod layout;
pub mod pipeline;
pub mod recorder;
pub mod renderer;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod window;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{RenderError, RenderResult};
pub use layout::GameSnapshot;
pub use renderer::{FrameRenderer, FrameStatus};
pub use window::{mailbox, DrawableSurface, RenderSize, SurfaceMailbox, SurfaceNotifier};

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    /// Enable API validation and forward its messages to the log.
    pub validation: bool,
    pub clear_color: [f32; 4],
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        surface: &dyn DrawableSurface,
        options: RenderOptions,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Schedules a swap chain rebuild after the next present.
    fn resize(&mut self, size: RenderSize);

    /// Draws one frame of `snapshot`. Out-of-date surfaces are handled
    /// internally; errors are fatal.
    fn render(
        &mut self,
        surface: &dyn DrawableSurface,
        snapshot: &GameSnapshot,
    ) -> RenderResult<FrameStatus>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
