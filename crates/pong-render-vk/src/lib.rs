// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;

use anyhow::{Context, Result};
use ash::util::read_spv;
use pong_render::pipeline::ShaderSet;
use pong_render::{
    DrawableSurface, FrameRenderer, FrameStatus, GameSnapshot, RenderOptions, RenderResult,
    RenderSize, Renderer, SurfaceNotifier,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

mod convert;
mod device;
mod gpu;
mod instance;

pub use gpu::VkGpu;

fn load_shaders() -> Result<ShaderSet> {
    let vert = include_bytes!(concat!(env!("OUT_DIR"), "/quad.vert.spv"));
    let paddle = include_bytes!(concat!(env!("OUT_DIR"), "/paddle.frag.spv"));
    let ball = include_bytes!(concat!(env!("OUT_DIR"), "/ball.frag.spv"));
    Ok(ShaderSet {
        vertex: read_spv(&mut Cursor::new(&vert[..])).context("quad.vert.spv")?,
        paddle_fragment: read_spv(&mut Cursor::new(&paddle[..])).context("paddle.frag.spv")?,
        ball_fragment: read_spv(&mut Cursor::new(&ball[..])).context("ball.frag.spv")?,
    })
}

pub struct VkRenderer {
    frames: FrameRenderer<VkGpu>,
    notifier: SurfaceNotifier,
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        surface: &dyn DrawableSurface,
        options: RenderOptions,
    ) -> Result<Self> {
        let gpu = VkGpu::new(window, display, options.validation)?;
        let shaders = load_shaders()?;
        let mut frames =
            FrameRenderer::new(gpu, surface, shaders).context("creating frame renderer")?;
        frames.set_clear_color(options.clear_color);
        info!("vk: renderer ready");
        Ok(Self {
            notifier: frames.notifier(),
            frames,
        })
    }

    fn resize(&mut self, size: RenderSize) {
        debug!(width = size.width, height = size.height, "vk: surface invalidated");
        self.notifier.invalidate();
    }

    fn render(
        &mut self,
        surface: &dyn DrawableSurface,
        snapshot: &GameSnapshot,
    ) -> RenderResult<FrameStatus> {
        self.frames.draw_frame(surface, snapshot)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.frames.set_clear_color(rgba);
    }
}
