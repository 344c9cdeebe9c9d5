// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub use winit;

use pong_render::{DrawableSurface, RenderSize};
use tracing::debug;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// A winit window as the swap chain sees it.
///
/// winit delivers size changes through the event loop, so blocking here
/// would stall the very thread that has to observe the restore. A
/// minimised window reports `None` and the caller retries next tick.
pub struct GameWindow {
    window: Window,
}

impl GameWindow {
    pub fn new(window: Window) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

fn drawable(size: PhysicalSize<u32>) -> Option<RenderSize> {
    let size = render_size(size);
    (!size.is_zero()).then_some(size)
}

impl DrawableSurface for GameWindow {
    fn drawable_size(&self) -> RenderSize {
        render_size(self.window.inner_size())
    }

    fn wait_until_drawable(&self) -> Option<RenderSize> {
        let size = drawable(self.window.inner_size());
        if size.is_none() {
            debug!("window minimised; deferring swap chain rebuild");
        }
        size
    }
}
