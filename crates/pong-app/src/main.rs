// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::Parser;
use pong_core::{init_tracing, TickClock};
use pong_platform::GameWindow;
use pong_render::{FrameStatus, RenderOptions, RenderSize, Renderer};
use pong_render_vk::VkRenderer;
use tracing::{debug, error, info};

use pong_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

mod config;
mod game;

use config::AppCfg;
use game::{Action, Game};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "pong.toml")]
    config: PathBuf,
    /// Force Vulkan validation layers on
    #[arg(long)]
    validation: bool,
    /// Initial window width, overrides the config file
    #[arg(long)]
    width: Option<u32>,
    /// Initial window height, overrides the config file
    #[arg(long)]
    height: Option<u32>,
}

struct App {
    // declared before `window`: the surface must go first
    renderer: Option<VkRenderer>,
    window: Option<GameWindow>,
    cfg: AppCfg,
    game: Game,
    clock: TickClock,

    exiting: bool,
    failure: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            renderer: None,
            window: None,
            clock: TickClock::new(cfg.game.tick()),
            cfg,
            game: Game::default(),
            exiting: false,
            failure: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("fatal: {err:#}");
        self.failure = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<(GameWindow, VkRenderer)> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.cfg.window.width,
                self.cfg.window.height,
            ));
        let window = GameWindow::new(event_loop.create_window(attrs)?);

        let options = RenderOptions {
            validation: self.cfg.render.validation,
            clear_color: self.cfg.render.clear_color,
        };
        let renderer = VkRenderer::new(window.window(), window.window(), &window, options)?;
        Ok((window, renderer))
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed {
            return;
        }
        match &event.logical_key {
            Key::Named(NamedKey::ArrowUp) => self.game.apply(Action::Up),
            Key::Named(NamedKey::ArrowDown) => self.game.apply(Action::Down),
            Key::Named(NamedKey::Escape) => {
                info!("Escape");
                self.shutdown(event_loop);
            }
            _ => {}
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(window)) = (&mut self.renderer, &self.window) else {
            return;
        };
        match renderer.render(window, &self.game.snapshot()) {
            Ok(FrameStatus::Presented { .. }) => {
                // count only frames that were actually shown
                self.frames = self.frames.saturating_add(1);
            }
            Ok(status) => debug!(?status, "frame not presented"),
            Err(e) if !e.is_fatal() => debug!(error = %e, "transient render error"),
            Err(e) => self.fail(event_loop, anyhow!(e).context("render")),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }
        match self.create_window(event_loop) {
            Ok((window, renderer)) => {
                info!(
                    width = self.cfg.window.width,
                    height = self.cfg.window.height,
                    "window created"
                );
                window.request_redraw();
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.context("renderer init")),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.window().id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                debug!("Resized → {}x{}", new_size.width, new_size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(RenderSize::new(new_size.width, new_size.height));
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => self.on_key(event_loop, &event),

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        let now = Instant::now();
        for _ in 0..self.clock.due_steps(now) {
            self.game.tick();
        }

        // one redraw per tick
        event_loop.set_control_flow(ControlFlow::WaitUntil(now + self.clock.step()));
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = AppCfg::load(&args.config);
    cfg.render.validation |= args.validation;
    if let Some(w) = args.width {
        cfg.window.width = w;
    }
    if let Some(h) = args.height {
        cfg.window.height = h;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    // already logged; a non-zero exit is all that is left to do
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
