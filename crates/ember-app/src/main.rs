// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::{init_tracing, FpsCounter};
use ember_platform::SurfaceState;
use ember_render::{FrameStatus, RenderSize, Renderer};
use ember_render_vk::VkRenderer;
use tracing::{error, info};

use ember_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod settings;

use settings::{AppCfg, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (toml)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// OBJ model, overrides the config
    #[arg(long)]
    model: Option<PathBuf>,
    /// Texture image, overrides the config
    #[arg(long)]
    texture: Option<PathBuf>,
}

struct App {
    cfg: AppCfg,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    surface: SurfaceState,
    fps: FpsCounter,
    focused: bool,
    exiting: bool,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let surface = SurfaceState::new(cfg.window.width, cfg.window.height);
        Self {
            cfg,
            window: None,
            renderer: None,
            surface,
            fps: FpsCounter::new(Duration::from_secs(1)),
            focused: true,
            exiting: false,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs).context("create_window")?;

        let size = window.inner_size();
        self.surface.resized(size.width, size.height);
        let renderer = VkRenderer::with_config(
            &window,
            &window,
            RenderSize::new(size.width, size.height),
            self.cfg.engine(),
        )
        .context("vk init")?;

        info!("window {}x{}", size.width, size.height);
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.fatal = Some(e);
        self.shutdown(event_loop);
    }

    // Renderer before window: the surface must go first.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        info!("resumed → paused={}", self.surface.paused());
        if !self.surface.paused() {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                if self.surface.resized(new_size.width, new_size.height) {
                    self.fps.reset();
                }
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(RenderSize::new(new_size.width, new_size.height)) {
                        self.fail(event_loop, e);
                        return;
                    }
                }
                if !self.surface.paused() {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                if self.surface.set_occluded(occluded) {
                    self.fps.reset();
                }
            }

            WindowEvent::Focused(focused) => {
                if self.focused != focused {
                    self.focused = focused;
                    info!("Focused({})", focused);
                    if self.cfg.render.vsync_when_unfocused {
                        if let Some(r) = &mut self.renderer {
                            // focused: back to the configured preference
                            let fifo = self.cfg.render.present == settings::PresentCfg::Fifo;
                            r.set_vsync(!focused || fifo);
                        }
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.surface.paused() {
                    return;
                }
                let Some(r) = &mut self.renderer else {
                    return;
                };
                match r.render() {
                    Ok(FrameStatus::Presented) => self.fps.frame(),
                    Ok(FrameStatus::Recreated | FrameStatus::Skipped) => {}
                    Err(e) => self.fail(event_loop, e),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.surface.paused() {
            // minimized or occluded: sleep until the next window event
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if let Some(n) = self.fps.tick(Instant::now()) {
            info!("fps ~ {}", n);
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = AppCfg::load(&args.config);
    if let Some(m) = args.model {
        cfg.assets.model = m;
    }
    if let Some(t) = args.texture {
        cfg.assets.texture = t;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
