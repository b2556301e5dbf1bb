// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{debug, error, info, trace, warn};
use vkframe_core::{init_tracing, DEFAULT_LOG_FILTER};
use vkframe_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::WindowId,
};
use vkframe_platform::HostedWindow;
use vkframe_render::RenderSize;
use vkframe_vk::ash::{self, vk};
use vkframe_vk::{DrawCommands, ExtensionPolicy, FrameInfo, Session, SessionConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing or invalid falls back to defaults
    #[arg(long, default_value = "vkframe.toml")]
    config: PathBuf,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Exit after this many presented frames (0 = run until closed)
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct WindowCfg {
    width: u32,
    height: u32,
    title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: 640,
            height: 480,
            title: "vkframe".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ExtensionsCfg {
    #[default]
    All,
    Required,
}

impl From<ExtensionsCfg> for ExtensionPolicy {
    fn from(cfg: ExtensionsCfg) -> Self {
        match cfg {
            ExtensionsCfg::All => ExtensionPolicy::All,
            ExtensionsCfg::Required => ExtensionPolicy::Required,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    extensions: ExtensionsCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: SessionConfig::default().clear_color,
            extensions: ExtensionsCfg::All,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct LogCfg {
    filter: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        LogCfg {
            filter: DEFAULT_LOG_FILTER.to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderCfg,
    log: LogCfg,
}

impl AppCfg {
    fn apply_args(&mut self, args: &Args) {
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            clear_color: self.render.clear_color,
            extensions: self.render.extensions.into(),
            ..Default::default()
        }
    }
}

/// Config plus the parse error, if the file existed but did not parse.
/// Reported by the caller once tracing is up.
fn load_cfg(path: &Path) -> (AppCfg, Option<toml::de::Error>) {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => (cfg, None),
            Err(e) => (AppCfg::default(), Some(e)),
        },
        Err(_) => (AppCfg::default(), None),
    }
}

const PULSE_PERIOD: u64 = 120;

/// Clears a centered rectangle whose color pulses with the frame count.
#[derive(Debug, Default)]
struct PulseRect {
    frame: u64,
    rect: Option<vk::ClearRect>,
}

impl PulseRect {
    fn color(&self) -> [f32; 4] {
        let t = (self.frame % PULSE_PERIOD) as f32 / PULSE_PERIOD as f32;
        let pulse = 1.0 - (2.0 * t - 1.0).abs();
        [0.2 + 0.6 * pulse, 0.8 * pulse, 0.3, 1.0]
    }
}

fn centered_rect(extent: vk::Extent2D) -> vk::ClearRect {
    vk::ClearRect {
        rect: vk::Rect2D {
            offset: vk::Offset2D {
                x: (extent.width / 4) as i32,
                y: (extent.height / 4) as i32,
            },
            extent: vk::Extent2D {
                width: (extent.width / 2).max(1),
                height: (extent.height / 2).max(1),
            },
        },
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl DrawCommands for PulseRect {
    fn prepare(
        &mut self,
        _device: &ash::Device,
        _render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) {
        let rect = centered_rect(extent);
        let (size, at) = (rect.rect.extent, rect.rect.offset);
        debug!("pulse rect {}x{} at ({}, {})", size.width, size.height, at.x, at.y);
        self.rect = Some(rect);
    }

    fn cleanup(&mut self, _device: &ash::Device) {
        debug!("pulse rect retired after {} frames", self.frame);
        self.rect = None;
    }

    fn record(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, frame: FrameInfo) {
        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.color(),
                },
            },
        };
        let rect = self.rect.unwrap_or_else(|| centered_rect(frame.extent));
        unsafe { device.cmd_clear_attachments(cmd, &[attachment], &[rect]) };
        self.frame = self.frame.wrapping_add(1);
    }
}

struct App {
    cfg: AppCfg,
    frame_limit: u64,

    // The session must go before the window it presents into.
    session: Option<Session>,
    window: Option<HostedWindow>,

    presented: u64,
    exiting: bool,
    failure: Option<anyhow::Error>,

    fps_frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, frame_limit: u64) -> Self {
        App {
            cfg,
            frame_limit,
            session: None,
            window: None,
            presented: 0,
            exiting: false,
            failure: None,
            fps_frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let size = RenderSize::new(self.cfg.window.width, self.cfg.window.height);
        let window = HostedWindow::open(event_loop, &self.cfg.window.title, size)?;
        let session = Session::new(
            &window,
            &self.cfg.session_config(),
            Box::new(PulseRect::default()),
        )?;
        let extent = session.extent();
        info!(
            "session up: {}x{}, {} images, format {:?}",
            extent.width,
            extent.height,
            session.image_count(),
            session.surface_format().format
        );
        window.request_redraw();
        self.window = Some(window);
        self.session = Some(session);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.session = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.open(event_loop) {
                error!("startup failed: {e:#}");
                self.failure = Some(e);
                self.shutdown(event_loop);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
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
                info!("CloseRequested after {} frames", self.presented);
                self.shutdown(event_loop);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let result = match self.session.as_mut() {
                    Some(session) => session.render_frame(),
                    None => return,
                };
                match result {
                    Ok(image_index) => {
                        trace!("presented image {image_index}");
                        self.presented += 1;
                        self.fps_frames = self.fps_frames.saturating_add(1);
                        if self.frame_limit != 0 && self.presented >= self.frame_limit {
                            info!("frame limit {} reached", self.frame_limit);
                            self.shutdown(event_loop);
                        }
                    }
                    Err(e) => {
                        error!("render error: {e}");
                        self.failure = Some(e.into());
                        self.shutdown(event_loop);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        // FIFO present paces this at the display rate.
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.fps_frames);
            self.fps_frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (mut cfg, cfg_error) = load_cfg(&args.config);
    init_tracing(&cfg.log.filter);
    if let Some(e) = cfg_error {
        warn!("{}: {e}; using defaults", args.config.display());
    }
    cfg.apply_args(&args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.frames);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(anyhow!("exited on GPU error: {e:#}")),
        None => Ok(()),
    }
}
