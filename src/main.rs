// =============================================================================
// EMBER - host application
// =============================================================================
//
// Owns the window and feeds the renderer core its collaborators:
//
//   winit window ──┬── surface creation (ash-window)
//                  ├── framebuffer size query
//                  └── Resized events ──> ResizeFlag
//   disk ─────────────> SPIR-V loader
//   Err(..) ──────────> report_fatal (log chain, exit 1)
//
// =============================================================================

use anyhow::{Context, Result};
use ember_renderer::backend::shader::read_shader_file;
use ember_renderer::backend::{report_fatal, FrameStatus, ResizeFlag};
use ember_renderer::config::DEFAULT_CONFIG_PATH;
use ember_renderer::{logging, Config, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() {
    let (config, load_error) = Config::load();
    logging::init_logging(&config.logging_config());

    log::info!("Starting Ember");
    if let Some(e) = load_error {
        log::warn!("Failed to load {}: {:#}. Using defaults.", DEFAULT_CONFIG_PATH, e);
    }
    log::info!(
        "Window: {}x{} \"{}\"",
        config.window.width,
        config.window.height,
        config.window.title
    );

    if let Err(e) = run(config) {
        report_fatal(&e);
    }
}

fn run(config: Config) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop failed")?;

    // Renderer teardown happens when `app` drops, before the process exits
    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// =============================================================================
// FRAME TIMING
// =============================================================================

const FRAMES_PER_REPORT: u32 = 1000;

/// Average frame time over fixed-size windows of frames.
struct FrameStats {
    frames: u32,
    window_start: Instant,
}

impl FrameStats {
    fn new(now: Instant) -> Self {
        Self { frames: 0, window_start: now }
    }

    /// Count one frame; returns the average frame time once per window.
    fn record(&mut self, now: Instant) -> Option<Duration> {
        self.frames += 1;
        if self.frames < FRAMES_PER_REPORT {
            return None;
        }
        let average = now.duration_since(self.window_start) / self.frames;
        self.frames = 0;
        self.window_start = now;
        Some(average)
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and with it the surface)
/// must go before the window it was created from.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    resize: Option<ResizeFlag>,
    window: Option<Arc<Window>>,
    /// Set to true when window is minimized (size = 0) - skip rendering
    is_minimized: bool,
    stats: FrameStats,
    /// First unrecoverable error; ends the event loop.
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            resize: None,
            window: None,
            is_minimized: false,
            stats: FrameStats::new(Instant::now()),
            fatal: None,
        }
    }

    fn init_renderer(&self, window: &Arc<Window>) -> Result<Renderer> {
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let required_extensions: Vec<&CStr> = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to get required surface extensions")?
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) })
            .collect();

        let options = self.config.renderer_options()?;
        let size_source = Arc::clone(window);

        Renderer::new(
            &options,
            &required_extensions,
            move |entry, instance| {
                unsafe { ash_window::create_surface(entry, instance, display_handle, window_handle, None) }
                    .context("Failed to create window surface")
            },
            move || {
                let size = size_source.inner_size();
                (size.width, size.height)
            },
            &read_shader_file,
        )
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("Shutting down after fatal error");
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn render_frame(&mut self) -> Result<()> {
        if self.is_minimized {
            return Ok(());
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        if let FrameStatus::Presented { .. } = renderer.draw_frame()? {
            if let Some(average) = self.stats.record(Instant::now()) {
                log::info!(
                    "Average frame time: {:.3} ms ({:.0} FPS)",
                    average.as_secs_f64() * 1000.0,
                    1.0 / average.as_secs_f64().max(f64::EPSILON)
                );
            }
        }
        Ok(())
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => {
                self.resize = Some(renderer.resize_flag());
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                self.is_minimized = size.width == 0 || size.height == 0;
                if !self.is_minimized {
                    if let Some(resize) = &self.resize {
                        resize.notify();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            log::info!("Presented {} frames", renderer.frames_presented());
            drop(renderer);
        }
        log::info!("Cleanup complete");
    }
}
