//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::SceneApp;
use crate::config::AppConfig;
use crate::renderer::Renderer;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` is honoured; the default level is `info`.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Run a [`SceneApp`] with the given configuration.
///
/// Initializes logging, creates the window and renderer, and runs the event
/// loop until the window is closed. Any startup or frame error stops the
/// loop and is returned.
pub fn run_app<A: SceneApp + 'static>(config: AppConfig, app: A) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner {
        config,
        pending: Some(app),
        state: None,
        failure: None,
    };

    event_loop
        .run_app(&mut runner)
        .context("Event loop error")?;

    match runner.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: SceneApp> {
    config: AppConfig,
    /// The app until the window exists.
    pending: Option<A>,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Internal application state.
///
/// The renderer is declared before the window so it is dropped first.
struct AppState<A: SceneApp> {
    app: A,
    renderer: Renderer,
    window: Arc<Window>,
    started: Instant,
    last_frame: Instant,
}

impl<A: SceneApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let result = match &mut self.state {
                    Some(state) => state.render_frame(),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::Resized(size) => {
                let result = match &mut self.state {
                    Some(state) => state.handle_resize(size.width, size.height),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.fail(event_loop, e.context("Failed to resize"));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

impl<A: SceneApp + 'static> AppRunner<A> {
    fn create_state(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let app = self
            .pending
            .take()
            .context("Application was already started")?;

        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mesh = app.mesh();
        let renderer = Renderer::new(&*window, window.inner_size(), &self.config, &mesh)?;

        let now = Instant::now();
        Ok(AppState {
            app,
            renderer,
            window,
            started: now,
            last_frame: now,
        })
    }

    /// Log `error`, tear down and stop the event loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("{error:#}");
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        self.failure = Some(error);
        event_loop.exit();
    }
}

impl<A: SceneApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.app.update(dt);
        let transform = self.app.transform(self.renderer.aspect_ratio());
        self.renderer.set_transform(transform);
        self.renderer.set_color_shift(self.app.color_shift());
        self.renderer.render()
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.renderer.resize(width, height)?;
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.app.on_resize(width, height);

        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn cleanup(&mut self) {
        let frames = self.renderer.frame_count();
        if frames > 0 {
            let seconds = self.started.elapsed().as_secs_f64();
            info!("Frame statistics:");
            info!("  Total frames: {frames}");
            if seconds > 0.0 {
                info!("  Avg FPS: {:.1}", frames as f64 / seconds);
            }
        }

        info!("Starting cleanup...");
        if let Err(e) = self.renderer.context().wait_idle() {
            error!("Failed to wait idle: {e}");
        }
        self.app.cleanup();
        info!("Cleanup complete");
    }
}
