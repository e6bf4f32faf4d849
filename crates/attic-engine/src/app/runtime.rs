use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use ouroboros::self_referencing;

use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Fullscreen, Window, WindowId};

use crate::device::{Gpu, SurfaceErrorAction, WgpuDevice};
use crate::logging::init_logging;
use crate::logic::{Genius, World};
use crate::render::{Renderer, SceneRegistry};
use crate::time::FrameClock;

use super::config::AppConfig;
use super::handle::AppHandle;
use super::view::View;

/// Window, device, scheduler and view stack wired together.
///
/// [`launch`](Self::launch) blocks until the application closes: the last
/// view is popped, the window is closed, a frame fails to render or the
/// scheduler stops on a fatal error.
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Opens the window, starts the scheduler with `root` as the first view
    /// and renders until shutdown.
    ///
    /// Returns the error that ended the application, if any.
    pub fn launch(self, root: impl View + 'static) -> Result<()> {
        if let Some(logging) = self.config.logging.clone() {
            init_logging(logging);
        }
        log::info!("launching `{}`", self.config.title);

        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState::new(self.config, Box::new(root));

        let ran = event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error");
        state.shutdown();
        ran?;

        match state.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[self_referencing]
struct WindowEntry {
    window: Window,

    #[borrows(window)]
    #[covariant]
    gpu: Gpu<'this>,
}

/// Everything alive between window creation and shutdown.
///
/// Field order is drop order: the handle (scheduler, scene) goes first, the
/// window last.
struct Session {
    handle: AppHandle,
    device: Arc<WgpuDevice>,
    clock: FrameClock,
    entry: WindowEntry,
}

impl Session {
    fn should_close(&self) -> bool {
        self.handle.close_requested() || !self.handle.genius().is_running()
    }

    fn request_redraw(&self) {
        self.entry.with_window(|w| w.request_redraw());
    }

    /// Renders the installed path into the next surface frame.
    fn redraw(&mut self) -> Result<()> {
        let Session {
            handle,
            device,
            clock,
            entry,
        } = self;

        let ft = clock.tick();
        if ft.frame_index % 600 == 0 {
            log::debug!("frame {}: {:.2} ms", ft.frame_index, ft.dt * 1000.0);
        }

        entry.with_gpu_mut(|gpu| -> Result<()> {
            let frame = match gpu.begin_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    let msg = err.to_string();
                    return match gpu.handle_surface_error(err) {
                        SurfaceErrorAction::Fatal => Err(anyhow!("surface error: {msg}")),
                        SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame => {
                            log::debug!("skipping frame: {msg}");
                            Ok(())
                        }
                    };
                }
            };

            device.begin_frame(frame.view.clone());
            let rendered = handle.renderer().render();
            let commands = device.end_frame();
            gpu.present(frame, commands);

            rendered.context("render path failed")?;
            Ok(())
        })
    }
}

struct AppState {
    config: AppConfig,
    root: Option<Box<dyn View>>,
    session: Option<Session>,
    failure: Option<anyhow::Error>,
}

impl AppState {
    fn new(config: AppConfig, root: Box<dyn View>) -> Self {
        Self {
            config,
            root: Some(root),
            session: None,
            failure: None,
        }
    }

    fn fail(&mut self, e: anyhow::Error) {
        log::error!("{e:#}");
        self.failure.get_or_insert(e);
    }

    fn start_session(&self, event_loop: &ActiveEventLoop, root: Box<dyn View>) -> Result<Session> {
        let config = &self.config;
        let mut attrs = Window::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(LogicalSize::new(config.width as f64, config.height as f64))
            .with_visible(false);
        if config.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;
        if !config.fullscreen {
            center(&window);
        }

        let gpu_init = config.gpu_init();
        let entry = WindowEntryTryBuilder {
            window,
            gpu_builder: |w| pollster::block_on(Gpu::new(w, gpu_init)),
        }
        .try_build()
        .context("GPU initialization failed for window")?;

        let device = Arc::new(entry.with_gpu(|gpu| {
            WgpuDevice::new(gpu.device().clone(), gpu.queue().clone(), gpu.surface_format())
        }));
        let scene = Arc::new(SceneRegistry::new(device.clone()));
        let renderer = Renderer::new(scene.clone());

        let genius = Genius::with_world(config.genius.clone(), World::with_scene(scene));
        genius.start().context("failed to start the scheduler")?;

        let handle = AppHandle::new(genius, renderer);
        if let Err(e) = handle.push_boxed_view(root) {
            // Stop the loop thread; nothing else will.
            handle.genius().stop().ok();
            return Err(anyhow::Error::new(e).context("failed to push the root view"));
        }

        entry.with_window(|w| w.set_visible(true));
        Ok(Session {
            handle,
            device,
            clock: FrameClock::new(),
            entry,
        })
    }

    /// Stops and joins the scheduler, then releases device resources and the
    /// window, in that order.
    fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let genius = session.handle.genius();
        if genius.is_running() {
            if let Err(e) = genius.stop() {
                log::warn!("scheduler stop: {e}");
            }
        }
        if let Err(e) = genius.join() {
            self.fail(e.context("scheduler failed"));
        }

        session.handle.renderer().clear_render_path();
        session.handle.scene().clear();
        drop(session);
        log::info!("application shut down");
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }
        let Some(root) = self.root.take() else {
            return;
        };

        match self.start_session(event_loop, root) {
            Ok(session) => {
                session.request_redraw();
                self.session = Some(session);
            }
            Err(e) => {
                self.fail(e.context("failed to start the application"));
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(session) = &self.session else {
            return;
        };
        if session.should_close() {
            event_loop.exit();
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        // Continuous redraw.
        session.request_redraw();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut failure = None;
        match event {
            WindowEvent::CloseRequested => session.handle.close(),

            WindowEvent::Resized(new_size) => {
                session.entry.with_gpu_mut(|gpu| gpu.resize(new_size));
                session.request_redraw();
            }

            WindowEvent::ScaleFactorChanged { .. } => {
                let new_size = session.entry.with_window(|w| w.inner_size());
                session.entry.with_gpu_mut(|gpu| gpu.resize(new_size));
                session.request_redraw();
            }

            WindowEvent::RedrawRequested => {
                if !session.should_close() {
                    if let Err(e) = session.redraw() {
                        session.handle.close();
                        failure = Some(e);
                    }
                }
            }

            _ => {}
        }

        let close = session.should_close();
        if let Some(e) = failure {
            self.fail(e);
        }
        if close {
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

/// Moves `window` to the middle of its monitor.
fn center(window: &Window) {
    let Some(monitor) = window.current_monitor() else {
        return;
    };
    let screen = monitor.size();
    let origin = monitor.position();
    let size = window.outer_size();

    let x = origin.x + (screen.width.saturating_sub(size.width) / 2) as i32;
    let y = origin.y + (screen.height.saturating_sub(size.height) / 2) as i32;
    window.set_outer_position(PhysicalPosition::new(x, y));
}
