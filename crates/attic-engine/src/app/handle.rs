use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::EngineError;
use crate::logic::{Genius, World};
use crate::render::{Renderer, SceneRegistry};

use super::view::{View, ViewStack};

/// What views and tasks use to reach the running application.
///
/// Cloning is cheap. View-stack operations are submitted to the scheduler
/// and take effect on its next tick.
#[derive(Clone)]
pub struct AppHandle {
    genius: Genius,
    renderer: Renderer,
    views: Arc<Mutex<ViewStack>>,
    close: Arc<AtomicBool>,
}

impl AppHandle {
    pub fn new(genius: Genius, renderer: Renderer) -> Self {
        Self {
            genius,
            renderer,
            views: Arc::new(Mutex::new(ViewStack::default())),
            close: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn genius(&self) -> &Genius {
        &self.genius
    }

    #[inline]
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    #[inline]
    pub fn scene(&self) -> &Arc<SceneRegistry> {
        self.renderer.scene()
    }

    /// Asks the runtime to shut down after the current frame.
    pub fn close(&self) {
        self.close.store(true, Ordering::Release);
    }

    pub fn close_requested(&self) -> bool {
        self.close.load(Ordering::Acquire)
    }

    fn submit_stack_op<F>(&self, op: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut ViewStack, &AppHandle, &mut World) -> anyhow::Result<()> + Send + 'static,
    {
        let app = self.clone();
        self.genius.submit_task(move |world| {
            let views = app.views.clone();
            let mut stack = views.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut stack, &app, world)
        })
    }

    /// Pauses the current view and starts `view` on top of it.
    pub fn push_view(&self, view: impl View + 'static) -> Result<(), EngineError> {
        self.push_boxed_view(Box::new(view))
    }

    pub(crate) fn push_boxed_view(&self, view: Box<dyn View>) -> Result<(), EngineError> {
        self.submit_stack_op(move |stack, app, world| stack.push(app, world, view))
    }

    /// Stops the current view and starts `view` in its place.
    pub fn switch_view(&self, view: impl View + 'static) -> Result<(), EngineError> {
        let view: Box<dyn View> = Box::new(view);
        self.submit_stack_op(move |stack, app, world| stack.switch(app, world, view))
    }

    /// Stops the current view and resumes the one below. Closing the last
    /// view closes the application.
    pub fn pop_view(&self) -> Result<(), EngineError> {
        self.submit_stack_op(|stack, app, world| {
            if !stack.pop(app, world)? {
                log::info!("last view popped; closing");
                app.close();
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHandle")
            .field("running", &self.genius.is_running())
            .field("close_requested", &self.close_requested())
            .finish_non_exhaustive()
    }
}
