use std::any::Any;
use std::collections::HashMap;

use crate::error::EngineError;
use crate::logic::World;

use super::handle::AppHandle;

/// Name → value bag handed between views.
///
/// A view receives one in [`View::setup`] and returns its own from
/// [`View::stop`] so it can be resumed later.
#[derive(Default)]
pub struct ViewState {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Box::new(value));
    }

    /// `None` if `name` is missing or holds another type.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name)?.downcast_ref()
    }

    pub fn take<T: Any>(&mut self, name: &str) -> Option<T> {
        if !self.values.get(name)?.is::<T>() {
            return None;
        }
        let boxed = self.values.remove(name)?;
        boxed.downcast().ok().map(|b| *b)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ViewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("ViewState").field("keys", &keys).finish()
    }
}

/// One screen of the application: builds its entities and render path on
/// setup and tears them down on stop.
///
/// Both methods run on the scheduler thread.
pub trait View: Send {
    fn setup(&mut self, app: &AppHandle, world: &mut World, state: ViewState)
    -> anyhow::Result<()>;

    /// Pauses the view. `next` goes to the view that starts next; the
    /// returned state is given back if this view is resumed.
    fn stop(&mut self, app: &AppHandle, world: &mut World, next: &mut ViewState) -> ViewState;
}

/// Running views, top last, with the saved state of every paused one.
#[derive(Default)]
pub(crate) struct ViewStack {
    views: Vec<Box<dyn View>>,
    paused: Vec<ViewState>,
}

impl ViewStack {
    pub(crate) fn len(&self) -> usize {
        self.views.len()
    }

    /// Pauses the top view and starts `view` above it.
    pub(crate) fn push(
        &mut self,
        app: &AppHandle,
        world: &mut World,
        mut view: Box<dyn View>,
    ) -> anyhow::Result<()> {
        let mut next = ViewState::new();
        if let Some(top) = self.views.last_mut() {
            let saved = top.stop(app, world, &mut next);
            self.paused.push(saved);
        }
        view.setup(app, world, next)?;
        self.views.push(view);
        Ok(())
    }

    /// Replaces the top view with `view`.
    pub(crate) fn switch(
        &mut self,
        app: &AppHandle,
        world: &mut World,
        mut view: Box<dyn View>,
    ) -> anyhow::Result<()> {
        let mut next = ViewState::new();
        if let Some(mut last) = self.views.pop() {
            last.stop(app, world, &mut next);
        }
        view.setup(app, world, next)?;
        self.views.push(view);
        Ok(())
    }

    /// Stops the top view and resumes the one below with its saved state.
    ///
    /// Returns `false` once the stack is empty.
    pub(crate) fn pop(&mut self, app: &AppHandle, world: &mut World) -> anyhow::Result<bool> {
        let Some(mut last) = self.views.pop() else {
            return Err(EngineError::config("no view to pop").into());
        };
        let mut next = self.paused.pop().unwrap_or_default();
        last.stop(app, world, &mut next);

        match self.views.last_mut() {
            Some(top) => {
                top.setup(app, world, next)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::device::HeadlessDevice;
    use crate::logic::{Genius, GeniusConfig};
    use crate::render::{Renderer, SceneRegistry};

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Records lifecycle calls and counts its own resumes in its state.
    struct Probe {
        name: &'static str,
        journal: Journal,
    }

    impl View for Probe {
        fn setup(
            &mut self,
            _app: &AppHandle,
            _world: &mut World,
            state: ViewState,
        ) -> anyhow::Result<()> {
            let note = state
                .get::<String>("note")
                .map(|n| format!(" ({n})"))
                .unwrap_or_default();
            self.journal
                .lock()
                .unwrap()
                .push(format!("setup {}{note}", self.name));
            Ok(())
        }

        fn stop(&mut self, _app: &AppHandle, _world: &mut World, next: &mut ViewState) -> ViewState {
            self.journal.lock().unwrap().push(format!("stop {}", self.name));
            next.insert("from", self.name.to_string());
            let mut saved = ViewState::new();
            saved.insert("note", format!("resumed {}", self.name));
            saved
        }
    }

    fn probe(name: &'static str, journal: &Journal) -> Box<dyn View> {
        Box::new(Probe {
            name,
            journal: journal.clone(),
        })
    }

    fn app() -> AppHandle {
        let scene = Arc::new(SceneRegistry::new(Arc::new(HeadlessDevice::new())));
        AppHandle::new(Genius::new(GeniusConfig::default()), Renderer::new(scene))
    }

    // ── state ─────────────────────────────────────────────────────────────

    #[test]
    fn state_is_typed() {
        let mut state = ViewState::new();
        state.insert("score", 42u32);
        assert_eq!(state.get::<u32>("score"), Some(&42));
        assert_eq!(state.get::<i64>("score"), None);
        assert_eq!(state.take::<i64>("score"), None);
        assert_eq!(state.take::<u32>("score"), Some(42));
        assert!(state.is_empty());
    }

    // ── stack ─────────────────────────────────────────────────────────────

    #[test]
    fn push_pauses_and_pop_resumes_with_saved_state() {
        let journal = Journal::default();
        let app = app();
        let mut world = World::new();
        let mut stack = ViewStack::default();

        stack.push(&app, &mut world, probe("menu", &journal)).unwrap();
        stack.push(&app, &mut world, probe("game", &journal)).unwrap();
        assert_eq!(stack.len(), 2);
        assert!(stack.pop(&app, &mut world).unwrap());

        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "setup menu",
                "stop menu",
                "setup game",
                "stop game",
                "setup menu (resumed menu)",
            ]
        );
    }

    #[test]
    fn switch_replaces_the_top() {
        let journal = Journal::default();
        let app = app();
        let mut world = World::new();
        let mut stack = ViewStack::default();

        stack.push(&app, &mut world, probe("intro", &journal)).unwrap();
        stack.switch(&app, &mut world, probe("menu", &journal)).unwrap();
        assert_eq!(stack.len(), 1);
        assert!(!stack.pop(&app, &mut world).unwrap());
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["setup intro", "stop intro", "setup menu", "stop menu"]
        );
    }

    #[test]
    fn popping_an_empty_stack_fails() {
        let app = app();
        let mut world = World::new();
        let mut stack = ViewStack::default();
        let err = stack.pop(&app, &mut world).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Config(_))
        ));
    }
}
