use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::error::EngineError;
use crate::render::RenderData;

use super::EntityId;

/// Object-safe access to `Any` for trait objects.
///
/// Call it on `&dyn Property`, never on `Box<dyn Property>`: the box itself is
/// `Any` too.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Lifecycle and value events fired by a property.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PropertyEvent {
    Added,
    Changed,
    Removed,
    Enabled,
    Disabled,
}

impl PropertyEvent {
    /// Lifecycle events are delivered even while the property is inactive.
    #[inline]
    pub const fn is_forced(self) -> bool {
        !matches!(self, Self::Changed)
    }
}

/// Directive returned by listeners.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ListenerControl {
    Keep,
    Detach,
}

/// Observer of a single property.
pub trait PropertyListener: Send + Sync {
    fn on_event(&self, property: &dyn Property, event: PropertyEvent) -> ListenerControl;
}

/// Registration handle returned by [`Property::add_listener`]; identity is the
/// listener allocation.
#[derive(Clone)]
pub struct ListenerHandle(Arc<dyn PropertyListener>);

impl ListenerHandle {
    fn is(&self, listener: &Arc<dyn PropertyListener>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(listener))
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ListenerHandle")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Shared state every property carries: owner, activity flag, listeners.
pub struct PropertyCore {
    parent: Option<EntityId>,
    active: bool,
    listeners: Vec<Arc<dyn PropertyListener>>,
}

impl Default for PropertyCore {
    fn default() -> Self {
        Self {
            parent: None,
            active: true,
            listeners: Vec::new(),
        }
    }
}

impl std::fmt::Debug for PropertyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyCore")
            .field("parent", &self.parent)
            .field("active", &self.active)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Typed, attachable unit of entity state.
///
/// Implementors provide storage for a [`PropertyCore`] and expose their content
/// through `value`. Lifecycle operations live on `dyn Property`.
pub trait Property: AsAny + Send {
    fn core(&self) -> &PropertyCore;
    fn core_mut(&mut self) -> &mut PropertyCore;

    /// Content held by this property.
    fn value(&self) -> &dyn Any;

    /// Per-tick update; only called while active.
    fn update(&mut self, dt: f32) {
        let _ = dt;
    }
}

impl dyn Property {
    /// Type of the content returned by `value`.
    #[inline]
    pub fn content_type(&self) -> TypeId {
        self.value().type_id()
    }

    #[inline]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value().downcast_ref::<T>()
    }

    #[inline]
    pub fn render_data(&self) -> Option<&RenderData> {
        self.get::<RenderData>()
    }

    #[inline]
    pub fn downcast_ref<P: Property>(&self) -> Option<&P> {
        self.as_any().downcast_ref::<P>()
    }

    #[inline]
    pub fn downcast_mut<P: Property>(&mut self) -> Option<&mut P> {
        self.as_any_mut().downcast_mut::<P>()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.core().active
    }

    #[inline]
    pub fn parent(&self) -> Option<EntityId> {
        self.core().parent
    }

    #[inline]
    pub fn listener_count(&self) -> usize {
        self.core().listeners.len()
    }

    /// Registers `listener` once; re-adding the same allocation is a no-op.
    ///
    /// An active property immediately delivers `Changed` to the new listener.
    pub fn add_listener(&mut self, listener: Arc<dyn PropertyListener>) -> ListenerHandle {
        let handle = ListenerHandle(listener.clone());
        if self.core().listeners.iter().any(|l| handle.is(l)) {
            return handle;
        }

        if self.is_active()
            && listener.on_event(self, PropertyEvent::Changed) == ListenerControl::Detach
        {
            return handle;
        }

        self.core_mut().listeners.push(listener);
        handle
    }

    pub fn remove_listener(&mut self, handle: &ListenerHandle) -> bool {
        let listeners = &mut self.core_mut().listeners;
        let before = listeners.len();
        listeners.retain(|l| !handle.is(l));
        listeners.len() != before
    }

    /// Fires `Changed` if the property is active.
    pub fn notify_changed(&mut self) {
        self.dispatch(PropertyEvent::Changed);
    }

    /// Enables or disables the property; fires only on an actual change.
    pub fn set_active(&mut self, active: bool) {
        if self.core().active == active {
            return;
        }
        self.core_mut().active = active;
        self.dispatch(if active {
            PropertyEvent::Enabled
        } else {
            PropertyEvent::Disabled
        });
    }

    /// Binds the property to `entity` and fires `Added`.
    pub fn on_attach(&mut self, entity: EntityId) -> Result<(), EngineError> {
        if let Some(current) = self.core().parent {
            return Err(EngineError::config(format!(
                "property is already attached to entity {current}"
            )));
        }
        self.core_mut().parent = Some(entity);
        self.dispatch(PropertyEvent::Added);
        Ok(())
    }

    /// Unbinds the property and fires `Removed`.
    pub fn on_detach(&mut self) -> Result<(), EngineError> {
        if self.core_mut().parent.take().is_none() {
            return Err(EngineError::config("property is not attached to an entity"));
        }
        self.dispatch(PropertyEvent::Removed);
        Ok(())
    }

    fn dispatch(&mut self, event: PropertyEvent) {
        if !event.is_forced() && !self.is_active() {
            return;
        }

        let mut listeners = std::mem::take(&mut self.core_mut().listeners);
        let this: &dyn Property = self;
        listeners.retain(|l| l.on_event(this, event) == ListenerControl::Keep);
        self.core_mut().listeners = listeners;
    }
}

impl std::fmt::Debug for dyn Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("core", self.core())
            .finish_non_exhaustive()
    }
}

/// Property holding a plain value.
#[derive(Debug, Default)]
pub struct ValueProperty<T> {
    core: PropertyCore,
    value: T,
}

impl<T: Any + Send> ValueProperty<T> {
    pub fn new(value: T) -> Self {
        Self {
            core: PropertyCore::default(),
            value,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Replaces the value and fires `Changed`.
    pub fn set(&mut self, value: T) {
        self.value = value;
        (self as &mut dyn Property).notify_changed();
    }
}

impl<T: Any + Send> Property for ValueProperty<T> {
    fn core(&self) -> &PropertyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PropertyCore {
        &mut self.core
    }

    fn value(&self) -> &dyn Any {
        &self.value
    }
}
