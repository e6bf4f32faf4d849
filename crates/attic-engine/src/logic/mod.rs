//! Entity/property model and the simulation scheduler.
//!
//! Entities are bags of [`Property`] values owned by the [`World`]. The
//! [`Genius`] runs the world on its own thread; everything else mutates it
//! through submitted tasks.

mod entity;
mod genius;
pub(crate) mod property;
mod world;

pub use entity::{Entity, EntityId};
pub use genius::{Genius, GeniusConfig, Task};
pub use property::{
    AsAny, ListenerControl, ListenerHandle, Property, PropertyCore, PropertyEvent,
    PropertyListener, ValueProperty,
};
pub use world::World;
