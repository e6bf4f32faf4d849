use std::any::{Any, TypeId};
use std::fmt;

use crate::error::EngineError;

use super::property::Property;

/// Identity of an entity, unique per scheduler.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unordered bag of properties with an identity.
///
/// Entities are owned by the scheduler's [`World`](super::World). Marking one
/// dead lets it live through the current tick; it is killed when reaped.
pub struct Entity {
    id: EntityId,
    properties: Vec<Box<dyn Property>>,
    dead: bool,
    killed: bool,
}

impl Entity {
    /// Creates an entity and attaches `properties` in order.
    pub fn new(id: EntityId, properties: Vec<Box<dyn Property>>) -> Result<Self, EngineError> {
        let mut entity = Self {
            id,
            properties: Vec::with_capacity(properties.len()),
            dead: false,
            killed: false,
        };
        entity.add_properties(properties)?;
        Ok(entity)
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn add_property(&mut self, mut property: Box<dyn Property>) -> Result<(), EngineError> {
        if self.killed {
            return Err(EngineError::config(format!("entity {} was killed", self.id)));
        }
        property.on_attach(self.id)?;
        self.properties.push(property);
        Ok(())
    }

    pub fn add_properties(
        &mut self,
        properties: impl IntoIterator<Item = Box<dyn Property>>,
    ) -> Result<(), EngineError> {
        properties.into_iter().try_for_each(|p| self.add_property(p))
    }

    /// Detaches and returns the first property of concrete type `P`.
    pub fn remove_property<P: Property>(&mut self) -> Result<Option<Box<dyn Property>>, EngineError> {
        let Some(index) = self
            .properties
            .iter()
            .position(|p| (**p).as_any().is::<P>())
        else {
            return Ok(None);
        };
        let mut property = self.properties.remove(index);
        property.on_detach()?;
        Ok(Some(property))
    }

    #[inline]
    pub fn properties(&self) -> &[Box<dyn Property>] {
        &self.properties
    }

    #[inline]
    pub fn properties_mut(&mut self) -> &mut [Box<dyn Property>] {
        &mut self.properties
    }

    /// Properties whose content is a `T`.
    pub fn properties_of<T: Any>(&self) -> impl Iterator<Item = &(dyn Property + 'static)> {
        self.properties
            .iter()
            .map(|p| &**p)
            .filter(|p| p.content_type() == TypeId::of::<T>())
    }

    pub fn property<P: Property>(&self) -> Option<&P> {
        self.properties.iter().find_map(|p| p.downcast_ref::<P>())
    }

    pub fn property_mut<P: Property>(&mut self) -> Option<&mut P> {
        self.properties
            .iter_mut()
            .find_map(|p| p.downcast_mut::<P>())
    }

    /// Updates every active property.
    pub fn update(&mut self, dt: f32) {
        for property in self.properties.iter_mut().filter(|p| p.is_active()) {
            property.update(dt);
        }
    }

    /// Flags the entity for removal. It stays in the world until the next
    /// tick's update pass, which skips it and kills it.
    #[inline]
    pub fn set_dead(&mut self) {
        self.dead = true;
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Detaches every property. Only the first call has an effect.
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        self.dead = true;
        for mut property in self.properties.drain(..) {
            if let Err(e) = property.on_detach() {
                log::warn!("entity {}: {e}", self.id);
            }
        }
        log::debug!("entity {} killed", self.id);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("properties", &self.properties.len())
            .field("dead", &self.dead)
            .finish()
    }
}
