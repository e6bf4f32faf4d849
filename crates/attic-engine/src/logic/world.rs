use std::sync::Arc;

use crate::error::EngineError;
use crate::render::SceneRegistry;

use super::entity::{Entity, EntityId};

/// Live entity collection, owned by the scheduler thread.
///
/// Tasks receive `&mut World`; it is the only way to reach entities while the
/// scheduler runs.
#[derive(Default)]
pub struct World {
    entities: Vec<Entity>,
    scene: Option<Arc<SceneRegistry>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// World whose entities are routed into `scene` when added.
    pub fn with_scene(scene: Arc<SceneRegistry>) -> Self {
        Self {
            entities: Vec::new(),
            scene: Some(scene),
        }
    }

    pub fn scene(&self) -> Option<&Arc<SceneRegistry>> {
        self.scene.as_ref()
    }

    /// Registers the entity's drawables with the scene, then makes it live.
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<(), EngineError> {
        if self.entity(entity.id()).is_some() {
            return Err(EngineError::config(format!(
                "entity {} is already live",
                entity.id()
            )));
        }
        if let Some(scene) = &self.scene {
            match scene.register_entity_for_rendering(&mut entity) {
                Ok(registered) => {
                    log::debug!("entity {}: {registered} drawable(s) registered", entity.id());
                }
                Err(e) => {
                    // Releases whatever was registered before the failure.
                    entity.kill();
                    return Err(e);
                }
            }
        }
        self.entities.push(entity);
        Ok(())
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut [Entity] {
        &mut self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id() == id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.id() == id)
    }

    /// Marks an entity dead; it is reaped on the next update.
    pub fn kill_entity(&mut self, id: EntityId) -> bool {
        match self.entity_mut(id) {
            Some(entity) => {
                entity.set_dead();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Updates living entities and reaps the ones marked dead.
    ///
    /// Dead entities are collected during the pass and killed after it, so
    /// the collection is never mutated mid-iteration.
    pub fn update(&mut self, dt: f32) {
        let mut reaped = Vec::new();
        for (index, entity) in self.entities.iter_mut().enumerate() {
            if entity.is_dead() {
                reaped.push(index);
            } else {
                entity.update(dt);
            }
        }

        for index in reaped.into_iter().rev() {
            let mut entity = self.entities.swap_remove(index);
            entity.kill();
        }
    }

    /// Kills every entity.
    pub fn clear(&mut self) {
        for mut entity in self.entities.drain(..) {
            entity.kill();
        }
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.len())
            .field("scene", &self.scene.is_some())
            .finish()
    }
}
