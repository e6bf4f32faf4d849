use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::device::GraphicsDevice;
use crate::error::EngineError;
use crate::logic::{Entity, Property};

use super::batch::Batch;

/// Live, shared view of one layer's batch list.
///
/// Clones alias the same list: a render-graph node holding a `LayerData` sees
/// batches registered after it was handed out.
#[derive(Clone, Default)]
pub struct LayerData(Arc<RwLock<Vec<Batch>>>);

impl LayerData {
    /// Snapshot of the batches, in registration order.
    pub fn batches(&self) -> Vec<Batch> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, batch: Batch) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch);
    }

    fn drain(&self) -> Vec<Batch> {
        std::mem::take(&mut *self.0.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PartialEq for LayerData {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for LayerData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LayerData").field(&self.len()).finish()
    }
}

/// Layer name → ordered batch list, plus the device batches come from.
pub struct SceneRegistry {
    device: Arc<dyn GraphicsDevice>,
    layers: Mutex<HashMap<String, LayerData>>,
}

impl SceneRegistry {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        Self {
            device,
            layers: Mutex::new(HashMap::new()),
        }
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    fn layers(&self) -> MutexGuard<'_, HashMap<String, LayerData>> {
        self.layers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Batch list of `name`, created empty if missing.
    pub fn layer_data(&self, name: &str) -> LayerData {
        self.layers().entry(name.to_string()).or_default().clone()
    }

    /// Sorted layer names.
    pub fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.layers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Places a drawable property into a batch of its layer.
    ///
    /// Existing batches with the same static flag are tried in order; if none
    /// accepts, a fresh batch is requested from the device. Returns `false`
    /// for properties without render data.
    pub fn register_property(&self, property: &mut dyn Property) -> Result<bool, EngineError> {
        let Some(data) = property.render_data() else {
            return Ok(false);
        };
        let layer = data.layer.clone();
        let attributes = data.attributes().to_vec();
        let is_static = data.is_static;

        let layer_data = self.layer_data(&layer);
        for batch in layer_data.batches() {
            if batch.is_static() == is_static && batch.accept(property) {
                return Ok(true);
            }
        }

        let batch = self
            .device
            .gen_batch(is_static, &attributes)
            .ok_or_else(|| {
                EngineError::config(format!(
                    "device cannot batch vertex layout {attributes:?}: {}",
                    self.device.take_log()
                ))
            })?;

        if !batch.accept(property) {
            self.device.destroy_batch(&batch);
            return Err(EngineError::config(format!(
                "drawable does not fit an empty batch on layer `{layer}`"
            )));
        }

        log::debug!("layer `{layer}`: new batch {:?}", batch.id());
        layer_data.push(batch);
        Ok(true)
    }

    /// Registers every drawable property of `entity`; returns how many.
    pub fn register_entity_for_rendering(&self, entity: &mut Entity) -> Result<usize, EngineError> {
        let mut registered = 0;
        for property in entity.properties_mut() {
            if self.register_property(&mut **property)? {
                registered += 1;
            }
        }
        Ok(registered)
    }

    /// Destroys every batch. Layer handles stay valid and become empty.
    pub fn clear(&self) {
        let layers: Vec<LayerData> = self.layers().values().cloned().collect();
        for layer in layers {
            for batch in layer.drain() {
                self.device.destroy_batch(&batch);
            }
        }
    }
}

impl std::fmt::Debug for SceneRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneRegistry")
            .field("layers", &self.layer_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::logic::{EntityId, ValueProperty};
    use crate::math::Vec2;
    use crate::props::SpriteProperty;
    use crate::render::RenderData;

    fn registry(vertices_per_batch: usize) -> SceneRegistry {
        SceneRegistry::new(Arc::new(
            HeadlessDevice::new().with_batch_vertices(vertices_per_batch),
        ))
    }

    #[test]
    fn layer_handle_aliases_later_registrations() {
        let scene = registry(64);
        let layer = scene.layer_data("default");
        assert!(layer.is_empty());

        let mut sprite = SpriteProperty::new(Vec2::splat(1.0));
        assert!(scene.register_property(&mut sprite).unwrap());
        assert_eq!(layer.len(), 1);
        assert_eq!(layer, scene.layer_data("default"));
    }

    #[test]
    fn full_batch_opens_a_new_one() {
        let scene = registry(4);
        let mut a = SpriteProperty::new(Vec2::splat(1.0));
        let mut b = SpriteProperty::new(Vec2::splat(1.0));
        scene.register_property(&mut a).unwrap();
        scene.register_property(&mut b).unwrap();
        assert_eq!(scene.layer_data("default").len(), 2);
    }

    #[test]
    fn first_accepting_batch_wins() {
        let scene = registry(8);
        let mut sprites: Vec<_> = (0..2).map(|_| SpriteProperty::new(Vec2::splat(1.0))).collect();
        for s in &mut sprites {
            scene.register_property(s).unwrap();
        }
        let layer = scene.layer_data("default");
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.batches()[0].len(), 2);
    }

    #[test]
    fn layers_and_static_flag_separate_batches() {
        let scene = registry(64);
        let mut ui = SpriteProperty::new(Vec2::splat(1.0)).with_layer("ui");
        let mut fixed = SpriteProperty::new(Vec2::splat(1.0)).with_static(true);
        let mut moving = SpriteProperty::new(Vec2::splat(1.0));
        scene.register_property(&mut ui).unwrap();
        scene.register_property(&mut fixed).unwrap();
        scene.register_property(&mut moving).unwrap();

        assert_eq!(scene.layer_names(), vec!["default".to_string(), "ui".to_string()]);
        assert_eq!(scene.layer_data("default").len(), 2);
    }

    #[test]
    fn unbatchable_layout_is_a_config_error() {
        let scene = registry(64);
        let mut empty = ValueProperty::new(RenderData::new(0));
        let err = scene.register_property(&mut empty).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn entity_registration_counts_drawables() {
        let scene = registry(64);
        let mut entity = Entity::new(
            EntityId(1),
            vec![
                Box::new(SpriteProperty::new(Vec2::splat(1.0))),
                Box::new(ValueProperty::new(5u32)),
                Box::new(SpriteProperty::new(Vec2::splat(2.0))),
            ],
        )
        .unwrap();
        assert_eq!(scene.register_entity_for_rendering(&mut entity).unwrap(), 2);
    }

    #[test]
    fn clear_destroys_batches() {
        let scene = registry(64);
        let mut sprite = SpriteProperty::new(Vec2::splat(1.0));
        scene.register_property(&mut sprite).unwrap();
        let batch = scene.layer_data("default").batches()[0].clone();

        scene.clear();
        assert!(batch.is_destroyed());
        assert!(scene.layer_data("default").is_empty());
    }
}
