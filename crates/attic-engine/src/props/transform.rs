use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::error::EngineError;
use crate::logic::{Property, PropertyCore};
use crate::math::{Matrix33, Vec2};

/// Published state of a transform, readable through [`TransformRef`].
#[derive(Debug)]
struct TransformNode {
    world: RwLock<Matrix33>,
    revision: AtomicU64,
    parent: RwLock<Option<Weak<TransformNode>>>,
}

impl TransformNode {
    fn world(&self) -> Matrix33 {
        *self.world.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn parent(&self) -> Option<Arc<TransformNode>> {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

/// Non-owning handle to a [`TransformProperty`].
///
/// Holding one does not keep the transform alive; a dropped transform reads
/// as `None`.
#[derive(Debug, Clone)]
pub struct TransformRef(Weak<TransformNode>);

impl TransformRef {
    /// World matrix as of the transform's last change.
    pub fn world(&self) -> Option<Matrix33> {
        self.0.upgrade().map(|n| n.world())
    }

    /// Counter bumped on every change.
    pub fn revision(&self) -> Option<u64> {
        self.0.upgrade().map(|n| n.revision.load(Ordering::Acquire))
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// Position, rotation (degrees) and uniform scale, optionally relative to a
/// parent transform.
///
/// The content is the world matrix `parent × T·R·S`. A parent change is picked
/// up on the next update.
#[derive(Debug)]
pub struct TransformProperty {
    core: PropertyCore,
    position: Vec2,
    rotation: f32,
    scale: f32,
    world: Matrix33,
    node: Arc<TransformNode>,
    parent: Option<TransformRef>,
    parent_revision: Option<u64>,
}

impl Default for TransformProperty {
    fn default() -> Self {
        Self::new(Vec2::zero())
    }
}

impl TransformProperty {
    pub fn new(position: Vec2) -> Self {
        let world = Matrix33::translation(position.x, position.y);
        Self {
            core: PropertyCore::default(),
            position,
            rotation: 0.0,
            scale: 1.0,
            world,
            node: Arc::new(TransformNode {
                world: RwLock::new(world),
                revision: AtomicU64::new(0),
                parent: RwLock::new(None),
            }),
            parent: None,
            parent_revision: None,
        }
    }

    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation = degrees;
        self.recompute();
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self.recompute();
        self
    }

    /// Handle for children and followers.
    pub fn handle(&self) -> TransformRef {
        TransformRef(Arc::downgrade(&self.node))
    }

    #[inline]
    pub fn position(&self) -> Vec2 {
        self.position
    }

    #[inline]
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    #[inline]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Local matrix `T·R·S`.
    pub fn local(&self) -> Matrix33 {
        Matrix33::from_trs(self.position, self.rotation, self.scale)
    }

    /// World matrix.
    #[inline]
    pub fn matrix(&self) -> Matrix33 {
        self.world
    }

    pub fn parent(&self) -> Option<&TransformRef> {
        self.parent.as_ref()
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.position = position;
        self.changed();
    }

    pub fn move_by(&mut self, delta: Vec2) {
        self.set_position(self.position + delta);
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.rotation = degrees;
        self.changed();
    }

    pub fn rotate_by(&mut self, degrees: f32) {
        self.set_rotation(self.rotation + degrees);
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
        self.changed();
    }

    pub fn scale_by(&mut self, factor: f32) {
        self.set_scale(self.scale * factor);
    }

    /// Makes this transform relative to `parent`, or absolute with `None`.
    ///
    /// Parenting to itself, or to one of its own descendants, is an error.
    pub fn set_parent(&mut self, parent: Option<TransformRef>) -> Result<(), EngineError> {
        if let Some(candidate) = &parent {
            let mut cursor = candidate.0.upgrade();
            while let Some(node) = cursor {
                if Arc::ptr_eq(&node, &self.node) {
                    return Err(EngineError::config(
                        "a transform cannot be its own ancestor",
                    ));
                }
                cursor = node.parent();
            }
        }

        *self
            .node
            .parent
            .write()
            .unwrap_or_else(PoisonError::into_inner) = parent.as_ref().map(|p| p.0.clone());
        self.parent_revision = parent.as_ref().and_then(TransformRef::revision);
        self.parent = parent;
        self.changed();
        Ok(())
    }

    /// Recomputes the world matrix and fires `Changed`.
    pub fn notify_changed(&mut self) {
        self.changed();
    }

    fn recompute(&mut self) {
        let local = self.local();
        self.world = match self.parent.as_ref().and_then(TransformRef::world) {
            Some(parent) => parent * local,
            None => local,
        };
        *self
            .node
            .world
            .write()
            .unwrap_or_else(PoisonError::into_inner) = self.world;
        self.node.revision.fetch_add(1, Ordering::Release);
    }

    fn changed(&mut self) {
        self.recompute();
        (self as &mut dyn Property).notify_changed();
    }
}

impl Property for TransformProperty {
    fn core(&self) -> &PropertyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PropertyCore {
        &mut self.core
    }

    fn value(&self) -> &dyn Any {
        &self.world
    }

    fn update(&mut self, _dt: f32) {
        let Some(parent) = &self.parent else {
            return;
        };
        let revision = parent.revision();
        if revision != self.parent_revision {
            self.parent_revision = revision;
            self.changed();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::logic::PropertyEvent;
    use crate::logic::property::tests::Recorder;

    const EPS: f32 = 1e-5;

    #[test]
    fn world_is_translate_rotate_scale() {
        let t = TransformProperty::new(Vec2::new(10.0, 0.0))
            .with_rotation(90.0)
            .with_scale(2.0);
        let p = t.matrix().transform_point(Vec2::new(1.0, 0.0));
        assert!(p.approx_eq(Vec2::new(10.0, 2.0), EPS));
    }

    #[test]
    fn setters_fire_changed() {
        let mut t = TransformProperty::default();
        let rec = Arc::new(Recorder::default());
        (&mut t as &mut dyn Property).add_listener(rec.clone());

        t.move_by(Vec2::new(1.0, 1.0));
        t.rotate_by(45.0);
        assert_eq!(
            rec.events(),
            vec![PropertyEvent::Changed; 3]
        );
        assert_eq!(t.position(), Vec2::new(1.0, 1.0));
    }

    #[test]
    fn self_parent_is_rejected() {
        let mut t = TransformProperty::default();
        let own = t.handle();
        assert!(matches!(t.set_parent(Some(own)), Err(EngineError::Config(_))));
    }

    #[test]
    fn descendant_parent_is_rejected() {
        let mut root = TransformProperty::default();
        let mut child = TransformProperty::default();
        child.set_parent(Some(root.handle())).unwrap();
        assert!(root.set_parent(Some(child.handle())).is_err());
    }

    #[test]
    fn child_composes_with_parent() {
        let parent = TransformProperty::new(Vec2::new(5.0, 5.0));
        let mut child = TransformProperty::new(Vec2::new(1.0, 0.0));
        child.set_parent(Some(parent.handle())).unwrap();
        assert!(child.matrix().translation_part().approx_eq(Vec2::new(6.0, 5.0), EPS));
    }

    #[test]
    fn child_follows_parent_on_update() {
        let mut parent = TransformProperty::default();
        let mut child = TransformProperty::new(Vec2::new(1.0, 0.0));
        child.set_parent(Some(parent.handle())).unwrap();

        parent.set_position(Vec2::new(0.0, 3.0));
        assert!(child.matrix().translation_part().approx_eq(Vec2::new(1.0, 0.0), EPS));
        child.update(0.016);
        assert!(child.matrix().translation_part().approx_eq(Vec2::new(1.0, 3.0), EPS));
    }

    #[test]
    fn parent_is_not_kept_alive() {
        let parent = TransformProperty::default();
        let mut child = TransformProperty::new(Vec2::new(2.0, 0.0));
        child.set_parent(Some(parent.handle())).unwrap();
        drop(parent);

        child.update(0.016);
        assert!(!child.parent().unwrap().is_alive());
        assert!(child.matrix().translation_part().approx_eq(Vec2::new(2.0, 0.0), EPS));
    }
}
