use std::any::Any;

use crate::logic::{Property, PropertyCore};
use crate::math::{Color, Matrix33, Vec2};
use crate::render::{AttributeValues, RenderData, VertexAttribute};

use super::transform::TransformRef;

/// Flat-colored, textured quad.
///
/// Vertex layout is `Position, Color, TexCoord(0)`. A sprite either carries
/// its own transform or follows a [`TransformProperty`](super::TransformProperty)
/// through its handle, re-serializing when that transform changes.
#[derive(Debug)]
pub struct SpriteProperty {
    core: PropertyCore,
    data: RenderData,
    size: Vec2,
    tint: Color,
    follow: Option<TransformRef>,
    seen_revision: Option<u64>,
}

impl SpriteProperty {
    pub fn new(size: Vec2) -> Self {
        Self {
            core: PropertyCore::default(),
            data: RenderData::quad(size, Color::WHITE),
            size,
            tint: Color::WHITE,
            follow: None,
            seen_revision: None,
        }
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.data.layer = layer.into();
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.data.is_static = is_static;
        self
    }

    pub fn with_tint(mut self, tint: Color) -> Self {
        self.tint = tint;
        self.write_tint();
        self
    }

    /// Follows `transform` instead of an own matrix.
    pub fn following(mut self, transform: TransformRef) -> Self {
        self.follow(transform);
        self
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.size
    }

    #[inline]
    pub fn tint(&self) -> Color {
        self.tint
    }

    #[inline]
    pub fn render_data(&self) -> &RenderData {
        &self.data
    }

    pub fn set_tint(&mut self, tint: Color) {
        self.tint = tint;
        self.write_tint();
        (self as &mut dyn Property).notify_changed();
    }

    pub fn set_size(&mut self, size: Vec2) {
        self.size = size;
        let positions = RenderData::quad(size, self.tint);
        if let (Some(dst), Some(src)) = (
            self.data.values_mut(VertexAttribute::Position),
            positions.values(VertexAttribute::Position),
        ) {
            *dst = src.clone();
        }
        (self as &mut dyn Property).notify_changed();
    }

    /// Sets the matrix applied to the quad; stops following.
    pub fn set_transform(&mut self, transform: Matrix33) {
        self.follow = None;
        self.seen_revision = None;
        self.data.transform = transform;
        (self as &mut dyn Property).notify_changed();
    }

    pub fn follow(&mut self, transform: TransformRef) {
        self.seen_revision = transform.revision();
        if let Some(world) = transform.world() {
            self.data.transform = world;
        }
        self.follow = Some(transform);
        (self as &mut dyn Property).notify_changed();
    }

    fn write_tint(&mut self) {
        if let Some(AttributeValues::Color(colors)) = self.data.values_mut(VertexAttribute::Color) {
            colors.iter_mut().for_each(|c| *c = self.tint);
        }
    }
}

impl Property for SpriteProperty {
    fn core(&self) -> &PropertyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PropertyCore {
        &mut self.core
    }

    fn value(&self) -> &dyn Any {
        &self.data
    }

    fn update(&mut self, _dt: f32) {
        let Some(follow) = &self.follow else {
            return;
        };
        let revision = follow.revision();
        if revision == self.seen_revision {
            return;
        }
        self.seen_revision = revision;
        if let Some(world) = follow.world() {
            self.data.transform = world;
            (self as &mut dyn Property).notify_changed();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::logic::PropertyEvent;
    use crate::logic::property::tests::Recorder;
    use crate::props::TransformProperty;
    use crate::render::{Batch, MemoryStorage};

    fn layout() -> Vec<VertexAttribute> {
        vec![
            VertexAttribute::Position,
            VertexAttribute::Color,
            VertexAttribute::TexCoord(0),
        ]
    }

    #[test]
    fn content_is_render_data() {
        let sprite = SpriteProperty::new(Vec2::splat(2.0)).with_layer("ui");
        let p: &dyn Property = &sprite;
        let data = p.render_data().unwrap();
        assert_eq!(data.layer, "ui");
        assert_eq!(data.attributes(), layout().as_slice());
    }

    #[test]
    fn tint_reaches_every_vertex() {
        let mut sprite = SpriteProperty::new(Vec2::splat(1.0));
        let red = Color::rgb(1.0, 0.0, 0.0);
        sprite.set_tint(red);
        assert_eq!(
            sprite.render_data().values(VertexAttribute::Color),
            Some(&AttributeValues::Color(vec![red; 4]))
        );
    }

    #[test]
    fn set_size_keeps_tint() {
        let mut sprite = SpriteProperty::new(Vec2::splat(1.0)).with_tint(Color::BLACK);
        sprite.set_size(Vec2::new(4.0, 2.0));
        assert_eq!(sprite.size(), Vec2::new(4.0, 2.0));
        assert_eq!(
            sprite.render_data().values(VertexAttribute::Color),
            Some(&AttributeValues::Color(vec![Color::BLACK; 4]))
        );
    }

    #[test]
    fn follows_transform_changes_on_update() {
        let mut transform = TransformProperty::new(Vec2::new(1.0, 1.0));
        let mut sprite = SpriteProperty::new(Vec2::splat(1.0)).following(transform.handle());
        let rec = Arc::new(Recorder::default());
        (&mut sprite as &mut dyn Property).add_listener(rec.clone());

        sprite.update(0.016);
        assert_eq!(rec.events().len(), 1);

        transform.set_position(Vec2::new(3.0, 0.0));
        sprite.update(0.016);
        assert_eq!(rec.events(), vec![PropertyEvent::Changed; 2]);
        assert_eq!(sprite.render_data().transform, transform.matrix());
    }

    #[test]
    fn batch_sees_resized_sprite() {
        let batch = Batch::new(false, &layout(), 1024, Box::new(MemoryStorage::default()));
        let mut sprite = SpriteProperty::new(Vec2::splat(1.0));
        assert!(batch.accept(&mut sprite));
        assert_eq!(batch.indices(), vec![0, 1, 2, 2, 3, 0]);

        sprite.set_size(Vec2::splat(3.0));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.free_bytes(), 1024 - 4 * 20);
    }
}
