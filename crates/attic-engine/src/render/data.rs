use crate::error::EngineError;
use crate::math::{Color, Matrix33, Vec2};

use super::attribute::{AttributeSet, VertexAttribute, vertex_size};

/// Layer used when a drawable does not name one.
pub const DEFAULT_LAYER: &str = "default";

/// Per-vertex values for one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValues {
    /// Two floats per vertex (`Position`, `TexCoord`).
    Vec2(Vec<Vec2>),
    /// Four normalized bytes per vertex (`Color`).
    Color(Vec<Color>),
}

impl AttributeValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Vec2(v) => v.len(),
            Self::Color(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fits(&self, attr: VertexAttribute) -> bool {
        matches!(
            (self, attr),
            (Self::Vec2(_), VertexAttribute::Position | VertexAttribute::TexCoord(_))
                | (Self::Color(_), VertexAttribute::Color)
        )
    }
}

/// Drawable payload produced by a property and consumed by batches.
///
/// Positions are stored in local space and transformed by `transform` when a
/// batch serializes them.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderData {
    pub layer: String,
    pub is_static: bool,
    pub transform: Matrix33,
    attributes: Vec<VertexAttribute>,
    values: Vec<AttributeValues>,
    indices: Vec<u32>,
    vertex_count: usize,
}

impl RenderData {
    pub fn new(vertex_count: usize) -> Self {
        Self {
            layer: DEFAULT_LAYER.to_string(),
            is_static: false,
            transform: Matrix33::IDENTITY,
            attributes: Vec::new(),
            values: Vec::new(),
            indices: Vec::new(),
            vertex_count,
        }
    }

    /// Centered `size` quad with a flat color and texture coordinate set 0.
    pub fn quad(size: Vec2, color: Color) -> Self {
        let (hw, hh) = (size.x * 0.5, size.y * 0.5);
        Self {
            attributes: vec![
                VertexAttribute::Position,
                VertexAttribute::Color,
                VertexAttribute::TexCoord(0),
            ],
            values: vec![
                AttributeValues::Vec2(vec![
                    Vec2::new(-hw, -hh),
                    Vec2::new(hw, -hh),
                    Vec2::new(hw, hh),
                    Vec2::new(-hw, hh),
                ]),
                AttributeValues::Color(vec![color; 4]),
                AttributeValues::Vec2(vec![
                    Vec2::new(0.0, 1.0),
                    Vec2::new(1.0, 1.0),
                    Vec2::new(1.0, 0.0),
                    Vec2::new(0.0, 0.0),
                ]),
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
            ..Self::new(4)
        }
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    /// Sets the values of `attr`, declaring the attribute if it is new.
    pub fn set_attribute(
        &mut self,
        attr: VertexAttribute,
        values: AttributeValues,
    ) -> Result<(), EngineError> {
        if !attr.is_valid() {
            return Err(EngineError::config(format!("invalid vertex attribute {attr}")));
        }
        if !values.fits(attr) {
            return Err(EngineError::config(format!(
                "value kind does not match vertex attribute {attr}"
            )));
        }
        if values.len() != self.vertex_count {
            return Err(EngineError::config(format!(
                "{attr}: expected {} values, got {}",
                self.vertex_count,
                values.len()
            )));
        }

        match self.attributes.iter().position(|a| *a == attr) {
            Some(i) => self.values[i] = values,
            None => {
                self.attributes.push(attr);
                self.values.push(values);
            }
        }
        Ok(())
    }

    pub fn set_indices(&mut self, indices: Vec<u32>) -> Result<(), EngineError> {
        if let Some(bad) = indices.iter().find(|i| **i as usize >= self.vertex_count) {
            return Err(EngineError::config(format!(
                "index {bad} out of range for {} vertices",
                self.vertex_count
            )));
        }
        self.indices = indices;
        Ok(())
    }

    #[inline]
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    #[inline]
    pub fn attribute_set(&self) -> AttributeSet {
        AttributeSet::from_attributes(&self.attributes)
    }

    pub fn values(&self, attr: VertexAttribute) -> Option<&AttributeValues> {
        let i = self.attributes.iter().position(|a| *a == attr)?;
        self.values.get(i)
    }

    pub(crate) fn values_mut(&mut self, attr: VertexAttribute) -> Option<&mut AttributeValues> {
        let i = self.attributes.iter().position(|a| *a == attr)?;
        self.values.get_mut(i)
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Serialized size for `layout`.
    #[inline]
    pub fn byte_len(&self, layout: &[VertexAttribute]) -> usize {
        vertex_size(layout) * self.vertex_count
    }

    /// Appends every vertex to `out`, attributes interleaved in `layout` order.
    pub fn serialize(&self, layout: &[VertexAttribute], out: &mut Vec<u8>) -> Result<(), EngineError> {
        let columns = layout
            .iter()
            .map(|attr| {
                self.values(*attr)
                    .map(|v| (*attr, v))
                    .ok_or_else(|| EngineError::config(format!("render data has no {attr} values")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        out.reserve(self.byte_len(layout));
        for vertex in 0..self.vertex_count {
            for (attr, values) in &columns {
                match values {
                    AttributeValues::Vec2(v) => {
                        let mut p = v[vertex];
                        if *attr == VertexAttribute::Position {
                            p = self.transform.transform_point(p);
                        }
                        out.extend_from_slice(bytemuck::bytes_of(&p));
                    }
                    AttributeValues::Color(c) => out.extend_from_slice(&c[vertex].to_rgba8()),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> RenderData {
        let mut data = RenderData::new(3);
        data.set_attribute(
            VertexAttribute::Position,
            AttributeValues::Vec2(vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(0.0, 1.0),
            ]),
        )
        .unwrap();
        data.set_attribute(
            VertexAttribute::Color,
            AttributeValues::Color(vec![Color::WHITE; 3]),
        )
        .unwrap();
        data.set_indices(vec![0, 1, 2]).unwrap();
        data
    }

    #[test]
    fn defaults() {
        let data = RenderData::new(0);
        assert_eq!(data.layer, DEFAULT_LAYER);
        assert!(!data.is_static);
        assert_eq!(data.transform, Matrix33::IDENTITY);
    }

    #[test]
    fn quad_is_centered() {
        let quad = RenderData::quad(Vec2::new(4.0, 2.0), Color::WHITE);
        assert_eq!(quad.vertex_count(), 4);
        assert_eq!(quad.indices(), &[0, 1, 2, 2, 3, 0]);
        assert_eq!(
            quad.values(VertexAttribute::Position),
            Some(&AttributeValues::Vec2(vec![
                Vec2::new(-2.0, -1.0),
                Vec2::new(2.0, -1.0),
                Vec2::new(2.0, 1.0),
                Vec2::new(-2.0, 1.0),
            ]))
        );
        assert_eq!(quad.byte_len(quad.attributes()), 4 * 20);
    }

    #[test]
    fn rejects_wrong_value_kind() {
        let mut data = RenderData::new(1);
        let err = data
            .set_attribute(VertexAttribute::Color, AttributeValues::Vec2(vec![Vec2::zero()]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn rejects_wrong_count() {
        let mut data = RenderData::new(2);
        assert!(
            data.set_attribute(VertexAttribute::Position, AttributeValues::Vec2(vec![Vec2::zero()]))
                .is_err()
        );
    }

    #[test]
    fn rejects_out_of_range_index() {
        let mut data = RenderData::new(2);
        assert!(data.set_indices(vec![0, 2]).is_err());
    }

    #[test]
    fn serializes_in_layout_order() {
        let data = triangle();
        let layout = [VertexAttribute::Color, VertexAttribute::Position];
        let mut out = Vec::new();
        data.serialize(&layout, &mut out).unwrap();

        assert_eq!(out.len(), 3 * 12);
        assert_eq!(&out[..4], &[255, 255, 255, 255]);
        // Second vertex position follows its color.
        assert_eq!(&out[16..20], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn serialize_applies_transform_to_positions() {
        let mut data = triangle();
        data.transform = Matrix33::translation(10.0, 20.0);
        let mut out = Vec::new();
        data.serialize(&[VertexAttribute::Position], &mut out).unwrap();

        let x = f32::from_ne_bytes(out[0..4].try_into().unwrap());
        let y = f32::from_ne_bytes(out[4..8].try_into().unwrap());
        assert_eq!((x, y), (10.0, 20.0));
    }

    #[test]
    fn serialize_missing_attribute_fails() {
        let data = triangle();
        let mut out = Vec::new();
        assert!(data.serialize(&[VertexAttribute::TexCoord(0)], &mut out).is_err());
    }
}
