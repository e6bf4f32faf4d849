use std::fmt;

/// Primitive element type of a vertex attribute.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ElementType {
    Float,
    Integer,
    Short,
    Byte,
}

impl ElementType {
    /// Size of one element in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Float | Self::Integer => 4,
            Self::Short => 2,
            Self::Byte => 1,
        }
    }
}

/// Number of texture coordinate channels a vertex layout may declare.
pub const MAX_TEX_COORDS: u8 = 10;

/// Vertex attribute kinds understood by batches and devices.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VertexAttribute {
    /// 2 × Float.
    Position,
    /// 4 × Byte, normalized.
    Color,
    /// 2 × Float, channel `0..MAX_TEX_COORDS`.
    TexCoord(u8),
}

impl VertexAttribute {
    #[inline]
    pub const fn element_type(self) -> ElementType {
        match self {
            Self::Position | Self::TexCoord(_) => ElementType::Float,
            Self::Color => ElementType::Byte,
        }
    }

    #[inline]
    pub const fn element_count(self) -> usize {
        match self {
            Self::Position | Self::TexCoord(_) => 2,
            Self::Color => 4,
        }
    }

    /// Bytes one vertex spends on this attribute.
    #[inline]
    pub const fn byte_size(self) -> usize {
        self.element_type().size() * self.element_count()
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        match self {
            Self::TexCoord(channel) => channel < MAX_TEX_COORDS,
            _ => true,
        }
    }

    const fn bit(self) -> u32 {
        match self {
            Self::Position => 1,
            Self::Color => 1 << 1,
            Self::TexCoord(channel) => 1 << (2 + (channel as u32 % 30)),
        }
    }
}

impl fmt::Display for VertexAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position => f.write_str("POSITION"),
            Self::Color => f.write_str("COLOR"),
            Self::TexCoord(channel) => write!(f, "TEX_COORD_{channel}"),
        }
    }
}

/// Order-independent set of vertex attributes.
///
/// Batches compare layouts with set equality; declaration order only matters
/// for serialization.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct AttributeSet(u32);

impl AttributeSet {
    pub fn from_attributes(attributes: &[VertexAttribute]) -> Self {
        attributes
            .iter()
            .fold(Self::default(), |set, attr| set.with(*attr))
    }

    #[inline]
    pub const fn with(self, attr: VertexAttribute) -> Self {
        Self(self.0 | attr.bit())
    }

    #[inline]
    pub const fn contains(self, attr: VertexAttribute) -> bool {
        self.0 & attr.bit() != 0
    }

    #[inline]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Sum of the attribute byte sizes, i.e. the stride of one serialized vertex.
pub fn vertex_size(attributes: &[VertexAttribute]) -> usize {
    attributes.iter().map(|a| a.byte_size()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes() {
        assert_eq!(ElementType::Float.size(), 4);
        assert_eq!(ElementType::Integer.size(), 4);
        assert_eq!(ElementType::Short.size(), 2);
        assert_eq!(ElementType::Byte.size(), 1);
    }

    #[test]
    fn sprite_layout_stride() {
        let layout = [
            VertexAttribute::Position,
            VertexAttribute::Color,
            VertexAttribute::TexCoord(0),
        ];
        assert_eq!(vertex_size(&layout), 8 + 4 + 8);
    }

    #[test]
    fn set_equality_ignores_order() {
        let a = AttributeSet::from_attributes(&[VertexAttribute::Position, VertexAttribute::Color]);
        let b = AttributeSet::from_attributes(&[VertexAttribute::Color, VertexAttribute::Position]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn tex_coord_channels_are_distinct() {
        let a = AttributeSet::from_attributes(&[VertexAttribute::TexCoord(0)]);
        let b = AttributeSet::from_attributes(&[VertexAttribute::TexCoord(1)]);
        assert_ne!(a, b);
        assert!(!VertexAttribute::TexCoord(MAX_TEX_COORDS).is_valid());
    }
}
