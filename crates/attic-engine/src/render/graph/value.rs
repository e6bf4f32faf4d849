use crate::device::{ShaderHandle, TextureHandle};
use crate::math::{Color, Matrix33, Vec2};
use crate::render::LayerData;

/// Value flowing along render-graph edges.
///
/// `Invalid` is the failure sentinel: a node that cannot do its work outputs
/// it, and consumers propagate it instead of drawing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Double(f64),
    Vector(Vec2),
    Matrix(Matrix33),
    Color(Color),
    Texture(TextureHandle),
    Shader(ShaderHandle),
    Layer(LayerData),
    Invalid,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ValueKind {
    Int,
    Double,
    Vector,
    Matrix,
    Color,
    Texture,
    Shader,
    Layer,
    Invalid,
}

impl ValueKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Double => "double",
            Self::Vector => "vector",
            Self::Matrix => "matrix",
            Self::Color => "color",
            Self::Texture => "texture",
            Self::Shader => "shader",
            Self::Layer => "layer",
            Self::Invalid => "invalid",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Double(_) => ValueKind::Double,
            Self::Vector(_) => ValueKind::Vector,
            Self::Matrix(_) => ValueKind::Matrix,
            Self::Color(_) => ValueKind::Color,
            Self::Texture(_) => ValueKind::Texture,
            Self::Shader(_) => ValueKind::Shader,
            Self::Layer(_) => ValueKind::Layer,
            Self::Invalid => ValueKind::Invalid,
        }
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }
}

/// Typed extraction from a [`Value`].
pub trait FromValue: Sized {
    const KIND: ValueKind;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const KIND: ValueKind = ValueKind::$variant;

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_conversions! {
    i32 => Int,
    f64 => Double,
    Vec2 => Vector,
    Matrix33 => Matrix,
    Color => Color,
    TextureHandle => Texture,
    ShaderHandle => Shader,
    LayerData => Layer,
}
