//! Built-in properties.

mod sprite;
mod transform;

pub use sprite::SpriteProperty;
pub use transform::{TransformProperty, TransformRef};
