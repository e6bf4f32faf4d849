//! Math primitives used by the scene model and the renderer.
//!
//! Conventions:
//! - 2D, +X right, +Y down (world units are logical pixels)
//! - `Matrix33` is row-major and acts on column vectors (`M * p`)
//! - rotation angles are in degrees

mod color;
mod matrix;
mod vec2;

pub use color::Color;
pub use matrix::Matrix33;
pub use vec2::Vec2;
