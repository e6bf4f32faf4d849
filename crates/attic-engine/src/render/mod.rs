//! Batched drawing.
//!
//! Drawable properties are packed into [`Batch`]es per layer by the
//! [`SceneRegistry`]; a [`Renderer`] evaluates the installed
//! [`graph::RenderPath`] each frame to turn those layers into draw calls.

mod attribute;
mod batch;
mod buffer;
mod data;
pub mod graph;
mod renderer;
mod scene;

pub use attribute::{AttributeSet, ElementType, MAX_TEX_COORDS, VertexAttribute, vertex_size};
pub use batch::{Batch, BatchId, BatchStorage, MemoryStorage, SharedMemory};
pub use buffer::{GeometryBuffer, SegmentId, SegmentInfo, SegmentState, VertexStorage};
pub use data::{AttributeValues, DEFAULT_LAYER, RenderData};
pub use renderer::Renderer;
pub use scene::{LayerData, SceneRegistry};
