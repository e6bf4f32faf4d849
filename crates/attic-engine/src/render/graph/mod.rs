//! Pull-based render graph.
//!
//! A [`RenderPath`] is a fixed wiring of [`Node`]s. Each frame starts with
//! [`RenderPath::prepare`]; pulling the root output then evaluates upstream
//! nodes on demand, each at most once per frame.

mod clear;
mod layer;
mod node;
mod path;
mod value;

pub use clear::ClearNode;
pub use layer::RenderLayerNode;
pub use node::{EvalCtx, Input, Node, NodeId, OutputId};
pub use path::{RenderPath, RenderPathBuilder};
pub use value::{FromValue, Value, ValueKind};
