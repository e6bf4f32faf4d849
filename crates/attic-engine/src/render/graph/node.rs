use std::collections::HashMap;

use crate::device::GraphicsDevice;
use crate::error::EngineError;

use super::value::{FromValue, Value};

/// Index of a node inside its render path.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Output slot of a node, resolved from its name once at wiring time.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OutputId(pub usize);

/// Source of a node input.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Constant.
    Value(Value),
    /// Another node's output.
    Link { node: NodeId, output: OutputId },
}

/// Unit of the render graph.
///
/// Nodes declare which inputs they take and which outputs they produce.
/// `produce` runs at most once per frame; its result is cached by the path
/// until the next `prepare`.
pub trait Node: Send {
    fn name(&self) -> &str;

    fn accepts_input(&self, name: &str) -> bool;

    fn output_id(&self, name: &str) -> Option<OutputId>;

    /// Start-of-frame hook.
    fn prepare(&mut self) {}

    /// Computes every output, indexed by [`OutputId`].
    ///
    /// Returning [`EngineError::UpstreamFailed`] turns all outputs into
    /// [`Value::Invalid`]; any other error aborts the frame.
    fn produce(&mut self, ctx: &mut EvalCtx<'_>) -> Result<Vec<Value>, EngineError>;
}

pub(crate) struct NodeSlot {
    pub(crate) node: Option<Box<dyn Node>>,
    pub(crate) inputs: HashMap<String, Input>,
    cache: Option<Vec<Value>>,
    dirty: bool,
}

impl NodeSlot {
    pub(crate) fn new(node: Box<dyn Node>) -> Self {
        Self {
            node: Some(node),
            inputs: HashMap::new(),
            cache: None,
            dirty: true,
        }
    }

    pub(crate) fn prepare(&mut self) {
        self.dirty = true;
        if let Some(node) = self.node.as_mut() {
            node.prepare();
        }
    }

    pub(crate) fn node_name(&self) -> &str {
        self.node.as_deref().map_or("<evaluating>", |n| n.name())
    }
}

/// Runs `id` if it is dirty, caching its outputs.
pub(crate) fn evaluate(
    slots: &mut [NodeSlot],
    device: &dyn GraphicsDevice,
    id: NodeId,
) -> Result<(), EngineError> {
    let slot = slots
        .get_mut(id.0)
        .ok_or_else(|| EngineError::config(format!("no node {}", id.0)))?;
    if !slot.dirty {
        return Ok(());
    }

    // A missing node means it is already on the evaluation stack.
    let mut node = slot.node.take().ok_or(EngineError::Cycle)?;
    let inputs = std::mem::take(&mut slot.inputs);

    let result = {
        let mut ctx = EvalCtx {
            slots: &mut *slots,
            device,
            inputs: &inputs,
        };
        node.produce(&mut ctx)
    };

    let slot = &mut slots[id.0];
    let name = node.name().to_string();
    slot.node = Some(node);
    slot.inputs = inputs;

    let outputs = match result {
        Ok(outputs) => outputs,
        Err(EngineError::UpstreamFailed(input)) => {
            log::debug!("node `{name}`: input `{input}` failed upstream");
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    slot.cache = Some(outputs);
    slot.dirty = false;
    Ok(())
}

/// Output `output` of node `id`, evaluating it first if needed.
pub(crate) fn output(
    slots: &mut [NodeSlot],
    device: &dyn GraphicsDevice,
    id: NodeId,
    output: OutputId,
) -> Result<Value, EngineError> {
    evaluate(slots, device, id)?;
    Ok(slots[id.0]
        .cache
        .as_ref()
        .and_then(|outputs| outputs.get(output.0))
        .cloned()
        .unwrap_or(Value::Invalid))
}

/// What a node sees while producing: its inputs and the device.
pub struct EvalCtx<'a> {
    slots: &'a mut [NodeSlot],
    device: &'a dyn GraphicsDevice,
    inputs: &'a HashMap<String, Input>,
}

impl<'a> EvalCtx<'a> {
    #[inline]
    pub fn device(&self) -> &'a dyn GraphicsDevice {
        self.device
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
    }

    /// Names of the inputs that were set.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    /// Raw value of `name`, pulling upstream nodes as needed.
    pub fn input_value(&mut self, name: &str) -> Result<Value, EngineError> {
        match self.inputs.get(name) {
            None => Err(EngineError::UnknownInput(name.to_string())),
            Some(Input::Value(v)) => Ok(v.clone()),
            Some(Input::Link { node, output: out }) => {
                output(self.slots, self.device, *node, *out)
            }
        }
    }

    /// Typed value of `name`.
    ///
    /// An invalid upstream value is reported as
    /// [`EngineError::UpstreamFailed`]; a value of another type as
    /// [`EngineError::TypeMismatch`].
    pub fn input<T: FromValue>(&mut self, name: &str) -> Result<T, EngineError> {
        let value = self.input_value(name)?;
        if value.is_invalid() {
            return Err(EngineError::UpstreamFailed(name.to_string()));
        }
        T::from_value(&value).ok_or(EngineError::TypeMismatch {
            expected: T::KIND.name(),
            found: value.kind().name(),
        })
    }

    /// Like [`input`](Self::input), but `None` when the input was never set.
    pub fn optional_input<T: FromValue>(&mut self, name: &str) -> Result<Option<T>, EngineError> {
        if !self.has_input(name) {
            return Ok(None);
        }
        self.input(name).map(Some)
    }
}
