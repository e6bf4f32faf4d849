use std::collections::{HashMap, VecDeque};

use crate::device::{GraphicsDevice, TextureHandle};
use crate::error::EngineError;

use super::node::{self, Input, Node, NodeId, NodeSlot, OutputId};
use super::value::{FromValue, Value};

/// Wires nodes together and validates the result.
#[derive(Default)]
pub struct RenderPathBuilder {
    slots: Vec<NodeSlot>,
}

impl RenderPathBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node<N: Node + 'static>(&mut self, node: N) -> NodeId {
        self.slots.push(NodeSlot::new(Box::new(node)));
        NodeId(self.slots.len() - 1)
    }

    fn accepting_slot(&mut self, id: NodeId, input: &str) -> Result<&mut NodeSlot, EngineError> {
        let slot = self
            .slots
            .get_mut(id.0)
            .ok_or_else(|| EngineError::config(format!("no node {}", id.0)))?;
        let accepts = slot
            .node
            .as_deref()
            .is_some_and(|node| node.accepts_input(input));
        if accepts {
            Ok(slot)
        } else {
            Err(EngineError::UnknownInput(format!("{}.{input}", slot.node_name())))
        }
    }

    /// Feeds a constant into `input` of `node`.
    pub fn set_value(
        &mut self,
        node: NodeId,
        input: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, EngineError> {
        let slot = self.accepting_slot(node, input)?;
        slot.inputs.insert(input.to_string(), Input::Value(value.into()));
        Ok(self)
    }

    /// Connects `input` of `node` to the output `output` of `source`.
    ///
    /// The output name is resolved here, once.
    pub fn link(
        &mut self,
        node: NodeId,
        input: &str,
        source: NodeId,
        output: &str,
    ) -> Result<&mut Self, EngineError> {
        let output_id = self.resolve_output(source, output)?;
        let slot = self.accepting_slot(node, input)?;
        slot.inputs.insert(
            input.to_string(),
            Input::Link {
                node: source,
                output: output_id,
            },
        );
        Ok(self)
    }

    fn resolve_output(&self, id: NodeId, output: &str) -> Result<OutputId, EngineError> {
        let slot = self
            .slots
            .get(id.0)
            .ok_or_else(|| EngineError::config(format!("no node {}", id.0)))?;
        slot.node
            .as_deref()
            .and_then(|n| n.output_id(output))
            .ok_or_else(|| EngineError::UnknownOutput(format!("{}.{output}", slot.node_name())))
    }

    /// Finishes the path with `output` of `root` as the frame result.
    ///
    /// Fails with [`EngineError::Cycle`] if the links form a cycle.
    pub fn build(self, root: NodeId, output: &str) -> Result<RenderPath, EngineError> {
        let root_output = self.resolve_output(root, output)?;
        check_acyclic(&self.slots)?;
        Ok(RenderPath {
            slots: self.slots,
            root,
            root_output,
        })
    }
}

/// Kahn's algorithm over the link edges (source → consumer).
fn check_acyclic(slots: &[NodeSlot]) -> Result<(), EngineError> {
    let mut consumers: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut in_degree = vec![0usize; slots.len()];

    for (consumer, slot) in slots.iter().enumerate() {
        for input in slot.inputs.values() {
            if let Input::Link { node, .. } = input {
                consumers.entry(node.0).or_default().push(consumer);
                in_degree[consumer] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..slots.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut visited = 0;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for &consumer in consumers.get(&id).map(Vec::as_slice).unwrap_or_default() {
            in_degree[consumer] -= 1;
            if in_degree[consumer] == 0 {
                queue.push_back(consumer);
            }
        }
    }

    if visited == slots.len() {
        Ok(())
    } else {
        Err(EngineError::Cycle)
    }
}

/// Validated render graph with a designated root output.
pub struct RenderPath {
    slots: Vec<NodeSlot>,
    root: NodeId,
    root_output: OutputId,
}

impl RenderPath {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Starts a frame: every node recomputes on its next pull.
    pub fn prepare(&mut self) {
        self.slots.iter_mut().for_each(NodeSlot::prepare);
    }

    /// Replaces a constant input. Takes effect on the next evaluation of `node`.
    pub fn set_value(
        &mut self,
        node: NodeId,
        input: &str,
        value: impl Into<Value>,
    ) -> Result<(), EngineError> {
        let slot = self
            .slots
            .get_mut(node.0)
            .ok_or_else(|| EngineError::config(format!("no node {}", node.0)))?;
        match slot.inputs.get_mut(input) {
            Some(Input::Value(v)) => {
                *v = value.into();
                Ok(())
            }
            Some(Input::Link { .. }) => Err(EngineError::config(format!(
                "{}.{input} is linked, not a constant",
                slot.node_name()
            ))),
            None => Err(EngineError::UnknownInput(format!("{}.{input}", slot.node_name()))),
        }
    }

    /// Typed output of `node`, evaluating upstream nodes as needed.
    pub fn output<T: FromValue>(
        &mut self,
        device: &dyn GraphicsDevice,
        node: NodeId,
        name: &str,
    ) -> Result<T, EngineError> {
        let slot = self
            .slots
            .get(node.0)
            .ok_or_else(|| EngineError::config(format!("no node {}", node.0)))?;
        let id = slot
            .node
            .as_deref()
            .and_then(|n| n.output_id(name))
            .ok_or_else(|| EngineError::UnknownOutput(name.to_string()))?;

        let value = node::output(&mut self.slots, device, node, id)?;
        if value.is_invalid() {
            return Err(EngineError::UpstreamFailed(name.to_string()));
        }
        T::from_value(&value).ok_or(EngineError::TypeMismatch {
            expected: T::KIND.name(),
            found: value.kind().name(),
        })
    }

    /// Pulls the root output.
    ///
    /// An invalid root becomes [`EngineError::RenderFailure`] carrying the
    /// drained device log.
    pub fn poll_frame(&mut self, device: &dyn GraphicsDevice) -> Result<TextureHandle, EngineError> {
        let value = node::output(&mut self.slots, device, self.root, self.root_output)?;
        match value {
            Value::Texture(texture) => Ok(texture),
            Value::Invalid => Err(EngineError::RenderFailure(device.take_log())),
            other => Err(EngineError::TypeMismatch {
                expected: TextureHandle::KIND.name(),
                found: other.kind().name(),
            }),
        }
    }
}

impl std::fmt::Debug for RenderPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.slots.iter().map(NodeSlot::node_name).collect();
        f.debug_struct("RenderPath")
            .field("nodes", &names)
            .field("root", &self.root)
            .finish()
    }
}
