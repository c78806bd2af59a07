//! Live instantiation of a [`crate::patch_spec::PatchSpec`]: a set of
//! owned nodes, the named template inputs a host can rewire, and the
//! play/stop/auto-free lifecycle that ties a patch to an
//! [`crate::graph::AudioGraph`].

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::error::{GraphError, NodeError, SpecError};
use crate::graph::AudioGraph;
use crate::node::{constant, GraphContext, NodeCell, NodeRef, NodeState};
use crate::nodes::{BufferConstant, Constant};
use crate::patch_spec::{PatchNodeSpec, PatchRegistry, PatchSpec};
use crate::registry::NodeRegistry;

/// A live, playable instance of a patch template.
pub struct Patch {
    nodes: Vec<NodeRef>,
    inputs: HashMap<String, NodeRef>,
    output: Option<NodeRef>,
    auto_free: bool,
    finished: bool,
}

impl Patch {
    fn empty() -> Self {
        Self { nodes: Vec::new(), inputs: HashMap::new(), output: None, auto_free: false, finished: false }
    }

    /// Instantiate from a spec: walk from the root, constructing one live
    /// node per spec node and wiring named inputs. Template-input-named
    /// nodes are additionally recorded in `inputs` for later rewiring via
    /// [`Patch::set_input`].
    pub fn from_spec(spec: &PatchSpec, registry: &NodeRegistry, ctx: &GraphContext, block_size: usize) -> Result<Self, GraphError> {
        spec.validate().map_err(GraphError::Spec)?;
        let root_id = spec.get_root().ok_or_else(|| {
            GraphError::Spec(SpecError::Integrity { spec: spec.get_name().to_string(), reason: "no root".to_string() })
        })?;

        let mut patch = Self::empty();
        let mut built: HashMap<u32, NodeRef> = HashMap::new();
        let root = patch.build_node(root_id, spec, registry, ctx, block_size, &mut built)?;
        patch.output = Some(root);
        Ok(patch)
    }

    /// Instantiate a second, independent playing copy of `other`: snapshot
    /// its current wiring into a fresh spec and build from that, exactly
    /// as if the snapshot had been saved and reloaded.
    pub fn from_patch(other: &Patch, registry: &NodeRegistry, ctx: &GraphContext, block_size: usize) -> Result<Self, GraphError> {
        let spec = other.create_spec(other.output.as_ref().map(|o| o.borrow().name().to_string()).unwrap_or_default());
        Self::from_spec(&spec, registry, ctx, block_size)
    }

    /// Instantiate from a spec previously registered via
    /// [`PatchSpec::store`], looked up by name in the process-wide
    /// [`PatchRegistry`].
    pub fn from_registered_name(name: &str, registry: &NodeRegistry, ctx: &GraphContext, block_size: usize) -> Result<Self, GraphError> {
        PatchRegistry::global().create(name, registry, ctx, block_size)
    }

    fn build_node(
        &mut self,
        id: u32,
        spec: &PatchSpec,
        registry: &NodeRegistry,
        ctx: &GraphContext,
        block_size: usize,
        built: &mut HashMap<u32, NodeRef>,
    ) -> Result<NodeRef, GraphError> {
        if let Some(existing) = built.get(&id) {
            return Ok(existing.clone());
        }

        let node_spec = spec.get_node_spec(id).ok_or_else(|| {
            GraphError::Spec(SpecError::Integrity { spec: spec.get_name().to_string(), reason: format!("missing id {id}") })
        })?;

        // If this spec node names a template input already bound in this
        // instance, reuse the bound node instead of constructing a fresh one.
        if let Some(name) = &node_spec.input_name {
            if let Some(bound) = self.inputs.get(name) {
                built.insert(id, bound.clone());
                return Ok(bound.clone());
            }
        }

        let node = registry.create(&node_spec.kind, ctx, block_size)?;
        if node_spec.is_constant {
            if let Some(value) = node_spec.value {
                if let Some(c) = node.borrow_mut().downcast_mut::<Constant>() {
                    c.set(value);
                }
            }
        }
        built.insert(id, node.clone());
        self.nodes.push(node.clone());

        if let Some(name) = &node_spec.input_name {
            self.inputs.insert(name.clone(), node.clone());
        }

        let mut params: Vec<_> = node_spec.inputs.iter().collect();
        params.sort_by_key(|(name, _)| name.clone());
        for (param_name, &child_id) in params {
            let child = self.build_node(child_id, spec, registry, ctx, block_size, built)?;
            NodeCell::set_input(&node, param_name, child).map_err(GraphError::Node)?;
        }

        Ok(node)
    }

    /// The template-building helper: insert a Constant, tag it as the
    /// named template input, and return it for wiring into the graph.
    pub fn add_input(&mut self, name: impl Into<String>, default: f32, block_size: usize) -> NodeRef {
        let node = constant(default, block_size);
        self.nodes.push(node.clone());
        self.inputs.insert(name.into(), node.clone());
        node
    }

    /// The buffer-valued equivalent of [`Patch::add_input`]: insert a
    /// `BufferConstant` carrying `default`, mark it as the named template
    /// input, and return it for wiring into the graph.
    pub fn add_buffer_input(&mut self, name: impl Into<String>, default: Buffer, block_size: usize) -> NodeRef {
        let node = NodeCell::new(Box::new(BufferConstant::new(default)), block_size);
        self.nodes.push(node.clone());
        self.inputs.insert(name.into(), node.clone());
        node
    }

    /// Take ownership of a free-standing node (e.g. the result of wiring
    /// several leaf nodes together outside of a spec) so it's captured
    /// when this patch's spec is later snapshotted.
    pub fn add_node(&mut self, node: NodeRef) {
        self.nodes.push(node);
    }

    pub fn set_output(&mut self, node: NodeRef) {
        self.output = Some(node);
    }

    pub fn output(&self) -> Option<&NodeRef> {
        self.output.as_ref()
    }

    pub fn set_auto_free(&mut self, flag: bool) {
        self.auto_free = flag;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Replace a named template input. Scalars mutate the bound
    /// `Constant` in place; node replacements rewrite every input slot
    /// across every owned node that currently points at the old producer,
    /// not just the slot that was looked up to find it.
    pub fn set_input_value(&mut self, name: &str, value: f32) -> Result<(), NodeError> {
        let node = self.inputs.get(name).ok_or_else(|| NodeError::UnknownInput {
            node: "patch".to_string(),
            slot: name.to_string(),
        })?;
        let mut node_mut = node.borrow_mut();
        match node_mut.downcast_mut::<Constant>() {
            Some(c) => {
                c.set(value);
                Ok(())
            }
            None => Err(NodeError::CannotSetInput { node: "patch".to_string(), slot: name.to_string() }),
        }
    }

    pub fn set_input_node(&mut self, name: &str, replacement: NodeRef) -> Result<(), NodeError> {
        let old = self.inputs.get(name).cloned().ok_or_else(|| NodeError::UnknownInput {
            node: "patch".to_string(),
            slot: name.to_string(),
        })?;

        for owned in &self.nodes {
            if NodeRef::ptr_eq(owned, &old) {
                continue;
            }
            let slot_names: Vec<String> = owned.borrow().inputs_named().map(str::to_string).collect();
            for slot_name in slot_names {
                let points_at_old = owned
                    .borrow()
                    .input(&slot_name)
                    .map(|producer| NodeRef::ptr_eq(producer, &old))
                    .unwrap_or(false);
                if points_at_old {
                    NodeCell::set_input(owned, &slot_name, replacement.clone())?;
                }
            }
        }

        self.inputs.insert(name.to_string(), replacement);
        Ok(())
    }

    /// Snapshot the current live graph into a fresh `PatchSpec`: depth
    /// first from the output, assigning ids as nodes are first visited.
    pub fn create_spec(&self, name: impl Into<String>) -> PatchSpec {
        let mut spec = PatchSpec::new(name);
        let mut assigned: HashMap<*const (), u32> = HashMap::new();
        if let Some(root) = &self.output {
            let root_id = self.snapshot_node(root, &mut spec, &mut assigned);
            spec.set_output(root_id);
        }
        spec
    }

    fn snapshot_node(&self, node: &NodeRef, spec: &mut PatchSpec, assigned: &mut HashMap<*const (), u32>) -> u32 {
        let key = node.ptr() as *const ();
        if let Some(&id) = assigned.get(&key) {
            return id;
        }

        let node_ref = node.borrow();
        let kind = node_ref.name().to_string();
        let input_name = self
            .inputs
            .iter()
            .find(|(_, v)| NodeRef::ptr_eq(v, node))
            .map(|(k, _)| k.clone());
        let is_constant = node_ref.downcast_ref::<Constant>().is_some();
        let value = node_ref.downcast_ref::<Constant>().map(Constant::get);
        let slot_names: Vec<String> = node_ref.inputs_named().map(str::to_string).collect();
        drop(node_ref);

        let mut node_spec = PatchNodeSpec::new(0, kind);
        if let Some(name) = input_name {
            node_spec = node_spec.with_input_name(name);
        }
        node_spec.is_constant = is_constant;
        node_spec.value = value;

        let id = spec.add_node_spec(node_spec);
        assigned.insert(key, id);

        for slot_name in slot_names {
            let child = node.borrow().input(&slot_name).cloned();
            if let Some(child) = child {
                let child_id = self.snapshot_node(&child, spec, assigned);
                if let Some(node_spec) = spec_node_mut(spec, id) {
                    node_spec.inputs.insert(slot_name, child_id);
                }
            }
        }

        id
    }

    /// Called by the scheduler after a tick in which this patch's output
    /// node transitioned to `FINISHED`. If `auto_free` is set, marks the
    /// patch finished so `AudioGraph` schedules its removal.
    pub fn node_state_changed(&mut self, node: &NodeRef) {
        let is_output = self.output.as_ref().map(|o| NodeRef::ptr_eq(o, node)).unwrap_or(false);
        if is_output && node.borrow().state() == NodeState::Finished && self.auto_free {
            self.finished = true;
        }
    }

    /// Hand this patch to `graph`: wires its root output into the sink
    /// and hands over ownership, the way `add_output_patch` does. Returns
    /// a handle that [`PatchHandle::stop`] can later use to withdraw it.
    pub fn play(self, graph: &mut AudioGraph) -> Result<PatchHandle, NodeError> {
        let index = graph.patch_count();
        graph.add_output_patch(self)?;
        Ok(PatchHandle(index))
    }
}

/// Names a patch previously handed to an [`AudioGraph`] via [`Patch::play`].
/// Once played, a patch is owned by the graph, so there's no `Patch`
/// value left to call methods on directly; this handle stands in for it.
#[derive(Debug, Clone, Copy)]
pub struct PatchHandle(usize);

impl PatchHandle {
    /// Withdraw the patch this handle names from `graph`. Actual removal
    /// happens at the next tick boundary, matching `remove_output`'s
    /// deferred-removal contract.
    pub fn stop(self, graph: &mut AudioGraph) {
        graph.remove_patch(self.0);
    }
}

fn spec_node_mut(spec: &mut PatchSpec, id: u32) -> Option<&mut PatchNodeSpec> {
    // `PatchSpec` only exposes an immutable node accessor publicly;
    // `create_spec` is the one place that needs interior access while
    // still building the spec, so it reaches into the crate-visible
    // field directly rather than adding a public mutable accessor that
    // would let hosts corrupt a stored spec after the fact.
    spec.nodes_mut().iter_mut().find(|n| n.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch_spec::PatchNodeSpec;

    fn ctx() -> GraphContext {
        GraphContext { sample_rate: 48_000.0 }
    }

    fn sine_spec() -> PatchSpec {
        let mut spec = PatchSpec::new("sine-patch");
        let freq = spec.add_node_spec(PatchNodeSpec::constant(0, 440.0).with_input_name("freq"));
        let sine = spec.add_node_spec(PatchNodeSpec::new(0, "sine").with_input("frequency", freq));
        spec.set_output(sine);
        spec
    }

    #[test]
    fn instantiates_from_spec_and_exposes_template_input() {
        let spec = sine_spec();
        let registry = NodeRegistry::with_builtins();
        let patch = Patch::from_spec(&spec, &registry, &ctx(), 64).unwrap();
        assert!(patch.output().is_some());
        assert!(patch.inputs.contains_key("freq"));
    }

    #[test]
    fn set_input_value_mutates_bound_constant() {
        let spec = sine_spec();
        let registry = NodeRegistry::with_builtins();
        let mut patch = Patch::from_spec(&spec, &registry, &ctx(), 64).unwrap();
        patch.set_input_value("freq", 880.0).unwrap();
        let freq_node = patch.inputs.get("freq").unwrap();
        assert_eq!(freq_node.borrow().downcast_ref::<Constant>().unwrap().get(), 880.0);
    }

    #[test]
    fn create_spec_roundtrips_node_count() {
        let spec = sine_spec();
        let registry = NodeRegistry::with_builtins();
        let patch = Patch::from_spec(&spec, &registry, &ctx(), 64).unwrap();
        let snapshot = patch.create_spec("snapshot");
        assert_eq!(snapshot.nodes().len(), spec.nodes().len());
    }

    #[test]
    fn from_patch_builds_an_independent_copy() {
        let spec = sine_spec();
        let registry = NodeRegistry::with_builtins();
        let original = Patch::from_spec(&spec, &registry, &ctx(), 64).unwrap();
        let copy = Patch::from_patch(&original, &registry, &ctx(), 64).unwrap();
        assert_eq!(copy.nodes.len(), original.nodes.len());
        assert!(!NodeRef::ptr_eq(copy.output.as_ref().unwrap(), original.output.as_ref().unwrap()));
    }

    #[test]
    fn from_registered_name_looks_up_stored_spec() {
        let mut spec = PatchSpec::new("registered-sine-patch");
        let freq = spec.add_node_spec(PatchNodeSpec::constant(0, 440.0).with_input_name("freq"));
        let sine = spec.add_node_spec(PatchNodeSpec::new(0, "sine").with_input("frequency", freq));
        spec.set_output(sine);
        spec.store().unwrap();

        let registry = NodeRegistry::with_builtins();
        let patch = Patch::from_registered_name("registered-sine-patch", &registry, &ctx(), 64).unwrap();
        assert!(patch.output().is_some());
    }

    #[test]
    fn play_then_stop_adds_then_removes_from_graph() {
        let spec = sine_spec();
        let registry = NodeRegistry::with_builtins();
        let patch = Patch::from_spec(&spec, &registry, &ctx(), 64).unwrap();
        let mut graph = AudioGraph::with_defaults();
        let handle = patch.play(&mut graph).unwrap();
        assert_eq!(graph.patch_count(), 1);
        handle.stop(&mut graph);
        graph.pull_input(16).unwrap();
        assert_eq!(graph.patch_count(), 0);
    }

    #[test]
    fn add_buffer_input_records_template_name() {
        let spec = sine_spec();
        let registry = NodeRegistry::with_builtins();
        let mut patch = Patch::from_spec(&spec, &registry, &ctx(), 64).unwrap();
        patch.add_buffer_input("shape", Buffer::new(1, 16), 64);
        assert!(patch.inputs.contains_key("shape"));
    }
}
