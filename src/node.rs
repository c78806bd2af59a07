//! The `Node` model: the uniform contract every unit generator implements,
//! channel inference, the one-sample look-back buffer, and the lifecycle
//! state machine.
//!
//! A node is split in two layers:
//!
//! - [`NodeImpl`] is the polymorphic, per-kind behavior a leaf node (an
//!   oscillator, a filter, an operator node, …) overrides.
//! - [`NodeCell`] is the common bookkeeping every node needs regardless of
//!   kind: named input slots, output back-references, the output buffer
//!   with its look-back slot, and the ACTIVE/FINISHED state machine.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::NodeError;

/// Sentinel for [`ChannelBounds::min_input_channels`]: "match the width of
/// the widest connected input" rather than a fixed minimum.
pub const N_CHANNELS: usize = usize::MAX;

/// A shared, interior-mutable handle to a live node within a
/// [`crate::patch::Patch`].
///
/// Cloning a `NodeRef` shares ownership of the underlying node; this is
/// the "inputs own their producers" edge. [`NodeCell::outputs`] holds only
/// [`Weak`] back-references so the graph stays acyclic and teardown is a
/// plain drop of the Patch's node vector.
///
/// This wraps `Rc<RefCell<NodeCell>>` in a local type rather than aliasing
/// it directly so that arithmetic operators and `scale` can be implemented
/// on it: `Rc` is foreign to this crate, so the orphan rules forbid
/// implementing a foreign trait like `std::ops::Add` on it directly.
#[derive(Clone)]
pub struct NodeRef(Rc<RefCell<NodeCell>>);

impl NodeRef {
    fn wrap(cell: NodeCell) -> Self {
        Self(Rc::new(RefCell::new(cell)))
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, NodeCell> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, NodeCell> {
        self.0.borrow_mut()
    }

    /// Identity comparison: do these two handles point at the same node?
    pub fn ptr_eq(a: &NodeRef, b: &NodeRef) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<NodeCell>> {
        Rc::downgrade(&self.0)
    }

    /// A stable identity key, used for dedup sets keyed by node identity
    /// rather than by value.
    pub fn ptr(&self) -> *const RefCell<NodeCell> {
        Rc::as_ptr(&self.0)
    }
}

/// Lifecycle state of a node: ACTIVE until a generator with a natural end
/// (an envelope, a buffer player) reaches it, then FINISHED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Active,
    Finished,
}

/// The channel-width contract a node kind declares once at construction.
#[derive(Debug, Clone, Copy)]
pub struct ChannelBounds {
    pub min_input_channels: usize,
    pub max_input_channels: usize,
    pub min_output_channels: usize,
    pub max_output_channels: usize,
    /// If set, the node never widens its own output to match its inputs
    /// (used by the fixed-width audio output node).
    pub no_input_upmix: bool,
}

impl Default for ChannelBounds {
    fn default() -> Self {
        Self {
            min_input_channels: N_CHANNELS,
            max_input_channels: usize::MAX,
            min_output_channels: 1,
            max_output_channels: usize::MAX,
            no_input_upmix: false,
        }
    }
}

impl ChannelBounds {
    /// A node with exactly `n` fixed input and output channels (no
    /// inference, no up-mixing), e.g. a stereo-only effect or the audio
    /// output sink.
    pub fn fixed(n: usize) -> Self {
        Self {
            min_input_channels: n,
            max_input_channels: n,
            min_output_channels: n,
            max_output_channels: n,
            no_input_upmix: true,
        }
    }

    /// A generator with no inputs and `n` output channels.
    pub fn generator(n: usize) -> Self {
        Self {
            min_input_channels: 0,
            max_input_channels: 0,
            min_output_channels: n,
            max_output_channels: n,
            no_input_upmix: true,
        }
    }
}

/// Host-supplied context threaded into every node at construction, so leaf
/// nodes can read the sample rate without a process-wide singleton.
#[derive(Debug, Clone, Copy)]
pub struct GraphContext {
    pub sample_rate: f64,
}

/// The per-kind behavior every concrete node implements.
pub trait NodeImpl: Any {
    /// Human-readable kind tag, used by the registry and by serialisation.
    fn name(&self) -> &'static str;

    /// Produce `num_frames` of output for every channel. Every input
    /// node's `out` buffer already holds `num_frames` valid samples for
    /// this block (the scheduler in `graph.rs` guarantees topological
    /// order before calling this).
    fn process(&mut self, ctx: &GraphContext, inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize);

    /// Channel-width contract for this kind. Re-read whenever an input is
    /// wired or rewired.
    fn channel_bounds(&self) -> ChannelBounds {
        ChannelBounds::default()
    }

    /// Output channel count for fixed/variadic kinds (where
    /// `min_input_channels != N_CHANNELS`), given the current number of
    /// connected inputs. `None` (the default) leaves `num_output_channels`
    /// at whatever it was set to at construction, which is correct for
    /// fixed-width sinks and generators; variadic nodes whose output width
    /// tracks their input count (`ChannelArray`) override this.
    fn output_channel_count(&self, _num_inputs: usize) -> Option<usize> {
        None
    }

    /// Lateral control event. Default is a no-op; nodes with one-shot
    /// semantics (envelopes, trigger-noise, clocks) override this. The
    /// effect is applied within the next `process` call, not out of band.
    fn trigger(&mut self, _name: &str, _value: f32) {}

    /// Whether this node has reached its natural end (one-shot envelope
    /// completed its release, buffer player reached end of data, …). Once
    /// this returns `true` it must keep returning `true`; the transition
    /// is monotonic.
    fn is_finished(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// An ordered input slot: a producer name and its current wiring.
struct InputSlot {
    name: String,
    producer: NodeRef,
}

/// Ordered view over a node's current input producers, passed to
/// [`NodeImpl::process`]. Order matches the node's `inputs` insertion
/// order.
pub struct Inputs<'a> {
    slots: &'a [InputSlot],
}

impl<'a> Inputs<'a> {
    pub fn empty() -> Self {
        Self { slots: &[] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&NodeRef> {
        self.slots.iter().find(|s| s.name == name).map(|s| &s.producer)
    }

    pub fn nth(&self, index: usize) -> Option<&NodeRef> {
        self.slots.get(index).map(|s| &s.producer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeRef)> {
        self.slots.iter().map(|s| (s.name.as_str(), &s.producer))
    }
}

/// Per-channel storage with one extra pre-history sample. Index 0 of each
/// channel's backing `Vec` is the look-back slot; `channel()`/`channel_mut()`
/// expose only `[1..]`.
pub struct OutputBuffer {
    channels: Vec<Vec<f32>>,
    block_size: usize,
}

impl OutputBuffer {
    pub fn new(num_channels: usize, block_size: usize) -> Self {
        Self {
            channels: (0..num_channels.max(1))
                .map(|_| vec![0.0; block_size + 1])
                .collect(),
            block_size,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn channel(&self, c: usize) -> &[f32] {
        &self.channels[c][1..]
    }

    pub fn channel_mut(&mut self, c: usize) -> &mut [f32] {
        &mut self.channels[c][1..]
    }

    pub fn lookback(&self, c: usize) -> f32 {
        self.channels[c][0]
    }

    /// Copy the last sample of the previous block into the look-back slot.
    /// Called by the scheduler immediately before `process`.
    pub fn advance_lookback(&mut self, last_num_frames: usize) {
        if last_num_frames == 0 {
            return;
        }
        for channel in &mut self.channels {
            channel[0] = channel[last_num_frames];
        }
    }

    /// Widen to `num_channels`/`block_size`, never shrinking.
    pub fn ensure_capacity(&mut self, num_channels: usize, block_size: usize) {
        if block_size > self.block_size {
            for channel in &mut self.channels {
                channel.resize(block_size + 1, 0.0);
            }
            self.block_size = block_size;
        }
        while self.channels.len() < num_channels {
            self.channels.push(vec![0.0; self.block_size + 1]);
        }
    }
}

/// The common wrapper every live node carries regardless of kind: named
/// input slots, output back-references, the output buffer, and state.
pub struct NodeCell {
    imp: Box<dyn NodeImpl>,
    inputs: Vec<InputSlot>,
    /// Weak, relation-only back-references: `(consumer, slot name)`. Never
    /// drives evaluation; used only for `disconnect_outputs` and channel
    /// re-inference bookkeeping.
    outputs: Vec<(Weak<RefCell<NodeCell>>, String)>,
    out: OutputBuffer,
    state: NodeState,
    num_input_channels: usize,
    num_output_channels: usize,
    last_num_frames: usize,
}

impl NodeCell {
    /// Wrap a freshly constructed [`NodeImpl`] into a live, graph-ready node.
    pub fn new(imp: Box<dyn NodeImpl>, block_size: usize) -> NodeRef {
        let bounds = imp.channel_bounds();
        let out = OutputBuffer::new(bounds.min_output_channels.max(1), block_size);
        NodeRef::wrap(Self {
            imp,
            inputs: Vec::new(),
            outputs: Vec::new(),
            out,
            state: NodeState::Active,
            num_input_channels: 0,
            num_output_channels: bounds.min_output_channels.max(1),
            last_num_frames: 0,
        })
    }

    pub fn name(&self) -> &'static str {
        self.imp.name()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn num_input_channels(&self) -> usize {
        self.num_input_channels
    }

    pub fn num_output_channels(&self) -> usize {
        self.num_output_channels
    }

    pub fn out(&self) -> &OutputBuffer {
        &self.out
    }

    /// Downcast to a concrete node kind. Used by `set_input`'s Constant
    /// fast path and by tests.
    pub fn downcast_mut<T: NodeImpl>(&mut self) -> Option<&mut T> {
        self.imp.as_any_mut().downcast_mut::<T>()
    }

    pub fn downcast_ref<T: NodeImpl>(&self) -> Option<&T> {
        self.imp.as_any().downcast_ref::<T>()
    }

    pub fn inputs_named(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|s| s.name.as_str())
    }

    pub fn input(&self, name: &str) -> Option<&NodeRef> {
        self.inputs.iter().find(|s| s.name == name).map(|s| &s.producer)
    }

    /// Register a named input slot and record the reciprocal back-edge on
    /// the producer. If `name` already has a producer, it is replaced
    /// (equivalent to `set_input`).
    pub fn create_input(this: &NodeRef, name: &str, producer: NodeRef) -> Result<(), NodeError> {
        Self::set_input(this, name, producer)
    }

    /// Replace the producer in slot `name`. The previous producer, if any,
    /// loses this node as a consumer. Fails with `InvalidChannelCount` if
    /// the new wiring would exceed a fixed-width node's accepted width.
    pub fn set_input(this: &NodeRef, name: &str, producer: NodeRef) -> Result<(), NodeError> {
        let previous = {
            let mut node = this.borrow_mut();
            if let Some(slot) = node.inputs.iter_mut().find(|s| s.name == name) {
                Some(std::mem::replace(&mut slot.producer, producer.clone()))
            } else {
                node.inputs.push(InputSlot {
                    name: name.to_string(),
                    producer: producer.clone(),
                });
                None
            }
        };
        if let Some(old) = previous {
            remove_output_edge(&old, this, name);
        }
        producer
            .borrow_mut()
            .outputs
            .push((this.downgrade(), name.to_string()));
        Self::update_channels(this)
    }

    /// Fast path: mutate an existing `Constant` occupant's value in place
    /// rather than rewiring. Fails with `CannotSetInput` if the occupant
    /// isn't a `Constant`.
    pub fn set_input_value(this: &NodeRef, name: &str, value: f32) -> Result<(), NodeError> {
        let producer = {
            let node = this.borrow();
            let slot = node
                .inputs
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| NodeError::UnknownInput {
                    node: node.name().to_string(),
                    slot: name.to_string(),
                })?;
            slot.producer.clone()
        };

        let mut producer_mut = producer.borrow_mut();
        match producer_mut.downcast_mut::<crate::nodes::constant::Constant>() {
            Some(constant) => {
                constant.set(value);
                Ok(())
            }
            None => Err(NodeError::CannotSetInput {
                node: this.borrow().name().to_string(),
                slot: name.to_string(),
            }),
        }
    }

    /// Erase a slot entirely. Used only by variadic nodes removing an
    /// element.
    pub fn remove_input(this: &NodeRef, name: &str) {
        let producer = {
            let mut node = this.borrow_mut();
            let idx = node.inputs.iter().position(|s| s.name == name);
            idx.map(|i| node.inputs.remove(i).producer)
        };
        if let Some(producer) = producer {
            remove_output_edge(&producer, this, name);
        }
        let _ = Self::update_channels(this);
    }

    /// Append a fresh `"input<index>"` slot. Used by variadic node kinds
    /// (ChannelArray, AudioOut) that accept an arbitrary number of inputs.
    pub fn add_variadic_input(this: &NodeRef, producer: NodeRef) -> Result<String, NodeError> {
        let index = this.borrow().inputs.len();
        let name = format!("input{index}");
        Self::set_input(this, &name, producer)?;
        Ok(name)
    }

    /// Drop every input edge.
    pub fn disconnect_inputs(this: &NodeRef) {
        let producers: Vec<(String, NodeRef)> = this
            .borrow_mut()
            .inputs
            .drain(..)
            .map(|s| (s.name, s.producer))
            .collect();
        for (name, producer) in producers {
            remove_output_edge(&producer, this, &name);
        }
    }

    /// Drop every output edge. Iterates by repeatedly pulling the first
    /// remaining edge: detaching one consumer mutates *this* node's
    /// `outputs` set as a side effect, so a direct iterator over `outputs`
    /// would be invalidated mid-loop.
    pub fn disconnect_outputs(this: &NodeRef) {
        loop {
            let next = this.borrow().outputs.first().cloned();
            let Some((consumer, slot_name)) = next else {
                break;
            };
            let Some(consumer) = consumer.upgrade() else {
                this.borrow_mut().outputs.remove(0);
                continue;
            };
            consumer
                .borrow_mut()
                .inputs
                .retain(|s| !(s.name == slot_name && NodeRef::ptr_eq(&s.producer, this)));
            this.borrow_mut().outputs.retain(|(w, n)| {
                !(n == &slot_name
                    && w.upgrade()
                        .map(|u| Rc::ptr_eq(&u, &consumer))
                        .unwrap_or(false))
            });
        }
    }

    /// Recompute `num_input_channels`/`num_output_channels` from the
    /// node's [`ChannelBounds`] and its currently connected inputs.
    pub fn update_channels(this: &NodeRef) -> Result<(), NodeError> {
        let bounds = this.borrow().imp.channel_bounds();
        let widest_input = this
            .borrow()
            .inputs
            .iter()
            .map(|s| s.producer.borrow().num_output_channels)
            .max()
            .unwrap_or(0);
        let num_inputs = this.borrow().inputs.len();

        let mut node = this.borrow_mut();

        if bounds.min_input_channels == N_CHANNELS {
            let new_width = widest_input.max(1).max(bounds.min_output_channels);
            node.num_input_channels = new_width;
            if !bounds.no_input_upmix {
                node.num_output_channels = new_width.min(bounds.max_output_channels);
            }
        } else {
            if widest_input > bounds.max_input_channels {
                let name = node.name().to_string();
                return Err(NodeError::InvalidChannelCount {
                    node: name,
                    slot: String::new(),
                    max: bounds.max_input_channels,
                    got: widest_input,
                });
            }
            node.num_input_channels = widest_input.max(bounds.min_input_channels);
            if let Some(width) = node.imp.output_channel_count(num_inputs) {
                node.num_output_channels = width.clamp(bounds.min_output_channels, bounds.max_output_channels);
            }
        }

        let block_size = node.out.block_size();
        let target_channels = node.num_output_channels;
        node.out.ensure_capacity(target_channels, block_size);
        Ok(())
    }

    /// The scheduler's per-tick call: advance the look-back slot, then run
    /// the node's own `process`, tracking `last_num_frames` and the
    /// finished-state transition. Returns whether this tick caused a
    /// FINISHED transition, so the caller (`Patch::node_state_changed`)
    /// can react.
    pub(crate) fn tick(this: &NodeRef, ctx: &GraphContext, num_frames: usize) -> Result<bool, NodeError> {
        let mut node = this.borrow_mut();
        if num_frames > node.out.block_size() {
            return Err(NodeError::BufferTooSmall {
                node: node.name().to_string(),
                requested: num_frames,
                allocated: node.out.block_size(),
            });
        }

        let last_num_frames = node.last_num_frames;
        node.out.advance_lookback(last_num_frames);

        let NodeCell { imp, inputs, out, .. } = &mut *node;
        let inputs = Inputs { slots: inputs.as_slice() };
        imp.process(ctx, &inputs, out, num_frames);
        node.last_num_frames = num_frames;

        let just_finished = node.state == NodeState::Active && node.imp.is_finished();
        if just_finished {
            node.state = NodeState::Finished;
        }
        Ok(just_finished)
    }

    pub fn trigger(this: &NodeRef, name: &str, value: f32) {
        this.borrow_mut().imp.trigger(name, value);
    }
}

fn remove_output_edge(producer: &NodeRef, consumer: &NodeRef, slot_name: &str) {
    producer.borrow_mut().outputs.retain(|(w, n)| {
        !(n == slot_name
            && w.upgrade()
                .map(|u| std::ptr::eq(Rc::as_ptr(&u), consumer.ptr()))
                .unwrap_or(true))
    });
}

/// Construct a bare `Constant` node, the promotion target for numeric
/// literals used in arithmetic on `NodeRef`.
pub fn constant(value: f32, block_size: usize) -> NodeRef {
    NodeCell::new(Box::new(crate::nodes::constant::Constant::new(value)), block_size)
}

macro_rules! node_arith_op {
    ($Trait:ident, $method:ident, $Kind:path) => {
        impl std::ops::$Trait for NodeRef {
            type Output = NodeRef;

            fn $method(self, rhs: NodeRef) -> NodeRef {
                let block_size = self.borrow().out.block_size();
                let node = NodeCell::new(Box::new($Kind::new()), block_size);
                NodeCell::set_input(&node, "a", self).expect("wiring a freshly constructed operator node cannot fail");
                NodeCell::set_input(&node, "b", rhs).expect("wiring a freshly constructed operator node cannot fail");
                node
            }
        }

        impl std::ops::$Trait<f32> for NodeRef {
            type Output = NodeRef;

            fn $method(self, rhs: f32) -> NodeRef {
                let block_size = self.borrow().out.block_size();
                std::ops::$Trait::$method(self, constant(rhs, block_size))
            }
        }
    };
}

node_arith_op!(Add, add, crate::nodes::Add);
node_arith_op!(Sub, sub, crate::nodes::Subtract);
node_arith_op!(Mul, mul, crate::nodes::Multiply);
node_arith_op!(Div, div, crate::nodes::Divide);

impl NodeRef {
    /// Remap this node's output from its natural `[-1, 1]` range into
    /// `[from, to]`, linearly or exponentially depending on `mode`.
    pub fn scale(self, from: f32, to: f32, mode: crate::nodes::ScaleMode) -> NodeRef {
        let block_size = self.borrow().out.block_size();
        let node = match mode {
            crate::nodes::ScaleMode::Linear => {
                NodeCell::new(Box::new(crate::nodes::Scale::new(-1.0, 1.0, from, to)), block_size)
            }
            crate::nodes::ScaleMode::LinearToExponential => {
                NodeCell::new(Box::new(crate::nodes::LinExp::new(-1.0, 1.0, from, to)), block_size)
            }
        };
        NodeCell::set_input(&node, "a", self).expect("wiring a freshly constructed scale node cannot fail");
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::constant::Constant;

    fn make_constant(value: f32) -> NodeRef {
        constant(value, 64)
    }

    #[test]
    fn constant_fast_path_does_not_rewire() {
        let producer = make_constant(1.0);
        let consumer = make_constant(0.0);
        NodeCell::set_input(&consumer, "in", producer.clone()).unwrap();

        NodeCell::set_input_value(&consumer, "in", 2.0).unwrap();
        assert!(NodeRef::ptr_eq(consumer.borrow().input("in").unwrap(), &producer));
        assert_eq!(producer.borrow().downcast_ref::<Constant>().unwrap().get(), 2.0);
    }

    #[test]
    fn reciprocal_edges_maintained() {
        let producer = make_constant(1.0);
        let consumer = make_constant(0.0);
        NodeCell::set_input(&consumer, "in", producer.clone()).unwrap();
        assert_eq!(producer.borrow().outputs.len(), 1);

        NodeCell::disconnect_inputs(&consumer);
        assert_eq!(producer.borrow().outputs.len(), 0);
        assert!(consumer.borrow().input("in").is_none());
    }

    #[test]
    fn output_buffer_never_shrinks() {
        let mut out = OutputBuffer::new(1, 64);
        out.ensure_capacity(2, 64);
        assert_eq!(out.num_channels(), 2);
        out.ensure_capacity(1, 32);
        assert_eq!(out.num_channels(), 2);
        assert_eq!(out.block_size(), 64);
    }

    #[test]
    fn lookback_carries_last_sample() {
        let mut out = OutputBuffer::new(1, 4);
        out.channel_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        out.advance_lookback(4);
        assert_eq!(out.lookback(0), 4.0);
    }

    fn tick(node: &NodeRef) -> f32 {
        let ctx = GraphContext { sample_rate: 48_000.0 };
        NodeCell::tick(node, &ctx, 1).unwrap();
        node.borrow().out().channel(0)[0]
    }

    #[test]
    fn node_plus_node_wires_an_add_node() {
        let sum = make_constant(1.0) + make_constant(2.0);
        assert_eq!(sum.borrow().name(), "add");
        assert_eq!(tick(&sum), 3.0);
    }

    #[test]
    fn node_times_scalar_promotes_scalar_to_constant() {
        let product = make_constant(2.0) * 3.0;
        assert_eq!(product.borrow().name(), "multiply");
        assert_eq!(tick(&product), 6.0);
    }

    #[test]
    fn scale_remaps_natural_range() {
        let scaled = make_constant(1.0).scale(0.0, 100.0, crate::nodes::ScaleMode::Linear);
        assert!((tick(&scaled) - 100.0).abs() < 1e-3);
    }
}
