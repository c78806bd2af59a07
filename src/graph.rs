//! The pull-driven block scheduler: a DAG of nodes rooted at a fixed
//! audio-out sink, ticked once per device callback.

use std::collections::HashSet;
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{GraphError, NodeError};
use crate::node::{GraphContext, NodeCell, NodeRef};
use crate::nodes::AudioOut;
use crate::patch::Patch;

/// The scheduler: owns the fixed-width output sink, the patches currently
/// playing through it, and the deferred-removal bookkeeping that keeps
/// structural mutation off the audio thread's critical path.
pub struct AudioGraph {
    ctx: GraphContext,
    block_size: usize,
    output: NodeRef,
    patches: Vec<Patch>,
    nodes_to_remove: Vec<NodeRef>,
    patch_indices_to_remove: Vec<usize>,
    running: bool,
    cpu_usage: f64,
}

impl AudioGraph {
    pub fn new(config: &EngineConfig, output_channels: usize) -> Self {
        let ctx = GraphContext { sample_rate: config.sample_rate };
        let output = NodeCell::new(Box::new(AudioOut::new(output_channels)), config.max_block_size);
        Self {
            ctx,
            block_size: config.max_block_size,
            output,
            patches: Vec::new(),
            nodes_to_remove: Vec::new(),
            patch_indices_to_remove: Vec::new(),
            running: false,
            cpu_usage: 0.0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&EngineConfig::default(), 2)
    }

    pub fn sample_rate(&self) -> f64 {
        self.ctx.sample_rate
    }

    pub fn context(&self) -> &GraphContext {
        &self.ctx
    }

    pub fn start(&mut self) {
        info!("audio graph starting (sample_rate={}, block_size={})", self.ctx.sample_rate, self.block_size);
        self.running = true;
    }

    pub fn stop(&mut self) {
        info!("audio graph stopping");
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Add a free-standing node as an input of the output sink.
    pub fn add_output_node(&mut self, node: NodeRef) -> Result<(), NodeError> {
        NodeCell::add_variadic_input(&self.output, node)?;
        Ok(())
    }

    /// Add a patch: wires its root output into the sink and takes
    /// ownership so its lifecycle (auto-free) can be tracked.
    pub fn add_output_patch(&mut self, patch: Patch) -> Result<(), NodeError> {
        if let Some(root) = patch.output().cloned() {
            NodeCell::add_variadic_input(&self.output, root)?;
        }
        self.patches.push(patch);
        Ok(())
    }

    /// Defer removal of a free-standing output node to the next tick
    /// boundary.
    pub fn remove_output_node(&mut self, node: NodeRef) {
        self.nodes_to_remove.push(node);
    }

    /// Defer removal of a patch (by index into `self.patches`) to the
    /// next tick boundary.
    pub fn remove_patch(&mut self, index: usize) {
        self.patch_indices_to_remove.push(index);
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    pub fn cpu_usage(&self) -> f64 {
        self.cpu_usage
    }

    /// Number of nodes reachable from the output sink.
    pub fn node_count(&self) -> usize {
        let mut seen = HashSet::new();
        count_reachable(&self.output, &mut seen);
        seen.len()
    }

    /// The tick: drain deferred removals, then recursively evaluate the
    /// output sink for `num_frames`, deduplicating shared subgraphs via a
    /// per-tick `processed` set so fan-out is evaluated exactly once.
    pub fn pull_input(&mut self, num_frames: usize) -> Result<(), GraphError> {
        self.drain_removals();

        let started = Instant::now();
        let mut processed = HashSet::new();
        trace!("pull_input: {num_frames} frames");
        let transitions = tick_recursive(&self.output, &self.ctx, num_frames, &mut processed)?;
        debug!("pull_input: evaluated {} distinct nodes", processed.len());

        for node in &transitions {
            for patch in &mut self.patches {
                patch.node_state_changed(node);
            }
        }
        for (i, patch) in self.patches.iter().enumerate() {
            if patch.is_finished() {
                self.patch_indices_to_remove.push(i);
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let budget = num_frames as f64 / self.ctx.sample_rate;
        let instantaneous = if budget > 0.0 { elapsed / budget } else { 0.0 };
        self.cpu_usage = self.cpu_usage * 0.9 + instantaneous * 0.1;

        Ok(())
    }

    /// Offline rendering: repeatedly pull `node` for `block_size` frames
    /// at a time (clearing the dedup set each iteration) until
    /// `total_frames` have been produced, returning the concatenated
    /// output.
    pub fn render(&self, node: &NodeRef, total_frames: usize, block_size: usize) -> Result<crate::buffer::Buffer, GraphError> {
        let num_channels = node.borrow().num_output_channels();
        let mut buffer = crate::buffer::Buffer::new(num_channels, total_frames);
        buffer.set_sample_rate(self.ctx.sample_rate);

        let mut written = 0;
        while written < total_frames {
            let this_block = block_size.min(total_frames - written);
            let mut processed = HashSet::new();
            tick_recursive(node, &self.ctx, this_block, &mut processed)?;
            let source = node.borrow();
            for c in 0..num_channels {
                buffer.channel_mut(c)[written..written + this_block]
                    .copy_from_slice(&source.out().channel(c)[..this_block]);
            }
            drop(source);
            written += this_block;
        }
        Ok(buffer)
    }

    /// Block until `timeout` elapses or the graph stops running.
    pub fn wait(&self, timeout: std::time::Duration) {
        let start = Instant::now();
        while self.running && start.elapsed() < timeout {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// DFS pretty-printer, one line per node, indented by depth, children
    /// in input-declaration order.
    pub fn print(&self) -> String {
        let mut out = String::new();
        let mut seen = HashSet::new();
        print_node(&self.output, 0, &mut out, &mut seen);
        out
    }

    /// Sample the output sink's current block (peak, RMS) and log a
    /// summary via the ambient logging layer.
    pub fn poll(&self) {
        let node = self.output.borrow();
        for c in 0..node.num_output_channels() {
            let channel = node.out().channel(c);
            if channel.is_empty() {
                continue;
            }
            let peak = channel.iter().fold(0.0_f32, |acc, &s| acc.max(s.abs()));
            let rms = (channel.iter().map(|&s| s * s).sum::<f32>() / channel.len() as f32).sqrt();
            info!("poll: channel {c} peak={peak:.4} rms={rms:.4}");
        }
    }

    fn drain_removals(&mut self) {
        for node in self.nodes_to_remove.drain(..) {
            let slot = self
                .output
                .borrow()
                .inputs_named()
                .find(|name| self.output.borrow().input(name).map(|n| NodeRef::ptr_eq(n, &node)).unwrap_or(false))
                .map(str::to_string);
            if let Some(slot) = slot {
                NodeCell::remove_input(&self.output, &slot);
            }
        }
        if !self.patch_indices_to_remove.is_empty() {
            let mut indices = std::mem::take(&mut self.patch_indices_to_remove);
            indices.sort_unstable();
            indices.dedup();
            for &i in indices.iter().rev() {
                if i < self.patches.len() {
                    let removed = self.patches.remove(i);
                    if let Some(root) = removed.output() {
                        let slot = self
                            .output
                            .borrow()
                            .inputs_named()
                            .find(|name| {
                                self.output
                                    .borrow()
                                    .input(name)
                                    .map(|n| NodeRef::ptr_eq(n, root))
                                    .unwrap_or(false)
                            })
                            .map(str::to_string);
                        if let Some(slot) = slot {
                            NodeCell::remove_input(&self.output, &slot);
                        }
                    }
                    drop(removed);
                } else {
                    warn!("remove_patch: index {i} out of range ({} patches)", self.patches.len());
                }
            }
        }
    }
}

fn tick_recursive(
    node: &NodeRef,
    ctx: &GraphContext,
    num_frames: usize,
    processed: &mut HashSet<*const ()>,
) -> Result<Vec<NodeRef>, GraphError> {
    let key = node.ptr() as *const ();
    if processed.contains(&key) {
        return Ok(Vec::new());
    }

    let children: Vec<NodeRef> = node.borrow().inputs_named().map(|name| node.borrow().input(name).unwrap().clone()).collect();

    let mut transitions = Vec::new();
    for child in &children {
        transitions.extend(tick_recursive(child, ctx, num_frames, processed)?);
    }

    let just_finished = NodeCell::tick(node, ctx, num_frames).map_err(GraphError::Node)?;
    processed.insert(key);
    if just_finished {
        transitions.push(node.clone());
    }
    Ok(transitions)
}

fn count_reachable(node: &NodeRef, seen: &mut HashSet<*const ()>) {
    let key = node.ptr() as *const ();
    if !seen.insert(key) {
        return;
    }
    let children: Vec<NodeRef> = node.borrow().inputs_named().map(|name| node.borrow().input(name).unwrap().clone()).collect();
    for child in &children {
        count_reachable(child, seen);
    }
}

fn print_node(node: &NodeRef, depth: usize, out: &mut String, seen: &mut HashSet<*const ()>) {
    let key = node.ptr() as *const ();
    let node_ref = node.borrow();
    out.push_str(&"  ".repeat(depth));
    out.push_str(node_ref.name());
    out.push('\n');
    if !seen.insert(key) {
        return;
    }
    let children: Vec<NodeRef> = node_ref.inputs_named().map(|name| node_ref.input(name).unwrap().clone()).collect();
    drop(node_ref);
    for child in &children {
        print_node(child, depth + 1, out, seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::constant;
    use crate::nodes::Add;

    #[test]
    fn node_count_deduplicates_shared_fanout() {
        let mut graph = AudioGraph::with_defaults();
        let shared = constant(1.0, graph.block_size);
        let left = NodeCell::new(Box::new(Add::new()), graph.block_size);
        let right = NodeCell::new(Box::new(Add::new()), graph.block_size);
        NodeCell::set_input(&left, "a", shared.clone()).unwrap();
        NodeCell::set_input(&left, "b", constant(0.0, graph.block_size)).unwrap();
        NodeCell::set_input(&right, "a", shared.clone()).unwrap();
        NodeCell::set_input(&right, "b", constant(0.0, graph.block_size)).unwrap();
        graph.add_output_node(left).unwrap();
        graph.add_output_node(right).unwrap();

        graph.pull_input(16).unwrap();
        assert_eq!(graph.node_count(), 1 /* output */ + 2 /* left, right */ + 3 /* shared + two zero constants */);
    }

    #[test]
    fn render_concatenates_blocks() {
        let graph = AudioGraph::with_defaults();
        let node = constant(1.0, 1024);
        let buffer = graph.render(&node, 100, 32).unwrap();
        assert_eq!(buffer.num_frames(), 100);
        assert!(buffer.channel(0).iter().all(|&s| s == 1.0));
    }
}
