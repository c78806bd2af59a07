//! Integration tests for the concrete scenarios a correct pull scheduler
//! must satisfy, exercised only through the public `AudioGraph`/`Patch`/
//! `PatchSpec` surface.

use std::any::Any;
use std::cell::Cell;
use std::f32::consts::TAU;
use std::rc::Rc;

use hyasynth::nodes::{Add, ChannelArray, Multiply, Sine};
use hyasynth::{
    constant, AudioGraph, ChannelBounds, EngineConfig, GraphContext, Inputs, NodeCell, NodeImpl,
    NodeRegistry, OutputBuffer, Patch, PatchNodeSpec, PatchSpec,
};

// S1 — Constant sum.
#[test]
fn s1_constant_sum() {
    let add = NodeCell::new(Box::new(Add::new()), 64);
    NodeCell::set_input(&add, "a", constant(0.25, 64)).unwrap();
    NodeCell::set_input(&add, "b", constant(0.75, 64)).unwrap();

    let mut graph = AudioGraph::with_defaults();
    graph.add_output_node(add.clone()).unwrap();
    graph.pull_input(64).unwrap();

    let node = add.borrow();
    assert!(node.out().channel(0)[..64].iter().all(|&s| (s - 1.0).abs() < 1e-6));
}

// S2 — Sine purity.
#[test]
fn s2_sine_purity() {
    let sine = NodeCell::new(Box::new(Sine::new(440.0)), 256);

    let mut graph = AudioGraph::with_defaults();
    graph.add_output_node(sine.clone()).unwrap();
    graph.pull_input(256).unwrap();

    let node = sine.borrow();
    for (n, &sample) in node.out().channel(0)[..256].iter().enumerate() {
        let expected = (TAU * 440.0 * n as f32 / 48_000.0).sin();
        assert!((sample - expected).abs() < 1e-5, "sample {n}: {sample} vs {expected}");
    }
}

// S3 — Up-mix inference.
#[test]
fn s3_upmix_inference() {
    let sine = NodeCell::new(Box::new(Sine::new(220.0)), 64);
    let array = NodeCell::new(Box::new(ChannelArray::new()), 64);
    NodeCell::add_variadic_input(&array, constant(0.5, 64)).unwrap();
    NodeCell::add_variadic_input(&array, constant(1.0, 64)).unwrap();

    let root = NodeCell::new(Box::new(Multiply::new()), 64);
    NodeCell::set_input(&root, "a", sine).unwrap();
    NodeCell::set_input(&root, "b", array).unwrap();

    assert_eq!(root.borrow().num_output_channels(), 2);

    let mut graph = AudioGraph::with_defaults();
    graph.add_output_node(root.clone()).unwrap();
    graph.pull_input(64).unwrap();

    let node = root.borrow();
    let ch0 = node.out().channel(0);
    let ch1 = node.out().channel(1);
    for i in 0..64 {
        assert!((ch1[i] - ch0[i] * 2.0).abs() < 1e-5, "frame {i}: ch0={} ch1={}", ch0[i], ch1[i]);
    }
}

/// A minimal oscillator stand-in that increments a shared counter once
/// per `process` call, used by S4 to observe evaluation count directly
/// rather than inferring it from timing.
struct CountingSine {
    calls: Rc<Cell<u32>>,
}

impl NodeImpl for CountingSine {
    fn name(&self) -> &'static str {
        "counting-sine"
    }

    fn process(&mut self, _ctx: &GraphContext, _inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        self.calls.set(self.calls.get() + 1);
        out.channel_mut(0)[..num_frames].fill(1.0);
    }

    fn channel_bounds(&self) -> ChannelBounds {
        ChannelBounds::generator(1)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// S4 — Shared subgraph evaluated once.
#[test]
fn s4_shared_subgraph_evaluated_once() {
    let calls = Rc::new(Cell::new(0));
    let s = NodeCell::new(Box::new(CountingSine { calls: calls.clone() }), 64);

    let root = NodeCell::new(Box::new(Add::new()), 64);
    NodeCell::set_input(&root, "a", s.clone()).unwrap();
    NodeCell::set_input(&root, "b", s).unwrap();

    let mut graph = AudioGraph::with_defaults();
    graph.add_output_node(root).unwrap();
    graph.pull_input(64).unwrap();

    assert_eq!(calls.get(), 1);
}

// S5 — Patch polyphony.
#[test]
fn s5_patch_polyphony() {
    let mut spec = PatchSpec::new("square-voice");
    let freq = spec.add_node_spec(PatchNodeSpec::constant(0, 110.0).with_input_name("freq"));
    let square = spec.add_node_spec(PatchNodeSpec::new(0, "square").with_input("frequency", freq));
    spec.set_output(square);

    let registry = NodeRegistry::with_builtins();
    let config = EngineConfig::default();
    let graph_ctx = GraphContext { sample_rate: config.sample_rate };

    let freqs: Vec<f32> = (0..8).map(|k| 110.0 * 2f32.powf(k as f32 / 12.0)).collect();

    // Each voice pulled through its own solo graph, summed in plain code.
    let mut reference = vec![0.0f32; 64];
    for &f in &freqs {
        let mut patch = Patch::from_spec(&spec, &registry, &graph_ctx, 64).unwrap();
        patch.set_input_value("freq", f).unwrap();
        let root = patch.output().unwrap().clone();
        let mut solo = AudioGraph::new(&config, 1);
        solo.add_output_node(root.clone()).unwrap();
        solo.pull_input(64).unwrap();
        let node = root.borrow();
        for (acc, &s) in reference.iter_mut().zip(node.out().channel(0)[..64].iter()) {
            *acc += s;
        }
    }

    // All eight voices pulled together through one shared graph.
    let mut graph = AudioGraph::new(&config, 1);
    let mut roots = Vec::new();
    for &f in &freqs {
        let mut patch = Patch::from_spec(&spec, &registry, &graph_ctx, 64).unwrap();
        patch.set_input_value("freq", f).unwrap();
        roots.push(patch.output().unwrap().clone());
        graph.add_output_patch(patch).unwrap();
    }
    graph.pull_input(64).unwrap();

    assert_eq!(graph.patch_count(), 8);

    let mut summed = vec![0.0f32; 64];
    for root in &roots {
        let node = root.borrow();
        for (acc, &s) in summed.iter_mut().zip(node.out().channel(0)[..64].iter()) {
            *acc += s;
        }
    }
    for i in 0..64 {
        assert!((summed[i] - reference[i]).abs() < 1e-5, "frame {i}: graph={} reference={}", summed[i], reference[i]);
    }
}

// S6 — Auto-free.
#[test]
fn s6_auto_free_removes_finished_patch() {
    let mut spec = PatchSpec::new("one-shot");
    let env = spec.add_node_spec(PatchNodeSpec::new(0, "asr"));
    spec.set_output(env);

    let registry = NodeRegistry::with_builtins();
    let config = EngineConfig { max_block_size: 64, ..EngineConfig::default() };
    let graph_ctx = GraphContext { sample_rate: config.sample_rate };

    let mut patch = Patch::from_spec(&spec, &registry, &graph_ctx, 64).unwrap();
    NodeCell::trigger(patch.output().unwrap(), "gate", 1.0);
    patch.set_auto_free(true);

    let mut graph = AudioGraph::new(&config, 1);
    graph.add_output_patch(patch).unwrap();
    assert_eq!(graph.patch_count(), 1);

    // Registry default ASR is attack=0.01s, sustain=0.1s, release=0.3s;
    // at 48kHz/64-frame blocks that's comfortably under 400 ticks.
    for _ in 0..400 {
        graph.pull_input(64).unwrap();
        if graph.patch_count() == 0 {
            break;
        }
    }

    assert_eq!(graph.patch_count(), 0);
}
