//! Binary arithmetic and scaling nodes. The arithmetic kinds each accept
//! two named inputs, `"a"` and `"b"`; bare numeric operands are promoted to
//! `Constant` by the `NodeRef` operator overloads, not by these nodes
//! themselves.

use std::any::Any;

use crate::node::{ChannelBounds, GraphContext, Inputs, NodeImpl, OutputBuffer};

macro_rules! binary_op {
    ($name:ident, $tag:expr, $op:expr) => {
        #[derive(Default)]
        pub struct $name;

        impl $name {
            pub fn new() -> Self {
                Self
            }
        }

        impl NodeImpl for $name {
            fn name(&self) -> &'static str {
                $tag
            }

            fn process(&mut self, _ctx: &GraphContext, inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
                let op: fn(f32, f32) -> f32 = $op;
                for c in 0..out.num_channels() {
                    let a = read_channel(inputs, "a", c, num_frames);
                    let b = read_channel(inputs, "b", c, num_frames);
                    let dst = out.channel_mut(c);
                    for i in 0..num_frames {
                        dst[i] = op(a[i], b[i]);
                    }
                }
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }
    };
}

/// Read `num_frames` samples of `name`'s channel `c`, widening a
/// narrower producer by repeating its last channel (matching
/// `NodeCell::update_channels`'s own upmix rule) and defaulting to
/// silence if the slot is unconnected.
fn read_channel(inputs: &Inputs<'_>, name: &str, c: usize, num_frames: usize) -> Vec<f32> {
    match inputs.get(name) {
        Some(producer) => {
            let src = producer.borrow();
            let src_c = c.min(src.out().num_channels().saturating_sub(1));
            src.out().channel(src_c)[..num_frames].to_vec()
        }
        None => vec![0.0; num_frames],
    }
}

binary_op!(Add, "add", |a, b| a + b);
binary_op!(Subtract, "subtract", |a, b| a - b);
binary_op!(Multiply, "multiply", |a, b| a * b);
binary_op!(Divide, "divide", |a, b| if b == 0.0 { 0.0 } else { a / b });

/// Linear range remapping: `out = (in - in_min) / (in_max - in_min) *
/// (out_max - out_min) + out_min`, unclamped.
pub struct Scale {
    pub in_min: f32,
    pub in_max: f32,
    pub out_min: f32,
    pub out_max: f32,
}

impl Scale {
    pub fn new(in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> Self {
        Self { in_min, in_max, out_min, out_max }
    }
}

impl NodeImpl for Scale {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn process(&mut self, _ctx: &GraphContext, inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        let span_in = self.in_max - self.in_min;
        let span_out = self.out_max - self.out_min;
        for c in 0..out.num_channels() {
            let src = read_channel(inputs, "a", c, num_frames);
            let dst = out.channel_mut(c);
            for i in 0..num_frames {
                let t = if span_in.abs() < f32::EPSILON { 0.0 } else { (src[i] - self.in_min) / span_in };
                dst[i] = self.out_min + t * span_out;
            }
        }
    }

    fn channel_bounds(&self) -> ChannelBounds {
        ChannelBounds::default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Selects which of the two scale kinds [`crate::node::NodeRef::scale`]
/// constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    Linear,
    LinearToExponential,
}

/// Exponential range remapping, useful for Hz/db-style parameter curves:
/// `out = out_min * (out_max / out_min) ^ t`, where `t` is the linear
/// position of the input within `[in_min, in_max]`.
pub struct LinExp {
    pub in_min: f32,
    pub in_max: f32,
    pub out_min: f32,
    pub out_max: f32,
}

impl LinExp {
    pub fn new(in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> Self {
        Self { in_min, in_max, out_min: out_min.max(f32::MIN_POSITIVE), out_max: out_max.max(f32::MIN_POSITIVE) }
    }
}

impl NodeImpl for LinExp {
    fn name(&self) -> &'static str {
        "lin-exp"
    }

    fn process(&mut self, _ctx: &GraphContext, inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        let span_in = self.in_max - self.in_min;
        let ratio = self.out_max / self.out_min;
        for c in 0..out.num_channels() {
            let src = read_channel(inputs, "a", c, num_frames);
            let dst = out.channel_mut(c);
            for i in 0..num_frames {
                let t = if span_in.abs() < f32::EPSILON { 0.0 } else { (src[i] - self.in_min) / span_in };
                dst[i] = self.out_min * ratio.powf(t);
            }
        }
    }

    fn channel_bounds(&self) -> ChannelBounds {
        ChannelBounds::default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
