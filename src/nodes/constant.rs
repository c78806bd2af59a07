//! A single scalar value, broadcast across every channel and frame.
//!
//! `Constant` is the promotion target for bare numeric literals used as
//! node inputs and the fast path for `Patch::set_input_value`: a host
//! stores a new value with a single lock-free write, never touching the
//! graph's wiring.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use crate::buffer::Buffer;
use crate::node::{ChannelBounds, GraphContext, Inputs, NodeImpl, OutputBuffer};

pub struct Constant {
    bits: AtomicU32,
}

impl Constant {
    pub fn new(value: f32) -> Self {
        Self { bits: AtomicU32::new(value.to_bits()) }
    }

    /// Lock-free read. May be called from either thread.
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Lock-free write: a single aligned store, safe to call while the
    /// audio thread concurrently reads via [`Self::get`].
    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl NodeImpl for Constant {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn process(&mut self, _ctx: &GraphContext, _inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        let value = self.get();
        for c in 0..out.num_channels() {
            out.channel_mut(c)[..num_frames].fill(value);
        }
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

/// A single `Buffer` value, held for template-buffer-valued node inputs
/// (sample players, shape carriers) the same way `Constant` holds a
/// scalar. Unlike `Constant`'s lock-free store, a `Buffer` swap takes a
/// write lock: it's not a per-sample value, so contention is rare.
pub struct BufferConstant {
    buffer: RwLock<Buffer>,
}

impl BufferConstant {
    pub fn new(buffer: Buffer) -> Self {
        Self { buffer: RwLock::new(buffer) }
    }

    pub fn get(&self) -> Buffer {
        self.buffer.read().expect("buffer constant lock poisoned").clone()
    }

    pub fn set(&self, buffer: Buffer) {
        *self.buffer.write().expect("buffer constant lock poisoned") = buffer;
    }
}

impl NodeImpl for BufferConstant {
    fn name(&self) -> &'static str {
        "buffer-constant"
    }

    fn process(&mut self, _ctx: &GraphContext, _inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        for c in 0..out.num_channels() {
            out.channel_mut(c)[..num_frames].fill(0.0);
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_channel_with_current_value() {
        let mut node = Constant::new(0.5);
        let mut out = OutputBuffer::new(2, 8);
        let ctx = GraphContext { sample_rate: 48_000.0 };
        let inputs = Inputs::empty();
        node.process(&ctx, &inputs, &mut out, 8);
        assert!(out.channel(0).iter().all(|&s| s == 0.5));
        assert!(out.channel(1).iter().all(|&s| s == 0.5));
    }

    #[test]
    fn set_is_visible_to_next_process() {
        let node = Constant::new(1.0);
        node.set(2.0);
        assert_eq!(node.get(), 2.0);
    }

    #[test]
    fn buffer_constant_set_replaces_held_buffer() {
        let node = BufferConstant::new(Buffer::new(1, 4));
        node.set(Buffer::new(1, 8));
        assert_eq!(node.get().num_frames(), 8);
    }
}
