//! Channel-routing utility nodes: `ChannelArray` and `AudioOut`.

use std::any::Any;

use crate::node::{ChannelBounds, GraphContext, Inputs, NodeImpl, OutputBuffer};

/// Collects an arbitrary number of mono (or wider) inputs into a single
/// multi-channel output, one input per output channel, in input order.
/// Variadic: producers are wired via `NodeCell::add_variadic_input`.
pub struct ChannelArray;

impl ChannelArray {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChannelArray {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeImpl for ChannelArray {
    fn name(&self) -> &'static str {
        "channel-array"
    }

    fn process(&mut self, _ctx: &GraphContext, inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        for (channel, (_, producer)) in inputs.iter().enumerate() {
            if channel >= out.num_channels() {
                break;
            }
            let src = producer.borrow();
            out.channel_mut(channel)[..num_frames].copy_from_slice(&src.out().channel(0)[..num_frames]);
        }
    }

    fn channel_bounds(&self) -> ChannelBounds {
        ChannelBounds {
            min_input_channels: 0,
            max_input_channels: usize::MAX,
            min_output_channels: 1,
            max_output_channels: usize::MAX,
            no_input_upmix: true,
        }
    }

    fn output_channel_count(&self, num_inputs: usize) -> Option<usize> {
        Some(num_inputs.max(1))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The fixed-width terminal sink a [`crate::graph::AudioGraph`] pulls.
/// Sums every connected input down to its own fixed channel count rather
/// than widening to match the widest input.
pub struct AudioOut {
    num_channels: usize,
}

impl AudioOut {
    pub fn new(num_channels: usize) -> Self {
        Self { num_channels: num_channels.max(1) }
    }
}

impl NodeImpl for AudioOut {
    fn name(&self) -> &'static str {
        "audio-out"
    }

    fn process(&mut self, _ctx: &GraphContext, inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        for c in 0..out.num_channels() {
            out.channel_mut(c)[..num_frames].fill(0.0);
        }
        for (_, producer) in inputs.iter() {
            let src = producer.borrow();
            let src_channels = src.out().num_channels();
            for c in 0..out.num_channels() {
                let src_c = c.min(src_channels.saturating_sub(1));
                let src_buf = src.out().channel(src_c);
                let dst_buf = out.channel_mut(c);
                for i in 0..num_frames {
                    dst_buf[i] += src_buf[i];
                }
            }
        }
    }

    fn channel_bounds(&self) -> ChannelBounds {
        ChannelBounds::fixed(self.num_channels)
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
    use crate::node::{constant, NodeCell};

    #[test]
    fn channel_array_places_each_input_on_its_own_channel() {
        let array = NodeCell::new(Box::new(ChannelArray::new()), 8);
        let left = constant(1.0, 8);
        let right = constant(2.0, 8);
        NodeCell::add_variadic_input(&array, left).unwrap();
        NodeCell::add_variadic_input(&array, right).unwrap();
        NodeCell::update_channels(&array).unwrap();
        assert_eq!(array.borrow().num_output_channels(), 2);
    }

    #[test]
    fn audio_out_sums_multiple_inputs() {
        let sink = NodeCell::new(Box::new(AudioOut::new(2)), 8);
        let a = constant(1.0, 8);
        let b = constant(2.0, 8);
        NodeCell::add_variadic_input(&sink, a).unwrap();
        NodeCell::add_variadic_input(&sink, b).unwrap();
        assert_eq!(sink.borrow().num_output_channels(), 2);
    }
}
