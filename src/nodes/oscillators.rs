//! Periodic waveform generators: `Sine` and `Square`.

use std::any::Any;
use std::f32::consts::TAU;

use crate::node::{ChannelBounds, GraphContext, Inputs, NodeImpl, OutputBuffer};

fn read_scalar(inputs: &Inputs<'_>, name: &str, frame: usize, default: f32) -> f32 {
    match inputs.get(name) {
        Some(producer) => producer.borrow().out().channel(0)[frame],
        None => default,
    }
}

/// A sine wave oscillator. `frequency` may be a constant or a driving
/// node; read once per sample so frequency modulation is sample-accurate.
pub struct Sine {
    phase: f64,
    default_frequency: f32,
}

impl Sine {
    pub fn new(frequency: f32) -> Self {
        Self { phase: 0.0, default_frequency: frequency }
    }
}

impl NodeImpl for Sine {
    fn name(&self) -> &'static str {
        "sine"
    }

    fn process(&mut self, ctx: &GraphContext, inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        let buf = out.channel_mut(0);
        for frame in buf.iter_mut().take(num_frames) {
            let freq = read_scalar(inputs, "frequency", 0, self.default_frequency);
            *frame = (self.phase as f32 * TAU).sin();
            self.phase += freq as f64 / ctx.sample_rate;
            self.phase -= self.phase.floor();
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

/// A band-limited-free (naive) pulse wave with adjustable duty cycle.
pub struct Square {
    phase: f64,
    default_frequency: f32,
    duty: f32,
}

impl Square {
    pub fn new(frequency: f32, duty: f32) -> Self {
        Self { phase: 0.0, default_frequency: frequency, duty: duty.clamp(0.01, 0.99) }
    }
}

impl NodeImpl for Square {
    fn name(&self) -> &'static str {
        "square"
    }

    fn process(&mut self, ctx: &GraphContext, inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        let buf = out.channel_mut(0);
        for frame in buf.iter_mut().take(num_frames) {
            let freq = read_scalar(inputs, "frequency", 0, self.default_frequency);
            *frame = if self.phase < self.duty as f64 { 1.0 } else { -1.0 };
            self.phase += freq as f64 / ctx.sample_rate;
            self.phase -= self.phase.floor();
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

    fn ctx() -> GraphContext {
        GraphContext { sample_rate: 48_000.0 }
    }

    #[test]
    fn sine_starts_at_zero_and_stays_bounded() {
        let mut node = Sine::new(440.0);
        let mut out = OutputBuffer::new(1, 64);
        node.process(&ctx(), &Inputs::empty(), &mut out, 64);
        assert_eq!(out.channel(0)[0], 0.0);
        assert!(out.channel(0).iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn square_respects_duty_cycle() {
        let mut node = Square::new(100.0, 0.25);
        let mut out = OutputBuffer::new(1, 480);
        node.process(&ctx(), &Inputs::empty(), &mut out, 480);
        let high = out.channel(0).iter().filter(|&&s| s > 0.0).count();
        // One period at 100 Hz over 480 frames @ 48kHz is one full cycle;
        // roughly a quarter of it should be high.
        assert!(high > 80 && high < 160, "high={high}");
    }
}
