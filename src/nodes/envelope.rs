//! Attack/Sustain/Release envelope generator.

use std::any::Any;

use crate::node::{ChannelBounds, GraphContext, Inputs, NodeImpl, OutputBuffer};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    Attack,
    Sustain,
    Release,
}

/// A one-shot gate envelope: ramps to 1.0 over `attack` seconds, holds at
/// 1.0 for `sustain` seconds, then ramps to 0.0 over `release` seconds.
/// `trigger("gate", 1.0)` (re)starts the envelope from `Idle` or restarts
/// it mid-flight; reaching the end of `Release` marks the node finished.
pub struct Asr {
    stage: Stage,
    level: f32,
    elapsed: f32,
    attack: f32,
    sustain: f32,
    release: f32,
    sample_rate: f32,
    /// Set on the first `trigger`, cleared once a full cycle completes.
    /// Distinguishes "never started" from "finished", since both look
    /// like `Stage::Idle` with `level == 0.0`.
    has_played: bool,
    finished: bool,
}

impl Asr {
    pub fn new(attack: f32, sustain: f32, release: f32) -> Self {
        Self {
            stage: Stage::Idle,
            level: 0.0,
            elapsed: 0.0,
            attack: attack.max(0.0),
            sustain: sustain.max(0.0),
            release: release.max(0.0),
            sample_rate: 48_000.0,
            has_played: false,
            finished: false,
        }
    }

    fn advance_sample(&mut self) -> f32 {
        let dt = 1.0 / self.sample_rate;
        match self.stage {
            Stage::Idle => 0.0,
            Stage::Attack => {
                self.elapsed += dt;
                self.level = if self.attack <= 0.0 { 1.0 } else { (self.elapsed / self.attack).min(1.0) };
                if self.level >= 1.0 {
                    self.stage = Stage::Sustain;
                    self.elapsed = 0.0;
                }
                self.level
            }
            Stage::Sustain => {
                self.elapsed += dt;
                if self.elapsed >= self.sustain {
                    self.stage = Stage::Release;
                    self.elapsed = 0.0;
                }
                self.level
            }
            Stage::Release => {
                self.elapsed += dt;
                self.level = if self.release <= 0.0 {
                    0.0
                } else {
                    (1.0 - self.elapsed / self.release).max(0.0)
                };
                if self.level <= 0.0 {
                    self.stage = Stage::Idle;
                    self.finished = true;
                }
                self.level
            }
        }
    }
}

impl NodeImpl for Asr {
    fn name(&self) -> &'static str {
        "asr"
    }

    fn process(&mut self, ctx: &GraphContext, _inputs: &Inputs<'_>, out: &mut OutputBuffer, num_frames: usize) {
        self.sample_rate = ctx.sample_rate as f32;
        let buf = out.channel_mut(0);
        for frame in buf.iter_mut().take(num_frames) {
            *frame = self.advance_sample();
        }
    }

    fn channel_bounds(&self) -> ChannelBounds {
        ChannelBounds::generator(1)
    }

    fn trigger(&mut self, name: &str, value: f32) {
        if name == "gate" && value > 0.0 {
            self.stage = Stage::Attack;
            self.elapsed = 0.0;
            self.has_played = true;
            self.finished = false;
        }
    }

    fn is_finished(&self) -> bool {
        self.has_played && self.finished
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
        GraphContext { sample_rate: 10.0 }
    }

    #[test]
    fn idle_until_triggered() {
        let mut env = Asr::new(0.1, 0.1, 0.1);
        let mut out = OutputBuffer::new(1, 4);
        env.process(&ctx(), &Inputs::empty(), &mut out, 4);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn trigger_ramps_up_then_down() {
        let mut env = Asr::new(0.1, 0.1, 0.1);
        env.trigger("gate", 1.0);
        let mut out = OutputBuffer::new(1, 10);
        env.process(&ctx(), &Inputs::empty(), &mut out, 10);
        assert!(out.channel(0)[0] > 0.0);
        let peak = out.channel(0).iter().cloned().fold(0.0_f32, f32::max);
        assert!((peak - 1.0).abs() < 0.2);
    }
}
