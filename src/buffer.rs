//! Multi-channel PCM storage with interpolated fractional-frame reads.
//!
//! A [`Buffer`] is channel-planar: each channel's samples are contiguous,
//! which keeps the inter-channel stride constant no matter how many
//! channels are in play. File decoding is not this module's concern; it
//! only exposes a way for decoder code to hand over already-decoded
//! per-channel samples and be told if they don't fit.

use crate::error::SpecError;

/// Interpolation mode used by [`Buffer::get_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
}

/// An owned block of `num_channels × num_frames` samples.
#[derive(Debug, Clone)]
pub struct Buffer {
    channels: Vec<Vec<f32>>,
    sample_rate: f64,
    interpolate: Interpolation,
}

impl Buffer {
    /// Allocate zeroed planar storage.
    pub fn new(num_channels: usize, num_frames: usize) -> Self {
        Self {
            channels: (0..num_channels).map(|_| vec![0.0; num_frames]).collect(),
            sample_rate: 48_000.0,
            interpolate: Interpolation::Linear,
        }
    }

    /// Build a buffer by copying externally supplied per-channel data.
    /// All channels must be the same length.
    pub fn new_from(data: Vec<Vec<f32>>) -> Self {
        let frames = data.first().map(|c| c.len()).unwrap_or(0);
        debug_assert!(data.iter().all(|c| c.len() == frames));
        Self {
            channels: data,
            sample_rate: 48_000.0,
            interpolate: Interpolation::Linear,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolate
    }

    pub fn set_interpolation(&mut self, mode: Interpolation) {
        self.interpolate = mode;
    }

    pub fn channel(&self, c: usize) -> &[f32] {
        &self.channels[c]
    }

    pub fn channel_mut(&mut self, c: usize) -> &mut [f32] {
        &mut self.channels[c]
    }

    /// Read channel 0 at a fractional frame index, clamped to the buffer's
    /// extent.
    pub fn get_frame(&self, frame: f64) -> f32 {
        let last = (self.num_frames().max(1) - 1) as f64;
        let frame = frame.clamp(0.0, last);

        match self.interpolate {
            Interpolation::Nearest => self.channels[0][frame as usize],
            Interpolation::Linear => {
                let lo = frame.floor() as usize;
                let hi = frame.ceil() as usize;
                let frac = (frame - lo as f64) as f32;
                (1.0 - frac) * self.channels[0][lo] + frac * self.channels[0][hi]
            }
        }
    }

    /// Apply [`Self::offset_to_frame`] and read. Base `Buffer` treats
    /// offsets and frame indices identically; subclass-equivalents
    /// ([`EnvelopeBuffer`], [`WaveShaperBuffer`]) remap the offset domain.
    pub fn get(&self, offset: f64) -> f32 {
        self.get_frame(self.offset_to_frame(offset))
    }

    pub fn offset_to_frame(&self, offset: f64) -> f64 {
        offset
    }

    pub fn frame_to_offset(&self, frame: f64) -> f64 {
        frame
    }

    /// Populate every frame of every channel with a constant value.
    pub fn fill(&mut self, value: f32) {
        for channel in &mut self.channels {
            channel.fill(value);
        }
    }

    /// Populate every frame of every channel by sampling a transfer
    /// function of the frame's offset.
    pub fn fill_with(&mut self, f: impl Fn(f64) -> f32) {
        let frames = self.num_frames();
        for channel in &mut self.channels {
            for (frame, sample) in channel.iter_mut().enumerate() {
                *sample = f(self.frame_to_offset(frame as f64));
            }
        }
    }

    /// Replace this buffer's contents with externally-decoded per-channel
    /// samples, in place. Used to refill a preallocated buffer (e.g. one
    /// already wired into a graph) from freshly loaded file data without
    /// reallocating it.
    ///
    /// Fails if `data`'s channel count, frame count, or `sample_rate`
    /// doesn't match this buffer's current shape.
    pub fn load_into(&mut self, data: &[Vec<f32>], sample_rate: f64) -> Result<(), SpecError> {
        let got_channels = data.len();
        let got_frames = data.first().map(|c| c.len()).unwrap_or(0);
        let shape_matches = got_channels == self.num_channels()
            && got_frames == self.num_frames()
            && (sample_rate - self.sample_rate).abs() < f64::EPSILON;
        if !shape_matches {
            return Err(SpecError::BufferShapeMismatch {
                expected_channels: self.num_channels(),
                expected_frames: self.num_frames(),
                expected_sample_rate: self.sample_rate,
                got_channels,
                got_frames,
                got_sample_rate: sample_rate,
            });
        }
        for (c, src) in data.iter().enumerate() {
            self.channels[c].copy_from_slice(src);
        }
        Ok(())
    }

    /// Partition a mono buffer into non-overlapping views of `frames_per_part`
    /// frames each, dropping any remainder shorter than a full part.
    pub fn split(&self, frames_per_part: usize) -> Result<Vec<Buffer>, &'static str> {
        if self.num_channels() != 1 {
            return Err("split currently only supports mono buffers");
        }
        let count = self.num_frames() / frames_per_part;
        let mut parts = Vec::with_capacity(count);
        for i in 0..count {
            let start = i * frames_per_part;
            let slice = self.channels[0][start..start + frames_per_part].to_vec();
            let mut part = Buffer::new_from(vec![slice]);
            part.interpolate = self.interpolate;
            part.sample_rate = self.sample_rate;
            parts.push(part);
        }
        Ok(parts)
    }
}

/// A mono window buffer whose offset domain is `[0, 1]`, used to shape
/// envelopes (ASR/AR/ADSR amplitude curves, grain windows, etc).
#[derive(Debug, Clone)]
pub struct EnvelopeBuffer {
    inner: Buffer,
}

impl EnvelopeBuffer {
    /// A flat envelope at maximum amplitude.
    pub fn new(length: usize) -> Self {
        let mut inner = Buffer::new(1, length);
        inner.fill(1.0);
        Self { inner }
    }

    pub fn hanning(length: usize) -> Self {
        let mut env = Self::new(length);
        let n = length.max(2) - 1;
        for x in 0..length {
            env.inner.channels[0][x] =
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * x as f32 / n as f32).cos());
        }
        env
    }

    pub fn triangle(length: usize) -> Self {
        let mut env = Self::new(length);
        let half = length / 2;
        for x in 0..half {
            env.inner.channels[0][x] = x as f32 / half.max(1) as f32;
        }
        for x in 0..(length - half) {
            env.inner.channels[0][half + x] = 1.0 - x as f32 / half.max(1) as f32;
        }
        env
    }

    pub fn linear_decay(length: usize) -> Self {
        let mut env = Self::new(length);
        for x in 0..length {
            env.inner.channels[0][x] = 1.0 - x as f32 / length.max(1) as f32;
        }
        env
    }

    /// Fill from an exponential probability density, parameterised by `mu`.
    pub fn fill_exponential(&mut self, mu: f32) {
        let frames = self.inner.num_frames().max(1) as f32;
        for x in 0..self.inner.num_frames() {
            let t = x as f32 / frames;
            self.inner.channels[0][x] = exponential_pdf(t, mu);
        }
    }

    /// Fill from a beta probability density, parameterised by `a`/`b`.
    pub fn fill_beta(&mut self, a: f32, b: f32) {
        let frames = self.inner.num_frames().max(1) as f32;
        for x in 0..self.inner.num_frames() {
            let t = x as f32 / frames;
            self.inner.channels[0][x] = beta_pdf(t, a, b);
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.inner
    }

    pub fn offset_to_frame(&self, offset: f64) -> f64 {
        map(offset, 0.0, 1.0, 0.0, (self.inner.num_frames().max(1) - 1) as f64)
    }

    pub fn frame_to_offset(&self, frame: f64) -> f64 {
        map(frame, 0.0, (self.inner.num_frames().max(1) - 1) as f64, 0.0, 1.0)
    }

    pub fn get(&self, offset: f64) -> f32 {
        self.inner.get_frame(self.offset_to_frame(offset))
    }
}

/// A mono transfer-function buffer whose offset domain is `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct WaveShaperBuffer {
    inner: Buffer,
}

impl WaveShaperBuffer {
    /// A 1-to-1 linear mapping.
    pub fn new(length: usize) -> Self {
        let mut inner = Buffer::new(1, length);
        let n = inner.num_frames();
        for x in 0..n {
            let offset = map(x as f64, 0.0, (n.max(1) - 1) as f64, -1.0, 1.0);
            inner.channels[0][x] = offset as f32;
        }
        Self { inner }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.inner
    }

    pub fn offset_to_frame(&self, offset: f64) -> f64 {
        map(offset, -1.0, 1.0, 0.0, (self.inner.num_frames().max(1) - 1) as f64)
    }

    pub fn frame_to_offset(&self, frame: f64) -> f64 {
        map(frame, 0.0, (self.inner.num_frames().max(1) - 1) as f64, -1.0, 1.0)
    }

    pub fn get(&self, offset: f64) -> f32 {
        self.inner.get_frame(self.offset_to_frame(offset))
    }
}

fn map(x: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    if (in_hi - in_lo).abs() < f64::EPSILON {
        return out_lo;
    }
    out_lo + (x - in_lo) * (out_hi - out_lo) / (in_hi - in_lo)
}

fn exponential_pdf(x: f32, mu: f32) -> f32 {
    if mu <= 0.0 {
        return 0.0;
    }
    (-x / mu).exp() / mu
}

fn beta_pdf(x: f32, a: f32, b: f32) -> f32 {
    let x = x.clamp(1e-6, 1.0 - 1e-6);
    x.powf(a - 1.0) * (1.0 - x).powf(b - 1.0)
}
