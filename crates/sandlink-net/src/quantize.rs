//! 16-bit elevation quantization over a connection-wide range.
//!
//! Encoding truncates rather than rounds after adding a half-step bias. Both
//! ends must reproduce this arithmetic exactly in `f32`.

/// Largest elevation code.
pub const MAX_CODE: u16 = u16::MAX;

/// Converts elevations to and from 16-bit codes for one elevation range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationQuantizer {
    min: f32,
    scale: f32,
    bias: f32,
    step: f32,
}

impl ElevationQuantizer {
    /// Build a quantizer for `[min, max]`. The caller guarantees `min < max`.
    pub fn new(min: f32, max: f32) -> Self {
        let scale = MAX_CODE as f32 / (max - min);
        Self {
            min,
            scale,
            bias: 0.5 - min * scale,
            step: (max - min) / MAX_CODE as f32,
        }
    }

    /// Quantize one elevation, saturating outside the range.
    #[inline]
    pub fn encode(&self, elevation: f32) -> u16 {
        let raw = elevation * self.scale + self.bias;
        if raw <= 0.0 {
            0
        } else if raw >= MAX_CODE as f32 {
            MAX_CODE
        } else {
            raw as u16
        }
    }

    /// Recover the elevation a code stands for.
    #[inline]
    pub fn decode(&self, code: u16) -> f32 {
        code as f32 * self.step + self.min
    }

    /// Width of one quantization step.
    pub fn step(&self) -> f32 {
        self.step
    }
}
