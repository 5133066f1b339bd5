//! Scalar band math on samples normalized to `[0, 1]`.
//!
//! These functions are the single source of truth for pixel math: the CPU
//! backend runs them per sample, and the GPU shader body is a literal
//! transliteration of the same formulas (see `shader.rs`), so both backends
//! agree within floating tolerance.

use crate::error::{CogtileError, CogtileResult};
use crate::pipeline::Operation;

/// Contrast magnitudes below this are treated as the identity. The sigmoidal
/// formulas divide by beta, which is undefined at zero.
pub const BETA_IDENTITY_EPS: f32 = 1e-6;

/// Raw integer samples for one band window. The pixel math only defines
/// behavior for 8/16/32-bit unsigned samples; everything else is rejected at
/// the decode boundary with `UnsupportedSampleType`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl SampleBuffer {
    /// Reassemble a typed buffer from little-endian bytes as delivered by an
    /// external decoder. `dtype` names follow the usual array-protocol
    /// spellings (`uint8`, `uint16`, `uint32`).
    pub fn from_le_bytes(dtype: &str, bytes: &[u8]) -> CogtileResult<Self> {
        match dtype {
            "uint8" => Ok(SampleBuffer::U8(bytes.to_vec())),
            "uint16" => {
                if bytes.len() % 2 != 0 {
                    return Err(CogtileError::decode("uint16 buffer has odd byte length"));
                }
                Ok(SampleBuffer::U16(
                    bytes
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]]))
                        .collect(),
                ))
            }
            "uint32" => {
                if bytes.len() % 4 != 0 {
                    return Err(CogtileError::decode(
                        "uint32 buffer length is not a multiple of 4",
                    ));
                }
                Ok(SampleBuffer::U32(
                    bytes
                        .chunks_exact(4)
                        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                ))
            }
            other => Err(CogtileError::unsupported_sample_type(other)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::U8(v) => v.len(),
            SampleBuffer::U16(v) => v.len(),
            SampleBuffer::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The maximum representable value for this integer width.
    pub fn type_max(&self) -> f32 {
        match self {
            SampleBuffer::U8(_) => u8::MAX as f32,
            SampleBuffer::U16(_) => u16::MAX as f32,
            SampleBuffer::U32(_) => u32::MAX as f32,
        }
    }

    pub fn get(&self, i: usize) -> f32 {
        match self {
            SampleBuffer::U8(v) => v[i] as f32,
            SampleBuffer::U16(v) => v[i] as f32,
            SampleBuffer::U32(v) => v[i] as f32,
        }
    }
}

/// One fetched, already-decoded band window: raw samples plus the scale they
/// normalize against. Immutable once fetched; the pipeline never writes back
/// into it.
#[derive(Clone, Debug, PartialEq)]
pub struct BandWindow {
    pub width: u32,
    pub height: u32,
    pub samples: SampleBuffer,
    /// Metadata-declared statistical maximum (STAC-derived scenes). When
    /// absent, the type's maximum representable value is used.
    pub declared_max: Option<f32>,
}

impl BandWindow {
    pub fn new(width: u32, height: u32, samples: SampleBuffer) -> Self {
        Self {
            width,
            height,
            samples,
            declared_max: None,
        }
    }

    pub fn with_declared_max(mut self, max: f32) -> Self {
        self.declared_max = Some(max);
        self
    }

    /// The value raw samples are divided by to reach `[0, 1]`.
    pub fn sample_max(&self) -> f32 {
        self.declared_max.unwrap_or_else(|| self.samples.type_max())
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Normalize every sample to `[0, 1]` float. The result is a fresh
    /// buffer; pipeline steps mutate copies, never the fetched window.
    pub fn normalized(&self) -> CogtileResult<Vec<f32>> {
        if self.samples.len() != self.pixel_count() {
            return Err(CogtileError::decode(format!(
                "band window is {}x{} but holds {} samples",
                self.width,
                self.height,
                self.samples.len()
            )));
        }
        let max = self.sample_max();
        Ok((0..self.samples.len())
            .map(|i| self.samples.get(i) / max)
            .collect())
    }

    /// Split an interleaved RGB window (3 samples per pixel) into three
    /// normalized channel buffers.
    pub fn normalized_rgb(&self) -> CogtileResult<[Vec<f32>; 3]> {
        if self.samples.len() != self.pixel_count() * 3 {
            return Err(CogtileError::decode(format!(
                "interleaved window is {}x{} but holds {} samples (expected {})",
                self.width,
                self.height,
                self.samples.len(),
                self.pixel_count() * 3
            )));
        }
        let max = self.sample_max();
        let n = self.pixel_count();
        let mut red = Vec::with_capacity(n);
        let mut green = Vec::with_capacity(n);
        let mut blue = Vec::with_capacity(n);
        for i in 0..n {
            red.push(self.samples.get(i * 3) / max);
            green.push(self.samples.get(i * 3 + 1) / max);
            blue.push(self.samples.get(i * 3 + 2) / max);
        }
        Ok([red, green, blue])
    }
}

/// `v^(1/g)` on a normalized sample.
pub fn gamma(v: f32, g: f32) -> f32 {
    v.powf(1.0 / g)
}

/// Forward sigmoidal contrast stretch for `beta > 0`.
pub fn sigmoidal_forward(v: f32, beta: f32, alpha: f32) -> f32 {
    let denominator =
        1.0 / (1.0 + (beta * (alpha - 1.0)).exp()) - 1.0 / (1.0 + (beta * alpha).exp());
    let numerator = 1.0 / (1.0 + (beta * (alpha - v)).exp()) - 1.0 / (1.0 + (beta * alpha).exp());
    numerator / denominator
}

/// Algebraic inverse of [`sigmoidal_forward`] for the same `beta`/`alpha`
/// (the forward formula solved for `v`).
pub fn sigmoidal_inverse(v: f32, beta: f32, alpha: f32) -> f32 {
    let s0 = 1.0 / (1.0 + (beta * alpha).exp());
    let s1 = 1.0 / (1.0 + (beta * alpha - beta).exp());
    let u = v * s1 - v * s0 + s0;
    (beta * alpha - (1.0 / u - 1.0).ln()) / beta
}

/// Sigmoidal contrast as dispatched by a pipeline step: positive contrast
/// applies the forward stretch, negative contrast the inverse, and a contrast
/// of (effectively) zero is the identity.
pub fn sigmoidal_contrast(v: f32, contrast: f32, bias: f32) -> f32 {
    let alpha = bias;
    let beta = contrast;
    if beta.abs() < BETA_IDENTITY_EPS {
        v
    } else if beta > 0.0 {
        sigmoidal_forward(v, beta, alpha)
    } else {
        sigmoidal_inverse(v, beta, alpha)
    }
}

/// Rescale `[min, max]` in source units to `[0, 1]`, clamping outside the
/// range. A degenerate range (`max <= min`) maps everything to 0.
pub fn linear(raw: f32, min: f32, max: f32) -> f32 {
    if max <= min {
        return 0.0;
    }
    ((raw - min) / (max - min)).clamp(0.0, 1.0)
}

/// Scale a normalized sample back to source units, rounding to the nearest
/// representable integer.
pub fn denormalize(v: f32, sample_max: f32) -> f32 {
    (v.clamp(0.0, 1.0) * sample_max).round()
}

/// Apply one operation to one normalized sample. `sample_max` is the band's
/// normalization scale, needed by `linear` whose bounds are in source units.
pub fn apply_operation(v: f32, op: &Operation, sample_max: f32) -> f32 {
    match *op {
        Operation::SigmoidalContrast { contrast, bias } => sigmoidal_contrast(v, contrast, bias),
        Operation::Gamma { value } => gamma(v, value),
        Operation::Linear { min, max, .. } => linear(v * sample_max, min, max),
    }
}
