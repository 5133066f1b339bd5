use crate::band_ops::BandWindow;
use crate::error::{CogtileError, CogtileResult};
use crate::pipeline::Pipeline;
use crate::render_cpu::CpuBackend;

/// One rendered tile: tightly packed RGBA8, row-major. Alpha is 0 for
/// no-data pixels (all three channels zero) and 255 otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileRgba {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl TileRgba {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }
}

/// The decoded band inputs for one tile render.
#[derive(Clone, Debug, PartialEq)]
pub enum TileBands {
    /// Three windowed single-band arrays selected as red/green/blue.
    Separate {
        red: BandWindow,
        green: BandWindow,
        blue: BandWindow,
    },
    /// One window of interleaved RGB samples (3 per pixel).
    Interleaved(BandWindow),
}

impl TileBands {
    pub fn dimensions(&self) -> CogtileResult<(u32, u32)> {
        match self {
            TileBands::Separate { red, green, blue } => {
                for band in [green, blue] {
                    if (band.width, band.height) != (red.width, red.height) {
                        return Err(CogtileError::decode(format!(
                            "band windows disagree on size: {}x{} vs {}x{}",
                            red.width, red.height, band.width, band.height
                        )));
                    }
                }
                Ok((red.width, red.height))
            }
            TileBands::Interleaved(w) => Ok((w.width, w.height)),
        }
    }

    /// Per-channel normalization scales. Each band window carries its own
    /// declared maximum, so the three channels normalize (and convert back
    /// to source units for `linear` bounds) independently.
    pub fn sample_maxes(&self) -> [f32; 3] {
        match self {
            TileBands::Separate { red, green, blue } => {
                [red.sample_max(), green.sample_max(), blue.sample_max()]
            }
            TileBands::Interleaved(w) => [w.sample_max(); 3],
        }
    }

    /// Normalize into three per-channel float buffers.
    pub fn normalized(&self) -> CogtileResult<[Vec<f32>; 3]> {
        match self {
            TileBands::Separate { red, green, blue } => {
                self.dimensions()?;
                Ok([red.normalized()?, green.normalized()?, blue.normalized()?])
            }
            TileBands::Interleaved(w) => w.normalized_rgb(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Cpu,
    Gpu,
}

/// The process-wide rendering engine: owns the CPU backend and, when the
/// `gpu` feature is enabled and a device is found at construction, the GPU
/// backend with its program cache. No ambient globals; callers share one
/// engine by reference.
pub struct RenderEngine {
    cpu: CpuBackend,
    #[cfg(feature = "gpu")]
    gpu: Option<crate::render_gpu::GpuBackend>,
}

impl RenderEngine {
    /// Probe GPU availability once. If no adapter or device can be acquired,
    /// every render for the engine's lifetime runs on the CPU.
    pub fn new() -> Self {
        Self {
            cpu: CpuBackend::new(),
            #[cfg(feature = "gpu")]
            gpu: match crate::render_gpu::GpuBackend::probe() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::info!(error = %e, "gpu unavailable, rendering on cpu");
                    None
                }
            },
        }
    }

    /// Construct an engine that never touches the GPU, regardless of
    /// features. Used by tests and the CLI's `--backend cpu`.
    pub fn cpu_only() -> Self {
        Self {
            cpu: CpuBackend::new(),
            #[cfg(feature = "gpu")]
            gpu: None,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        #[cfg(feature = "gpu")]
        if self.gpu.is_some() {
            return BackendKind::Gpu;
        }
        BackendKind::Cpu
    }

    /// Render one tile. Attempts the GPU backend when present; a `GpuFailure`
    /// falls back to the CPU for this call only, while a device-lost error
    /// retires the GPU backend for the rest of the session.
    pub fn render_tile(
        &mut self,
        pipeline: &Pipeline,
        bands: &TileBands,
    ) -> CogtileResult<TileRgba> {
        #[cfg(feature = "gpu")]
        if let Some(gpu) = self.gpu.as_mut() {
            match gpu.render_tile(pipeline, bands) {
                Ok(tile) => return Ok(tile),
                Err(e) if e.is_device_lost() => {
                    tracing::warn!(error = %e, "gpu device lost, retiring gpu backend");
                    self.gpu = None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "gpu render failed, using cpu for this tile");
                }
            }
        }
        self.cpu.render_tile(pipeline, bands)
    }
}

impl Default for RenderEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band_ops::SampleBuffer;

    #[test]
    fn mismatched_band_sizes_are_a_decode_error() {
        let bands = TileBands::Separate {
            red: BandWindow::new(2, 2, SampleBuffer::U8(vec![0; 4])),
            green: BandWindow::new(2, 2, SampleBuffer::U8(vec![0; 4])),
            blue: BandWindow::new(2, 1, SampleBuffer::U8(vec![0; 2])),
        };
        assert!(matches!(
            bands.dimensions(),
            Err(CogtileError::Decode(_))
        ));
    }

    #[test]
    fn cpu_only_engine_reports_cpu() {
        let engine = RenderEngine::cpu_only();
        assert_eq!(engine.backend_kind(), BackendKind::Cpu);
    }
}
