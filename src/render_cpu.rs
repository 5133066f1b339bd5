//! Reference pixel pipeline. This backend is both the fallback when no GPU
//! is available and the correctness oracle the GPU backend is tested
//! against.

use crate::band_ops::{apply_operation, denormalize};
use crate::error::CogtileResult;
use crate::pipeline::{BandScope, Pipeline};
use crate::render::{TileBands, TileRgba};

pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn render_tile(
        &self,
        pipeline: &Pipeline,
        bands: &TileBands,
    ) -> CogtileResult<TileRgba> {
        let (width, height) = bands.dimensions()?;
        let scales = bands.sample_maxes();
        let [mut red, mut green, mut blue] = bands.normalized()?;

        for step in pipeline.steps() {
            let op = &step.operation;
            match step.scope {
                BandScope::All => {
                    for (channel, scale) in [
                        (&mut red, scales[0]),
                        (&mut green, scales[1]),
                        (&mut blue, scales[2]),
                    ] {
                        for v in channel.iter_mut() {
                            *v = apply_operation(*v, op, scale);
                        }
                    }
                }
                BandScope::Red => {
                    for v in red.iter_mut() {
                        *v = apply_operation(*v, op, scales[0]);
                    }
                }
                BandScope::Green => {
                    for v in green.iter_mut() {
                        *v = apply_operation(*v, op, scales[1]);
                    }
                }
                BandScope::Blue => {
                    for v in blue.iter_mut() {
                        *v = apply_operation(*v, op, scales[2]);
                    }
                }
            }
        }

        let pixels = width as usize * height as usize;
        let mut data = vec![0u8; pixels * 4];
        for i in 0..pixels {
            let r = denormalize(red[i], 255.0) as u8;
            let g = denormalize(green[i], 255.0) as u8;
            let b = denormalize(blue[i], 255.0) as u8;
            // All-zero output is no-data and rendered fully transparent.
            let a = if r == 0 && g == 0 && b == 0 { 0 } else { 255 };
            let o = i * 4;
            data[o] = r;
            data[o + 1] = g;
            data[o + 2] = b;
            data[o + 3] = a;
        }

        Ok(TileRgba {
            width,
            height,
            data,
        })
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}
