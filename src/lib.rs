#![forbid(unsafe_code)]

pub mod band_ops;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod render_cpu;
#[cfg(feature = "gpu")]
pub mod render_gpu;
pub mod scene;
pub mod shader;
pub mod tile_cache;
pub mod tile_source;

pub use band_ops::{BandWindow, SampleBuffer};
pub use error::{CogtileError, CogtileResult};
pub use pipeline::{BandScope, Operation, Pipeline, PipelineSignature, PipelineStep, StepPatch};
pub use render::{BackendKind, RenderEngine, TileBands, TileRgba};
pub use scene::{Scene, SceneBands, SceneChange, SceneEvent, SceneStore};
pub use tile_cache::{TileKey, TileRenderCache};
pub use tile_source::{BandFetcher, TileEvent, TileSourceAdapter};
