//! Tile source adapter: the seam between the map-facing tile protocol and
//! the rendering core. It resolves a scene's band selection to source
//! locators, fetches the band windows concurrently, renders through the
//! shared cache, and reports the load lifecycle of every request.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::band_ops::BandWindow;
use crate::error::CogtileResult;
use crate::pipeline::Pipeline;
use crate::render::{RenderEngine, TileBands, TileRgba};
use crate::scene::{SceneBands, SceneChange, SceneEvent, SceneStore};
use crate::tile_cache::{TileKey, TileRenderCache};

/// Fetches one band's pixel window for a tile. Implementations decode from
/// whatever the locator points at (range-read COG, local file, test fixture).
pub trait BandFetcher {
    fn fetch_window(
        &self,
        locator: &str,
        z: u32,
        x: u32,
        y: u32,
    ) -> impl Future<Output = CogtileResult<BandWindow>> + Send;
}

/// Load lifecycle notifications, one `LoadStart` and one terminal event per
/// request. Consumers drive progress UI or request accounting off these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileEvent {
    LoadStart { key: TileKey },
    LoadEnd { key: TileKey },
    LoadError { key: TileKey, message: String },
}

pub struct TileSourceAdapter<F> {
    fetcher: F,
    scenes: Mutex<SceneStore>,
    // One engine serializes all backend access, GPU included.
    engine: tokio::sync::Mutex<RenderEngine>,
    cache: TileRenderCache,
    events: mpsc::UnboundedSender<TileEvent>,
}

/// Owned copy of a scene's band selection, so no store lock is held across
/// the fetch awaits.
enum ResolvedBands {
    Separate {
        red: String,
        green: String,
        blue: String,
    },
    Interleaved(String),
}

impl<F: BandFetcher> TileSourceAdapter<F> {
    pub fn new(
        fetcher: F,
        engine: RenderEngine,
        events: mpsc::UnboundedSender<TileEvent>,
    ) -> Self {
        Self {
            fetcher,
            scenes: Mutex::new(SceneStore::new()),
            engine: tokio::sync::Mutex::new(engine),
            cache: TileRenderCache::new(),
            events,
        }
    }

    /// Apply one catalog event; render-relevant changes drop the scene's
    /// cached tiles.
    pub fn apply_scene_event(&self, event: SceneEvent) -> CogtileResult<SceneChange> {
        let change = self
            .scenes
            .lock()
            .expect("scene store lock poisoned")
            .apply(event)?;
        if change.invalidates {
            self.cache.invalidate_scene(&change.scene_id);
        }
        Ok(change)
    }

    pub fn cache(&self) -> &TileRenderCache {
        &self.cache
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn emit(&self, event: TileEvent) {
        // A dropped receiver means nobody is listening; loads proceed anyway.
        let _ = self.events.send(event);
    }

    /// Serve one tile request. Emits `LoadStart` first and exactly one of
    /// `LoadEnd` / `LoadError` when the request settles, whether the tile
    /// came from the cache or a fresh render.
    pub async fn request_tile(
        &self,
        scene_id: &str,
        z: u32,
        x: u32,
        y: u32,
    ) -> CogtileResult<Arc<TileRgba>> {
        let key = TileKey::new(scene_id, z, x, y);
        self.emit(TileEvent::LoadStart { key: key.clone() });

        match self.render_tile(key.clone()).await {
            Ok(tile) => {
                self.emit(TileEvent::LoadEnd { key });
                Ok(tile)
            }
            Err(e) => {
                tracing::warn!(scene_id, z, x, y, error = %e, "tile load failed");
                self.emit(TileEvent::LoadError {
                    key,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn resolve(&self, scene_id: &str) -> CogtileResult<(ResolvedBands, Pipeline)> {
        let scenes = self.scenes.lock().expect("scene store lock poisoned");
        let scene = scenes.get(scene_id)?;
        let bands = match scene.rgb_bands()? {
            SceneBands::Separate { red, green, blue } => ResolvedBands::Separate {
                red: red.to_string(),
                green: green.to_string(),
                blue: blue.to_string(),
            },
            SceneBands::Interleaved(locator) => ResolvedBands::Interleaved(locator.to_string()),
        };
        Ok((bands, scene.pipeline.clone()))
    }

    async fn render_tile(&self, key: TileKey) -> CogtileResult<Arc<TileRgba>> {
        let (z, x, y) = (key.z, key.x, key.y);
        let scene_id = key.scene_id.clone();
        self.cache
            .render_tile(key, || async move {
                // Resolved inside the producer, after the cache has tagged
                // the slot with the scene's epoch: a scene update racing this
                // request either lands before the snapshot or bumps the epoch
                // and strands the slot.
                let (resolved, pipeline) = self.resolve(&scene_id)?;
                let bands = match &resolved {
                    ResolvedBands::Separate { red, green, blue } => {
                        let (red, green, blue) = tokio::join!(
                            self.fetcher.fetch_window(red, z, x, y),
                            self.fetcher.fetch_window(green, z, x, y),
                            self.fetcher.fetch_window(blue, z, x, y),
                        );
                        TileBands::Separate {
                            red: red?,
                            green: green?,
                            blue: blue?,
                        }
                    }
                    ResolvedBands::Interleaved(locator) => {
                        TileBands::Interleaved(self.fetcher.fetch_window(locator, z, x, y).await?)
                    }
                };
                self.engine.lock().await.render_tile(&pipeline, &bands)
            })
            .await
    }
}
