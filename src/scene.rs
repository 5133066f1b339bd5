use std::collections::{BTreeMap, HashMap};

use crate::error::{CogtileError, CogtileResult};
use crate::pipeline::Pipeline;

/// One displayable scene as delivered by the external catalog. The rendering
/// core only reads these; discovery (directory crawling, STAC, TIFF metadata
/// sniffing) happens upstream.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Scene {
    pub id: String,
    /// Band index -> source locator (URL or path understood by the fetcher).
    pub band_sources: BTreeMap<u32, String>,
    pub red_band: u32,
    pub green_band: u32,
    pub blue_band: u32,
    /// All bands co-located in one multi-band source.
    #[serde(default)]
    pub is_single: bool,
    /// Source is pre-encoded interleaved RGB imagery; band selection is the
    /// fixed 0/1/2 into the one source.
    #[serde(default)]
    pub is_rgb: bool,
    /// Precomputed overview pyramid is available for low zooms.
    #[serde(default)]
    pub has_overview: bool,
    pub pipeline: Pipeline,
}

/// The resolved source locators a tile fetch needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneBands<'a> {
    Separate {
        red: &'a str,
        green: &'a str,
        blue: &'a str,
    },
    Interleaved(&'a str),
}

impl Scene {
    pub fn validate(&self) -> CogtileResult<()> {
        if self.id.is_empty() {
            return Err(CogtileError::scene("scene id must not be empty"));
        }
        if self.band_sources.is_empty() {
            return Err(CogtileError::scene(format!(
                "scene '{}' has no band sources",
                self.id
            )));
        }
        if self.is_rgb {
            // Band selection is fixed for interleaved sources.
            if !self.band_sources.contains_key(&0) {
                return Err(CogtileError::scene(format!(
                    "rgb scene '{}' must expose its interleaved source as band 0",
                    self.id
                )));
            }
            return Ok(());
        }
        for (name, band) in [
            ("red", self.red_band),
            ("green", self.green_band),
            ("blue", self.blue_band),
        ] {
            if !self.band_sources.contains_key(&band) {
                return Err(CogtileError::scene(format!(
                    "scene '{}': {name} band {band} does not resolve to a source",
                    self.id
                )));
            }
        }
        Ok(())
    }

    pub fn band_locator(&self, band: u32) -> CogtileResult<&str> {
        self.band_sources
            .get(&band)
            .map(String::as_str)
            .ok_or_else(|| {
                CogtileError::scene(format!(
                    "scene '{}': band {band} does not resolve to a source",
                    self.id
                ))
            })
    }

    /// Resolve the locators for the current red/green/blue selection.
    pub fn rgb_bands(&self) -> CogtileResult<SceneBands<'_>> {
        if self.is_rgb {
            Ok(SceneBands::Interleaved(self.band_locator(0)?))
        } else {
            Ok(SceneBands::Separate {
                red: self.band_locator(self.red_band)?,
                green: self.band_locator(self.green_band)?,
                blue: self.band_locator(self.blue_band)?,
            })
        }
    }

    /// Whether replacing `old` with `self` can change rendered pixels, which
    /// forces the cached tiles of this scene to be dropped.
    fn render_relevant_change(&self, old: &Scene) -> bool {
        self.pipeline != old.pipeline
            || self.red_band != old.red_band
            || self.green_band != old.green_band
            || self.blue_band != old.blue_band
            || self.is_rgb != old.is_rgb
            || self.band_sources != old.band_sources
    }
}

/// Catalog events consumed from the external scene discovery component.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SceneEvent {
    Added(Scene),
    Updated(Scene),
    Removed(String),
}

/// What a consumed event did, so the caller knows whether to drop cached
/// tiles for the scene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneChange {
    pub scene_id: String,
    pub invalidates: bool,
}

/// The adapter-side mirror of the external catalog: current scene records,
/// keyed by id.
#[derive(Debug, Default)]
pub struct SceneStore {
    scenes: HashMap<String, Scene>,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> CogtileResult<&Scene> {
        self.scenes
            .get(id)
            .ok_or_else(|| CogtileError::UnknownScene(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.scenes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Apply one catalog event. Added/Updated scenes are validated before
    /// they replace the stored record; an invalid scene leaves the store
    /// unchanged.
    pub fn apply(&mut self, event: SceneEvent) -> CogtileResult<SceneChange> {
        match event {
            SceneEvent::Added(scene) => {
                scene.validate()?;
                let id = scene.id.clone();
                // Re-adding an existing id behaves like an update.
                let invalidates = match self.scenes.get(&id) {
                    Some(old) => scene.render_relevant_change(old),
                    None => false,
                };
                self.scenes.insert(id.clone(), scene);
                Ok(SceneChange {
                    scene_id: id,
                    invalidates,
                })
            }
            SceneEvent::Updated(scene) => {
                scene.validate()?;
                let id = scene.id.clone();
                let old = self
                    .scenes
                    .get(&id)
                    .ok_or_else(|| CogtileError::UnknownScene(id.clone()))?;
                let invalidates = scene.render_relevant_change(old);
                self.scenes.insert(id.clone(), scene);
                Ok(SceneChange {
                    scene_id: id,
                    invalidates,
                })
            }
            SceneEvent::Removed(id) => {
                if self.scenes.remove(&id).is_none() {
                    return Err(CogtileError::UnknownScene(id));
                }
                Ok(SceneChange {
                    scene_id: id,
                    invalidates: true,
                })
            }
        }
    }
}
