//! Keyed cache of rendered tiles with in-flight deduplication.
//!
//! Concurrent requests for the same tile share one render: each key maps to a
//! [`tokio::sync::OnceCell`] slot, and `get_or_try_init` guarantees the
//! producing future runs at most once while every waiter receives the same
//! `Arc`. A failed render leaves its slot empty, so the next request retries
//! instead of replaying a cached error.
//!
//! Invalidation is per scene: each scene carries an epoch, slots are tagged
//! with the epoch they were created under, and bumping the epoch makes every
//! older slot invisible to lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::error::CogtileResult;
use crate::render::TileRgba;

/// Identity of one rendered tile: scene plus XYZ tile coordinates.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TileKey {
    pub scene_id: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(scene_id: impl Into<String>, z: u32, x: u32, y: u32) -> Self {
        Self {
            scene_id: scene_id.into(),
            z,
            x,
            y,
        }
    }
}

type Slot = Arc<OnceCell<Arc<TileRgba>>>;

#[derive(Default)]
struct Inner {
    /// Current epoch per scene id. Missing means epoch 0.
    epochs: HashMap<String, u64>,
    slots: HashMap<TileKey, (u64, Slot)>,
}

/// Shared across request handlers behind an `Arc`.
#[derive(Default)]
pub struct TileRenderCache {
    inner: Mutex<Inner>,
}

impl TileRenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the live slot for `key`, replacing any slot created under an
    /// older epoch of the scene.
    fn slot(&self, key: &TileKey) -> Slot {
        let mut inner = self.inner.lock().expect("tile cache lock poisoned");
        let epoch = inner.epochs.get(&key.scene_id).copied().unwrap_or(0);
        match inner.slots.get(key) {
            Some((slot_epoch, slot)) if *slot_epoch == epoch => slot.clone(),
            _ => {
                let slot: Slot = Arc::new(OnceCell::new());
                inner.slots.insert(key.clone(), (epoch, slot.clone()));
                slot
            }
        }
    }

    /// Return the cached tile for `key`, or run `render` to produce it.
    ///
    /// While a render for `key` is in flight, further calls wait on the same
    /// attempt instead of starting their own; a successful attempt hands the
    /// same `Arc` to every waiter. A failed attempt returns its error to the
    /// caller whose producer ran and leaves the slot empty; waiting callers
    /// then run their own producers one at a time, so retries stay
    /// serialized and errors are never cached.
    pub async fn render_tile<F, Fut>(
        &self,
        key: TileKey,
        render: F,
    ) -> CogtileResult<Arc<TileRgba>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CogtileResult<TileRgba>>,
    {
        let slot = self.slot(&key);
        slot.get_or_try_init(|| async { render().await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Peek without rendering. `None` for unknown, stale or still in-flight
    /// tiles.
    pub fn get(&self, key: &TileKey) -> Option<Arc<TileRgba>> {
        let inner = self.inner.lock().expect("tile cache lock poisoned");
        let epoch = inner.epochs.get(&key.scene_id).copied().unwrap_or(0);
        match inner.slots.get(key) {
            Some((slot_epoch, slot)) if *slot_epoch == epoch => slot.get().cloned(),
            _ => None,
        }
    }

    /// Drop every cached and in-flight tile of one scene. Other scenes keep
    /// their entries. Renders already in flight for the old epoch complete
    /// into their (now unreachable) slots and are discarded with them.
    pub fn invalidate_scene(&self, scene_id: &str) {
        let mut inner = self.inner.lock().expect("tile cache lock poisoned");
        let epoch = inner.epochs.entry(scene_id.to_string()).or_insert(0);
        *epoch += 1;
        inner.slots.retain(|key, _| key.scene_id != scene_id);
        tracing::debug!(scene_id, "dropped cached tiles for scene");
    }

    /// Number of keys with a live slot (completed or in flight).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("tile cache lock poisoned").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
