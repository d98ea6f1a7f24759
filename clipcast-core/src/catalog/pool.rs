use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::Rng;
use tokio::sync::watch;

use crate::clip::ClipHandle;

/// Shared staging area between the catalog fetch workers (producers) and the
/// preload workers (consumers). A handle lives in the pool until exactly one
/// preload worker removes it; from then on the pool holds no reference.
pub struct CatalogPool {
    clips: RwLock<HashMap<String, Arc<ClipHandle>>>,
    ready_tx: watch::Sender<bool>,
}

impl Default for CatalogPool {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogPool {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            clips: RwLock::new(HashMap::new()),
            ready_tx,
        }
    }

    /// Inserts the handle unless a clip with the same id is already present.
    /// The first insertion ever also fires the initial-ready edge. Returns
    /// whether the handle was stored.
    pub fn insert(&self, handle: Arc<ClipHandle>) -> bool {
        let mut clips = self.clips.write().unwrap_or_else(|e| e.into_inner());
        let id = handle.clip().id.clone();
        if clips.contains_key(&id) {
            return false;
        }
        clips.insert(id, handle);
        self.ready_tx.send_replace(true);
        true
    }

    /// Removes one clip chosen uniformly at random, transferring ownership to
    /// the caller. Uniform selection is deliberate: the playout should mix
    /// channels and ages rather than drain in insertion order.
    pub fn remove_random(&self) -> Option<Arc<ClipHandle>> {
        let mut clips = self.clips.write().unwrap_or_else(|e| e.into_inner());
        if clips.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..clips.len());
        let id = clips.keys().nth(index)?.clone();
        clips.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.clips.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the catalog-declared durations of everything currently staged,
    /// in seconds.
    pub fn declared_duration_total(&self) -> f64 {
        let clips = self.clips.read().unwrap_or_else(|e| e.into_inner());
        clips.values().map(|handle| handle.clip().duration).sum()
    }

    /// Marks the initial sweep as complete even if nothing was inserted, so
    /// waiters are released when the catalog turns out to be empty.
    pub fn mark_initial_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    /// Observers resolve once the first clip lands (or the sweep finishes
    /// empty). Late subscribers resolve immediately.
    pub fn subscribe_initial_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }
}
