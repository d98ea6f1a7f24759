use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::CatalogPool;
use crate::clip::ClipHandle;

/// Keeps a bounded buffer of fully prepared clips in front of the sink.
///
/// Each worker pulls a random clip from the catalog pool, drives its
/// preparation, and forwards the handle once ready. The ready channel's
/// capacity is the preload depth: when the sink falls behind, sends block and
/// the workers stop draining the catalog. Workers exit when the pool is
/// empty; the channel closes once the last worker is gone.
pub struct PreloadPool {
    catalog: Arc<CatalogPool>,
    capacity: usize,
    workers: usize,
}

impl PreloadPool {
    pub fn new(catalog: Arc<CatalogPool>, capacity: usize, workers: usize) -> Self {
        Self {
            catalog,
            capacity: capacity.max(1),
            workers: workers.max(1),
        }
    }

    pub fn start(&self, cancel: &CancellationToken) -> mpsc::Receiver<Arc<ClipHandle>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        for worker in 0..self.workers {
            let catalog = Arc::clone(&self.catalog);
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker_loop(worker, catalog, tx, cancel).await });
        }
        rx
    }
}

async fn worker_loop(
    worker: usize,
    catalog: Arc<CatalogPool>,
    tx: mpsc::Sender<Arc<ClipHandle>>,
    cancel: CancellationToken,
) {
    loop {
        let Some(handle) = catalog.remove_random() else {
            debug!(worker, "catalog pool drained, preload worker exiting");
            return;
        };

        let ready = Arc::clone(&handle).prepare(&cancel);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ready.wait() => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = tx.send(handle) => {
                if sent.is_err() {
                    // receiver gone, nothing left to feed
                    return;
                }
            }
        }
    }
}
