//! Single-flight snapshot cache
//!
//! Caches the latest computed snapshot and guarantees at most one concurrent
//! invocation of the upstream computation. Callers finding a fresh snapshot
//! return immediately; callers finding a refresh in flight join it; the
//! first caller on a stale cache becomes the refresher. Every joiner
//! receives the refresher's exact result, success or failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use scanner_core::{Snapshot, SnapshotComputer, SnapshotError};

type RefreshResult = Result<Arc<Snapshot>, SnapshotError>;

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<Snapshot>>,
    last_refresh: Option<Instant>,
    /// Join point for callers arriving while a refresh is running.
    inflight: Option<broadcast::Sender<RefreshResult>>,
}

struct CacheInner {
    computer: Arc<dyn SnapshotComputer>,
    state: Mutex<CacheState>,
}

/// The one process-wide snapshot cache.
pub struct SnapshotCache {
    inner: Arc<CacheInner>,
}

impl SnapshotCache {
    pub fn new(computer: Arc<dyn SnapshotComputer>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                computer,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// The cached snapshot regardless of age, if any refresh has ever
    /// succeeded.
    pub async fn latest(&self) -> Option<Arc<Snapshot>> {
        self.inner.state.lock().await.snapshot.clone()
    }

    /// Return a snapshot no older than `max_age`, refreshing if necessary.
    ///
    /// A failed refresh leaves any previous snapshot untouched and servable
    /// by a later call with a larger `max_age`.
    pub async fn get_or_refresh(&self, max_age: Duration) -> RefreshResult {
        let mut rx = {
            let mut state = self.inner.state.lock().await;

            if let (Some(snapshot), Some(at)) = (state.snapshot.as_ref(), state.last_refresh) {
                if at.elapsed() < max_age {
                    return Ok(Arc::clone(snapshot));
                }
            }

            match &state.inflight {
                Some(tx) => {
                    debug!("Joining in-flight snapshot refresh");
                    tx.subscribe()
                }
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    state.inflight = Some(tx);
                    drop(state);

                    // The refresh runs on its own task so that it completes
                    // and stores its result even if this caller goes away.
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        Self::run_refresh(inner).await;
                    });
                    rx
                }
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            Err(e) => {
                warn!("Snapshot refresh channel closed unexpectedly: {}", e);
                Err(SnapshotError::upstream("refresh aborted"))
            }
        }
    }

    async fn run_refresh(inner: Arc<CacheInner>) {
        let result = inner.computer.compute().await.map(Arc::new);
        if let Err(e) = &result {
            warn!("Snapshot refresh failed: {}", e);
        }

        let mut state = inner.state.lock().await;
        if let Ok(snapshot) = &result {
            state.snapshot = Some(Arc::clone(snapshot));
            state.last_refresh = Some(Instant::now());
        }
        if let Some(tx) = state.inflight.take() {
            // Nobody left waiting is fine.
            let _ = tx.send(result);
        }
    }
}

impl Clone for SnapshotCache {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
