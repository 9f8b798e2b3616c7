use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::store::{self, Persistable, SnapshotStore};

/// Save every tracker once. Failures are logged per tracker and never stop
/// the others. Returns how many saves succeeded.
pub async fn save_all(trackers: &[Arc<dyn Persistable>], store: &dyn SnapshotStore) -> usize {
    let mut saved = 0;
    for tracker in trackers {
        let key = tracker.snapshot_key();
        match store::save(store, tracker.as_ref()).await {
            Ok(()) => {
                counter!("snapshot_saves_total", "key" => key).increment(1);
                saved += 1;
            }
            Err(e) => {
                counter!("snapshot_save_failures_total", "key" => key).increment(1);
                tracing::error!(key, backend = store.backend(), error = %e, "Snapshot save failed");
            }
        }
    }
    saved
}

/// Restore every tracker from the store. Never fails.
pub async fn load_all(trackers: &[Arc<dyn Persistable>], store: &dyn SnapshotStore) {
    for tracker in trackers {
        store::load_into(store, tracker.as_ref()).await;
    }
}

/// Save every tracker on a timer until shutdown.
pub async fn run_persistence(
    trackers: Vec<Arc<dyn Persistable>>,
    store: Arc<dyn SnapshotStore>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs, trackers = trackers.len(), "Persistence loop started");

    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; state was just loaded.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                tracing::info!("Persistence loop shutting down");
                return;
            }
        }

        let saved = save_all(&trackers, store.as_ref()).await;
        tracing::debug!(saved, total = trackers.len(), "Periodic snapshot pass");
    }
}
