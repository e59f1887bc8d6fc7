use crate::config::RetentionMode;
use crate::key::{camera_partition_of, DestinationKey};
use crate::store::BlobStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Archive keys grouped by camera partition.
type CameraIndex = Mutex<HashMap<String, Vec<String>>>;

/// Deletes archives older than the retention window before a new write.
///
/// Nothing here is fatal: a failed existence check counts as "absent" and a
/// failed delete is logged and skipped.
///
/// Build one sweeper per run. In camera-prefix mode the store is listed once,
/// on the first sweep, and each camera then takes its own keys from that
/// listing.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    window: Duration,
    mode: RetentionMode,
    index: Arc<OnceCell<CameraIndex>>,
}

impl RetentionSweeper {
    pub fn new(window: Duration, mode: RetentionMode) -> Self {
        Self {
            window,
            mode,
            index: Arc::new(OnceCell::new()),
        }
    }

    /// Objects last written strictly before this instant are stale.
    pub fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    /// Sweep ahead of writing `key`. Returns the number of deleted objects.
    pub async fn sweep(
        &self,
        store: &dyn BlobStore,
        key: &DestinationKey,
        horizon: DateTime<Utc>,
    ) -> usize {
        match self.mode {
            RetentionMode::ExactKey => {
                usize::from(Self::sweep_key(store, key.as_str(), horizon).await)
            }
            RetentionMode::CameraPrefix => self.sweep_camera(store, key, horizon).await,
        }
    }

    /// Delete `key` if it exists and is older than `horizon`.
    async fn sweep_key(store: &dyn BlobStore, key: &str, horizon: DateTime<Utc>) -> bool {
        match store.exists(key).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                debug!(key = %key, error = %e, "Existence check failed, treating as absent");
                return false;
            }
        }

        Self::delete_if_stale(store, key, horizon).await
    }

    /// Delete every archive of the same camera older than `horizon`.
    async fn sweep_camera(
        &self,
        store: &dyn BlobStore,
        key: &DestinationKey,
        horizon: DateTime<Utc>,
    ) -> usize {
        let Some(camera) = key.camera_partition() else {
            return 0;
        };

        let mut deleted = 0;
        for candidate in self.camera_keys(store, camera).await {
            if Self::delete_if_stale(store, &candidate, horizon).await {
                deleted += 1;
            }
        }
        deleted
    }

    /// Take the keys of `camera` out of the run's listing.
    async fn camera_keys(&self, store: &dyn BlobStore, camera: &str) -> Vec<String> {
        let index = self.index.get_or_init(|| Self::build_index(store)).await;
        index
            .lock()
            .ok()
            .and_then(|mut index| index.remove(camera))
            .unwrap_or_default()
    }

    async fn build_index(store: &dyn BlobStore) -> CameraIndex {
        let keys = match store.list("").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(
                    store = %store.describe(),
                    error = %e,
                    "Failed to list archives for retention"
                );
                Vec::new()
            }
        };

        let mut index: HashMap<String, Vec<String>> = HashMap::new();
        for key in keys {
            let Some(camera) = camera_partition_of(&key).map(str::to_owned) else {
                continue;
            };
            index.entry(camera).or_default().push(key);
        }

        debug!(cameras = index.len(), "Indexed archives for retention");
        Mutex::new(index)
    }

    async fn delete_if_stale(store: &dyn BlobStore, key: &str, horizon: DateTime<Utc>) -> bool {
        let modified = match store.last_modified(key).await {
            Ok(modified) => modified,
            Err(e) => {
                debug!(key = %key, error = %e, "Could not read modified time");
                return false;
            }
        };

        if modified >= horizon {
            return false;
        }

        match store.delete(key).await {
            Ok(()) => {
                info!(key = %key, modified = %modified, "Removed archive past retention");
                metrics::counter!("archiver.retention.deleted").increment(1);
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove archive past retention");
                false
            }
        }
    }
}
