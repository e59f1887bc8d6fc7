use crate::camera::CameraRecord;
use crate::fetcher::{FetchError, LogFetcher};
use crate::key::DestinationKey;
use crate::retention::RetentionSweeper;
use crate::store::{BlobStore, StoreError};
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Result of archiving one camera's log.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Log fetched and written
    Success {
        bytes_written: usize,
        key: DestinationKey,
    },
    /// The camera could not be read; nothing was written
    FetchFailed(FetchError),
    /// The store rejected the write (or its parent folders)
    WriteFailed(StoreError),
    /// Cancellation was requested before the task started
    Skipped,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

/// Per-camera unit of work: derive key, sweep, fetch, write.
pub struct Archiver {
    fetcher: Arc<dyn LogFetcher>,
    store: Arc<dyn BlobStore>,
    sweeper: RetentionSweeper,
    extension: String,
}

impl Archiver {
    pub fn new(
        fetcher: Arc<dyn LogFetcher>,
        store: Arc<dyn BlobStore>,
        sweeper: RetentionSweeper,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            store,
            sweeper,
            extension: extension.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Archive `camera` under a key derived from the local wall clock.
    ///
    /// Cancellation is only observed here, before any network or store call.
    #[instrument(skip_all, fields(host = %camera.host, port = camera.port))]
    pub async fn archive(&self, camera: &CameraRecord, cancel: &CancellationToken) -> TaskOutcome {
        if cancel.is_cancelled() {
            return TaskOutcome::Skipped;
        }

        let now = Local::now();
        let key = DestinationKey::for_camera(camera, &now, &self.extension);
        self.archive_to(camera, key, now.with_timezone(&Utc)).await
    }

    /// Archive `camera` to an already derived `key`, with retention measured
    /// from `now`.
    pub async fn archive_to(
        &self,
        camera: &CameraRecord,
        key: DestinationKey,
        now: DateTime<Utc>,
    ) -> TaskOutcome {
        if let Err(e) = self.store.ensure_parent(key.as_str()).await {
            return TaskOutcome::WriteFailed(e);
        }

        let horizon = self.sweeper.horizon(now);
        self.sweeper
            .sweep(self.store.as_ref(), &key, horizon)
            .await;

        let started = Instant::now();
        let data = match self.fetcher.fetch(camera).await {
            Ok(data) => data,
            Err(e) => return TaskOutcome::FetchFailed(e),
        };
        metrics::histogram!("archiver.fetch.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let bytes_written = data.len();
        if let Err(e) = self.store.put(key.as_str(), data).await {
            return TaskOutcome::WriteFailed(e);
        }

        debug!(key = %key, size_bytes = bytes_written, "Log archived");

        TaskOutcome::Success { bytes_written, key }
    }
}
