use crate::archiver::{Archiver, TaskOutcome};
use crate::camera::CameraRecord;
use crate::config::DispatchConfig;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Counts of task outcomes for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub fetch_failed: usize,
    pub write_failed: usize,
    pub skipped: usize,
    pub panicked: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &TaskOutcome) {
        self.total += 1;
        match outcome {
            TaskOutcome::Success { .. } => self.succeeded += 1,
            TaskOutcome::FetchFailed(_) => self.fetch_failed += 1,
            TaskOutcome::WriteFailed(_) => self.write_failed += 1,
            TaskOutcome::Skipped => self.skipped += 1,
        }
    }

    fn record_panic(&mut self) {
        self.total += 1;
        self.panicked += 1;
    }
}

/// Runs one archive task per camera on a fixed-size worker pool.
pub struct Dispatcher {
    archiver: Arc<Archiver>,
    max_workers: usize,
    coalesce_duplicates: bool,
}

impl Dispatcher {
    pub fn new(archiver: Arc<Archiver>, config: &DispatchConfig) -> Self {
        Self {
            archiver,
            max_workers: config.max_workers.max(1),
            coalesce_duplicates: config.coalesce_duplicates,
        }
    }

    /// Archive every camera and wait for all tasks, whatever their outcome.
    ///
    /// Outcomes are logged in completion order. Cancelling `cancel` makes
    /// tasks that have not started yet finish as [`TaskOutcome::Skipped`];
    /// tasks already fetching run to completion.
    pub async fn run(&self, cameras: Vec<CameraRecord>, cancel: CancellationToken) -> RunSummary {
        let cameras = if self.coalesce_duplicates {
            coalesce(cameras)
        } else {
            cameras
        };

        info!(
            cameras = cameras.len(),
            max_workers = self.max_workers,
            destination = %self.archiver.store().describe(),
            "Dispatching archive tasks"
        );

        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for camera in cameras {
            let archiver = self.archiver.clone();
            let workers = workers.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(async {
                    // The semaphore is never closed
                    let _permit = workers.acquire().await.ok();
                    archiver.archive(&camera, &cancel).await
                })
                .catch_unwind()
                .await;
                (camera, outcome)
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((camera, Ok(outcome))) => {
                    log_outcome(&camera, &outcome);
                    summary.record(&outcome);
                }
                Ok((camera, Err(panic))) => {
                    error!(
                        host = %camera.host,
                        port = camera.port,
                        error = %panic_message(panic.as_ref()),
                        "Archive task panicked"
                    );
                    summary.record_panic();
                }
                Err(e) => {
                    error!(error = %e, "Archive task did not complete");
                    summary.record_panic();
                }
            }
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            fetch_failed = summary.fetch_failed,
            write_failed = summary.write_failed,
            skipped = summary.skipped,
            panicked = summary.panicked,
            "Archive run finished"
        );

        summary
    }
}

/// Drop repeated (host, port) records, keeping the first.
fn coalesce(cameras: Vec<CameraRecord>) -> Vec<CameraRecord> {
    let mut seen = HashSet::new();
    cameras
        .into_iter()
        .filter(|camera| {
            let fresh = seen.insert((camera.host.clone(), camera.port));
            if !fresh {
                debug!(host = %camera.host, port = camera.port, "Skipping duplicate camera");
            }
            fresh
        })
        .collect()
}

fn log_outcome(camera: &CameraRecord, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Success { bytes_written, key } => {
            info!(
                host = %camera.host,
                port = camera.port,
                size_bytes = bytes_written,
                "Data saved to {}",
                key
            );
            metrics::counter!("archiver.logs.archived").increment(1);
            metrics::counter!("archiver.logs.bytes").increment(*bytes_written as u64);
        }
        TaskOutcome::FetchFailed(e) => {
            error!(host = %camera.host, port = camera.port, "{}", e);
            metrics::counter!("archiver.fetch.failed").increment(1);
        }
        TaskOutcome::WriteFailed(e) => {
            error!(host = %camera.host, port = camera.port, "Write error: {}", e);
            metrics::counter!("archiver.write.failed").increment(1);
        }
        TaskOutcome::Skipped => {
            info!(host = %camera.host, port = camera.port, "Skipped, cancellation requested");
            metrics::counter!("archiver.tasks.skipped").increment(1);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
