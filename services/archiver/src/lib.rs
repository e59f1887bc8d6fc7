//! Camlog Archiver
//!
//! Collects the diagnostic system log of every network camera listed in a
//! MySQL table and archives each one to a local folder or an S3 bucket,
//! removing archives older than the retention window as it writes.
//!
//! ## Features
//!
//! - **Bounded worker pool**: a fixed number of cameras are fetched at once,
//!   every camera gets exactly one logged outcome
//! - **Digest authentication**: per-camera credentials, single attempt
//! - **Date/camera partitioning**: `{date}/{host}_{port}/systemlog_{time}.txt`
//! - **Retention at write time**: exact-key (default) or whole-camera sweep
//! - **Cooperative cancellation**: Ctrl+C stops tasks that have not started
//!
//! ## Architecture
//!
//! ```text
//! MySQL                  Dispatcher                    Blob Store
//! ┌──────────────┐      ┌──────────────┐              ┌──────────────┐
//! │ Camera       │─────▶│ worker pool  │              │ {date}/      │
//! │ Directory    │      │ (semaphore)  │              │   {camera}/  │
//! └──────────────┘      └──────────────┘              │     *.txt    │
//!                              │ one task per camera   └──────────────┘
//!                              ▼                              ▲
//!                       ┌──────────────┐                      │
//!                       │ Archiver     │──── sweep, put ──────┘
//!                       └──────────────┘
//!                              │
//!                              ▼
//!                       ┌──────────────┐
//!                       │ Log Fetcher  │──── HTTP digest ───▶ camera
//!                       └──────────────┘
//! ```

pub mod archiver;
pub mod camera;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod fetcher;
pub mod key;
pub mod retention;
pub mod store;

pub use archiver::{Archiver, TaskOutcome};
pub use camera::CameraRecord;
pub use config::{Config, RetentionMode};
pub use directory::{CameraDirectory, DirectoryError, MySqlCameraDirectory};
pub use dispatcher::{Dispatcher, RunSummary};
pub use fetcher::{DigestLogFetcher, FetchError, LogFetcher};
pub use key::DestinationKey;
pub use retention::RetentionSweeper;
pub use store::{BlobStore, Destination, LocalStore, S3Store, StoreError};
