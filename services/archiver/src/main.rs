use anyhow::{Context, Result};
use camlog_archiver::config::{Config, ServiceConfig};
use camlog_archiver::{
    Archiver, BlobStore, CameraDirectory, DigestLogFetcher, Destination, Dispatcher, LocalStore,
    MySqlCameraDirectory, RetentionSweeper, S3Store,
};
use chrono::Local;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Retrieve camera system logs with digest authentication and archive them
#[derive(Debug, Parser)]
#[command(name = "camlog-archiver", version, about)]
struct Cli {
    /// MySQL database host
    database_host: Option<String>,
    /// MySQL database username
    database_user: Option<String>,
    /// MySQL database password
    database_password: Option<String>,
    /// MySQL database name
    database_name: Option<String>,
    /// Name of the database table to retrieve cameras from
    table_name: Option<String>,
    /// Folder (or s3://bucket[/prefix]) to save the retrieved logs
    destination: Option<String>,
}

impl Cli {
    /// Positional arguments take precedence over files and environment
    fn apply(self, config: &mut Config) {
        let database = &mut config.database;
        let overrides = [
            (&mut database.host, self.database_host),
            (&mut database.user, self.database_user),
            (&mut database.password, self.database_password),
            (&mut database.name, self.database_name),
            (&mut database.table, self.table_name),
        ];
        for (field, value) in overrides {
            if let Some(value) = value {
                *field = value;
            }
        }

        if self.destination.is_some() {
            config.destination = self.destination;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Load configuration
    let mut config = Config::load().context("Failed to load configuration")?;
    cli.apply(&mut config);

    let destination = match config.destination.as_deref() {
        Some(raw) => Destination::parse(raw).context("Invalid destination")?,
        None => anyhow::bail!("Save folder path is not provided."),
    };

    config.validate().context("Invalid configuration")?;

    let today = Local::now().format("%Y-%m-%d").to_string();
    let log_dir = config
        .service
        .log_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| destination.default_log_dir(&today));

    init_tracing(&config.service, &log_dir)?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        max_workers = config.dispatch.max_workers,
        retention_days = config.retention.days,
        retention_mode = ?config.retention.mode,
        "Starting camera log archiver"
    );

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let received = shutdown_signal().await;
            println!("{}", received.notice());
            info!("Cancellation requested, finishing tasks already started");
            cancel.cancel();
        }
    });

    let store: Arc<dyn BlobStore> = match destination {
        Destination::Local(root) => Arc::new(LocalStore::new(root)),
        Destination::S3 { bucket, prefix } => {
            Arc::new(S3Store::new(&config.s3, &bucket, prefix).await)
        }
    };

    let fetcher =
        Arc::new(DigestLogFetcher::new(&config.fetch).context("Failed to build HTTP client")?);

    let sweeper = RetentionSweeper::new(config.retention_window(), config.retention.mode);
    let archiver = Arc::new(Archiver::new(
        fetcher,
        store,
        sweeper,
        config.retention.file_extension.clone(),
    ));

    // A directory failure ends the run without scheduling any task
    let cameras = match load_cameras(&config).await {
        Ok(cameras) => cameras,
        Err(e) => {
            error!(error = %e, "Failed to load cameras from directory");
            Vec::new()
        }
    };

    let dispatcher = Dispatcher::new(archiver, &config.dispatch);
    dispatcher.run(cameras, cancel).await;

    info!("Camera log archiver stopped");

    Ok(())
}

async fn load_cameras(config: &Config) -> Result<Vec<camlog_archiver::CameraRecord>> {
    let directory = MySqlCameraDirectory::connect(&config.database).await?;
    Ok(directory.cameras().await?)
}

/// Initialize tracing: console output plus an appended run log file
fn init_tracing(service: &ServiceConfig, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join("program_log.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    let json = service.log_format == "json";

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();

    Ok(())
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Signal that ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownSignal {
    CtrlC,
    Terminate,
}

impl ShutdownSignal {
    /// Console line printed when the signal arrives
    fn notice(self) -> &'static str {
        match self {
            ShutdownSignal::CtrlC => "Ctrl+C detected. Terminating...",
            ShutdownSignal::Terminate => "SIGTERM received. Terminating...",
        }
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
            ShutdownSignal::CtrlC
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
            ShutdownSignal::Terminate
        }
    }
}
