use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the archiver service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Camera directory (MySQL) configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Camera HTTP fetch configuration
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Worker pool configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Retention configuration
    #[serde(default)]
    pub retention: RetentionConfig,
    /// S3 configuration, used when the destination is an `s3://` URL
    #[serde(default)]
    pub s3: S3Config,
    /// Archive destination: a local folder or `s3://bucket[/prefix]`
    #[serde(default)]
    pub destination: Option<String>,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console log format (pretty or json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Directory for the run log file. Derived from the destination when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Prometheus exporter port. No exporter is started when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Camera directory configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// MySQL host
    #[serde(default)]
    pub host: String,
    /// MySQL port
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// MySQL user
    #[serde(default)]
    pub user: String,
    /// MySQL password
    #[serde(default)]
    pub password: String,
    /// Database name
    #[serde(default)]
    pub name: String,
    /// Table holding camera rows
    #[serde(default)]
    pub table: String,
    /// `LIKE` pattern applied to the camera type column
    #[serde(default = "default_camera_type_pattern")]
    pub camera_type_pattern: String,
    /// Exact analytic id match
    #[serde(default = "default_analytic_id")]
    pub analytic_id: i64,
    /// `LIKE` pattern applied to the analytic id column
    #[serde(default = "default_analytic_id_pattern")]
    pub analytic_id_pattern: String,
    /// Connection timeout in seconds
    #[serde(default = "default_db_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Camera HTTP fetch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// URL scheme used to reach cameras
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Request path of the system log endpoint
    #[serde(default = "default_fetch_path")]
    pub path: String,
    /// TCP connect timeout in seconds
    #[serde(default = "default_fetch_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Number of cameras processed concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Drop repeated (host, port) rows before dispatch
    #[serde(default)]
    pub coalesce_duplicates: bool,
}

/// How stale archives are located before a write
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMode {
    /// Check only the key about to be written
    #[default]
    ExactKey,
    /// Check every archived key for the same camera
    CameraPrefix,
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Archives older than this many days are deleted
    #[serde(default = "default_retention_days")]
    pub days: u32,
    /// Sweep strategy
    #[serde(default)]
    pub mode: RetentionMode,
    /// Extension of archived log files
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

// Default value functions
fn default_service_name() -> String {
    "camlog-archiver".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_camera_type_pattern() -> String {
    "A%".to_string()
}

fn default_analytic_id() -> i64 {
    7
}

fn default_analytic_id_pattern() -> String {
    "%H%".to_string()
}

fn default_db_connect_timeout_secs() -> u64 {
    10
}

fn default_max_connections() -> u32 {
    2
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_fetch_path() -> String {
    "/axis-cgi/admin/systemlog.cgi".to_string()
}

fn default_fetch_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_workers() -> usize {
    10
}

fn default_retention_days() -> u32 {
    30
}

fn default_file_extension() -> String {
    "txt".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/archiver").required(false))
            .add_source(config::File::with_name("/etc/camlog/archiver").required(false))
            // ARCHIVER__DISPATCH__MAX_WORKERS -> dispatch.max_workers
            .add_source(
                config::Environment::with_prefix("ARCHIVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.table.is_empty() {
            return Err(ConfigValidationError::MissingField("database.table".to_string()));
        }
        if !is_sql_identifier(&self.database.table) {
            return Err(ConfigValidationError::InvalidValue {
                field: "database.table".to_string(),
                message: "must contain only letters, digits and underscores".to_string(),
            });
        }

        if self.dispatch.max_workers == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "dispatch.max_workers".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.retention.days == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retention.days".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if !self.fetch.path.starts_with('/') {
            return Err(ConfigValidationError::InvalidValue {
                field: "fetch.path".to_string(),
                message: "must start with /".to_string(),
            });
        }

        Ok(())
    }

    /// Retention window as a chrono duration
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention.days))
    }
}

impl DatabaseConfig {
    /// Pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl FetchConfig {
    /// TCP connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn is_sql_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            database: DatabaseConfig::default(),
            fetch: FetchConfig::default(),
            dispatch: DispatchConfig::default(),
            retention: RetentionConfig::default(),
            s3: S3Config::default(),
            destination: None,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_dir: None,
            metrics_port: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_db_port(),
            user: String::new(),
            password: String::new(),
            name: String::new(),
            table: String::new(),
            camera_type_pattern: default_camera_type_pattern(),
            analytic_id: default_analytic_id(),
            analytic_id_pattern: default_analytic_id_pattern(),
            connect_timeout_secs: default_db_connect_timeout_secs(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            path: default_fetch_path(),
            connect_timeout_secs: default_fetch_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            coalesce_duplicates: false,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            mode: RetentionMode::default(),
            file_extension: default_file_extension(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
