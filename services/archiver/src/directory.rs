use crate::camera::CameraRecord;
use crate::config::{is_sql_identifier, DatabaseConfig};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Errors obtaining the camera list. Any of these ends the run.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Database setting missing: {0}")]
    MissingSetting(&'static str),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Database connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Camera query failed: {0}")]
    Query(#[source] sqlx::Error),
}

/// Source of the cameras to archive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    /// Cameras matching the configured filter, in query order.
    async fn cameras(&self) -> Result<Vec<CameraRecord>, DirectoryError>;
}

/// Row filter applied to the camera table
#[derive(Debug, Clone)]
pub struct CameraFilter {
    pub camera_type_pattern: String,
    pub analytic_id: i64,
    pub analytic_id_pattern: String,
}

impl From<&DatabaseConfig> for CameraFilter {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            camera_type_pattern: config.camera_type_pattern.clone(),
            analytic_id: config.analytic_id,
            analytic_id_pattern: config.analytic_id_pattern.clone(),
        }
    }
}

/// Camera directory backed by a MySQL table.
pub struct MySqlCameraDirectory {
    pool: MySqlPool,
    table: String,
    filter: CameraFilter,
}

impl MySqlCameraDirectory {
    /// Reject incomplete settings before attempting a connection.
    pub fn check_settings(config: &DatabaseConfig) -> Result<(), DirectoryError> {
        if config.host.is_empty() {
            return Err(DirectoryError::MissingSetting("database host"));
        }
        if config.user.is_empty() || config.password.is_empty() {
            return Err(DirectoryError::MissingSetting("database username or password"));
        }
        if config.name.is_empty() {
            return Err(DirectoryError::MissingSetting("database name"));
        }
        if !is_sql_identifier(&config.table) {
            return Err(DirectoryError::InvalidTable(config.table.clone()));
        }
        Ok(())
    }

    /// Connect a small pool to the configured database
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DirectoryError> {
        Self::check_settings(config)?;

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await
            .map_err(DirectoryError::Connection)?;

        info!(host = %config.host, database = %config.name, "Connected to camera directory");

        Ok(Self {
            pool,
            table: config.table.clone(),
            filter: CameraFilter::from(config),
        })
    }

    /// SQL selecting candidate cameras from `table`. The port is cast so
    /// that both integer and text columns decode the same way.
    pub fn query_sql(table: &str) -> String {
        format!(
            "SELECT profitCameraIp, CAST(profitCameraPort AS CHAR) AS profitCameraPort, \
             username, password FROM {} \
             WHERE cameraType LIKE ? AND (analyticId = ? OR analyticId LIKE ?)",
            table
        )
    }
}

#[async_trait]
impl CameraDirectory for MySqlCameraDirectory {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn cameras(&self) -> Result<Vec<CameraRecord>, DirectoryError> {
        let sql = Self::query_sql(&self.table);

        let rows = sqlx::query(&sql)
            .bind(&self.filter.camera_type_pattern)
            .bind(self.filter.analytic_id)
            .bind(&self.filter.analytic_id_pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(DirectoryError::Query)?;

        let mut cameras = Vec::with_capacity(rows.len());
        for row in rows {
            let host: Option<String> =
                row.try_get("profitCameraIp").map_err(DirectoryError::Query)?;
            let port: Option<String> =
                row.try_get("profitCameraPort").map_err(DirectoryError::Query)?;
            let username: Option<String> =
                row.try_get("username").map_err(DirectoryError::Query)?;
            let password: Option<String> =
                row.try_get("password").map_err(DirectoryError::Query)?;

            if let Some(camera) = record_from_columns(host, port, username, password) {
                cameras.push(camera);
            }
        }

        info!(count = cameras.len(), "Loaded cameras from directory");
        Ok(cameras)
    }
}

/// Build a record from raw columns, skipping rows without a usable address.
fn record_from_columns(
    host: Option<String>,
    port: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Option<CameraRecord> {
    let host = host.map(|h| h.trim().to_string()).filter(|h| !h.is_empty());
    let Some(host) = host else {
        warn!("Skipping camera row without an address");
        return None;
    };

    let port = match port.as_deref().map(str::trim).map(str::parse::<u16>) {
        Some(Ok(port)) => port,
        other => {
            warn!(host = %host, port = ?other, "Skipping camera row with invalid port");
            return None;
        }
    };

    Some(CameraRecord::new(
        host,
        port,
        username.unwrap_or_default(),
        password.unwrap_or_default(),
    ))
}
