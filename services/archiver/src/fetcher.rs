//! Camera system log retrieval over HTTP with digest authentication.

use crate::camera::CameraRecord;
use crate::config::FetchConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while fetching a camera log.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed with status code: {0}")]
    BadStatus(u16),

    #[error("Request error: {0}")]
    Transport(String),

    #[error("Unusable digest challenge: {0}")]
    Challenge(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(error_chain(&err))
    }
}

/// Source of camera system logs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogFetcher: Send + Sync {
    /// Fetch the full system log of `camera`. Single attempt, no retry.
    async fn fetch(&self, camera: &CameraRecord) -> Result<Bytes, FetchError>;
}

/// Fetches `/axis-cgi/admin/systemlog.cgi` (by default) with HTTP digest auth.
///
/// Credentials are taken from each [`CameraRecord`]; no challenge or
/// credential state is kept between calls.
pub struct DigestLogFetcher {
    client: Client,
    scheme: String,
    path: String,
}

impl DigestLogFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &FetchConfig) -> Self {
        Self {
            client,
            scheme: config.scheme.clone(),
            path: config.path.clone(),
        }
    }

    /// Log endpoint URL for a camera
    pub fn url_for(&self, camera: &CameraRecord) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme, camera.host, camera.port, self.path
        )
    }

    /// Answer a digest challenge from a 401 response.
    fn authorization(
        &self,
        challenge: &Response,
        camera: &CameraRecord,
    ) -> Result<String, FetchError> {
        let header = challenge
            .headers()
            .get(WWW_AUTHENTICATE)
            .ok_or(FetchError::BadStatus(StatusCode::UNAUTHORIZED.as_u16()))?
            .to_str()
            .map_err(|e| FetchError::Challenge(e.to_string()))?;

        let mut prompt =
            digest_auth::parse(header).map_err(|e| FetchError::Challenge(e.to_string()))?;
        let context = digest_auth::AuthContext::new(
            camera.username.as_str(),
            camera.password.as_str(),
            self.path.as_str(),
        );
        let answer = prompt
            .respond(&context)
            .map_err(|e| FetchError::Challenge(e.to_string()))?;

        Ok(answer.to_header_string())
    }
}

#[async_trait]
impl LogFetcher for DigestLogFetcher {
    async fn fetch(&self, camera: &CameraRecord) -> Result<Bytes, FetchError> {
        let url = self.url_for(camera);

        let mut response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(url = %url, "Answering digest challenge");
            let authorization = self.authorization(&response, camera)?;
            response = self
                .client
                .get(&url)
                .header(AUTHORIZATION, authorization)
                .send()
                .await?;
        }

        if response.status() != StatusCode::OK {
            return Err(FetchError::BadStatus(response.status().as_u16()));
        }

        Ok(response.bytes().await?)
    }
}

/// Render an error with its sources, e.g. "error sending request: connection refused".
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
