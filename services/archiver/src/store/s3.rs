use super::{BlobStore, StoreError};
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

/// S3 backend. One client is shared by every task.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Store {
    /// Create a new S3 store for `bucket`, optionally rooted at `prefix`
    pub async fn new(config: &S3Config, bucket: &str, prefix: Option<String>) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %bucket,
            region = %config.region,
            prefix = ?prefix,
            "S3 store initialized"
        );

        Self::with_client(client, bucket, prefix)
    }

    pub fn with_client(client: S3Client, bucket: &str, prefix: Option<String>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix,
        }
    }

    /// Object key in the bucket for an archive key
    fn object_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// Archive key for an object key returned by a listing
    fn archive_key<'a>(&self, object_key: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => object_key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/')),
            None => Some(object_key),
        }
    }

    fn s3_error(key: &str, err: impl std::error::Error) -> StoreError {
        StoreError::S3 {
            key: key.to_string(),
            message: DisplayErrorContext(err).to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(Self::s3_error(key, e))
                }
            }
        }
    }

    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    StoreError::NotFound(key.to_string())
                } else {
                    Self::s3_error(key, e)
                }
            })?;

        output
            .last_modified()
            .and_then(|dt| dt.to_millis().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| StoreError::S3 {
                key: key.to_string(),
                message: "object has no last-modified time".to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| Self::s3_error(key, e))?;

        debug!(key = %key, "Object deleted from S3");
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        let size_bytes = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .body(ByteStream::from(data))
            .content_type("text/plain")
            .send()
            .await
            .map_err(|e| Self::s3_error(key, e))?;

        debug!(key = %key, size_bytes = size_bytes, "Object written to S3");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let object_prefix = self.object_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&object_prefix);

            if let Some(ref token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Self::s3_error(prefix, e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter_map(|key| self.archive_key(key))
                    .map(String::from),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        Ok(keys)
    }

    fn describe(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("s3://{}/{}", self.bucket, prefix),
            None => format!("s3://{}", self.bucket),
        }
    }
}
