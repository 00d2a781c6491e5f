//! S3-compatible object storage.

use std::fs;
use std::path::Path;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, PipelineResult};
use crate::period::ArtifactPath;

use super::{RemoteStorage, write_atomic};

/// Connection settings of an `object_storage` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Path-style addressing, needed by MinIO and most self-hosted stores.
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// [`RemoteStorage`] over the AWS SDK.
///
/// The SDK is async; calls are driven to completion on a private current-thread runtime so the
/// pipelines stay synchronous.
pub struct S3Bucket {
    client: Client,
    bucket: String,
    prefix: String,
    runtime: Runtime,
}

impl S3Bucket {
    pub fn new(config: S3Config, prefix: &str) -> PipelineResult<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "tripdata-config",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PipelineError::config(format!("failed to start s3 runtime: {e}")))?;

        info!(bucket = %config.bucket, "object storage client initialized");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix: prefix.to_string(),
            runtime,
        })
    }

    fn publish_err(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Publish {
            backend: self.name().to_string(),
            message: message.into(),
        }
    }
}

impl RemoteStorage for S3Bucket {
    fn name(&self) -> &str {
        "object_storage"
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    fn upload(&self, from: &Path, to: &ArtifactPath) -> PipelineResult<()> {
        let key = to.remote_key(&self.prefix);
        let body = fs::read(from).map_err(|e| PipelineError::io(from, e))?;
        let size = body.len();

        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .content_type("application/vnd.apache.parquet")
                    .body(ByteStream::from(body))
                    .send(),
            )
            .map_err(|e| self.publish_err(format!("put s3://{}/{key}: {e}", self.bucket)))?;

        debug!(key = %key, size, "uploaded object");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    fn download(&self, from: &ArtifactPath, to: &Path) -> PipelineResult<()> {
        let key = from.remote_key(&self.prefix);
        let extract_err = |message: String| PipelineError::Extract {
            key: key.clone(),
            message,
        };

        let data = self.runtime.block_on(async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| match &e {
                    SdkError::ServiceError(svc) if svc.err().is_no_such_key() => {
                        PipelineError::NotFound { key: key.clone() }
                    }
                    _ => extract_err(e.to_string()),
                })?;
            response
                .body
                .collect()
                .await
                .map(|agg| agg.into_bytes())
                .map_err(|e| extract_err(e.to_string()))
        })?;

        debug!(key = %key, size = data.len(), "downloaded object");
        write_atomic(to, |file| {
            std::io::Write::write_all(file, &data).map_err(|e| PipelineError::io(to, e))
        })
    }
}
