//! Remote dataset retrieval.
//!
//! A [`DatasetSource`] returns raw bytes for a URL; the [`Fetcher`] decompresses them when they
//! are gzip, decodes the CSV and retries the whole sequence under a [`RetryPolicy`].

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{PipelineError, PipelineResult};
use crate::retry::RetryPolicy;
use crate::types::DataSet;

use super::csv::read_csv;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default release location of the trip record CSV files.
pub const DEFAULT_BASE_URL: &str =
    "https://github.com/DataTalksClub/nyc-tlc-data/releases/download";

/// Something that can return the bytes behind a URL.
pub trait DatasetSource: Send + Sync {
    fn get(&self, url: &str) -> PipelineResult<Vec<u8>>;
}

/// Connection settings for [`HttpSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL; the dataset URL is `{base_url}/{category}/{dataset_file}.csv.gz`.
    pub base_url: String,
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 300,
            user_agent: concat!("tripdata-pipeline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// [`DatasetSource`] over HTTP(S) using a blocking `reqwest` client.
pub struct HttpSource {
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> PipelineResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

impl DatasetSource for HttpSource {
    fn get(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

/// Retrieves a remote CSV dataset into a [`DataSet`].
pub struct Fetcher {
    source: Arc<dyn DatasetSource>,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(source: Arc<dyn DatasetSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Fetch and decode `url`.
    ///
    /// Network and decode failures are retried; once attempts run out the result is a
    /// [`PipelineError::Fetch`] carrying the attempt count and the last cause.
    #[instrument(skip(self))]
    pub fn fetch(&self, url: &str) -> PipelineResult<DataSet> {
        let outcome = self.retry.run("fetch", |attempt| {
            self.fetch_once(url).map_err(|e| PipelineError::Fetch {
                url: url.to_string(),
                attempts: attempt,
                cause: match e {
                    PipelineError::Fetch { cause, .. } => cause,
                    other => other.to_string(),
                },
            })
        });

        match outcome {
            Ok(table) => {
                info!(
                    rows = table.row_count(),
                    columns = table.schema.fields.len(),
                    "fetched dataset"
                );
                Ok(table)
            }
            Err((PipelineError::Fetch { cause, .. }, attempts)) => Err(PipelineError::Fetch {
                url: url.to_string(),
                attempts,
                cause,
            }),
            Err((other, _)) => Err(other),
        }
    }

    fn fetch_once(&self, url: &str) -> PipelineResult<DataSet> {
        let bytes = self.source.get(url)?;
        decode_csv_bytes(&bytes)
    }
}

/// Decode CSV bytes, transparently gunzipping when the payload starts with the gzip magic.
pub fn decode_csv_bytes(bytes: &[u8]) -> PipelineResult<DataSet> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut text = Vec::with_capacity(bytes.len() * 4);
        MultiGzDecoder::new(bytes)
            .read_to_end(&mut text)
            .map_err(|e| PipelineError::schema(format!("invalid gzip payload: {e}")))?;
        read_csv(text.as_slice())
    } else {
        read_csv(bytes)
    }
}
