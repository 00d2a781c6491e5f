use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned by every pipeline stage.
///
/// This is a single error enum shared by the fetch, normalize, write, publish, extract,
/// transform and load stages. The stage that produced an error is recorded separately by the
/// orchestrator (see [`crate::pipeline::StageFailure`]).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The remote dataset could not be fetched or parsed after all retry attempts.
    #[error("fetch failed for {url} after {attempts} attempt(s): {cause}")]
    Fetch {
        url: String,
        attempts: u32,
        cause: String,
    },

    /// A required column is missing or holds values of the wrong shape.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Local storage could not be created, written or read.
    #[error("io error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Upload to the remote backend failed (authentication or transfer).
    #[error("publish to {backend} failed: {message}")]
    Publish { backend: String, message: String },

    /// The requested remote artifact does not exist.
    ///
    /// For the load pipeline this means it ran before the ingest pipeline for that period.
    #[error("remote artifact not found: {key}")]
    NotFound { key: String },

    /// A download from the remote backend failed for a reason other than absence.
    #[error("download of {key} failed: {message}")]
    Extract { key: String, message: String },

    /// The warehouse rejected the write (authentication, schema mismatch).
    #[error("load into {destination} failed: {message}")]
    Load { destination: String, message: String },

    /// Some chunks were committed before a later chunk failed.
    #[error("partial load: {committed_rows} row(s) committed before failure: {source}")]
    PartialLoad {
        committed_rows: usize,
        #[source]
        source: Box<PipelineError>,
    },

    /// CSV decoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Parquet encoding/decoding error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A period that cannot exist (e.g. month 13).
    #[error("invalid period: {message}")]
    InvalidPeriod { message: String },

    /// Configuration could not be loaded or resolved.
    #[error("config error: {message}")]
    Config { message: String },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether a retry of the same operation may succeed.
    ///
    /// Network, parse and download failures are transient. Missing artifacts, schema problems
    /// and local storage failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Extract { .. } | Self::Http(_) | Self::Csv(_)
        )
    }

    /// Rows committed before failure, if this is a partial load.
    pub fn committed_rows(&self) -> Option<usize> {
        match self {
            Self::PartialLoad { committed_rows, .. } => Some(*committed_rows),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
