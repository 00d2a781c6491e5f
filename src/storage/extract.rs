//! Retrieval of published artifacts into the local data root.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::{PipelineError, PipelineResult};
use crate::period::{ArtifactPath, Category, Period};
use crate::retry::RetryPolicy;

use super::RemoteStorage;

/// Pulls published artifacts back into the local data root.
pub struct Extractor {
    backend: Arc<dyn RemoteStorage>,
    data_root: PathBuf,
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(
        backend: Arc<dyn RemoteStorage>,
        data_root: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            data_root: data_root.into(),
            retry,
        }
    }

    /// Download the artifact for `period` to `{data_root}/{category}/{dataset_file}.parquet`.
    ///
    /// Transient download failures are retried. A missing artifact is
    /// [`PipelineError::NotFound`]: it is returned immediately and nothing is written.
    #[instrument(skip(self, period), fields(backend = self.backend.name(), period = %period))]
    pub fn extract(&self, category: Category, period: &Period) -> PipelineResult<ArtifactPath> {
        if category != period.category() {
            return Err(PipelineError::InvalidPeriod {
                message: format!("category {category} does not match period {period}"),
            });
        }

        let artifact = ArtifactPath::new(category, &period.dataset_file());
        let local = artifact.local_path(&self.data_root);

        self.retry
            .run("extract", |_| self.backend.download(&artifact, &local))
            .map_err(|(err, attempts)| match err {
                PipelineError::Extract { key, message } if attempts > 1 => PipelineError::Extract {
                    key,
                    message: format!("{message} (after {attempts} attempts)"),
                },
                other => other,
            })?;

        info!(path = %local.display(), "extracted artifact");
        Ok(artifact)
    }

    pub fn data_root(&self) -> &std::path::Path {
        &self.data_root
    }
}
