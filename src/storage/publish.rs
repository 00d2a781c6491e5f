//! Publishing of local artifacts to the configured backend.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::{PipelineError, PipelineResult};
use crate::period::ArtifactPath;

use super::RemoteStorage;

/// Uploads local artifacts through the run's single active backend.
///
/// Failures are reported as [`PipelineError::Publish`] and never retried here; the local file
/// is left in place so the period can simply be re-run.
pub struct RemotePublisher {
    backend: Arc<dyn RemoteStorage>,
}

impl RemotePublisher {
    pub fn new(backend: Arc<dyn RemoteStorage>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub fn publish(&self, local_path: &Path, artifact: &ArtifactPath) -> PipelineResult<()> {
        self.backend
            .upload(local_path, artifact)
            .map_err(|e| match e {
                PipelineError::Publish { .. } => e,
                other => PipelineError::Publish {
                    backend: self.backend.name().to_string(),
                    message: other.to_string(),
                },
            })?;
        info!(%artifact, "published artifact");
        Ok(())
    }
}
