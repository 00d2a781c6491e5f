//! Filesystem directory used as a bucket.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::period::ArtifactPath;

use super::{RemoteStorage, write_atomic};

/// Remote storage backed by a directory, e.g. a mounted bucket.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    root: PathBuf,
    prefix: String,
}

impl LocalBucket {
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.to_string(),
        }
    }

    fn object_path(&self, artifact: &ArtifactPath) -> PathBuf {
        artifact
            .remote_key(&self.prefix)
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

impl RemoteStorage for LocalBucket {
    fn name(&self) -> &str {
        "local_bucket"
    }

    fn upload(&self, from: &Path, to: &ArtifactPath) -> PipelineResult<()> {
        let dest = self.object_path(to);
        let publish_err = |e: io::Error| PipelineError::Publish {
            backend: self.name().to_string(),
            message: format!("copy {} -> {}: {e}", from.display(), dest.display()),
        };

        let mut src = fs::File::open(from).map_err(publish_err)?;
        write_atomic(&dest, |out| {
            io::copy(&mut src, out).map(drop).map_err(publish_err)
        })
        .map_err(|e| match e {
            PipelineError::Io { path, source } => PipelineError::Publish {
                backend: self.name().to_string(),
                message: format!("{}: {source}", path.display()),
            },
            other => other,
        })?;

        debug!(dest = %dest.display(), "uploaded to local bucket");
        Ok(())
    }

    fn download(&self, from: &ArtifactPath, to: &Path) -> PipelineResult<()> {
        let src_path = self.object_path(from);
        let mut src = match fs::File::open(&src_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PipelineError::NotFound {
                    key: from.remote_key(&self.prefix),
                });
            }
            Err(e) => {
                return Err(PipelineError::Extract {
                    key: from.remote_key(&self.prefix),
                    message: e.to_string(),
                });
            }
        };

        write_atomic(to, |out| {
            io::copy(&mut src, out)
                .map(drop)
                .map_err(|e| PipelineError::io(&src_path, e))
        })
    }
}
