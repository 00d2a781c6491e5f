//! Local artifacts and the remote storage they are published to.
//!
//! The pipelines only see [`RemoteStorage`]; which backend implements it is decided once per
//! run from a named configuration block (see [`BackendConfig`] and [`build_backend`]).

pub mod bucket;
pub mod extract;
pub mod git;
pub mod local;
pub mod publish;
pub mod s3;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::period::ArtifactPath;

pub use bucket::LocalBucket;
pub use extract::Extractor;
pub use git::GitRepository;
pub use local::LocalWriter;
pub use publish::RemotePublisher;
pub use s3::{S3Bucket, S3Config};

/// Capability shared by every remote backend.
///
/// `to`/`from` are artifact paths relative to the backend's prefix, so the same relative path
/// is used locally and remotely.
pub trait RemoteStorage: Send + Sync {
    /// Short backend name used in errors and logs.
    fn name(&self) -> &str;

    /// Upload the local file at `from`, replacing any existing object at `to`.
    fn upload(&self, from: &Path, to: &ArtifactPath) -> PipelineResult<()>;

    /// Download `from` to the local path `to`.
    ///
    /// Must return [`PipelineError::NotFound`] when the object does not exist, without
    /// touching `to`.
    fn download(&self, from: &ArtifactPath, to: &Path) -> PipelineResult<()>;
}

/// A named `[blocks.<name>]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// S3-compatible object storage.
    ObjectStorage(S3Config),
    /// A directory standing in for a mounted bucket.
    LocalBucket { root: PathBuf },
    /// A git working tree; artifacts are committed and optionally pushed.
    VersionControl {
        repo: PathBuf,
        #[serde(default)]
        remote: Option<String>,
        #[serde(default = "default_branch")]
        branch: String,
    },
}

fn default_branch() -> String {
    "main".to_string()
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::ObjectStorage(_) => "object_storage",
            BackendConfig::LocalBucket { .. } => "local_bucket",
            BackendConfig::VersionControl { .. } => "version_control",
        }
    }
}

/// Build the backend described by `config`, placing artifacts under `prefix`.
pub fn build_backend(config: &BackendConfig, prefix: &str) -> PipelineResult<Arc<dyn RemoteStorage>> {
    let backend: Arc<dyn RemoteStorage> = match config {
        BackendConfig::ObjectStorage(s3) => Arc::new(S3Bucket::new(s3.clone(), prefix)?),
        BackendConfig::LocalBucket { root } => Arc::new(LocalBucket::new(root, prefix)),
        BackendConfig::VersionControl {
            repo,
            remote,
            branch,
        } => Arc::new(GitRepository::new(repo, prefix, remote.clone(), branch.clone())),
    };
    Ok(backend)
}

/// Write `bytes` (produced by `fill`) to `dest` through a sibling temp file and a rename.
///
/// Parent directories are created. On failure the temp file is removed and `dest` is left as
/// it was.
pub(crate) fn write_atomic<F>(dest: &Path, fill: F) -> PipelineResult<()>
where
    F: FnOnce(&mut fs::File) -> PipelineResult<()>,
{
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;

    let tmp = temp_sibling(dest);
    let result = fs::File::create(&tmp)
        .map_err(|e| PipelineError::io(&tmp, e))
        .and_then(|mut file| {
            fill(&mut file)?;
            file.flush().map_err(|e| PipelineError::io(&tmp, e))?;
            file.sync_all().map_err(|e| PipelineError::io(&tmp, e))
        })
        .and_then(|()| fs::rename(&tmp, dest).map_err(|e| PipelineError::io(dest, e)));

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}
