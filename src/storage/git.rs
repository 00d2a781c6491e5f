//! Git working tree used as remote storage.
//!
//! Uploads copy the artifact into the tree, commit it and push when a remote is configured.
//! Downloads pull first (again only with a remote) and copy out of the tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::period::ArtifactPath;

use super::{RemoteStorage, write_atomic};

/// Backend over a git working tree at `repo`, with artifacts under `prefix`.
///
/// `remote` and `branch` are only used for push and pull; without a remote the tree is
/// committed to locally.
#[derive(Debug, Clone)]
pub struct GitRepository {
    repo: PathBuf,
    prefix: String,
    remote: Option<String>,
    branch: String,
}

impl GitRepository {
    pub fn new(
        repo: impl Into<PathBuf>,
        prefix: &str,
        remote: Option<String>,
        branch: String,
    ) -> Self {
        Self {
            repo: repo.into(),
            prefix: prefix.to_string(),
            remote,
            branch,
        }
    }

    fn tree_path(&self, artifact: &ArtifactPath) -> PathBuf {
        artifact
            .remote_key(&self.prefix)
            .split('/')
            .fold(self.repo.clone(), |acc, part| acc.join(part))
    }

    fn git(&self, args: &[&str]) -> Result<Output, String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .map_err(|e| format!("failed to run git {}: {e}", args.join(" ")))?;
        if !output.status.success() {
            return Err(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output)
    }

    fn publish_err(&self, message: String) -> PipelineError {
        PipelineError::Publish {
            backend: self.name().to_string(),
            message,
        }
    }
}

impl RemoteStorage for GitRepository {
    fn name(&self) -> &str {
        "version_control"
    }

    fn upload(&self, from: &Path, to: &ArtifactPath) -> PipelineResult<()> {
        let dest = self.tree_path(to);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| self.publish_err(format!("{}: {e}", parent.display())))?;
        }
        fs::copy(from, &dest).map_err(|e| {
            self.publish_err(format!("copy {} -> {}: {e}", from.display(), dest.display()))
        })?;

        let key = to.remote_key(&self.prefix);
        self.git(&["add", "--", &key]).map_err(|m| self.publish_err(m))?;

        // Re-publishing identical bytes leaves nothing to commit.
        let status = self
            .git(&["status", "--porcelain", "--", &key])
            .map_err(|m| self.publish_err(m))?;
        if status.stdout.is_empty() {
            debug!(key = %key, "artifact unchanged; nothing to commit");
        } else {
            let message = format!("Publish {key}");
            self.git(&["commit", "-m", &message, "--", &key])
                .map_err(|m| self.publish_err(m))?;
            info!(key = %key, "committed artifact");
        }

        if let Some(remote) = &self.remote {
            self.git(&["push", remote, &self.branch])
                .map_err(|m| self.publish_err(m))?;
            info!(remote = %remote, branch = %self.branch, "pushed artifact");
        }
        Ok(())
    }

    fn download(&self, from: &ArtifactPath, to: &Path) -> PipelineResult<()> {
        let key = from.remote_key(&self.prefix);
        if let Some(remote) = &self.remote {
            self.git(&["pull", "--ff-only", remote, &self.branch])
                .map_err(|message| PipelineError::Extract {
                    key: key.clone(),
                    message,
                })?;
        }

        let src = self.tree_path(from);
        let mut file = match fs::File::open(&src) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PipelineError::NotFound { key });
            }
            Err(e) => return Err(PipelineError::io(&src, e)),
        };
        write_atomic(to, |out| {
            io::copy(&mut file, out)
                .map(drop)
                .map_err(|e| PipelineError::io(&src, e))
        })
    }
}
