//! Chunked loading into a warehouse table.
//!
//! [`Warehouse`] is the write API (append a chunk, delete a partition); [`WarehouseLoader`]
//! drives it, splitting a table into bounded chunks and accounting for what was committed when
//! a chunk fails.

pub mod file;

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::types::DataSet;

pub use file::FileWarehouse;

/// Default rows per append call.
pub const DEFAULT_CHUNK_SIZE: usize = 500_000;

/// Destination table, `table` being `dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseTarget {
    pub project_id: String,
    pub table: String,
}

impl WarehouseTarget {
    pub fn new(project_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for WarehouseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project_id, self.table)
    }
}

/// Credentials resolved from a `[credentials.<name>]` block.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseCredentials {
    /// Project the credentials are issued for.
    pub project_id: String,
    /// Service account identity (key file path or account email).
    pub service_account: String,
}

impl fmt::Debug for WarehouseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseCredentials")
            .field("project_id", &self.project_id)
            .field("service_account", &"<redacted>")
            .finish()
    }
}

/// Warehouse write API.
pub trait Warehouse: Send + Sync {
    /// Check that `credentials` may write to `target`. Called once before any chunk.
    fn validate_credentials(
        &self,
        target: &WarehouseTarget,
        credentials: &WarehouseCredentials,
    ) -> PipelineResult<()>;

    /// Append `chunk` to `target` under `partition`. Each call commits independently.
    fn append(
        &self,
        target: &WarehouseTarget,
        partition: &str,
        chunk: &DataSet,
        credentials: &WarehouseCredentials,
    ) -> PipelineResult<()>;

    /// Remove every row previously appended under `partition`. Absent partitions are a no-op.
    fn delete_partition(
        &self,
        target: &WarehouseTarget,
        partition: &str,
        credentials: &WarehouseCredentials,
    ) -> PipelineResult<()>;
}

/// What a rerun of the same period does to rows it loaded before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Keep earlier rows; a rerun duplicates them.
    Append,
    /// Delete the period's partition first, so a rerun replaces it.
    #[default]
    ReplacePartition,
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub rows: usize,
    pub chunks: usize,
}

/// Appends tables to a [`Warehouse`] in bounded chunks.
#[derive(Debug, Clone, Copy)]
pub struct WarehouseLoader {
    chunk_size: usize,
    policy: WritePolicy,
}

impl Default for WarehouseLoader {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            policy: WritePolicy::default(),
        }
    }
}

impl WarehouseLoader {
    pub fn new(chunk_size: usize, policy: WritePolicy) -> PipelineResult<Self> {
        if chunk_size == 0 {
            return Err(PipelineError::config("warehouse chunk_size must be > 0"));
        }
        Ok(Self { chunk_size, policy })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// Load `table` into `destination` under `partition`.
    ///
    /// Makes `ceil(rows / chunk_size)` append calls. Credential failures are returned as
    /// [`PipelineError::Load`] before anything is written. If the k-th append fails the result
    /// is [`PipelineError::PartialLoad`] with `(k - 1) * chunk_size` committed rows.
    #[instrument(skip(self, warehouse, table, credentials), fields(rows = table.row_count()))]
    pub fn load(
        &self,
        warehouse: &dyn Warehouse,
        table: &DataSet,
        destination: &WarehouseTarget,
        credentials: &WarehouseCredentials,
        partition: &str,
    ) -> PipelineResult<LoadReport> {
        warehouse
            .validate_credentials(destination, credentials)
            .map_err(|e| as_load_error(destination, e))?;

        if self.policy == WritePolicy::ReplacePartition {
            warehouse
                .delete_partition(destination, partition, credentials)
                .map_err(|e| as_load_error(destination, e))?;
            debug!(%destination, partition, "cleared partition before load");
        }

        let ranges = chunk_ranges(table.row_count(), self.chunk_size);
        let chunks = ranges.len();
        for (k, range) in ranges.into_iter().enumerate() {
            let chunk = table.slice(range);
            if let Err(e) = warehouse.append(destination, partition, &chunk, credentials) {
                let committed_rows = k * self.chunk_size;
                warn!(
                    %destination,
                    chunk = k + 1,
                    chunks,
                    committed_rows,
                    error = %e,
                    "append failed"
                );
                return Err(PipelineError::PartialLoad {
                    committed_rows,
                    source: Box::new(e),
                });
            }
            debug!(chunk = k + 1, chunks, rows = chunk.row_count(), "appended chunk");
        }

        info!(%destination, partition, rows = table.row_count(), chunks, "load finished");
        Ok(LoadReport {
            rows: table.row_count(),
            chunks,
        })
    }
}

fn as_load_error(destination: &WarehouseTarget, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Load { .. } => err,
        other => PipelineError::Load {
            destination: destination.to_string(),
            message: other.to_string(),
        },
    }
}

/// Consecutive row ranges of at most `chunk_size` rows covering `0..row_count`.
pub(crate) fn chunk_ranges(row_count: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let mut out = Vec::with_capacity(row_count.div_ceil(chunk_size));
    let mut start = 0usize;
    while start < row_count {
        let end = (start + chunk_size).min(row_count);
        out.push(start..end);
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ranges_cover_rows_exactly() {
        assert!(chunk_ranges(0, 3).is_empty());
        assert_eq!(chunk_ranges(3, 3), vec![0..3]);
        assert_eq!(chunk_ranges(7, 3), vec![0..3, 3..6, 6..7]);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = WarehouseLoader::new(0, WritePolicy::Append).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = WarehouseCredentials {
            project_id: "p".into(),
            service_account: "secret.json".into(),
        };
        assert!(!format!("{creds:?}").contains("secret.json"));
    }

    #[test]
    fn write_policy_defaults_to_replace_partition() {
        assert_eq!(WritePolicy::default(), WritePolicy::ReplacePartition);
        let p: WritePolicy = serde_json::from_str("\"append\"").unwrap();
        assert_eq!(p, WritePolicy::Append);
    }
}
