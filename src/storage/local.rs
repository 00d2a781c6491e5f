//! Local Parquet artifacts.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::PipelineResult;
use crate::ingestion::write_parquet;
use crate::period::{ArtifactPath, Category, DatasetFile};
use crate::types::DataSet;

use super::write_atomic;

/// Serializes tables to gzip-compressed Parquet under a data root.
#[derive(Debug, Clone)]
pub struct LocalWriter {
    data_root: PathBuf,
}

impl LocalWriter {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Write `table` to `{data_root}/{category}/{dataset_file}.parquet`.
    ///
    /// The file is replaced atomically, so a rerun leaves exactly the latest table on disk.
    pub fn write_local(
        &self,
        table: &DataSet,
        category: Category,
        dataset_file: &DatasetFile,
    ) -> PipelineResult<ArtifactPath> {
        let artifact = ArtifactPath::new(category, dataset_file);
        let dest = artifact.local_path(&self.data_root);

        write_atomic(&dest, |file| write_parquet(table, file))?;

        info!(path = %dest.display(), rows = table.row_count(), "wrote local artifact");
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::ingestion::read_parquet;
    use crate::period::Period;
    use crate::types::{DataType, Field, Schema, Value};

    fn table(v: i64) -> DataSet {
        DataSet::new(
            Schema::new(vec![Field::new("VendorID", DataType::Int64)]),
            vec![vec![Value::Int64(v)]],
        )
    }

    #[test]
    fn writes_under_category_directory() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LocalWriter::new(dir.path());
        let period = Period::new(2019, 1, Category::Yellow).unwrap();

        let artifact = writer
            .write_local(&table(1), Category::Yellow, &period.dataset_file())
            .unwrap();

        let path = artifact.local_path(dir.path());
        assert_eq!(
            path,
            dir.path().join("yellow").join("yellow_tripdata_2019-01.parquet")
        );
        assert_eq!(read_parquet(&path).unwrap(), table(1));
    }

    #[test]
    fn unwritable_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let writer = LocalWriter::new(&blocker);
        let period = Period::new(2019, 1, Category::Green).unwrap();

        let err = writer
            .write_local(&table(1), Category::Green, &period.dataset_file())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
