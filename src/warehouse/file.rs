//! Warehouse backed by newline-delimited JSON files.
//!
//! Layout under `root`: `{dataset}/{table}/_schema.json` holds the table schema recorded by the
//! first append, and each partition is `{dataset}/{table}/{partition}.ndjson`.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Number, Value as Json};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::parquet::datetime_to_string;
use crate::types::{DataSet, Field, Value};

use super::{Warehouse, WarehouseCredentials, WarehouseTarget};

const SCHEMA_FILE: &str = "_schema.json";

#[derive(Debug, Clone)]
pub struct FileWarehouse {
    root: PathBuf,
}

impl FileWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn table_dir(&self, target: &WarehouseTarget) -> PipelineResult<PathBuf> {
        let (dataset, table) = target
            .table
            .split_once('.')
            .filter(|(d, t)| !d.is_empty() && !t.is_empty() && !t.contains('.'))
            .ok_or_else(|| {
                load_err(target, format!("table id '{}' is not dataset.table", target.table))
            })?;
        Ok(self.root.join(dataset).join(table))
    }

    fn partition_path(&self, target: &WarehouseTarget, partition: &str) -> PipelineResult<PathBuf> {
        Ok(self.table_dir(target)?.join(format!("{partition}.ndjson")))
    }

    /// Number of rows stored under `partition`.
    pub fn partition_rows(&self, target: &WarehouseTarget, partition: &str) -> PipelineResult<usize> {
        let path = self.partition_path(target, partition)?;
        match fs::File::open(&path) {
            Ok(f) => Ok(BufReader::new(f).lines().map_while(Result::ok).count()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(PipelineError::io(path, e)),
        }
    }

    /// Check `fields` against the recorded schema, recording it if this is the first write.
    fn ensure_schema(&self, target: &WarehouseTarget, dir: &Path, fields: &[Field]) -> PipelineResult<()> {
        let path = dir.join(SCHEMA_FILE);
        match fs::read(&path) {
            Ok(bytes) => {
                let recorded: Vec<Field> = serde_json::from_slice(&bytes)
                    .map_err(|e| load_err(target, format!("unreadable {}: {e}", path.display())))?;
                if recorded != fields {
                    return Err(load_err(
                        target,
                        format!(
                            "schema mismatch: table has [{}], chunk has [{}]",
                            describe(&recorded),
                            describe(fields)
                        ),
                    ));
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
                let json = serde_json::to_vec_pretty(fields)
                    .map_err(|e| load_err(target, e.to_string()))?;
                fs::write(&path, json).map_err(|e| PipelineError::io(&path, e))
            }
            Err(e) => Err(PipelineError::io(path, e)),
        }
    }
}

impl Warehouse for FileWarehouse {
    fn validate_credentials(
        &self,
        target: &WarehouseTarget,
        credentials: &WarehouseCredentials,
    ) -> PipelineResult<()> {
        if credentials.service_account.trim().is_empty() {
            return Err(load_err(target, "credentials carry no service account"));
        }
        if credentials.project_id != target.project_id {
            return Err(load_err(
                target,
                format!(
                    "credentials for project '{}' cannot write to project '{}'",
                    credentials.project_id, target.project_id
                ),
            ));
        }
        Ok(())
    }

    fn append(
        &self,
        target: &WarehouseTarget,
        partition: &str,
        chunk: &DataSet,
        credentials: &WarehouseCredentials,
    ) -> PipelineResult<()> {
        self.validate_credentials(target, credentials)?;
        let dir = self.table_dir(target)?;
        self.ensure_schema(target, &dir, &chunk.schema.fields)?;

        let path = self.partition_path(target, partition)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PipelineError::io(&path, e))?;

        // Encode the whole chunk before writing so a bad row cannot leave half a chunk behind.
        let mut buf = Vec::new();
        for row in &chunk.rows {
            let record: Map<String, Json> = chunk
                .schema
                .fields
                .iter()
                .zip(row)
                .map(|(field, value)| (field.name.clone(), to_json(value)))
                .collect();
            serde_json::to_writer(&mut buf, &record).map_err(|e| load_err(target, e.to_string()))?;
            buf.push(b'\n');
        }

        let mut out = BufWriter::new(file);
        out.write_all(&buf)
            .and_then(|()| out.flush())
            .map_err(|e| PipelineError::io(&path, e))?;
        debug!(path = %path.display(), rows = chunk.row_count(), "appended ndjson chunk");
        Ok(())
    }

    fn delete_partition(
        &self,
        target: &WarehouseTarget,
        partition: &str,
        credentials: &WarehouseCredentials,
    ) -> PipelineResult<()> {
        self.validate_credentials(target, credentials)?;
        let path = self.partition_path(target, partition)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "deleted partition");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::io(path, e)),
        }
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Int64(v) => Json::from(*v),
        Value::Float64(v) => Number::from_f64(*v).map_or(Json::Null, Json::Number),
        Value::Bool(v) => Json::Bool(*v),
        Value::Utf8(s) => Json::String(s.clone()),
        Value::Datetime(ts) => Json::String(datetime_to_string(ts)),
    }
}

fn describe(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| format!("{}:{}", f.name, f.data_type))
        .collect::<Vec<_>>()
        .join(", ")
}

fn load_err(target: &WarehouseTarget, message: impl Into<String>) -> PipelineError {
    PipelineError::Load {
        destination: target.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Schema};
    use crate::warehouse::{WarehouseLoader, WritePolicy};

    fn target() -> WarehouseTarget {
        WarehouseTarget::new("dtc-de", "trips_data_all.rides")
    }

    fn creds() -> WarehouseCredentials {
        WarehouseCredentials {
            project_id: "dtc-de".into(),
            service_account: "loader@dtc-de".into(),
        }
    }

    fn rows(n: i64) -> DataSet {
        DataSet::new(
            Schema::new(vec![
                Field::new("VendorID", DataType::Int64),
                Field::new("fare_amount", DataType::Float64),
            ]),
            (0..n)
                .map(|i| vec![Value::Int64(i), Value::Float64(i as f64 * 1.5)])
                .collect(),
        )
    }

    #[test]
    fn replace_partition_makes_reloads_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let wh = FileWarehouse::new(dir.path());
        let loader = WarehouseLoader::new(2, WritePolicy::ReplacePartition).unwrap();

        for _ in 0..2 {
            let report = loader
                .load(&wh, &rows(5), &target(), &creds(), "yellow_tripdata_2019-01")
                .unwrap();
            assert_eq!(report.chunks, 3);
        }
        assert_eq!(wh.partition_rows(&target(), "yellow_tripdata_2019-01").unwrap(), 5);
    }

    #[test]
    fn append_policy_duplicates_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let wh = FileWarehouse::new(dir.path());
        let loader = WarehouseLoader::new(10, WritePolicy::Append).unwrap();

        loader.load(&wh, &rows(3), &target(), &creds(), "p").unwrap();
        loader.load(&wh, &rows(3), &target(), &creds(), "p").unwrap();
        assert_eq!(wh.partition_rows(&target(), "p").unwrap(), 6);
    }

    #[test]
    fn wrong_project_credentials_are_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let wh = FileWarehouse::new(dir.path());
        let other = WarehouseCredentials {
            project_id: "someone-else".into(),
            service_account: "x".into(),
        };

        let err = WarehouseLoader::default()
            .load(&wh, &rows(3), &target(), &other, "p")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn schema_mismatch_fails_the_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let wh = FileWarehouse::new(dir.path());
        let loader = WarehouseLoader::default();
        loader.load(&wh, &rows(1), &target(), &creds(), "a").unwrap();

        let mut renamed = rows(1);
        renamed.schema.fields[1].name = "total_amount".into();
        let err = loader.load(&wh, &renamed, &target(), &creds(), "b").unwrap_err();

        assert_eq!(err.committed_rows(), Some(0));
        assert!(err.to_string().contains("schema mismatch"));
    }

    #[test]
    fn encodes_nulls_and_datetimes() {
        let ts = chrono::NaiveDate::from_ymd_opt(2019, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 46, 40))
            .unwrap();
        assert_eq!(to_json(&Value::Datetime(ts)), Json::from("2019-01-01T00:46:40.000000"));
        assert_eq!(to_json(&Value::Null), Json::Null);
        assert_eq!(to_json(&Value::Float64(f64::NAN)), Json::Null);
    }
}
