//! Run configuration.
//!
//! Loaded from an optional TOML file, then environment variables prefixed `TRIPDATA__` with
//! `__` between nesting levels (e.g. `TRIPDATA__WAREHOUSE__CHUNK_SIZE=100000`). Every field has
//! a default, so an empty file is a valid configuration.
//!
//! Storage backends and warehouse credentials are declared as named blocks and referenced by
//! name:
//!
//! ```toml
//! [publish]
//! backend = "zoomcamp-gcs"
//!
//! [blocks.zoomcamp-gcs]
//! kind = "object_storage"
//! bucket = "dtc-data-lake"
//! access_key = "..."
//! secret_key = "..."
//!
//! [warehouse]
//! credentials = "zoomcamp-gcp"
//!
//! [credentials.zoomcamp-gcp]
//! project_id = "dtc-de-376220"
//! service_account = "/secrets/loader.json"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::{Fetcher, HttpSource, SourceConfig};
use crate::logging::LogConfig;
use crate::observability::{CompositeObserver, FileObserver, PipelineObserver, Severity, TracingObserver};
use crate::period::{Category, Period};
use crate::pipeline::{IngestPipeline, LoadPipeline};
use crate::processing::{CleaningRule, Transformer};
use crate::retry::RetryPolicy;
use crate::storage::{BackendConfig, Extractor, LocalWriter, RemotePublisher, RemoteStorage, build_backend};
use crate::warehouse::{
    DEFAULT_CHUNK_SIZE, FileWarehouse, WarehouseCredentials, WarehouseLoader, WarehouseTarget, WritePolicy,
};

pub const ENV_PREFIX: &str = "TRIPDATA";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Local root for artifacts.
    pub data_root: PathBuf,
    /// Prefix of remote keys; artifacts land at `{remote_prefix}/{category}/{file}.parquet`.
    pub remote_prefix: String,
    pub source: SourceConfig,
    pub retry: RetryPolicy,
    pub publish: PublishConfig,
    pub blocks: BTreeMap<String, BackendConfig>,
    pub warehouse: WarehouseConfig,
    pub credentials: BTreeMap<String, WarehouseCredentials>,
    pub transform: TransformConfig,
    /// Datetime column names per category, replacing the source's defaults.
    pub columns: HashMap<Category, DatetimeColumns>,
    pub batch: BatchConfig,
    pub observer: ObserverConfig,
    pub log: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            remote_prefix: "data".to_string(),
            source: SourceConfig::default(),
            retry: RetryPolicy::default(),
            publish: PublishConfig::default(),
            blocks: BTreeMap::from([(
                "local".to_string(),
                BackendConfig::LocalBucket {
                    root: PathBuf::from("bucket"),
                },
            )]),
            warehouse: WarehouseConfig::default(),
            credentials: BTreeMap::new(),
            transform: TransformConfig::default(),
            columns: HashMap::new(),
            batch: BatchConfig::default(),
            observer: ObserverConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Name of the `[blocks.<name>]` entry used for this run.
    pub backend: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Root directory of the file-backed warehouse.
    pub root: PathBuf,
    pub project_id: String,
    /// `dataset.table`.
    pub table: String,
    pub chunk_size: usize,
    pub write_policy: WritePolicy,
    /// Name of the `[credentials.<name>]` entry.
    pub credentials: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("warehouse"),
            project_id: "dtc-de-376220".to_string(),
            table: "trips_data_all.rides".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_policy: WritePolicy::default(),
            credentials: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub rules: Vec<CleaningRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeColumns {
    pub pickup: String,
    pub dropoff: String,
}

/// Periods used when the command line names none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub years: Vec<i32>,
    pub months: Vec<u32>,
    pub category: Category,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            years: vec![2019],
            months: vec![1, 2],
            category: Category::Yellow,
        }
    }
}

impl BatchConfig {
    pub fn periods(&self) -> PipelineResult<Vec<Period>> {
        Period::grid(&self.years, &self.months, self.category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Append-only event log, in addition to tracing output.
    pub event_log: Option<PathBuf>,
    pub alert_threshold: Severity,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            event_log: None,
            alert_threshold: Severity::Critical,
        }
    }
}

impl PipelineConfig {
    /// Load from `path` (if any) and the environment.
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?;
        Ok(config)
    }

    /// Parse a TOML document, without environment overrides.
    pub fn from_toml(text: &str) -> PipelineResult<Self> {
        Ok(Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?)
    }

    /// The remote backend named by `publish.backend`.
    pub fn resolve_backend(&self) -> PipelineResult<Arc<dyn RemoteStorage>> {
        let name = &self.publish.backend;
        let block = self.blocks.get(name).ok_or_else(|| {
            PipelineError::config(format!(
                "storage block '{name}' is not defined (known: {:?})",
                self.blocks.keys().collect::<Vec<_>>()
            ))
        })?;
        info!(block = %name, kind = block.kind(), "selected remote backend");
        build_backend(block, &self.remote_prefix)
    }

    /// The credentials named by `warehouse.credentials`.
    pub fn resolve_credentials(&self) -> PipelineResult<WarehouseCredentials> {
        let name = &self.warehouse.credentials;
        self.credentials
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::config(format!("credentials block '{name}' is not defined")))
    }

    /// Tracing plus the optional event log.
    pub fn observer(&self) -> Arc<dyn PipelineObserver> {
        let mut observers: Vec<Arc<dyn PipelineObserver>> = vec![Arc::new(TracingObserver)];
        if let Some(path) = &self.observer.event_log {
            observers.push(Arc::new(FileObserver::new(path)));
        }
        Arc::new(CompositeObserver::new(observers))
    }

    pub fn ingest_pipeline(
        &self,
        backend: Arc<dyn RemoteStorage>,
        observer: Arc<dyn PipelineObserver>,
    ) -> PipelineResult<IngestPipeline> {
        let source = HttpSource::new(&self.source)?;
        let pipeline = IngestPipeline::new(
            self.source.base_url.clone(),
            Fetcher::new(Arc::new(source), self.retry),
            LocalWriter::new(&self.data_root),
            RemotePublisher::new(backend),
        )
        .with_observer(observer);

        Ok(self.columns.iter().fold(pipeline, |p, (category, cols)| {
            p.with_datetime_columns(*category, cols.pickup.clone(), cols.dropoff.clone())
        }))
    }

    pub fn load_pipeline(
        &self,
        backend: Arc<dyn RemoteStorage>,
        observer: Arc<dyn PipelineObserver>,
    ) -> PipelineResult<LoadPipeline> {
        let w = &self.warehouse;
        Ok(LoadPipeline::new(
            Extractor::new(backend, &self.data_root, self.retry),
            Transformer::new(self.transform.rules.clone()),
            WarehouseLoader::new(w.chunk_size, w.write_policy)?,
            Arc::new(FileWarehouse::new(&w.root)),
            WarehouseTarget::new(w.project_id.clone(), w.table.clone()),
            self.resolve_credentials()?,
        )
        .with_observer(observer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::FillValue;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = PipelineConfig::from_toml("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.warehouse.chunk_size, 500_000);
        assert_eq!(cfg.batch.periods().unwrap().len(), 2);
        assert!(cfg.resolve_backend().is_ok());
    }

    #[test]
    fn named_blocks_resolve() {
        let cfg = PipelineConfig::from_toml(
            r#"
            remote_prefix = "lake"

            [publish]
            backend = "archive"

            [blocks.archive]
            kind = "local_bucket"
            root = "/srv/archive"

            [warehouse]
            credentials = "loader"
            write_policy = "append"

            [credentials.loader]
            project_id = "dtc-de-376220"
            service_account = "loader@example"

            [[transform.rules]]
            rule = "fill_null"
            column = "passenger_count"
            value = 0

            [columns.fhv]
            pickup = "pickup_datetime"
            dropoff = "dropoff_datetime"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.resolve_backend().unwrap().name(), "local_bucket");
        assert_eq!(cfg.resolve_credentials().unwrap().project_id, "dtc-de-376220");
        assert_eq!(cfg.warehouse.write_policy, WritePolicy::Append);
        assert_eq!(
            cfg.transform.rules,
            vec![CleaningRule::FillNull {
                column: "passenger_count".into(),
                value: FillValue::Int(0)
            }]
        );
        assert_eq!(cfg.columns[&Category::Fhv].dropoff, "dropoff_datetime");
    }

    #[test]
    fn unknown_block_is_config_error() {
        let cfg = PipelineConfig::from_toml("[publish]\nbackend = \"gcs\"").unwrap();
        let err = cfg.resolve_backend().err().unwrap();
        assert!(matches!(err, PipelineError::Config { .. }));
        assert!(matches!(
            cfg.resolve_credentials().unwrap_err(),
            PipelineError::Config { .. }
        ));
    }
}
