#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tripdata_pipeline::error::{PipelineError, PipelineResult};
use tripdata_pipeline::ingestion::{DatasetSource, Fetcher};
use tripdata_pipeline::period::ArtifactPath;
use tripdata_pipeline::pipeline::{IngestPipeline, LoadPipeline};
use tripdata_pipeline::processing::Transformer;
use tripdata_pipeline::retry::RetryPolicy;
use tripdata_pipeline::storage::{Extractor, LocalBucket, LocalWriter, RemotePublisher, RemoteStorage};
use tripdata_pipeline::types::DataSet;
use tripdata_pipeline::warehouse::{
    Warehouse, WarehouseCredentials, WarehouseLoader, WarehouseTarget, WritePolicy,
};

pub const BASE_URL: &str = "https://example.test/releases";

/// Yellow-taxi CSV with `n` trips, fares offset by `fare_base`.
pub fn yellow_csv(n: usize, fare_base: f64) -> Vec<u8> {
    let mut out = String::from(
        "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,fare_amount\n",
    );
    for i in 0..n {
        let passengers = if i % 2 == 0 { "1" } else { "" };
        out.push_str(&format!(
            "{},2019-01-01 00:{:02}:00,2019-01-01 00:{:02}:30,{passengers},{}\n",
            i % 2 + 1,
            i % 60,
            i % 60,
            fare_base + i as f64
        ));
    }
    out.into_bytes()
}

/// HTTP source answering from a fixed table of URLs; unknown URLs fail.
#[derive(Default)]
pub struct FakeSource {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn serve(&self, url: String, body: Vec<u8>) {
        self.responses.lock().unwrap().insert(url, body);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DatasetSource for FakeSource {
    fn get(&self, url: &str) -> PipelineResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::Fetch {
                url: url.to_string(),
                attempts: 1,
                cause: "connection reset by peer".to_string(),
            })
    }
}

/// Wraps a backend, counting downloads and optionally failing every upload or download.
pub struct CountingStorage {
    pub inner: Arc<dyn RemoteStorage>,
    pub downloads: AtomicUsize,
    pub fail_uploads: bool,
    pub fail_downloads: bool,
}

impl CountingStorage {
    pub fn new(inner: Arc<dyn RemoteStorage>) -> Self {
        Self {
            inner,
            downloads: AtomicUsize::new(0),
            fail_uploads: false,
            fail_downloads: false,
        }
    }
}

impl RemoteStorage for CountingStorage {
    fn name(&self) -> &str {
        "counting"
    }

    fn upload(&self, from: &Path, to: &ArtifactPath) -> PipelineResult<()> {
        if self.fail_uploads {
            return Err(PipelineError::Publish {
                backend: "counting".to_string(),
                message: "403 forbidden".to_string(),
            });
        }
        self.inner.upload(from, to)
    }

    fn download(&self, from: &ArtifactPath, to: &Path) -> PipelineResult<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_downloads {
            return Err(PipelineError::Extract {
                key: from.remote_key(""),
                message: "connection reset".to_string(),
            });
        }
        self.inner.download(from, to)
    }
}

/// In-memory warehouse recording every append; the `fail_on`-th append (1-based) fails.
#[derive(Default)]
pub struct RecordingWarehouse {
    pub appends: Mutex<Vec<(String, usize)>>,
    pub deletes: Mutex<Vec<String>>,
    pub fail_on: Option<usize>,
    pub reject_credentials: bool,
}

impl RecordingWarehouse {
    pub fn failing_on(k: usize) -> Self {
        Self {
            fail_on: Some(k),
            ..Self::default()
        }
    }

    pub fn append_sizes(&self) -> Vec<usize> {
        self.appends.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }

    pub fn rows_in(&self, partition: &str) -> usize {
        self.appends
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == partition)
            .map(|(_, n)| n)
            .sum()
    }
}

impl Warehouse for RecordingWarehouse {
    fn validate_credentials(
        &self,
        target: &WarehouseTarget,
        _credentials: &WarehouseCredentials,
    ) -> PipelineResult<()> {
        if self.reject_credentials {
            return Err(PipelineError::Load {
                destination: target.to_string(),
                message: "invalid service account".to_string(),
            });
        }
        Ok(())
    }

    fn append(
        &self,
        target: &WarehouseTarget,
        partition: &str,
        chunk: &DataSet,
        _credentials: &WarehouseCredentials,
    ) -> PipelineResult<()> {
        let mut appends = self.appends.lock().unwrap();
        if self.fail_on == Some(appends.len() + 1) {
            return Err(PipelineError::Load {
                destination: target.to_string(),
                message: "quota exceeded".to_string(),
            });
        }
        appends.push((partition.to_string(), chunk.row_count()));
        Ok(())
    }

    fn delete_partition(
        &self,
        _target: &WarehouseTarget,
        partition: &str,
        _credentials: &WarehouseCredentials,
    ) -> PipelineResult<()> {
        self.deletes.lock().unwrap().push(partition.to_string());
        self.appends.lock().unwrap().retain(|(p, _)| p != partition);
        Ok(())
    }
}

pub fn target() -> WarehouseTarget {
    WarehouseTarget::new("dtc-de-376220", "trips_data_all.rides")
}

pub fn credentials() -> WarehouseCredentials {
    WarehouseCredentials {
        project_id: "dtc-de-376220".to_string(),
        service_account: "loader@dtc-de-376220".to_string(),
    }
}

/// Directories for one test: local data root and bucket root.
pub struct Workspace {
    pub data: tempfile::TempDir,
    pub bucket: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            data: tempfile::tempdir().unwrap(),
            bucket: tempfile::tempdir().unwrap(),
        }
    }

    pub fn bucket_backend(&self) -> Arc<dyn RemoteStorage> {
        Arc::new(LocalBucket::new(self.bucket.path(), "data"))
    }

    pub fn ingest(&self, source: Arc<FakeSource>, backend: Arc<dyn RemoteStorage>) -> IngestPipeline {
        IngestPipeline::new(
            BASE_URL,
            Fetcher::new(source, RetryPolicy::default()),
            LocalWriter::new(self.data.path()),
            RemotePublisher::new(backend),
        )
    }

    pub fn load(
        &self,
        backend: Arc<dyn RemoteStorage>,
        warehouse: Arc<dyn Warehouse>,
        chunk_size: usize,
    ) -> LoadPipeline {
        LoadPipeline::new(
            Extractor::new(backend, self.data.path(), RetryPolicy::default()),
            Transformer::default(),
            WarehouseLoader::new(chunk_size, WritePolicy::ReplacePartition).unwrap(),
            warehouse,
            target(),
            credentials(),
        )
    }
}
