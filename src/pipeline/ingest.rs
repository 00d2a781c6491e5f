//! Pipeline A: source URL to a published Parquet artifact.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::ingestion::{Fetcher, Normalizer};
use crate::observability::{NoopObserver, PipelineObserver};
use crate::period::{Category, Period};
use crate::storage::{LocalWriter, RemotePublisher};

use super::{PeriodOutcome, PeriodPipeline, Stage, StageFailure, StageRun};

/// Web to object storage: `Fetching → Normalizing → WritingLocal → Publishing`.
pub struct IngestPipeline {
    base_url: String,
    fetcher: Fetcher,
    writer: LocalWriter,
    publisher: RemotePublisher,
    /// (pickup, dropoff) names overriding the category defaults.
    datetime_columns: HashMap<Category, (String, String)>,
    observer: Arc<dyn PipelineObserver>,
}

impl IngestPipeline {
    pub fn new(
        base_url: impl Into<String>,
        fetcher: Fetcher,
        writer: LocalWriter,
        publisher: RemotePublisher,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            fetcher,
            writer,
            publisher,
            datetime_columns: HashMap::new(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_datetime_columns(
        mut self,
        category: Category,
        pickup: impl Into<String>,
        dropoff: impl Into<String>,
    ) -> Self {
        self.datetime_columns
            .insert(category, (pickup.into(), dropoff.into()));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn normalizer(&self, period: &Period) -> Normalizer {
        let normalizer = match self.datetime_columns.get(&period.category()) {
            Some((pickup, dropoff)) => Normalizer::new(pickup.as_str(), dropoff.as_str()),
            None => Normalizer::for_category(period.category()),
        };
        normalizer.with_observer(Arc::clone(&self.observer))
    }
}

impl PeriodPipeline for IngestPipeline {
    fn name(&self) -> &str {
        "ingest"
    }

    fn run_period(&self, period: &Period) -> Result<PeriodOutcome, StageFailure> {
        let category = period.category();
        let dataset_file = period.dataset_file();
        let url = dataset_file.source_url(&self.base_url, category);
        let mut run = StageRun::new(*period, &self.observer);

        let table = run.step(Stage::Fetching, || self.fetcher.fetch(&url))?;
        let table = run.step(Stage::Normalizing, || self.normalizer(period).normalize(table))?;
        let rows = table.row_count();
        let artifact = run.step(Stage::WritingLocal, || {
            self.writer.write_local(&table, category, &dataset_file)
        })?;
        drop(table);

        let local = artifact.local_path(self.writer.data_root());
        run.step(Stage::Publishing, || self.publisher.publish(&local, &artifact))?;

        info!(%period, rows, backend = self.publisher.backend_name(), "sent to remote storage");
        Ok(PeriodOutcome {
            rows_published: Some(rows),
            ..PeriodOutcome::new(*period)
        })
    }
}
