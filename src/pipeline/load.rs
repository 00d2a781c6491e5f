//! Pipeline B: published artifact to warehouse rows.

use std::sync::Arc;

use tracing::info;

use crate::observability::{NoopObserver, PipelineObserver};
use crate::period::Period;
use crate::processing::Transformer;
use crate::storage::Extractor;
use crate::warehouse::{Warehouse, WarehouseCredentials, WarehouseLoader, WarehouseTarget};

use super::{PeriodOutcome, PeriodPipeline, Stage, StageFailure, StageRun};

/// Object storage to warehouse: `Extracting → Transforming → Loading`.
///
/// Rows are loaded under a partition named after the period's dataset file, which is what the
/// replace-partition write policy deletes on a rerun.
pub struct LoadPipeline {
    extractor: Extractor,
    transformer: Transformer,
    loader: WarehouseLoader,
    warehouse: Arc<dyn Warehouse>,
    destination: WarehouseTarget,
    credentials: WarehouseCredentials,
    observer: Arc<dyn PipelineObserver>,
}

impl LoadPipeline {
    pub fn new(
        extractor: Extractor,
        transformer: Transformer,
        loader: WarehouseLoader,
        warehouse: Arc<dyn Warehouse>,
        destination: WarehouseTarget,
        credentials: WarehouseCredentials,
    ) -> Self {
        Self {
            extractor,
            transformer,
            loader,
            warehouse,
            destination,
            credentials,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }
}

impl PeriodPipeline for LoadPipeline {
    fn name(&self) -> &str {
        "load"
    }

    fn run_period(&self, period: &Period) -> Result<PeriodOutcome, StageFailure> {
        let mut run = StageRun::new(*period, &self.observer);

        let artifact = run.step(Stage::Extracting, || {
            self.extractor.extract(period.category(), period)
        })?;
        let local = artifact.local_path(self.extractor.data_root());
        let table = run.step(Stage::Transforming, || self.transformer.transform(&local))?;
        let partition = period.dataset_file();
        let report = run.step(Stage::Loading, || {
            self.loader.load(
                self.warehouse.as_ref(),
                &table,
                &self.destination,
                &self.credentials,
                partition.as_str(),
            )
        })?;

        info!(%period, rows = report.rows, chunks = report.chunks, "number of rows loaded");
        Ok(PeriodOutcome {
            rows_loaded: Some(report.rows),
            ..PeriodOutcome::new(*period)
        })
    }
}
