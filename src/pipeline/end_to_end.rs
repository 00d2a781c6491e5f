//! Both pipelines back to back for one period.

use crate::period::Period;

use super::{IngestPipeline, LoadPipeline, PeriodOutcome, PeriodPipeline, StageFailure};

/// Ingest then load for the same period. A failed ingest skips the load.
pub struct EndToEndPipeline {
    ingest: IngestPipeline,
    load: LoadPipeline,
}

impl EndToEndPipeline {
    pub fn new(ingest: IngestPipeline, load: LoadPipeline) -> Self {
        Self { ingest, load }
    }
}

impl PeriodPipeline for EndToEndPipeline {
    fn name(&self) -> &str {
        "end_to_end"
    }

    fn run_period(&self, period: &Period) -> Result<PeriodOutcome, StageFailure> {
        let ingested = self.ingest.run_period(period)?;
        let loaded = self.load.run_period(period)?;
        Ok(PeriodOutcome {
            period: *period,
            rows_published: ingested.rows_published,
            rows_loaded: loaded.rows_loaded,
        })
    }
}
