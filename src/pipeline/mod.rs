//! Per-period pipelines and the batch driver.
//!
//! - [`IngestPipeline`]: fetch, normalize, write locally, publish
//! - [`LoadPipeline`]: extract, transform, load into the warehouse
//! - [`EndToEndPipeline`]: ingest then load for the same period
//! - [`BatchDriver`]: runs a pipeline once per period and folds the outcomes into a
//!   [`BatchSummary`]
//!
//! A period moves forward through its [`Stage`]s only. The first failing stage ends the period
//! with a [`StageFailure`]; nothing already written by earlier stages is rolled back.

pub mod batch;
pub mod end_to_end;
pub mod ingest;
pub mod load;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{PipelineError, PipelineResult};
use crate::observability::{PipelineObserver, notify};
use crate::period::Period;

pub use batch::{BatchDriver, BatchSummary};
pub use end_to_end::EndToEndPipeline;
pub use ingest::IngestPipeline;
pub use load::LoadPipeline;

/// Stages in execution order. Ingest stages precede load stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Fetching,
    Normalizing,
    WritingLocal,
    Publishing,
    Extracting,
    Transforming,
    Loading,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Normalizing => "normalizing",
            Stage::WritingLocal => "writing_local",
            Stage::Publishing => "publishing",
            Stage::Extracting => "extracting",
            Stage::Transforming => "transforming",
            Stage::Loading => "loading",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a period ended early.
#[derive(Debug)]
pub struct StageFailure {
    pub period: Period,
    pub stage: Stage,
    pub error: PipelineError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed while {}: {}", self.period, self.stage, self.error)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result of a period that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodOutcome {
    pub period: Period,
    /// Rows written and published by the ingest stages, if they ran.
    pub rows_published: Option<usize>,
    /// Rows loaded into the warehouse, if the load stages ran.
    pub rows_loaded: Option<usize>,
}

impl PeriodOutcome {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            rows_published: None,
            rows_loaded: None,
        }
    }
}

impl fmt::Display for PeriodOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded", self.period)?;
        let counts = [("published", self.rows_published), ("loaded", self.rows_loaded)];
        let mut sep = ":";
        for (label, rows) in counts {
            if let Some(rows) = rows {
                write!(f, "{sep} {label}={rows}")?;
                sep = ",";
            }
        }
        Ok(())
    }
}

/// A pipeline that can run one period to completion.
pub trait PeriodPipeline {
    fn name(&self) -> &str;

    fn run_period(&self, period: &Period) -> Result<PeriodOutcome, StageFailure>;
}

/// Runs a period's stages in order and reports them to the observer.
pub(crate) struct StageRun<'a> {
    period: Period,
    observer: &'a Arc<dyn PipelineObserver>,
    last: Option<Stage>,
}

impl<'a> StageRun<'a> {
    pub(crate) fn new(period: Period, observer: &'a Arc<dyn PipelineObserver>) -> Self {
        Self {
            period,
            observer,
            last: None,
        }
    }

    /// Run `stage`. Stages must be entered in increasing order.
    pub(crate) fn step<T>(
        &mut self,
        stage: Stage,
        f: impl FnOnce() -> PipelineResult<T>,
    ) -> Result<T, StageFailure> {
        debug_assert!(
            self.last.is_none_or(|last| last < stage),
            "stage {stage} entered after {:?}",
            self.last
        );
        self.last = Some(stage);

        let period = self.period;
        notify(self.observer.as_ref(), |o| o.on_stage_started(&period, stage));
        let started = Instant::now();

        match f() {
            Ok(value) => {
                let elapsed = started.elapsed();
                notify(self.observer.as_ref(), |o| {
                    o.on_stage_finished(&period, stage, elapsed)
                });
                Ok(value)
            }
            Err(error) => Err(StageFailure {
                period,
                stage,
                error,
            }),
        }
    }
}
