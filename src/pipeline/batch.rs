//! Sequential runs of a pipeline over many periods.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, info_span, warn};

use crate::observability::{NoopObserver, PipelineObserver, Severity, notify, severity_for_error};
use crate::period::Period;

use super::{PeriodOutcome, PeriodPipeline, StageFailure};

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<PeriodOutcome>,
    pub failed: Vec<StageFailure>,
    /// Periods not started because the run was cancelled.
    pub skipped: Vec<Period>,
}

impl BatchSummary {
    /// Rows loaded into the warehouse by periods that completed loading.
    pub fn total_rows(&self) -> usize {
        self.succeeded.iter().filter_map(|o| o.rows_loaded).sum()
    }

    /// Rows published by periods that completed the ingest stages.
    pub fn total_published(&self) -> usize {
        self.succeeded.iter().filter_map(|o| o.rows_published).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch finished: {} succeeded, {} failed, {} skipped; rows published={} loaded={}",
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len(),
            self.total_published(),
            self.total_rows()
        )?;
        for outcome in &self.succeeded {
            write!(f, "\n  {outcome}")?;
        }
        for failure in &self.failed {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

/// Runs a pipeline over a list of periods, one at a time.
///
/// A failed period is recorded and the rest still run. Cancellation is checked between
/// periods only.
pub struct BatchDriver {
    observer: Arc<dyn PipelineObserver>,
    alert_threshold: Severity,
    cancel: Arc<AtomicBool>,
}

impl Default for BatchDriver {
    fn default() -> Self {
        Self {
            observer: Arc::new(NoopObserver),
            alert_threshold: Severity::Critical,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl BatchDriver {
    pub fn new(observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            observer,
            ..Self::default()
        }
    }

    /// Failures at or above `threshold` are also sent to `on_alert`.
    pub fn with_alert_threshold(mut self, threshold: Severity) -> Self {
        self.alert_threshold = threshold;
        self
    }

    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Flag that, once set, stops the batch before its next period.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run(&self, pipeline: &dyn PeriodPipeline, periods: &[Period]) -> BatchSummary {
        let _span =
            info_span!("batch", pipeline = pipeline.name(), periods = periods.len()).entered();

        let summary = periods.iter().fold(BatchSummary::default(), |mut summary, period| {
            if self.cancel.load(Ordering::SeqCst) {
                summary.skipped.push(*period);
                return summary;
            }
            match pipeline.run_period(period) {
                Ok(outcome) => {
                    info!(%period, "period done");
                    summary.succeeded.push(outcome);
                }
                Err(failure) => {
                    self.report(&failure);
                    summary.failed.push(failure);
                }
            }
            summary
        });

        if !summary.skipped.is_empty() {
            warn!(skipped = summary.skipped.len(), "batch cancelled");
        }
        notify(self.observer.as_ref(), |o| o.on_batch_finished(&summary));
        summary
    }

    fn report(&self, failure: &StageFailure) {
        let severity = severity_for_error(&failure.error);
        notify(self.observer.as_ref(), |o| o.on_failure(failure, severity));
        if severity >= self.alert_threshold {
            notify(self.observer.as_ref(), |o| o.on_alert(failure, severity));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::PipelineError;
    use crate::period::Category;
    use crate::pipeline::Stage;

    /// Loads `rows` per period except for months listed in `failing`.
    struct Scripted {
        rows: usize,
        failing: Vec<u32>,
        error: fn() -> PipelineError,
    }

    impl PeriodPipeline for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn run_period(&self, period: &Period) -> Result<PeriodOutcome, StageFailure> {
            if self.failing.contains(&period.month()) {
                return Err(StageFailure {
                    period: *period,
                    stage: Stage::Loading,
                    error: (self.error)(),
                });
            }
            Ok(PeriodOutcome {
                rows_loaded: Some(self.rows),
                ..PeriodOutcome::new(*period)
            })
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl PipelineObserver for Events {
        fn on_failure(&self, failure: &StageFailure, _severity: Severity) {
            self.0.lock().unwrap().push(format!("failure {}", failure.period));
        }

        fn on_alert(&self, failure: &StageFailure, _severity: Severity) {
            self.0.lock().unwrap().push(format!("alert {}", failure.period));
        }

        fn on_batch_finished(&self, summary: &BatchSummary) {
            self.0.lock().unwrap().push(format!("batch {}", summary.total_rows()));
        }
    }

    fn periods() -> Vec<Period> {
        Period::grid(&[2019], &[1, 2, 3], Category::Yellow).unwrap()
    }

    #[test]
    fn failures_do_not_stop_later_periods() {
        let events = Arc::new(Events::default());
        let pipeline = Scripted {
            rows: 10,
            failing: vec![2],
            error: || PipelineError::NotFound { key: "k".into() },
        };

        let summary = BatchDriver::new(events.clone()).run(&pipeline, &periods());

        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.total_rows(), 20);
        assert_eq!(
            *events.0.lock().unwrap(),
            vec!["failure yellow/2019-02".to_string(), "batch 20".to_string()]
        );
    }

    #[test]
    fn summary_names_every_period() {
        let pipeline = Scripted {
            rows: 3,
            failing: vec![2],
            error: || PipelineError::NotFound { key: "k".into() },
        };

        let summary = BatchDriver::default().run(&pipeline, &periods()[..2]);
        let text = summary.to_string();

        assert!(text.starts_with("batch finished: 1 succeeded, 1 failed, 0 skipped"));
        assert!(text.contains("yellow/2019-01 succeeded: loaded=3"));
        assert!(text.contains("yellow/2019-02 failed while loading"));
    }

    #[test]
    fn critical_failures_alert() {
        let events = Arc::new(Events::default());
        let pipeline = Scripted {
            rows: 1,
            failing: vec![1],
            error: || PipelineError::PartialLoad {
                committed_rows: 0,
                source: Box::new(PipelineError::schema("x")),
            },
        };

        BatchDriver::new(events.clone()).run(&pipeline, &periods()[..1]);

        assert_eq!(
            events.0.lock().unwrap()[..2],
            ["failure yellow/2019-01".to_string(), "alert yellow/2019-01".to_string()]
        );
    }

    #[test]
    fn cancelled_batch_skips_remaining_periods() {
        let driver = BatchDriver::default();
        driver.cancellation_flag().store(true, Ordering::SeqCst);
        let pipeline = Scripted {
            rows: 1,
            failing: vec![],
            error: || PipelineError::schema("unused"),
        };

        let summary = driver.run(&pipeline, &periods());

        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.skipped, periods());
        assert!(!summary.is_clean());
    }
}
