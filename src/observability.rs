//! Observer hooks for pipeline runs.
//!
//! Observers receive stage transitions, table profiles, failures and alerts. They are purely
//! diagnostic: every callback is invoked through [`notify`], which contains panics so that a
//! misbehaving observer can never fail a stage.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::period::Period;
use crate::pipeline::{BatchSummary, Stage, StageFailure};
use crate::types::{DataSet, DataType, Value};

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (period failed).
    Error,
    /// Critical error (local storage or partially committed state).
    Critical,
}

/// Severity assigned to a stage failure.
pub fn severity_for_error(e: &PipelineError) -> Severity {
    match e {
        PipelineError::Io { .. }
        | PipelineError::PartialLoad { .. }
        | PipelineError::Config { .. } => Severity::Critical,
        _ => Severity::Error,
    }
}

/// Shape of a table as reported after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct TableProfile {
    pub rows: usize,
    pub columns: Vec<(String, DataType)>,
    /// Leading rows, at most [`TableProfile::SAMPLE_ROWS`].
    pub sample: Vec<Vec<Value>>,
}

impl TableProfile {
    pub const SAMPLE_ROWS: usize = 2;

    pub fn of(dataset: &DataSet) -> Self {
        Self {
            rows: dataset.row_count(),
            columns: dataset
                .schema
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.data_type))
                .collect(),
            sample: dataset.rows.iter().take(Self::SAMPLE_ROWS).cloned().collect(),
        }
    }
}

impl fmt::Display for TableProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{name}:{ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "rows={} columns=[{columns}]", self.rows)
    }
}

/// Observer interface for pipeline events.
///
/// All methods default to no-ops; implementors override what they need.
pub trait PipelineObserver: Send + Sync {
    fn on_stage_started(&self, _period: &Period, _stage: Stage) {}

    fn on_stage_finished(&self, _period: &Period, _stage: Stage, _elapsed: Duration) {}

    /// Called by the normalizer with the shape of the normalized table.
    fn on_profile(&self, _profile: &TableProfile) {}

    /// Called when a period fails.
    fn on_failure(&self, _failure: &StageFailure, _severity: Severity) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, failure: &StageFailure, severity: Severity) {
        self.on_failure(failure, severity)
    }

    fn on_batch_finished(&self, _summary: &BatchSummary) {}
}

/// Invoke `f` on `observer`, swallowing any panic it raises.
pub fn notify<F>(observer: &dyn PipelineObserver, f: F)
where
    F: FnOnce(&dyn PipelineObserver),
{
    if panic::catch_unwind(AssertUnwindSafe(|| f(observer))).is_err() {
        warn!("pipeline observer panicked; event dropped");
    }
}

/// Observer that does nothing.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

// Each child is isolated separately so one panicking observer does not starve the rest.
impl PipelineObserver for CompositeObserver {
    fn on_stage_started(&self, period: &Period, stage: Stage) {
        for o in &self.observers {
            notify(o.as_ref(), |o| o.on_stage_started(period, stage));
        }
    }

    fn on_stage_finished(&self, period: &Period, stage: Stage, elapsed: Duration) {
        for o in &self.observers {
            notify(o.as_ref(), |o| o.on_stage_finished(period, stage, elapsed));
        }
    }

    fn on_profile(&self, profile: &TableProfile) {
        for o in &self.observers {
            notify(o.as_ref(), |o| o.on_profile(profile));
        }
    }

    fn on_failure(&self, failure: &StageFailure, severity: Severity) {
        for o in &self.observers {
            notify(o.as_ref(), |o| o.on_failure(failure, severity));
        }
    }

    fn on_alert(&self, failure: &StageFailure, severity: Severity) {
        for o in &self.observers {
            notify(o.as_ref(), |o| o.on_alert(failure, severity));
        }
    }

    fn on_batch_finished(&self, summary: &BatchSummary) {
        for o in &self.observers {
            notify(o.as_ref(), |o| o.on_batch_finished(summary));
        }
    }
}

/// Reports events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_stage_started(&self, period: &Period, stage: Stage) {
        info!(%period, %stage, "stage started");
    }

    fn on_stage_finished(&self, period: &Period, stage: Stage, elapsed: Duration) {
        info!(%period, %stage, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
    }

    fn on_profile(&self, profile: &TableProfile) {
        info!(rows = profile.rows, "columns: {}", profile);
        for (i, row) in profile.sample.iter().enumerate() {
            let cells = row.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
            info!(sample_row = i, "[{cells}]");
        }
    }

    fn on_failure(&self, failure: &StageFailure, severity: Severity) {
        error!(
            period = %failure.period,
            stage = %failure.stage,
            ?severity,
            error = %failure.error,
            "period failed"
        );
    }

    fn on_alert(&self, failure: &StageFailure, severity: Severity) {
        error!(
            period = %failure.period,
            stage = %failure.stage,
            ?severity,
            error = %failure.error,
            "ALERT: period failed"
        );
    }

    fn on_batch_finished(&self, summary: &BatchSummary) {
        info!("{summary}");
    }
}

/// Appends pipeline events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl PipelineObserver for FileObserver {
    fn on_stage_finished(&self, period: &Period, stage: Stage, elapsed: Duration) {
        self.append_line(&format!(
            "{} ok period={period} stage={stage} elapsed_ms={}",
            unix_ts(),
            elapsed.as_millis()
        ));
    }

    fn on_profile(&self, profile: &TableProfile) {
        self.append_line(&format!("{} profile {profile}", unix_ts()));
    }

    fn on_failure(&self, failure: &StageFailure, severity: Severity) {
        self.append_line(&format!(
            "{} fail severity={:?} period={} stage={} err={}",
            unix_ts(),
            severity,
            failure.period,
            failure.stage,
            failure.error
        ));
    }

    fn on_alert(&self, failure: &StageFailure, severity: Severity) {
        self.append_line(&format!(
            "{} ALERT severity={:?} period={} stage={} err={}",
            unix_ts(),
            severity,
            failure.period,
            failure.stage,
            failure.error
        ));
    }

    fn on_batch_finished(&self, summary: &BatchSummary) {
        self.append_line(&format!(
            "{} batch succeeded={} failed={} skipped={} total_rows={}",
            unix_ts(),
            summary.succeeded.len(),
            summary.failed.len(),
            summary.skipped.len(),
            summary.total_rows()
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
