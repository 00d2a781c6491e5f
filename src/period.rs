//! Units of work and the names derived from them.
//!
//! A [`Period`] names one month of one trip category. Everything else a pipeline touches for
//! that period (source URL, local file, remote key, warehouse partition) is derived from it
//! through [`DatasetFile`] and [`ArtifactPath`], so re-running a period always addresses the
//! same artifacts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Trip record category ("color" in the source naming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Yellow,
    Green,
    Fhv,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Yellow => "yellow",
            Category::Green => "green",
            Category::Fhv => "fhv",
        }
    }

    /// Default (pickup, dropoff) datetime column names used by the source for this category.
    pub fn datetime_columns(self) -> (&'static str, &'static str) {
        match self {
            Category::Yellow => ("tpep_pickup_datetime", "tpep_dropoff_datetime"),
            Category::Green => ("lpep_pickup_datetime", "lpep_dropoff_datetime"),
            Category::Fhv => ("pickup_datetime", "dropOff_datetime"),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yellow" => Ok(Category::Yellow),
            "green" => Ok(Category::Green),
            "fhv" => Ok(Category::Fhv),
            other => Err(PipelineError::InvalidPeriod {
                message: format!("unknown category '{other}' (expected yellow, green or fhv)"),
            }),
        }
    }
}

/// One (year, month, category) unit of pipeline work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    year: i32,
    month: u32,
    category: Category,
}

impl Period {
    /// Create a period, rejecting months outside `1..=12`.
    pub fn new(year: i32, month: u32, category: Category) -> PipelineResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(PipelineError::InvalidPeriod {
                message: format!("month {month} is outside 1..=12"),
            });
        }
        Ok(Self {
            year,
            month,
            category,
        })
    }

    /// Every (year, month) combination for one category, years outermost.
    pub fn grid(years: &[i32], months: &[u32], category: Category) -> PipelineResult<Vec<Self>> {
        years
            .iter()
            .flat_map(|&year| months.iter().map(move |&month| Self::new(year, month, category)))
            .collect()
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn dataset_file(&self) -> DatasetFile {
        DatasetFile::for_period(self)
    }

    pub fn artifact(&self) -> ArtifactPath {
        ArtifactPath::new(self.category, &self.dataset_file())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{:02}", self.category, self.year, self.month)
    }
}

/// Logical dataset name: `{category}_tripdata_{year}-{month:02}`.
///
/// Names the source object, the local and remote artifact, and the warehouse partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetFile(String);

impl DatasetFile {
    pub fn for_period(period: &Period) -> Self {
        Self(format!(
            "{}_tripdata_{}-{:02}",
            period.category, period.year, period.month
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Source URL under `base`: `{base}/{category}/{dataset_file}.csv.gz`.
    pub fn source_url(&self, base: &str, category: Category) -> String {
        format!("{}/{}/{}.csv.gz", base.trim_end_matches('/'), category, self.0)
    }
}

impl fmt::Display for DatasetFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relative artifact location `{category}/{dataset_file}.parquet`.
///
/// The same relative path is used under the local data root and under the remote prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactPath {
    relative: PathBuf,
}

impl ArtifactPath {
    pub const EXTENSION: &'static str = "parquet";

    pub fn new(category: Category, dataset_file: &DatasetFile) -> Self {
        let relative = Path::new(category.as_str())
            .join(format!("{}.{}", dataset_file.as_str(), Self::EXTENSION));
        Self { relative }
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Location under a local data root.
    pub fn local_path(&self, data_root: &Path) -> PathBuf {
        data_root.join(&self.relative)
    }

    /// Remote object key, always `/`-separated.
    pub fn remote_key(&self, prefix: &str) -> String {
        let rel = self
            .relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            rel
        } else {
            format!("{prefix}/{rel}")
        }
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative.display())
    }
}
