use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::{parse_datetime, read_parquet};
use crate::types::{DataSet, DataType, Value};

/// Replacement for null cells, written as a bare TOML/JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FillValue {
    /// The cell value this fill produces in a column of type `data_type`.
    fn for_column(&self, column: &str, data_type: DataType) -> PipelineResult<Value> {
        let value = match (self, data_type) {
            (FillValue::Int(v), DataType::Int64) => Some(Value::Int64(*v)),
            (FillValue::Int(v), DataType::Float64) => Some(Value::Float64(*v as f64)),
            (FillValue::Float(v), DataType::Float64) => Some(Value::Float64(*v)),
            (FillValue::Bool(v), DataType::Bool) => Some(Value::Bool(*v)),
            (FillValue::Text(s), DataType::Utf8) => Some(Value::Utf8(s.clone())),
            (FillValue::Text(s), DataType::Datetime) => parse_datetime(s).map(Value::Datetime),
            _ => None,
        };
        value.ok_or_else(|| {
            PipelineError::schema(format!(
                "fill value {self:?} does not fit column '{column}' of type {data_type}"
            ))
        })
    }
}

/// A single cleaning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CleaningRule {
    /// Replace nulls in `column` with `value`.
    FillNull { column: String, value: FillValue },
    /// Remove rows whose `column` is null.
    DropNullRows { column: String },
}

impl CleaningRule {
    pub fn column(&self) -> &str {
        match self {
            CleaningRule::FillNull { column, .. } | CleaningRule::DropNullRows { column } => column,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CleaningRule::FillNull { .. } => "fill_null",
            CleaningRule::DropNullRows { .. } => "drop_null_rows",
        }
    }

    fn apply(&self, table: DataSet) -> PipelineResult<DataSet> {
        let Some(idx) = table.schema.index_of(self.column()) else {
            return Ok(table);
        };
        match self {
            CleaningRule::FillNull { column, value } => {
                let fill = value.for_column(column, table.schema.fields[idx].data_type)?;
                Ok(table.map_rows(|row| {
                    let mut out = row.to_vec();
                    if out[idx].is_null() {
                        out[idx] = fill.clone();
                    }
                    out
                }))
            }
            CleaningRule::DropNullRows { .. } => Ok(table.filter_rows(|row| !row[idx].is_null())),
        }
    }
}

/// Apply `rules` in order.
///
/// A rule naming a column the table does not have is skipped with a warning.
pub fn apply_rules(mut table: DataSet, rules: &[CleaningRule]) -> PipelineResult<DataSet> {
    for rule in rules {
        let column = rule.column();
        let Some(before) = table.null_count(column) else {
            warn!(rule = rule.name(), column, "column not present; rule skipped");
            continue;
        };
        info!(rule = rule.name(), column, nulls = before, "pre: missing values");

        table = rule.apply(table)?;

        let after = table.null_count(column).unwrap_or(0);
        info!(
            rule = rule.name(),
            column,
            nulls = after,
            rows = table.row_count(),
            "post: missing values"
        );
    }
    Ok(table)
}

/// Reads an extracted artifact and applies the configured cleaning rules.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    rules: Vec<CleaningRule>,
}

impl Transformer {
    pub fn new(rules: Vec<CleaningRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CleaningRule] {
        &self.rules
    }

    #[instrument(skip(self), fields(rules = self.rules.len()))]
    pub fn transform(&self, local_path: &Path) -> PipelineResult<DataSet> {
        let table = read_parquet(local_path)?;
        apply_rules(table, &self.rules)
    }
}
