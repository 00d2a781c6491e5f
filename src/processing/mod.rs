//! Row-level cleaning applied between extraction and warehouse loading.
//!
//! Cleaning is a pure function of the rows: the [`Transformer`] reads a Parquet artifact and
//! applies its [`CleaningRule`]s in order.
//!
//! ```rust
//! use tripdata_pipeline::processing::{CleaningRule, FillValue, apply_rules};
//! use tripdata_pipeline::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let ds = DataSet::new(
//!     Schema::new(vec![Field::new("passenger_count", DataType::Float64)]),
//!     vec![vec![Value::Float64(2.0)], vec![Value::Null]],
//! );
//! let rules = [CleaningRule::FillNull {
//!     column: "passenger_count".to_string(),
//!     value: FillValue::Int(0),
//! }];
//!
//! let cleaned = apply_rules(ds, &rules).unwrap();
//! assert_eq!(cleaned.rows[1][0], Value::Float64(0.0));
//! ```

pub mod clean;

pub use clean::{CleaningRule, FillValue, Transformer, apply_rules};
