//! Getting trip records into memory.
//!
//! - [`fetch`]: retrieves the remote CSV for a period (with retry)
//! - [`normalize`]: coerces the pickup/dropoff columns to datetimes and reports the table shape
//! - [`csv`] and [`parquet`]: the codecs used by the fetcher, the local writer and the
//!   transformer

pub mod csv;
pub mod fetch;
pub mod normalize;
pub mod parquet;

pub use fetch::{DatasetSource, Fetcher, HttpSource, SourceConfig, decode_csv_bytes};
pub use normalize::{Normalizer, parse_datetime};
pub use parquet::{read_parquet, write_parquet};
