//! `tripdata-pipeline` moves monthly trip-record datasets from their public HTTP release into
//! remote storage and from there into a warehouse table.
//!
//! Two pipelines run per [`period::Period`] (one month of one trip category):
//!
//! - **ingest** ([`pipeline::IngestPipeline`]): fetch the CSV, coerce the pickup/dropoff
//!   columns to datetimes, write gzip-compressed Parquet under the local data root and publish
//!   it through the configured [`storage::RemoteStorage`] backend.
//! - **load** ([`pipeline::LoadPipeline`]): pull the artifact back, apply the cleaning rules and
//!   append the rows to the warehouse in bounded chunks.
//!
//! [`pipeline::BatchDriver`] runs either pipeline (or both, via
//! [`pipeline::EndToEndPipeline`]) over a list of periods. A failing period is recorded with
//! the stage it failed in and the batch moves on.
//!
//! Every name a period touches is derived from it, so a rerun overwrites the same local file,
//! the same remote object and (with [`warehouse::WritePolicy::ReplacePartition`]) the same
//! warehouse partition.
//!
//! ## Example: batch over two months
//!
//! ```no_run
//! use tripdata_pipeline::config::PipelineConfig;
//! use tripdata_pipeline::period::{Category, Period};
//! use tripdata_pipeline::pipeline::BatchDriver;
//!
//! # fn main() -> Result<(), tripdata_pipeline::PipelineError> {
//! let config = PipelineConfig::load(None)?;
//! let observer = config.observer();
//! let backend = config.resolve_backend()?;
//! let ingest = config.ingest_pipeline(backend, observer.clone())?;
//!
//! let periods = Period::grid(&[2019], &[1, 2], Category::Yellow)?;
//! let summary = BatchDriver::new(observer).run(&ingest, &periods);
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: fetching, CSV/Parquet codecs and datetime normalization
//! - [`storage`]: local artifacts, remote backends, publish and extract
//! - [`processing`]: cleaning rules applied before loading
//! - [`warehouse`]: chunked loading and the file-backed warehouse
//! - [`pipeline`]: per-period state machines and the batch driver
//! - [`observability`]: observer hooks for stage events, profiles and failures
//! - [`config`] and [`logging`]: run configuration and `tracing` setup

pub mod config;
pub mod error;
pub mod ingestion;
pub mod logging;
pub mod observability;
pub mod period;
pub mod pipeline;
pub mod processing;
pub mod retry;
pub mod storage;
pub mod types;
pub mod warehouse;

pub use error::{PipelineError, PipelineResult};
