use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tripdata_pipeline::config::PipelineConfig;
use tripdata_pipeline::logging::{LogFormat, init_logging};
use tripdata_pipeline::period::{Category, Period};
use tripdata_pipeline::pipeline::{BatchDriver, BatchSummary, EndToEndPipeline, PeriodPipeline};

#[derive(Parser)]
#[command(name = "tripdata", version, about = "Trip record ingest and warehouse loading")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file; `TRIPDATA__*` environment variables override it
    #[arg(long, short, global = true, env = "TRIPDATA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format (text, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(clap::Args, Clone)]
struct PeriodArgs {
    /// Years to process, comma separated
    #[arg(long, value_delimiter = ',')]
    years: Vec<i32>,

    /// Months to process (1-12), comma separated
    #[arg(long, value_delimiter = ',')]
    months: Vec<u32>,

    /// Trip category (yellow, green, fhv)
    #[arg(long)]
    category: Option<Category>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize, write locally and publish each period
    Ingest(PeriodArgs),
    /// Extract published artifacts, clean them and load them into the warehouse
    Load(PeriodArgs),
    /// Ingest then load each period
    Run(PeriodArgs),
}

fn main() -> ExitCode {
    match run() {
        Ok(summary) if summary.is_clean() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> anyhow::Result<BatchSummary> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    init_logging(&config.log)?;

    let args = match &cli.command {
        Commands::Ingest(a) | Commands::Load(a) | Commands::Run(a) => a.clone(),
    };
    let periods = resolve_periods(&config, &args)?;

    let observer = config.observer();
    let backend = config.resolve_backend().context("failed to resolve remote backend")?;

    let pipeline: Box<dyn PeriodPipeline> = match cli.command {
        Commands::Ingest(_) => Box::new(config.ingest_pipeline(backend, observer.clone())?),
        Commands::Load(_) => Box::new(config.load_pipeline(backend, observer.clone())?),
        Commands::Run(_) => Box::new(EndToEndPipeline::new(
            config.ingest_pipeline(Arc::clone(&backend), observer.clone())?,
            config.load_pipeline(backend, observer.clone())?,
        )),
    };

    let driver = BatchDriver::new(observer).with_alert_threshold(config.observer.alert_threshold);
    cancel_on_ctrl_c(driver.cancellation_flag());

    info!(pipeline = pipeline.name(), periods = periods.len(), "starting batch");
    let summary = driver.run(pipeline.as_ref(), &periods);
    info!(
        total_rows = summary.total_rows(),
        published_rows = summary.total_published(),
        "Total rows inserted to the warehouse: {}",
        summary.total_rows()
    );
    Ok(summary)
}

fn resolve_periods(config: &PipelineConfig, args: &PeriodArgs) -> anyhow::Result<Vec<Period>> {
    let mut batch = config.batch.clone();
    if !args.years.is_empty() {
        batch.years = args.years.clone();
    }
    if !args.months.is_empty() {
        batch.months = args.months.clone();
    }
    if let Some(category) = args.category {
        batch.category = category;
    }
    Ok(batch.periods()?)
}

/// Stop the batch before its next period once Ctrl-C is received.
///
/// A second Ctrl-C exits immediately with status 130, abandoning the period in flight.
fn cancel_on_ctrl_c(flag: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "ctrl-c handler unavailable");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_err() {
            return;
        }
        warn!("interrupt received; finishing the current period (Ctrl-C again to abort)");
        flag.store(true, Ordering::SeqCst);

        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            warn!("second interrupt received; aborting");
            std::process::exit(130);
        }
    });
}
