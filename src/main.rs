use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use quotepipe_rs::config::{Overrides, Settings};
use quotepipe_rs::error::PipelineError;
use quotepipe_rs::pipeline::Pipeline;
use quotepipe_rs::telemetry;

const EXIT_CONFIG: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// Fetch quote series from an HTTP quoting service into CSV or JSON.
#[derive(Parser, Debug)]
#[command(name = "quotepipe", version)]
struct Cli {
    /// TOML config file (default: ./quotepipe.toml if present)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Comma-separated instruments, EXCHANGE:TICKER or TICKER
    #[arg(long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Window start (RFC 3339, YYYY-MM-DD HH:MM[:SS] in UTC, or YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,

    /// Window end, exclusive
    #[arg(long)]
    end: Option<String>,

    /// Fetch only the most recent quote per instrument
    #[arg(long, conflicts_with_all = ["start", "end", "include_latest"])]
    latest: bool,

    /// Append the latest quote after the history window
    #[arg(long)]
    include_latest: bool,

    /// Expected spacing, e.g. 1m, 15m, 1h
    #[arg(long)]
    cadence: Option<String>,

    #[arg(long, value_parser = ["csv", "json"])]
    format: Option<String>,

    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Default tracing filter; RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            symbols: self.symbols.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
            latest: self.latest.then_some(true),
            include_latest: self.include_latest.then_some(true),
            cadence: self.cadence.clone(),
            format: self.format.clone(),
            output: self.output.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(settings) => settings,
        Err(e) => {
            // no subscriber yet
            eprintln!("quotepipe: {e}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    telemetry::init_tracing(&settings.telemetry.log_level);
    telemetry::init_metrics(settings.telemetry.metrics_port)?;

    let cancel = CancellationToken::new();
    let (pipeline, plan) = match Pipeline::from_settings(&settings, cancel.clone()) {
        Ok(built) => built,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    tokio::spawn(cancel_on_ctrl_c(cancel));

    info!(
        instruments = plan.instruments.len(),
        mode = ?plan.mode,
        output = %settings.output.path.display(),
        format = %settings.output.format,
        "Starting run"
    );

    let code = match pipeline.run(&plan).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(PipelineError::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Err(PipelineError::Config(e)) => {
            error!(error = %e, "Invalid configuration");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    };
    Ok(code)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Ctrl+C received, cancelling run");
            cancel.cancel();
        }
        Err(e) => warn!(error = %e, "Ctrl+C handler unavailable"),
    }
}
