use clap::Parser;
use envguard::config;
use envguard::forecast::Forecaster;
use envguard::store::jsonl;
use std::path::PathBuf;

/// Forecast alarm occurrences from the stored sensor history.
#[derive(Debug, Parser)]
#[command(name = "forecast", version)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of future steps to predict
    #[arg(long)]
    horizon: Option<usize>,

    /// Print only the second offsets of predicted alarms per channel
    #[arg(long)]
    offsets: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = config::load_from_path(&args.config)?;
    envguard::init_tracing(config.log_level());

    let mut forecast_config = config.forecast_config();
    if let Some(horizon) = args.horizon {
        forecast_config.horizon = horizon;
    }

    let records = jsonl::read_committed(config.store_path())?;
    let forecast = Forecaster::new(forecast_config).run_on(records)?;
    tracing::info!(
        history = forecast.history_len,
        horizon = forecast.horizon,
        "Forecast complete"
    );

    let output = if args.offsets {
        let offsets: std::collections::BTreeMap<_, _> = forecast
            .channels
            .keys()
            .map(|channel| (*channel, forecast.alarm_offsets(*channel)))
            .collect();
        serde_json::to_string_pretty(&offsets)?
    } else {
        serde_json::to_string_pretty(&forecast)?
    };
    println!("{output}");
    Ok(())
}
