use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tally_core::Settings;
use tally_stats::DeliveryInput;

use super::util::{forecast_engine, orchestrator, parse_date, print_json, read_records};

#[derive(Args)]
pub struct ForecastArgs {
    /// Comma-separated velocities of completed sprints, oldest first
    #[arg(long, value_delimiter = ',', conflicts_with = "records")]
    pub velocities: Vec<f64>,
    /// Work-item records; velocity history and open points come from these
    #[arg(long)]
    pub records: Option<PathBuf>,
    /// Project key used to cache the bundle (with --records)
    #[arg(long, short = 'p', default_value = "default")]
    pub project: String,
    /// Remaining work in points; defaults to open points in --records
    #[arg(long)]
    pub remaining: Option<f64>,
    /// Percent confidence for the optimistic/pessimistic bands
    #[arg(long)]
    pub confidence: Option<f64>,
    /// Forecast start date (YYYY-MM-DD), default today
    #[arg(long)]
    pub start: Option<String>,
    /// Seed for a reproducible simulation (with --velocities)
    #[arg(long)]
    pub seed: Option<u64>,
}

pub async fn run(args: ForecastArgs, settings: &Settings, pretty: bool) -> Result<()> {
    let start = match &args.start {
        Some(raw) => parse_date(raw)?,
        None => Utc::now().date_naive(),
    };
    if let Some(path) = &args.records {
        let mut settings = settings.clone();
        if let Some(c) = args.confidence {
            settings.confidence_level = c;
        }
        let metrics = orchestrator(&settings).await?;
        let bundle = metrics
            .delivery_forecast(&args.project, &read_records(path)?, args.remaining, start)
            .await?;
        return print_json(&bundle, pretty);
    }

    if args.velocities.is_empty() {
        bail!("either --velocities or --records is required");
    }
    let Some(remaining) = args.remaining else {
        bail!("--remaining is required with --velocities");
    };
    let engine = forecast_engine(settings);
    let input = DeliveryInput::from_history(
        &args.velocities,
        remaining,
        args.confidence.unwrap_or(settings.confidence_level),
    );
    let forecast = match args.seed {
        Some(seed) => {
            engine.simulate_delivery_with_rng(&input, start, &mut StdRng::seed_from_u64(seed))
        }
        None => engine.simulate_delivery(&input, start),
    };
    print_json(&forecast, pretty)
}
