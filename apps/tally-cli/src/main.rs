use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_core::effective_settings;

mod commands;

use commands::{CacheCmd, ConfigCmd, ForecastArgs, MetricsCmd, ReportCmd};

#[derive(Parser)]
#[command(name = "tally", version, about = "Local analytics cache and delivery metrics")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print effective settings and paths (JSON)
    Paths,
    /// Config schema and validation
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    /// Record store maintenance
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
    /// Compute metric bundles from JSON record files
    Metrics {
        #[command(subcommand)]
        cmd: MetricsCmd,
    },
    /// Monte Carlo delivery forecast
    Forecast(ForecastArgs),
    /// Render and store reports
    Report {
        #[command(subcommand)]
        cmd: ReportCmd,
    },
}

async fn dispatch(cli: Cli) -> Result<()> {
    let pretty = cli.pretty;
    match cli.command {
        Commands::Paths => commands::paths::run(pretty),
        Commands::Config { cmd } => commands::config::run(cmd),
        Commands::Cache { cmd } => commands::cache::run(cmd, &effective_settings(), pretty).await,
        Commands::Metrics { cmd } => {
            commands::metrics::run(cmd, &effective_settings(), pretty).await
        }
        Commands::Forecast(args) => {
            commands::forecast::run(args, &effective_settings(), pretty).await
        }
        Commands::Report { cmd } => commands::report::run(cmd, &effective_settings(), pretty).await,
    }
}

fn main() {
    tally_otel::init();
    let cli = Cli::parse();
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
        .and_then(|rt| rt.block_on(dispatch(cli)));
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
