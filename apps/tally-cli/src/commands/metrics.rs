use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use tally_core::Settings;
use tally_metrics::DoraInput;

use super::util::{orchestrator, parse_range, print_json, read_records, require_range};

#[derive(Args)]
pub struct ScopeArgs {
    /// Project key used in cache keys
    #[arg(long, short = 'p')]
    pub project: String,
    /// JSON file with an array of work-item records
    #[arg(long)]
    pub records: Option<PathBuf>,
    /// First day of the range (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,
    /// Last day of the range, inclusive
    #[arg(long)]
    pub to: Option<String>,
}

impl ScopeArgs {
    fn records(&self) -> Result<Vec<tally_metrics::Record>> {
        match &self.records {
            Some(path) => read_records(path),
            None => anyhow::bail!("--records is required"),
        }
    }
}

fn dora_input(deployments: Option<&PathBuf>, incidents: Option<&PathBuf>) -> Result<DoraInput> {
    Ok(DoraInput {
        deployments: deployments
            .map(|p| read_records(p))
            .transpose()?
            .unwrap_or_default(),
        incidents: incidents
            .map(|p| read_records(p))
            .transpose()?
            .unwrap_or_default(),
    })
}

#[derive(Subcommand)]
pub enum MetricsCmd {
    /// Cycle/lead time percentiles, throughput, WIP, flow efficiency
    Flow(ScopeArgs),
    /// Committed vs completed points per sprint
    Sprint(ScopeArgs),
    /// Bug counts, ratio and resolution time
    Quality(ScopeArgs),
    /// Daily to-do / in-progress / done counts with bottlenecks
    Cfd(ScopeArgs),
    /// Deployment frequency, lead time, MTTR, change failure rate
    Dora {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        deployments: Option<PathBuf>,
        #[arg(long)]
        incidents: Option<PathBuf>,
    },
    /// Daily, weekly and monthly DORA rollups tracked in a session
    History {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        deployments: Option<PathBuf>,
        #[arg(long)]
        incidents: Option<PathBuf>,
    },
}

pub async fn run(cmd: MetricsCmd, settings: &Settings, pretty: bool) -> Result<()> {
    let metrics = orchestrator(settings).await?;
    match cmd {
        MetricsCmd::Flow(scope) => {
            let range = parse_range(scope.from.as_deref(), scope.to.as_deref())?;
            let bundle = metrics
                .flow_metrics(&scope.project, &scope.records()?, range)
                .await?;
            print_json(&bundle, pretty)
        }
        MetricsCmd::Sprint(scope) => {
            let bundle = metrics
                .sprint_metrics(&scope.project, &scope.records()?)
                .await?;
            print_json(&bundle, pretty)
        }
        MetricsCmd::Quality(scope) => {
            let range = parse_range(scope.from.as_deref(), scope.to.as_deref())?;
            let bundle = metrics
                .quality_metrics(&scope.project, &scope.records()?, range)
                .await?;
            print_json(&bundle, pretty)
        }
        MetricsCmd::Cfd(scope) => {
            let range = require_range(scope.from.as_deref(), scope.to.as_deref())?;
            let bundle = metrics
                .cumulative_flow(&scope.project, &scope.records()?, range)
                .await?;
            print_json(&bundle, pretty)
        }
        MetricsCmd::Dora {
            scope,
            deployments,
            incidents,
        } => {
            let range = require_range(scope.from.as_deref(), scope.to.as_deref())?;
            let input = dora_input(deployments.as_ref(), incidents.as_ref())?;
            let bundle = metrics.dora_metrics(&scope.project, &input, range).await?;
            print_json(&bundle, pretty)
        }
        MetricsCmd::History {
            scope,
            deployments,
            incidents,
        } => {
            let range = require_range(scope.from.as_deref(), scope.to.as_deref())?;
            let input = dora_input(deployments.as_ref(), incidents.as_ref())?;
            let history = metrics
                .collect_history(&scope.project, &scope.records()?, &input, range)
                .await?;
            print_json(&history, pretty)
        }
    }
}
