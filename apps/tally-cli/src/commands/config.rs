use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use tally_core::{config_schema_json, load_config, write_schema_file};

use super::util::print_json;

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Print the config JSON schema, or write it to --out
    Schema {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Validate a TOML config file and print it as JSON
    Check { path: PathBuf },
}

pub fn run(cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Schema { out: Some(path) } => {
            write_schema_file(&path)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        ConfigCmd::Schema { out: None } => print_json(&config_schema_json()?, true),
        ConfigCmd::Check { path } => print_json(&load_config(&path)?, true),
    }
}
