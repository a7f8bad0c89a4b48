use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use serde_json::{json, Value};
use tally_core::Settings;
use tally_store::{Expiry, ReportFormat, ReportRenderer};

use super::util::{open_store, print_json, read_json};

fn parse_format(raw: &str) -> Result<ReportFormat, String> {
    ReportFormat::from_slug(raw).ok_or_else(|| format!("unknown format '{raw}' (json, csv, markdown)"))
}

#[derive(Subcommand)]
pub enum ReportCmd {
    /// Render a JSON file as json, csv or markdown
    Render {
        input: PathBuf,
        #[arg(long, short = 'f', default_value = "json", value_parser = parse_format)]
        format: ReportFormat,
        /// Also store the rendered report under this key
        #[arg(long)]
        save: Option<String>,
    },
}

pub async fn run(cmd: ReportCmd, settings: &Settings, pretty: bool) -> Result<()> {
    match cmd {
        ReportCmd::Render {
            input,
            format,
            save,
        } => {
            let content = read_json(&input)?;
            let rendered = ReportRenderer::render(&content, format)?;
            if let Some(key) = save {
                let store = open_store(settings).await?;
                let id = ReportRenderer::new(store)
                    .save(&key, &content, format, Expiry::Default)
                    .await?;
                eprintln!("{}", json!({ "saved": key, "id": id }));
            }
            match rendered {
                Value::String(text) => {
                    print!("{text}");
                    Ok(())
                }
                other => print_json(&other, pretty),
            }
        }
    }
}
