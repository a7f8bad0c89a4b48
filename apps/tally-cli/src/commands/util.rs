use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tally_core::Settings;
use tally_metrics::{DateRange, MetricsOrchestrator, Record};
use tally_stats::{ForecastEngine, ForecastSettings};
use tally_store::{RecordStore, SystemClock};

pub async fn open_store(settings: &Settings) -> Result<Arc<RecordStore>> {
    let ttl = settings
        .default_ttl()
        .and_then(|d| chrono::Duration::from_std(d).ok());
    let store = RecordStore::open(&settings.state_dir, ttl, Arc::new(SystemClock))
        .await
        .with_context(|| format!("opening store at {}", settings.state_dir.display()))?;
    Ok(Arc::new(store))
}

pub fn forecast_engine(settings: &Settings) -> ForecastEngine {
    ForecastEngine::new(ForecastSettings {
        trials: settings.trials,
        sprint_length_days: settings.sprint_length_days,
        confidence_level: settings.confidence_level,
    })
}

pub async fn orchestrator(settings: &Settings) -> Result<MetricsOrchestrator> {
    let store = open_store(settings).await?;
    Ok(MetricsOrchestrator::new(store).with_forecast_engine(forecast_engine(settings)))
}

pub fn read_json(path: &Path) -> Result<Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Accepts a bare array of records, or an object wrapping one under
/// `issues`, `records` or `items`.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let value = read_json(path)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match ["issues", "records", "items"]
            .iter()
            .find_map(|k| map.remove(*k))
        {
            Some(Value::Array(items)) => items,
            _ => bail!("{}: expected an array of records", path.display()),
        },
        _ => bail!("{}: expected an array of records", path.display()),
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            _ => bail!("{}: item {i} is not an object", path.display()),
        })
        .collect()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{raw}' (expected YYYY-MM-DD)"))
}

pub fn parse_range(from: Option<&str>, to: Option<&str>) -> Result<Option<DateRange>> {
    match (from, to) {
        (None, None) => Ok(None),
        (Some(from), Some(to)) => Ok(Some(DateRange::new(parse_date(from)?, parse_date(to)?)?)),
        _ => bail!("--from and --to must be given together"),
    }
}

pub fn require_range(from: Option<&str>, to: Option<&str>) -> Result<DateRange> {
    parse_range(from, to)?.context("--from and --to are required")
}

pub fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accept_wrapped_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.json");
        std::fs::write(&path, r#"{"total": 1, "issues": [{"key": "P-1"}]}"#).unwrap();
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["key"], "P-1");

        std::fs::write(&path, r#"[1, 2]"#).unwrap();
        assert!(read_records(&path).is_err());
    }

    #[test]
    fn ranges_need_both_ends() {
        assert!(parse_range(None, None).unwrap().is_none());
        assert!(parse_range(Some("2024-01-01"), None).is_err());
        assert!(parse_range(Some("2024-02-01"), Some("2024-01-01")).is_err());
        let r = require_range(Some("2024-01-01"), Some("2024-01-31")).unwrap();
        assert_eq!(r.len_days(), 31);
    }
}
