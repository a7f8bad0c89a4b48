use std::path::Path;

use anyhow::{Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::OnceCell;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per namespace.
    #[serde(default)]
    pub root: Option<String>,
    /// TTL applied to writes that do not pass one; 0 disables expiry.
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    /// Items per stored chunk when splitting datasets.
    #[serde(default)]
    #[schemars(range(min = 1))]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ForecastConfig {
    /// Monte Carlo trials per forecast.
    #[serde(default)]
    #[schemars(range(min = 1))]
    pub trials: Option<usize>,
    #[serde(default)]
    #[schemars(range(min = 1))]
    pub sprint_length_days: Option<u32>,
    /// Percent, e.g. 85 for the 15th/50th/85th percentile bands.
    #[serde(default)]
    #[schemars(range(min = 50, max = 99))]
    pub confidence_level: Option<f64>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
}

static CONFIG_SCHEMA: OnceCell<Validator> = OnceCell::new();

fn config_validator() -> Result<&'static Validator> {
    CONFIG_SCHEMA.get_or_try_init(|| {
        let schema_value = config_schema_json()?;
        validator_for(&schema_value).map_err(|e| anyhow::anyhow!("invalid config schema: {e}"))
    })
}

/// Returns the JSON schema describing the configuration structure.
pub fn config_schema_json() -> Result<serde_json::Value> {
    let schema = schemars::schema_for!(Config);
    Ok(serde_json::to_value(&schema)?)
}

pub fn write_schema_file(path: &Path) -> Result<()> {
    let schema_json = config_schema_json()?;
    std::fs::write(path, serde_json::to_string_pretty(&schema_json)?)
        .with_context(|| format!("writing {}", path.display()))
}

/// Parses a TOML config file and validates it against the generated schema,
/// reporting every violation at once.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = config_validator()?
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_sections() {
        let cfg = parse_config(
            r#"
[storage]
root = "/tmp/tally"
default_ttl_secs = 600
chunk_size = 250

[forecast]
trials = 500
confidence_level = 90.0
"#,
        )
        .unwrap();
        assert_eq!(cfg.storage.root.as_deref(), Some("/tmp/tally"));
        assert_eq!(cfg.storage.chunk_size, Some(250));
        assert_eq!(cfg.forecast.trials, Some(500));
        assert_eq!(cfg.forecast.sprint_length_days, None);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(parse_config("").unwrap(), Config::default());
    }

    #[test]
    fn schema_violations_are_collected() {
        let err = parse_config(
            r#"
[storage]
chunk_size = 0

[forecast]
confidence_level = 120.0
"#,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("chunk_size") || err.contains("0"), "{err}");
        assert!(err.contains("120"), "{err}");
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(parse_config("[storage]\ndefault_ttl_secs = \"an hour\"\n").is_err());
    }

    #[test]
    fn schema_names_the_sections() {
        let schema = config_schema_json().unwrap();
        let props = &schema["properties"];
        assert!(props.get("storage").is_some());
        assert!(props.get("forecast").is_some());
    }
}
