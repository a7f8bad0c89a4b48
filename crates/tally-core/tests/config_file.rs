use std::io::Write;

use tally_core::{load_config, write_schema_file};

#[test]
fn loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[storage]\nroot = \"/srv/tally\"\ndefault_ttl_secs = 120").unwrap();
    let cfg = load_config(file.path()).unwrap();
    assert_eq!(cfg.storage.root.as_deref(), Some("/srv/tally"));
    assert_eq!(cfg.storage.default_ttl_secs, Some(120));
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = load_config(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absent.toml"));
}

#[test]
fn schema_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.schema.json");
    write_schema_file(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let schema: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(schema["title"], "Config");
}
