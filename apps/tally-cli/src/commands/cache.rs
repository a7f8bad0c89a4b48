use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tally_core::Settings;
use tally_store::{DatasetChunker, Expiry, Metadata, Namespace};

use super::util::{open_store, print_json, read_json};

#[derive(Args)]
pub struct NamespaceArg {
    /// cache, analysis, report, mapping or session
    #[arg(long, short = 'n', default_value = "cache", value_parser = parse_namespace)]
    pub namespace: Namespace,
}

fn parse_namespace(raw: &str) -> Result<Namespace, String> {
    Namespace::from_slug(raw).ok_or_else(|| format!("unknown namespace '{raw}'"))
}

#[derive(Subcommand)]
pub enum CacheCmd {
    /// Per-namespace record counts and sizes
    Stats,
    /// Remove every expired record
    Sweep,
    /// Store a JSON file under a key
    Put {
        #[command(flatten)]
        ns: NamespaceArg,
        key: String,
        file: PathBuf,
        /// Overrides the default TTL
        #[arg(long)]
        ttl_secs: Option<i64>,
    },
    /// Print a record by id or key
    Get {
        #[command(flatten)]
        ns: NamespaceArg,
        id_or_key: String,
    },
    /// List live records, newest first
    List {
        #[command(flatten)]
        ns: NamespaceArg,
        /// Only records whose metadata or payload field equals the value (FIELD=VALUE)
        #[arg(long = "where")]
        filter: Vec<String>,
    },
    /// Delete a record by id or key
    Delete {
        #[command(flatten)]
        ns: NamespaceArg,
        id_or_key: String,
    },
    /// Split a JSON array file into chunks under a dataset key
    Import {
        key: String,
        file: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Reassemble a chunked dataset and print it
    Export { key: String },
}

fn parse_filter(pairs: &[String]) -> Result<Option<Metadata>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut filter = Metadata::new();
    for pair in pairs {
        let (field, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("filter '{pair}' must look like FIELD=VALUE"))?;
        // numbers and booleans compare as JSON; anything else as a string
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        filter.insert(field.to_string(), value);
    }
    Ok(Some(filter))
}

pub async fn run(cmd: CacheCmd, settings: &Settings, pretty: bool) -> Result<()> {
    let store = open_store(settings).await?;
    match cmd {
        CacheCmd::Stats => print_json(&store.stats().await?, pretty),
        CacheCmd::Sweep => {
            let removed = store.delete_expired().await?;
            print_json(&json!({ "removed": removed }), pretty)
        }
        CacheCmd::Put {
            ns,
            key,
            file,
            ttl_secs,
        } => {
            let payload = read_json(&file)?;
            let expiry = match ttl_secs {
                Some(secs) => Expiry::After(chrono::Duration::seconds(secs)),
                None => Expiry::Default,
            };
            let id = store
                .put(ns.namespace, &key, payload, Metadata::new(), expiry)
                .await?;
            print_json(&json!({ "id": id, "key": key }), pretty)
        }
        CacheCmd::Get { ns, id_or_key } => {
            let record = store
                .get(ns.namespace, &id_or_key)
                .await?
                .with_context(|| format!("no live record '{id_or_key}' in {}", ns.namespace))?;
            print_json(&record, pretty)
        }
        CacheCmd::List { ns, filter } => {
            let filter = parse_filter(&filter)?;
            let records = store.list(ns.namespace, filter.as_ref()).await?;
            print_json(&records, pretty)
        }
        CacheCmd::Delete { ns, id_or_key } => {
            let removed = store.delete(ns.namespace, &id_or_key).await?;
            print_json(&json!({ "removed": removed }), pretty)
        }
        CacheCmd::Import {
            key,
            file,
            chunk_size,
        } => {
            let items = match read_json(&file)? {
                Value::Array(items) => items,
                _ => return Err(anyhow!("{}: expected a JSON array", file.display())),
            };
            let chunker = DatasetChunker::new(store.clone(), settings.chunk_size);
            let dataset_id = chunker
                .store_dataset(&key, &items, chunk_size, Metadata::new(), Expiry::Default)
                .await?;
            let manifest = chunker.manifest(&key).await?;
            print_json(
                &json!({
                    "dataset_id": dataset_id,
                    "items": items.len(),
                    "chunks": manifest.map(|m| m.ordered_chunk_ids.len()),
                }),
                pretty,
            )
        }
        CacheCmd::Export { key } => {
            let chunker = DatasetChunker::new(store.clone(), settings.chunk_size);
            let items: Vec<Value> = chunker
                .retrieve_dataset(&key)
                .await?
                .with_context(|| format!("dataset '{key}' is missing or incomplete"))?;
            print_json(&items, pretty)
        }
    }
}
