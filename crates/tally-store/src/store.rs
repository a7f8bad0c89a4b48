use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StoreResult;
use crate::record::{
    Expiry, Metadata, Namespace, StoreStats, StoredRecord, META_KEY, META_SIZE,
};

const INDEX_FILE: &str = "_index.json";
const RECORD_EXT: &str = "json";
const TMP_SUFFIX: &str = "tmp";

type KeyIndex = BTreeMap<String, String>;

/// Namespaced, TTL-aware object store backed by one JSON file per record.
///
/// Layout: `<root>/<namespace>/<id>.json` plus `<root>/<namespace>/_index.json`
/// mapping logical keys to the most recently written id. Record writes go
/// through a temp file and a rename, so a single record is never observed
/// half-written. The index update is a plain read-modify-write: concurrent
/// writers to the same key race and the last rename wins.
///
/// Expiry is passive. Reads drop records whose deadline passed;
/// [`RecordStore::delete_expired`] sweeps everything else.
pub struct RecordStore {
    root: PathBuf,
    default_ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
}

impl RecordStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    pub async fn open(
        root: impl Into<PathBuf>,
        default_ttl: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let root = root.into();
        for ns in Namespace::ALL {
            fs::create_dir_all(root.join(ns.as_str())).await?;
        }
        // Seeded from wall time so sequence numbers keep increasing across restarts.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        tracing::debug!(target: "tally::store", root = %root.display(), "record store opened");
        Ok(Self {
            root,
            default_ttl,
            clock,
            seq: AtomicU64::new(seed),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Writes `payload` under `key` and returns the new record id.
    ///
    /// Every call mints a fresh id; the key index is repointed at it, but
    /// older records stay readable by id until they expire.
    pub async fn put(
        &self,
        namespace: Namespace,
        key: &str,
        payload: Value,
        metadata: Metadata,
        expiry: impl Into<Expiry>,
    ) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let created_at = self.clock.now();
        let expires_at = expiry.into().resolve(created_at, self.default_ttl);
        let mut record = StoredRecord {
            id: id.clone(),
            namespace,
            created_at,
            expires_at,
            metadata,
            payload,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        record
            .metadata
            .insert(META_KEY.into(), Value::String(key.to_string()));
        let size = stamp_size(&mut record)?;
        self.write_record(&record).await?;
        self.update_index(namespace, key, &id).await?;
        tracing::debug!(
            target: "tally::store",
            namespace = %namespace,
            key,
            id = %id,
            size,
            "stored record"
        );
        Ok(id)
    }

    pub async fn put_json<T: Serialize>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
        metadata: Metadata,
        expiry: impl Into<Expiry>,
    ) -> StoreResult<String> {
        let payload = serde_json::to_value(value)?;
        self.put(namespace, key, payload, metadata, expiry).await
    }

    /// Rewrites an existing record in place (same id, creation time and
    /// deadline), refreshing its size metadata.
    pub async fn replace(&self, mut record: StoredRecord) -> StoreResult<StoredRecord> {
        stamp_size(&mut record)?;
        self.write_record(&record).await?;
        Ok(record)
    }

    /// Looks a record up by id, falling back to the key index.
    /// Expired records are deleted on sight and reported as absent.
    pub async fn get(
        &self,
        namespace: Namespace,
        id_or_key: &str,
    ) -> StoreResult<Option<StoredRecord>> {
        let Some(record) = self.resolve(namespace, id_or_key).await? else {
            tracing::debug!(target: "tally::store", namespace = %namespace, lookup = id_or_key, "miss");
            return Ok(None);
        };
        if record.is_expired(self.clock.now()) {
            tracing::debug!(
                target: "tally::store",
                namespace = %namespace,
                id = %record.id,
                "dropping expired record on read"
            );
            self.remove_record(namespace, &record).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Returns every live record in `namespace` matching `filter`, newest first.
    pub async fn list(
        &self,
        namespace: Namespace,
        filter: Option<&Metadata>,
    ) -> StoreResult<Vec<StoredRecord>> {
        let now = self.clock.now();
        let mut out = Vec::new();
        for (record, _) in self.scan(namespace).await? {
            if record.is_expired(now) {
                self.remove_record(namespace, &record).await?;
                continue;
            }
            if filter.map_or(true, |f| record.matches(f)) {
                out.push(record);
            }
        }
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        Ok(out)
    }

    /// Removes one record by id or key. Returns whether anything was removed.
    pub async fn delete(&self, namespace: Namespace, id_or_key: &str) -> StoreResult<bool> {
        match self.resolve(namespace, id_or_key).await? {
            Some(record) => {
                self.remove_record(namespace, &record).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sweeps all namespaces and deletes every record past its deadline.
    pub async fn delete_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut removed = 0usize;
        for ns in Namespace::ALL {
            for (record, _) in self.scan(ns).await? {
                if record.is_expired(now) {
                    self.remove_record(ns, &record).await?;
                    removed += 1;
                }
            }
        }
        tracing::info!(target: "tally::store", removed, "expired record sweep finished");
        Ok(removed)
    }

    /// Aggregate counts and on-disk sizes. Expired records that nobody has
    /// touched yet are still counted.
    pub async fn stats(&self) -> StoreResult<StoreStats> {
        let mut stats = StoreStats::default();
        for ns in Namespace::ALL {
            stats.namespaces.entry(ns.as_str().to_string()).or_default();
            for (record, bytes) in self.scan(ns).await? {
                stats.observe(ns, &record, bytes);
            }
        }
        Ok(stats)
    }

    fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    fn record_path(&self, namespace: Namespace, id: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.{}", id, RECORD_EXT))
    }

    fn index_path(&self, namespace: Namespace) -> PathBuf {
        self.namespace_dir(namespace).join(INDEX_FILE)
    }

    async fn resolve(
        &self,
        namespace: Namespace,
        id_or_key: &str,
    ) -> StoreResult<Option<StoredRecord>> {
        if is_record_id(id_or_key) {
            if let Some(record) = self.read_record(namespace, id_or_key).await? {
                return Ok(Some(record));
            }
        }
        let index = self.load_index(namespace).await?;
        match index.get(id_or_key) {
            Some(id) => self.read_record(namespace, id).await,
            None => Ok(None),
        }
    }

    async fn read_record(&self, namespace: Namespace, id: &str) -> StoreResult<Option<StoredRecord>> {
        let path = self.record_path(namespace, id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<StoredRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(
                    target: "tally::store",
                    path = %path.display(),
                    error = %err,
                    "skipping malformed record"
                );
                Ok(None)
            }
        }
    }

    /// Parses every record file in a namespace, skipping corrupt entries.
    async fn scan(&self, namespace: Namespace) -> StoreResult<Vec<(StoredRecord, u64)>> {
        let dir = self.namespace_dir(namespace);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXT)
                && path.file_name().and_then(|name| name.to_str()) != Some(INDEX_FILE);
            if !is_record {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // Raced with a concurrent delete.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            match serde_json::from_slice::<StoredRecord>(&bytes) {
                Ok(record) => out.push((record, bytes.len() as u64)),
                Err(err) => {
                    tracing::warn!(
                        target: "tally::store",
                        path = %path.display(),
                        error = %err,
                        "skipping malformed record"
                    );
                }
            }
        }
        Ok(out)
    }

    async fn write_record(&self, record: &StoredRecord) -> StoreResult<()> {
        let dir = self.namespace_dir(record.namespace);
        fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(record.namespace, &record.id), &bytes).await
    }

    async fn remove_record(&self, namespace: Namespace, record: &StoredRecord) -> StoreResult<()> {
        match fs::remove_file(self.record_path(namespace, &record.id)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        if let Some(key) = record.key() {
            let mut index = self.load_index(namespace).await?;
            if index.get(key).map(String::as_str) == Some(record.id.as_str()) {
                index.remove(key);
                self.store_index(namespace, &index).await?;
            }
        }
        Ok(())
    }

    async fn load_index(&self, namespace: Namespace) -> StoreResult<KeyIndex> {
        let path = self.index_path(namespace);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(KeyIndex::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(index) => Ok(index),
            Err(err) => {
                tracing::warn!(
                    target: "tally::store",
                    path = %path.display(),
                    error = %err,
                    "key index unreadable; starting fresh"
                );
                Ok(KeyIndex::new())
            }
        }
    }

    async fn store_index(&self, namespace: Namespace, index: &KeyIndex) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.index_path(namespace), &bytes).await
    }

    async fn update_index(&self, namespace: Namespace, key: &str, id: &str) -> StoreResult<()> {
        let mut index = self.load_index(namespace).await?;
        index.insert(key.to_string(), id.to_string());
        self.store_index(namespace, &index).await
    }
}

fn stamp_size(record: &mut StoredRecord) -> StoreResult<u64> {
    let size = serde_json::to_vec(&record.payload)?.len() as u64;
    record.metadata.insert(META_SIZE.into(), Value::from(size));
    Ok(size)
}

/// Ids are uuids; anything else (paths, keys with separators) goes through the index.
fn is_record_id(candidate: &str) -> bool {
    let index_stem = INDEX_FILE
        .strip_suffix(RECORD_EXT)
        .and_then(|stem| stem.strip_suffix('.'));
    index_stem != Some(candidate)
        && !candidate.is_empty()
        && candidate.len() <= 64
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension(format!("{}.{}", RECORD_EXT, TMP_SUFFIX));
    fs::write(&tmp, bytes).await?;
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    async fn store_at(root: &Path) -> (RecordStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let store = RecordStore::open(root, Some(Duration::hours(1)), clock.clone())
            .await
            .unwrap();
        (store, clock)
    }

    #[tokio::test]
    async fn put_stamps_key_and_size() {
        let tmp = tempdir().unwrap();
        let (store, _clock) = store_at(tmp.path()).await;
        let payload = json!({"issues": [1, 2, 3]});
        let id = store
            .put(Namespace::Cache, "search:PROJ", payload.clone(), Metadata::new(), Expiry::Default)
            .await
            .unwrap();
        let rec = store.get(Namespace::Cache, &id).await.unwrap().expect("record");
        assert_eq!(rec.key(), Some("search:PROJ"));
        assert_eq!(rec.size(), serde_json::to_vec(&payload).unwrap().len() as u64);
        assert_eq!(rec.expires_at, Some(rec.created_at + Duration::hours(1)));
        assert!(store.record_path(Namespace::Cache, &id).exists());
        assert!(store.index_path(Namespace::Cache).exists());
    }

    #[tokio::test]
    async fn same_key_twice_keeps_both_ids() {
        let tmp = tempdir().unwrap();
        let (store, _clock) = store_at(tmp.path()).await;
        let first = store
            .put(Namespace::Analysis, "k", json!(1), Metadata::new(), Expiry::Never)
            .await
            .unwrap();
        let second = store
            .put(Namespace::Analysis, "k", json!(2), Metadata::new(), Expiry::Never)
            .await
            .unwrap();
        assert_ne!(first, second);
        let latest = store.get(Namespace::Analysis, "k").await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        let older = store.get(Namespace::Analysis, &first).await.unwrap().unwrap();
        assert_eq!(older.payload, json!(1));
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped_by_list() {
        let tmp = tempdir().unwrap();
        let (store, _clock) = store_at(tmp.path()).await;
        store
            .put(Namespace::Report, "ok", json!({"fine": true}), Metadata::new(), Expiry::Never)
            .await
            .unwrap();
        std::fs::write(
            tmp.path().join("report").join("broken.json"),
            b"{not json",
        )
        .unwrap();
        let listed = store.list(Namespace::Report, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.get(Namespace::Report, "broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_by_key_clears_index_entry() {
        let tmp = tempdir().unwrap();
        let (store, _clock) = store_at(tmp.path()).await;
        store
            .put(Namespace::Mapping, "field:points", json!("customfield_10016"), Metadata::new(), Expiry::Never)
            .await
            .unwrap();
        assert!(store.delete(Namespace::Mapping, "field:points").await.unwrap());
        assert!(store.get(Namespace::Mapping, "field:points").await.unwrap().is_none());
        assert!(!store.delete(Namespace::Mapping, "field:points").await.unwrap());
        let index = store.load_index(Namespace::Mapping).await.unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn record_ids_exclude_path_like_keys() {
        assert!(is_record_id("2f6c1d1e-8d0a-4c55-9a57-0c4f1f6f9a10"));
        assert!(!is_record_id("../etc/passwd"));
        assert!(!is_record_id("metrics:proj:flow"));
        assert!(!is_record_id(""));
        assert!(!is_record_id("_index"));
        assert!(is_record_id("_index2"));
    }

    #[tokio::test]
    async fn index_named_key_resolves_through_the_index() {
        let tmp = tempdir().unwrap();
        let (store, _clock) = store_at(tmp.path()).await;
        let id = store
            .put(Namespace::Cache, "_index", json!({"k": 1}), Metadata::new(), Expiry::Never)
            .await
            .unwrap();
        let rec = store.get(Namespace::Cache, "_index").await.unwrap().expect("record");
        assert_eq!(rec.id, id);
        assert_eq!(rec.payload, json!({"k": 1}));
    }
}
