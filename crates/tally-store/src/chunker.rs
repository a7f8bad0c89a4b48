use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::record::{Expiry, Metadata, Namespace};
use crate::store::RecordStore;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

const DATASET_PREFIX: &str = "dataset";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub dataset_id: String,
    pub source_key: String,
    pub total_item_count: usize,
    pub chunk_size: usize,
    pub ordered_chunk_ids: Vec<String>,
}

/// Splits large result sets into bounded chunks stored as independent
/// `cache` records, tied together by a manifest.
pub struct DatasetChunker {
    store: Arc<RecordStore>,
    default_chunk_size: usize,
}

impl DatasetChunker {
    pub fn new(store: Arc<RecordStore>, default_chunk_size: usize) -> Self {
        Self {
            store,
            default_chunk_size: default_chunk_size.max(1),
        }
    }

    pub fn default_chunk_size(&self) -> usize {
        self.default_chunk_size
    }

    pub async fn store_dataset<T: Serialize>(
        &self,
        key: &str,
        items: &[T],
        chunk_size: Option<usize>,
        metadata: Metadata,
        expiry: impl Into<Expiry>,
    ) -> StoreResult<String> {
        let chunk_size = chunk_size.unwrap_or(self.default_chunk_size);
        if chunk_size == 0 {
            return Err(StoreError::InvalidChunkSize);
        }
        let expiry = expiry.into();
        let dataset_id = Uuid::new_v4().to_string();
        let chunk_count = items.len().div_ceil(chunk_size);

        let mut ordered_chunk_ids = Vec::with_capacity(chunk_count);
        for (index, chunk) in items.chunks(chunk_size).enumerate() {
            let mut chunk_meta = metadata.clone();
            chunk_meta.insert("dataset_id".into(), Value::String(dataset_id.clone()));
            chunk_meta.insert("chunk_index".into(), Value::from(index));
            chunk_meta.insert("chunk_count".into(), Value::from(chunk_count));
            let id = self
                .store
                .put_json(
                    Namespace::Cache,
                    &chunk_key(key, index),
                    &chunk,
                    chunk_meta,
                    expiry,
                )
                .await?;
            ordered_chunk_ids.push(id);
        }

        let manifest = DatasetManifest {
            dataset_id: dataset_id.clone(),
            source_key: key.to_string(),
            total_item_count: items.len(),
            chunk_size,
            ordered_chunk_ids,
        };
        let mut manifest_meta = metadata;
        manifest_meta.insert("dataset_id".into(), Value::String(dataset_id.clone()));
        manifest_meta.insert("total_items".into(), Value::from(items.len()));
        manifest_meta.insert("chunk_count".into(), Value::from(chunk_count));
        self.store
            .put_json(
                Namespace::Cache,
                &manifest_key(key),
                &manifest,
                manifest_meta,
                expiry,
            )
            .await?;
        tracing::debug!(
            target: "tally::store",
            key,
            dataset_id = %dataset_id,
            items = items.len(),
            chunks = chunk_count,
            "stored chunked dataset"
        );
        Ok(dataset_id)
    }

    pub async fn manifest(&self, key: &str) -> StoreResult<Option<DatasetManifest>> {
        match self.store.get(Namespace::Cache, &manifest_key(key)).await? {
            Some(record) => Ok(Some(record.payload_as()?)),
            None => Ok(None),
        }
    }

    /// Reassembles a dataset in manifest order. A missing chunk makes the
    /// whole dataset unavailable rather than returning a partial sequence.
    pub async fn retrieve_dataset<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> StoreResult<Option<Vec<T>>> {
        let Some(manifest) = self.manifest(key).await? else {
            return Ok(None);
        };
        let mut items = Vec::with_capacity(manifest.total_item_count);
        for (index, chunk_id) in manifest.ordered_chunk_ids.iter().enumerate() {
            let Some(record) = self.store.get(Namespace::Cache, chunk_id).await? else {
                tracing::warn!(
                    target: "tally::store",
                    key,
                    chunk = index,
                    "dataset chunk missing; treating dataset as absent"
                );
                return Ok(None);
            };
            let chunk: Vec<T> = record.payload_as()?;
            items.extend(chunk);
        }
        if items.len() != manifest.total_item_count {
            tracing::warn!(
                target: "tally::store",
                key,
                expected = manifest.total_item_count,
                found = items.len(),
                "dataset length mismatch; treating dataset as absent"
            );
            return Ok(None);
        }
        Ok(Some(items))
    }
}

fn manifest_key(key: &str) -> String {
    format!("{}:{}", DATASET_PREFIX, key)
}

fn chunk_key(key: &str, index: usize) -> String {
    format!("{}:{}:chunk:{}", DATASET_PREFIX, key, index)
}
