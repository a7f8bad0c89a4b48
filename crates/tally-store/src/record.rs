use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form key/value metadata attached to every stored record.
pub type Metadata = serde_json::Map<String, Value>;

pub(crate) const META_KEY: &str = "key";
pub(crate) const META_SIZE: &str = "size";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Cache,
    Analysis,
    Report,
    Mapping,
    Session,
}

impl Namespace {
    pub const ALL: [Namespace; 5] = [
        Namespace::Cache,
        Namespace::Analysis,
        Namespace::Report,
        Namespace::Mapping,
        Namespace::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Cache => "cache",
            Namespace::Analysis => "analysis",
            Namespace::Report => "report",
            Namespace::Mapping => "mapping",
            Namespace::Session => "session",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "cache" => Some(Namespace::Cache),
            "analysis" | "analyses" => Some(Namespace::Analysis),
            "report" | "reports" => Some(Namespace::Report),
            "mapping" | "mappings" => Some(Namespace::Mapping),
            "session" | "sessions" => Some(Namespace::Session),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a write stays readable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Expiry {
    /// Use the store's configured default TTL.
    #[default]
    Default,
    After(Duration),
    Never,
}

impl From<Duration> for Expiry {
    fn from(ttl: Duration) -> Self {
        Expiry::After(ttl)
    }
}

impl From<Option<Duration>> for Expiry {
    fn from(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => Expiry::After(ttl),
            None => Expiry::Default,
        }
    }
}

impl Expiry {
    pub(crate) fn resolve(
        self,
        created_at: DateTime<Utc>,
        default_ttl: Option<Duration>,
    ) -> Option<DateTime<Utc>> {
        let ttl = match self {
            Expiry::Default => default_ttl?,
            Expiry::After(ttl) => ttl,
            Expiry::Never => return None,
        };
        // Negative TTLs collapse to "expires immediately" so expires_at never precedes created_at.
        Some(created_at + ttl.max(Duration::zero()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub namespace: Namespace,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
    pub payload: Value,
    /// Write sequence; breaks `created_at` ties in listings.
    #[serde(default)]
    pub seq: u64,
}

impl StoredRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Logical key the record was written under.
    pub fn key(&self) -> Option<&str> {
        self.metadata.get(META_KEY).and_then(Value::as_str)
    }

    /// Serialized payload size in bytes, as recorded at write time.
    pub fn size(&self) -> u64 {
        self.metadata
            .get(META_SIZE)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }

    pub(crate) fn matches(&self, filter: &Metadata) -> bool {
        filter.iter().all(|(field, expected)| {
            self.metadata.get(field) == Some(expected) || self.payload.get(field) == Some(expected)
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub count: u64,
    pub size: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StoreStats {
    pub total_count: u64,
    pub total_size: u64,
    pub namespaces: BTreeMap<String, NamespaceStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest: Option<DateTime<Utc>>,
}

impl StoreStats {
    pub(crate) fn observe(&mut self, namespace: Namespace, record: &StoredRecord, bytes: u64) {
        let entry = self
            .namespaces
            .entry(namespace.as_str().to_string())
            .or_default();
        entry.count += 1;
        entry.size += bytes;
        self.total_count += 1;
        self.total_size += bytes;
        if self.oldest.map_or(true, |oldest| record.created_at < oldest) {
            self.oldest = Some(record.created_at);
        }
        if self.newest.map_or(true, |newest| record.created_at > newest) {
            self.newest = Some(record.created_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(expires_at: Option<DateTime<Utc>>) -> StoredRecord {
        let mut metadata = Metadata::new();
        metadata.insert("key".into(), json!("issues:PROJ"));
        metadata.insert("size".into(), json!(17));
        metadata.insert("kind".into(), json!("flow"));
        StoredRecord {
            id: "abc".into(),
            namespace: Namespace::Cache,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            expires_at,
            metadata,
            payload: json!({"project": "PROJ", "count": 3}),
            seq: 1,
        }
    }

    #[test]
    fn namespace_slugs_round_trip() {
        for ns in Namespace::ALL {
            assert_eq!(Namespace::from_slug(ns.as_str()), Some(ns));
        }
        assert_eq!(Namespace::from_slug(" Reports "), Some(Namespace::Report));
        assert_eq!(Namespace::from_slug("blob"), None);
    }

    #[test]
    fn expiry_resolution_respects_default_and_never() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let hour = Duration::hours(1);
        assert_eq!(Expiry::Default.resolve(created, Some(hour)), Some(created + hour));
        assert_eq!(Expiry::Default.resolve(created, None), None);
        assert_eq!(Expiry::Never.resolve(created, Some(hour)), None);
        assert_eq!(
            Expiry::After(Duration::seconds(-30)).resolve(created, None),
            Some(created)
        );
    }

    #[test]
    fn expired_once_deadline_reached() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rec = record(Some(created + Duration::minutes(5)));
        assert!(!rec.is_expired(created + Duration::minutes(4)));
        assert!(rec.is_expired(created + Duration::minutes(5)));
        assert!(!record(None).is_expired(created + Duration::days(3650)));
    }

    #[test]
    fn filter_matches_metadata_then_payload() {
        let rec = record(None);
        assert_eq!(rec.key(), Some("issues:PROJ"));
        assert_eq!(rec.size(), 17);
        let mut filter = Metadata::new();
        filter.insert("kind".into(), json!("flow"));
        assert!(rec.matches(&filter));
        filter.insert("project".into(), json!("PROJ"));
        assert!(rec.matches(&filter));
        filter.insert("count".into(), json!(4));
        assert!(!rec.matches(&filter));
    }
}
