use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::record::{Expiry, Metadata, Namespace};
use crate::store::RecordStore;

/// Reserved field in an update that requests a lifecycle transition.
pub const STATE_FIELD: &str = "state";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Active,
    Completed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "active" | "running" => Some(SessionState::Active),
            "completed" | "complete" | "done" => Some(SessionState::Completed),
            "failed" | "error" => Some(SessionState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Active)
    }

    /// Lifecycle only moves forward: active -> completed | failed.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        *self == next || (*self == SessionState::Active && next.is_terminal())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub session_type: String,
    pub state: SessionState,
    #[serde(default)]
    pub data: Metadata,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Tracks multi-step operations as records in the `session` namespace.
pub struct SessionTracker {
    store: Arc<RecordStore>,
    expiry: Expiry,
}

impl SessionTracker {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            expiry: Expiry::Default,
        }
    }

    pub fn with_expiry(mut self, expiry: impl Into<Expiry>) -> Self {
        self.expiry = expiry.into();
        self
    }

    pub async fn create_session(&self, session_type: &str, initial: Metadata) -> StoreResult<String> {
        let now = self.store.clock().now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            session_type: session_type.to_string(),
            state: SessionState::Active,
            data: initial,
            created_at: now,
            last_updated_at: now,
        };
        self.store
            .put_json(
                Namespace::Session,
                &session.session_id,
                &session,
                session_metadata(&session),
                self.expiry,
            )
            .await?;
        tracing::debug!(
            target: "tally::store",
            session_id = %session.session_id,
            session_type,
            "session created"
        );
        Ok(session.session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        match self.store.get(Namespace::Session, session_id).await? {
            Some(record) => Ok(Some(record.payload_as()?)),
            None => Ok(None),
        }
    }

    /// Shallow-merges `partial` into the session's data bag.
    ///
    /// A `state` field, when present, is consumed as a lifecycle transition
    /// instead of being merged; moving out of a terminal state is rejected.
    pub async fn update_session(&self, session_id: &str, mut partial: Metadata) -> StoreResult<Session> {
        let Some(mut record) = self.store.get(Namespace::Session, session_id).await? else {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        };
        let mut session: Session = record.payload_as()?;

        if let Some(requested) = partial.remove(STATE_FIELD) {
            let slug = requested.as_str().unwrap_or_default();
            let next = SessionState::from_slug(slug)
                .ok_or_else(|| StoreError::InvalidState(requested.to_string()))?;
            if !session.state.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    id: session.session_id.clone(),
                    from: session.state.as_str(),
                    to: next.as_str(),
                });
            }
            session.state = next;
        }
        for (field, value) in partial {
            session.data.insert(field, value);
        }
        session.last_updated_at = self.store.clock().now();

        record.payload = serde_json::to_value(&session)?;
        record.metadata.extend(session_metadata(&session));
        self.store.replace(record).await?;
        Ok(session)
    }

    pub async fn complete_session(&self, session_id: &str, summary: Metadata) -> StoreResult<Session> {
        let mut partial = summary;
        partial.insert(
            STATE_FIELD.into(),
            Value::String(SessionState::Completed.as_str().into()),
        );
        self.update_session(session_id, partial).await
    }

    pub async fn fail_session(&self, session_id: &str, error: &str) -> StoreResult<Session> {
        let mut partial = Metadata::new();
        partial.insert(
            STATE_FIELD.into(),
            Value::String(SessionState::Failed.as_str().into()),
        );
        partial.insert("error".into(), Value::String(error.to_string()));
        let session = self.update_session(session_id, partial).await?;
        tracing::warn!(target: "tally::store", session_id, error, "session failed");
        Ok(session)
    }

    pub async fn list_sessions(&self, session_type: Option<&str>) -> StoreResult<Vec<Session>> {
        let filter = session_type.map(|kind| {
            let mut filter = Metadata::new();
            filter.insert("session_type".into(), Value::String(kind.to_string()));
            filter
        });
        let records = self.store.list(Namespace::Session, filter.as_ref()).await?;
        let mut sessions = Vec::with_capacity(records.len());
        for record in records {
            match record.payload_as::<Session>() {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    tracing::warn!(
                        target: "tally::store",
                        id = %record.id,
                        error = %err,
                        "skipping malformed session"
                    );
                }
            }
        }
        Ok(sessions)
    }
}

fn session_metadata(session: &Session) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(
        "session_type".into(),
        Value::String(session.session_type.clone()),
    );
    meta.insert(
        STATE_FIELD.into(),
        Value::String(session.state.as_str().into()),
    );
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_only_moves_forward() {
        use SessionState::*;
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Failed));
        assert!(Active.can_transition_to(Active));
        assert!(Completed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn state_slugs_accept_aliases() {
        assert_eq!(SessionState::from_slug("DONE"), Some(SessionState::Completed));
        assert_eq!(SessionState::from_slug("error"), Some(SessionState::Failed));
        assert_eq!(SessionState::from_slug("paused"), None);
    }
}
