//! Local persistence for fetched analytics records: a namespaced TTL store,
//! dataset chunking, session tracking and report export.

pub mod chunker;
pub mod clock;
pub mod error;
pub mod record;
pub mod report;
pub mod session;
pub mod store;

pub use chunker::{DatasetChunker, DatasetManifest, DEFAULT_CHUNK_SIZE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use record::{Expiry, Metadata, Namespace, NamespaceStats, StoreStats, StoredRecord};
pub use report::{RenderError, ReportFormat, ReportRenderer};
pub use session::{Session, SessionState, SessionTracker, STATE_FIELD};
pub use store::RecordStore;
