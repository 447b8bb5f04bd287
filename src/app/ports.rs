use async_trait::async_trait;
use serde_json::Value;

use crate::common::error::{SourceResult, StoreResult};
use crate::domain::{EntityKind, FieldSet, LocalId, RawEvent};

// Ingest-side ports
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch one page of events. Pages start at 1; an empty page means the end.
    async fn fetch_page(&self, page: u32) -> SourceResult<Vec<RawEvent>>;

    /// Fetch a single event by its external id
    async fn fetch_one(&self, external_id: &str) -> SourceResult<RawEvent>;
}

// Persistence-side ports
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Exact lookup of an event by its external-id cross-reference metadata
    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<LocalId>>;

    /// Exact, case-sensitive lookup by display name within one kind
    async fn find_by_name(&self, kind: EntityKind, name: &str) -> StoreResult<Option<LocalId>>;

    async fn create(&self, kind: EntityKind, fields: FieldSet) -> StoreResult<LocalId>;

    async fn update(&self, id: LocalId, fields: FieldSet) -> StoreResult<()>;

    async fn set_metadata(&self, id: LocalId, key: &str, value: &str) -> StoreResult<()>;

    /// Drop a metadata key. Removing an absent key is not an error.
    async fn remove_metadata(&self, id: LocalId, key: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Operator-facing log sink. Fire-and-forget: implementations swallow their own failures.
pub trait LogSink: Send + Sync {
    fn append(&self, level: LogLevel, message: &str, context: &Value);
}
