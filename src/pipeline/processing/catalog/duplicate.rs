use std::sync::Arc;
use tracing::debug;

use crate::app::ports::LocalStore;
use crate::common::error::StoreResult;
use crate::domain::LocalId;

/// Finds the local event that already carries a given external id.
///
/// Matching is an exact lookup on the external-id cross-reference metadata.
/// There is no title/date fallback: an event whose metadata was lost is
/// treated as new.
pub struct DuplicateResolver {
    store: Arc<dyn LocalStore>,
}

impl DuplicateResolver {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub async fn find(&self, external_id: &str) -> StoreResult<Option<LocalId>> {
        if external_id.trim().is_empty() {
            return Ok(None);
        }
        let found = self.store.find_by_external_id(external_id).await?;
        debug!(external_id, ?found, "Duplicate lookup");
        Ok(found)
    }
}
