use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::ports::{LocalStore, LogLevel, LogSink};
use crate::common::constants::{ORGANIZER_EXTERNAL_ID_KEY, VENUE_EXTERNAL_ID_KEY};
use crate::common::error::StoreError;
use crate::domain::{EntityKind, FieldSet, LocalId, OrganizerRecord, VenueRecord};

/// A nested sub-record that resolves to its own local entity
pub trait RelatedRecord {
    const KIND: EntityKind;
    const EXTERNAL_ID_KEY: &'static str;

    fn name(&self) -> &str;
    fn external_id(&self) -> Option<&str>;
    fn to_fields(&self) -> FieldSet;
}

impl RelatedRecord for VenueRecord {
    const KIND: EntityKind = EntityKind::Venue;
    const EXTERNAL_ID_KEY: &'static str = VENUE_EXTERNAL_ID_KEY;

    fn name(&self) -> &str {
        &self.name
    }

    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    fn to_fields(&self) -> FieldSet {
        VenueRecord::to_fields(self)
    }
}

impl RelatedRecord for OrganizerRecord {
    const KIND: EntityKind = EntityKind::Organizer;
    const EXTERNAL_ID_KEY: &'static str = ORGANIZER_EXTERNAL_ID_KEY;

    fn name(&self) -> &str {
        &self.name
    }

    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    fn to_fields(&self) -> FieldSet {
        OrganizerRecord::to_fields(self)
    }
}

/// Name → id cache for one import run. Dropped with the run; never shared across runs.
#[derive(Debug, Default)]
pub struct EntityCache {
    ids: HashMap<(EntityKind, String), LocalId>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<LocalId> {
        self.ids.get(&(kind, name.to_string())).copied()
    }

    fn remember(&mut self, kind: EntityKind, name: &str, id: LocalId) {
        self.ids.insert((kind, name.to_string()), id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// How a related entity was resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// No sub-record on the event
    Absent,
    Cached(LocalId),
    Matched(LocalId),
    Created(LocalId),
    /// Not found locally and creation is disabled for this run
    Unmatched,
    /// Lookup or creation was rejected by the datastore
    Failed(StoreError),
}

impl Resolved {
    pub fn id(&self) -> Option<LocalId> {
        match self {
            Resolved::Cached(id) | Resolved::Matched(id) | Resolved::Created(id) => Some(*id),
            _ => None,
        }
    }
}

/// Resolves venue/organizer sub-records to local ids, creating them when missing
pub struct RelatedEntityResolver {
    store: Arc<dyn LocalStore>,
    log: Arc<dyn LogSink>,
}

impl RelatedEntityResolver {
    pub fn new(store: Arc<dyn LocalStore>, log: Arc<dyn LogSink>) -> Self {
        Self { store, log }
    }

    pub async fn resolve_venue(
        &self,
        cache: &mut EntityCache,
        venue: Option<&VenueRecord>,
        create_missing: bool,
    ) -> Resolved {
        self.resolve(cache, venue, create_missing).await
    }

    pub async fn resolve_organizer(
        &self,
        cache: &mut EntityCache,
        organizer: Option<&OrganizerRecord>,
        create_missing: bool,
    ) -> Resolved {
        self.resolve(cache, organizer, create_missing).await
    }

    /// Cache, then exact name match, then create. Never returns an error:
    /// failures come back as `Resolved::Failed` so the parent event continues.
    pub async fn resolve<R: RelatedRecord + Sync>(
        &self,
        cache: &mut EntityCache,
        record: Option<&R>,
        create_missing: bool,
    ) -> Resolved {
        let Some(record) = record else {
            return Resolved::Absent;
        };
        let kind = R::KIND;
        let name = record.name();
        if name.is_empty() {
            return Resolved::Absent;
        }

        if let Some(id) = cache.get(kind, name) {
            debug!("Using cached {}: {} ({})", kind, name, id);
            return Resolved::Cached(id);
        }

        match self.store.find_by_name(kind, name).await {
            Ok(Some(id)) => {
                debug!("Found existing {}: {} ({})", kind, name, id);
                cache.remember(kind, name, id);
                return Resolved::Matched(id);
            }
            Ok(None) => {}
            Err(e) => return self.report_failure(kind, name, e),
        }

        if !create_missing {
            debug!("No local {} named '{}' and creation is disabled", kind, name);
            return Resolved::Unmatched;
        }

        let id = match self.store.create(kind, record.to_fields()).await {
            Ok(id) => id,
            Err(e) => return self.report_failure(kind, name, e),
        };
        cache.remember(kind, name, id);
        info!("Created new {}: {} ({})", kind, name, id);

        if let Some(external_id) = record.external_id() {
            if let Err(e) = self.store.set_metadata(id, R::EXTERNAL_ID_KEY, external_id).await {
                warn!("Created {} {} but could not stamp its external id: {}", kind, id, e);
                self.log.append(
                    LogLevel::Warn,
                    "Related entity cross-reference not stored",
                    &json!({"kind": kind.as_str(), "name": name, "local_id": id.0, "error": e.to_string()}),
                );
            }
        }
        Resolved::Created(id)
    }

    fn report_failure(&self, kind: EntityKind, name: &str, error: StoreError) -> Resolved {
        warn!("Could not resolve {} '{}': {}", kind, name, error);
        self.log.append(
            LogLevel::Warn,
            "Related entity could not be resolved; continuing without it",
            &json!({"kind": kind.as_str(), "name": name, "error": error.to_string()}),
        );
        Resolved::Failed(error)
    }
}
