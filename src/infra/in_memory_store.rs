use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::app::ports::LocalStore;
use crate::common::constants::EVENT_EXTERNAL_ID_KEY;
use crate::common::error::{StoreError, StoreResult};
use crate::domain::{EntityKind, FieldSet, LocalId};

/// A persisted entity as the in-memory store holds it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub kind: EntityKind,
    pub fields: FieldSet,
    pub metadata: BTreeMap<String, String>,
}

impl StoredEntity {
    /// Display name: `title` for events, `name` for venues and organizers
    pub fn display_name(&self) -> Option<&str> {
        let key = match self.kind {
            EntityKind::Event => "title",
            EntityKind::Venue | EntityKind::Organizer => "name",
        };
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// On-disk form of the catalog. Entities are kept in id order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    entities: Vec<(LocalId, StoredEntity)>,
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    entities: HashMap<LocalId, StoredEntity>,
    rejected_kinds: HashSet<EntityKind>,
}

/// In-memory datastore for development, dry runs against fixtures, and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Backend(format!("store lock poisoned: {}", e)))
    }

    fn insert(state: &mut StoreState, entity: StoredEntity) -> LocalId {
        state.next_id += 1;
        let id = LocalId(state.next_id);
        state.entities.insert(id, entity);
        id
    }

    /// Open a catalog snapshot written by [`InMemoryStore::save`]. A missing
    /// file yields an empty store.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            info!("No catalog at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let snapshot: Snapshot = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let entities: HashMap<LocalId, StoredEntity> = snapshot.entities.into_iter().collect();
        // Never hand out an id that is already taken
        let next_id = entities.keys().map(|id| id.0).max().unwrap_or(0).max(snapshot.next_id);
        info!("Loaded {} entities from {}", entities.len(), path.display());
        Ok(Self {
            state: Arc::new(Mutex::new(StoreState {
                next_id,
                entities,
                rejected_kinds: HashSet::new(),
            })),
        })
    }

    /// Write the whole catalog to `path`, replacing it atomically
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let snapshot = {
            let state = self.lock()?;
            let mut entities: Vec<_> = state.entities.iter().map(|(id, e)| (*id, e.clone())).collect();
            entities.sort_by_key(|(id, _)| *id);
            Snapshot {
                next_id: state.next_id,
                entities,
            }
        };
        let body = serde_json::to_string_pretty(&snapshot)?;
        let staging = path.with_extension("tmp");
        std::fs::write(&staging, body)?;
        std::fs::rename(&staging, path)?;
        debug!("Saved {} entities to {}", snapshot.entities.len(), path.display());
        Ok(())
    }

    /// Insert an entity directly, bypassing write rejection
    pub async fn seed(&self, kind: EntityKind, fields: FieldSet, metadata: &[(&str, &str)]) -> LocalId {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let metadata = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::insert(&mut state, StoredEntity { kind, fields, metadata })
    }

    /// Make every subsequent create/update of `kind` fail
    pub async fn reject_writes_for(&self, kind: EntityKind) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.rejected_kinds.insert(kind);
    }

    pub async fn get(&self, id: LocalId) -> Option<StoredEntity> {
        self.lock().ok()?.entities.get(&id).cloned()
    }

    pub async fn count(&self, kind: EntityKind) -> usize {
        self.lock()
            .map(|state| state.entities.values().filter(|e| e.kind == kind).count())
            .unwrap_or(0)
    }

    pub async fn all(&self, kind: EntityKind) -> Vec<(LocalId, StoredEntity)> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut entities: Vec<_> = state
            .entities
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(id, e)| (*id, e.clone()))
            .collect();
        entities.sort_by_key(|(id, _)| *id);
        entities
    }
}

#[async_trait]
impl LocalStore for InMemoryStore {
    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<LocalId>> {
        let state = self.lock()?;
        let mut matches: Vec<LocalId> = state
            .entities
            .iter()
            .filter(|(_, e)| e.kind == EntityKind::Event)
            .filter(|(_, e)| e.metadata.get(EVENT_EXTERNAL_ID_KEY).map(String::as_str) == Some(external_id))
            .map(|(id, _)| *id)
            .collect();
        // Lowest id wins if the cross-reference was ever duplicated
        matches.sort();
        Ok(matches.first().copied())
    }

    async fn find_by_name(&self, kind: EntityKind, name: &str) -> StoreResult<Option<LocalId>> {
        let state = self.lock()?;
        let mut matches: Vec<LocalId> = state
            .entities
            .iter()
            .filter(|(_, e)| e.kind == kind && e.display_name() == Some(name))
            .map(|(id, _)| *id)
            .collect();
        matches.sort();
        Ok(matches.first().copied())
    }

    async fn create(&self, kind: EntityKind, fields: FieldSet) -> StoreResult<LocalId> {
        let mut state = self.lock()?;
        if state.rejected_kinds.contains(&kind) {
            return Err(StoreError::Rejected {
                kind,
                reason: "writes disabled".to_string(),
            });
        }
        let id = Self::insert(
            &mut state,
            StoredEntity {
                kind,
                fields,
                metadata: BTreeMap::new(),
            },
        );
        debug!("Created {} with id {}", kind, id);
        Ok(id)
    }

    async fn update(&self, id: LocalId, fields: FieldSet) -> StoreResult<()> {
        let mut state = self.lock()?;
        let rejected = state.rejected_kinds.clone();
        let entity = state.entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if rejected.contains(&entity.kind) {
            return Err(StoreError::Rejected {
                kind: entity.kind,
                reason: "writes disabled".to_string(),
            });
        }
        entity.fields.extend(fields);
        debug!("Updated {} {}", entity.kind, id);
        Ok(())
    }

    async fn set_metadata(&self, id: LocalId, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        let entity = state.entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entity.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_metadata(&self, id: LocalId, key: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        let entity = state.entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entity.metadata.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(key: &str, value: &str) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert(key.to_string(), json!(value));
        fields
    }

    #[tokio::test]
    async fn test_find_by_external_id_only_matches_events() {
        let store = InMemoryStore::new();
        store
            .seed(EntityKind::Venue, named("name", "Hall"), &[(EVENT_EXTERNAL_ID_KEY, "x1")])
            .await;
        let event = store
            .seed(EntityKind::Event, named("title", "Gig"), &[(EVENT_EXTERNAL_ID_KEY, "x1")])
            .await;

        assert_eq!(store.find_by_external_id("x1").await.unwrap(), Some(event));
        assert_eq!(store.find_by_external_id("X1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_by_name_is_case_sensitive() {
        let store = InMemoryStore::new();
        let id = store.create(EntityKind::Organizer, named("name", "Night Owls")).await.unwrap();

        assert_eq!(store.find_by_name(EntityKind::Organizer, "Night Owls").await.unwrap(), Some(id));
        assert_eq!(store.find_by_name(EntityKind::Organizer, "night owls").await.unwrap(), None);
        assert_eq!(store.find_by_name(EntityKind::Venue, "Night Owls").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_merges_fields_and_missing_id_fails() {
        let store = InMemoryStore::new();
        let id = store.create(EntityKind::Event, named("title", "Old")).await.unwrap();
        store.update(id, named("title", "New")).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().display_name(), Some("New"));
        assert!(matches!(
            store.update(LocalId(999), FieldSet::new()).await,
            Err(StoreError::NotFound(LocalId(999)))
        ));
    }

    #[tokio::test]
    async fn test_remove_metadata_is_idempotent() {
        let store = InMemoryStore::new();
        let id = store
            .seed(EntityKind::Event, named("title", "Gig"), &[("_humanitix_series_id", "S1")])
            .await;

        store.remove_metadata(id, "_humanitix_series_id").await.unwrap();
        store.remove_metadata(id, "_humanitix_series_id").await.unwrap();

        assert!(store.get(id).await.unwrap().metadata.is_empty());
        assert!(matches!(
            store.remove_metadata(LocalId(999), "k").await,
            Err(StoreError::NotFound(LocalId(999)))
        ));
    }

    #[tokio::test]
    async fn test_saved_catalog_reloads_and_keeps_ids_unique() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let store = InMemoryStore::new();
        let gig = store.create(EntityKind::Event, named("title", "Gig")).await.unwrap();
        store.set_metadata(gig, EVENT_EXTERNAL_ID_KEY, "e1").await.unwrap();
        store.create(EntityKind::Venue, named("name", "Hall")).await.unwrap();
        store.save(&path).unwrap();

        let reloaded = InMemoryStore::load(&path).unwrap();
        assert_eq!(reloaded.find_by_external_id("e1").await.unwrap(), Some(gig));
        assert_eq!(reloaded.count(EntityKind::Venue).await, 1);

        let next = reloaded.create(EntityKind::Organizer, named("name", "Owls")).await.unwrap();
        assert_eq!(next, LocalId(3));
    }

    #[tokio::test]
    async fn test_missing_catalog_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(store.count(EntityKind::Event).await, 0);
    }

    #[tokio::test]
    async fn test_rejected_kind_refuses_writes() {
        let store = InMemoryStore::new();
        store.reject_writes_for(EntityKind::Venue).await;

        let result = store.create(EntityKind::Venue, named("name", "Hall")).await;
        assert!(matches!(result, Err(StoreError::Rejected { kind: EntityKind::Venue, .. })));
        assert!(store.create(EntityKind::Event, named("title", "Gig")).await.is_ok());
    }
}
