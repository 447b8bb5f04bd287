use async_trait::async_trait;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::app::ports::EventSource;
use crate::common::error::{ImportError, Result, SourceError, SourceResult};
use crate::domain::RawEvent;
use crate::infra::humanitix_client::extract_events;
use crate::pipeline::processing::mapper::table::{lookup, TargetField};

/// Serves events from a saved API response, paged like the live endpoint.
/// Backs `--from-file` runs and fixture-driven tests.
#[derive(Debug, Clone)]
pub struct FileEventSource {
    events: Vec<RawEvent>,
    page_size: usize,
}

impl FileEventSource {
    pub fn new(events: Vec<RawEvent>, page_size: usize) -> Self {
        Self {
            events,
            page_size: page_size.max(1),
        }
    }

    /// Load a JSON file holding either a bare array or a list envelope
    pub fn load(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let body: Value = serde_json::from_str(&content)?;
        let events = extract_events(&body).map_err(|e| {
            ImportError::Config(format!("{} is not an event list: {}", path.display(), e))
        })?;
        info!("Loaded {} events from {}", events.len(), path.display());
        Ok(Self::new(events, page_size))
    }

    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }
}

fn id_matches(event: &RawEvent, external_id: &str) -> bool {
    let Some(map) = event.as_object() else {
        return false;
    };
    match lookup(map, TargetField::ExternalId) {
        Some(Value::String(id)) => id.trim() == external_id,
        Some(Value::Number(n)) => n.to_string() == external_id,
        _ => false,
    }
}

#[async_trait]
impl EventSource for FileEventSource {
    async fn fetch_page(&self, page: u32) -> SourceResult<Vec<RawEvent>> {
        let page = page.max(1) as usize;
        Ok(self
            .events
            .chunks(self.page_size)
            .nth(page - 1)
            .map(<[RawEvent]>::to_vec)
            .unwrap_or_default())
    }

    async fn fetch_one(&self, external_id: &str) -> SourceResult<RawEvent> {
        self.events
            .iter()
            .find(|event| id_matches(event, external_id))
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("event {}", external_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_pages_then_empty() {
        let events = (1..=5).map(|i| json!({"_id": format!("e{}", i)})).collect();
        let source = FileEventSource::new(events, 2);

        assert_eq!(source.fetch_page(1).await.unwrap().len(), 2);
        assert_eq!(source.fetch_page(3).await.unwrap().len(), 1);
        assert!(source.fetch_page(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_envelope_and_fetch_one() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"events": [{{"_id": "abc", "name": "Gig"}}, {{"id": 42}}]}}"#).unwrap();

        let source = FileEventSource::load(file.path(), 100).unwrap();
        assert_eq!(source.events().len(), 2);
        assert_eq!(source.fetch_one("abc").await.unwrap()["name"], "Gig");
        assert!(source.fetch_one("42").await.is_ok());
        assert!(matches!(source.fetch_one("zzz").await, Err(SourceError::NotFound(_))));
    }
}
