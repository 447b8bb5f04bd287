//! Drives an import run end to end: fetch pages, then for each record detect
//! series, map, resolve related entities, match duplicates and persist.
//!
//! Per-record problems never abort a run. They are collected on the
//! `ImportRunResult` and the run moves on to the next record.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::{EventSource, LocalStore, LogLevel, LogSink};
use crate::common::constants::{
    EVENT_EXTERNAL_ID_KEY, HUMANITIX_SOURCE, IMAGE_URL_KEY, LAST_IMPORTED_KEY, SERIES_ID_KEY, SERIES_INSTANCE_KEY,
    SERIES_PARENT_KEY, SERIES_RRULE_KEY, SERIES_TOTAL_KEY,
};
use crate::common::error::{ImportError, RecordError, Result, SourceError, StoreError, StoreResult};
use crate::domain::{CanonicalEvent, EntityKind, FieldSet, LocalId, RawEvent};
use crate::observability::metrics;
use crate::pipeline::batching::BatchPlanner;
use crate::pipeline::processing::catalog::{DuplicateResolver, EntityCache, RelatedEntityResolver, Resolved};
use crate::pipeline::processing::mapper::FieldMapper;
use crate::pipeline::processing::series::SeriesDetector;
use crate::pipeline::run::{AbortReason, CancelFlag, ImportOptions, ImportRunResult, RunPhase};

/// What happened to a single record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Imported(Option<LocalId>),
    Updated(LocalId),
    Skipped(String),
    Failed(RecordError),
}

/// State owned by one run and dropped with it
struct RunContext {
    result: ImportRunResult,
    entities: EntityCache,
    phase: RunPhase,
    batches: usize,
}

impl RunContext {
    fn new(dry_run: bool) -> Self {
        Self {
            result: ImportRunResult {
                run_id: Uuid::new_v4().to_string(),
                dry_run,
                ..Default::default()
            },
            entities: EntityCache::new(),
            phase: RunPhase::Fetching { page: 0 },
            batches: 0,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(run_id = %self.result.run_id, "{} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn skip_remaining(&mut self, count: usize) {
        if count > 0 {
            self.result.skipped_count += count;
            metrics::events::skipped(count);
        }
    }
}

pub struct ImportOrchestrator {
    source: Arc<dyn EventSource>,
    store: Arc<dyn LocalStore>,
    log: Arc<dyn LogSink>,
    mapper: FieldMapper,
    series: SeriesDetector,
    duplicates: DuplicateResolver,
    related: RelatedEntityResolver,
    planner: BatchPlanner,
    run_lock: Mutex<()>,
}

impl ImportOrchestrator {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn LocalStore>,
        log: Arc<dyn LogSink>,
        mapper: FieldMapper,
        planner: BatchPlanner,
    ) -> Self {
        Self {
            duplicates: DuplicateResolver::new(store.clone()),
            related: RelatedEntityResolver::new(store.clone(), log.clone()),
            series: SeriesDetector::new(),
            source,
            store,
            log,
            mapper,
            planner,
            run_lock: Mutex::new(()),
        }
    }

    /// Run a full paged import. Only one run executes at a time; a second
    /// concurrent call fails with `AlreadyRunning`.
    #[instrument(skip(self, options, cancel), fields(dry_run = options.dry_run))]
    pub async fn run(&self, options: &ImportOptions, cancel: &CancelFlag) -> Result<ImportRunResult> {
        let _guard = self.run_lock.try_lock().map_err(|_| ImportError::AlreadyRunning)?;
        let started = Instant::now();
        let mut ctx = RunContext::new(options.dry_run);
        metrics::run::started();
        info!(run_id = %ctx.result.run_id, "🚀 Starting Humanitix import");
        self.log.append(
            LogLevel::Info,
            "Import run started",
            &json!({"run_id": ctx.result.run_id, "source": HUMANITIX_SOURCE, "options": options}),
        );

        let first_page = options.start_page.max(1);
        let last_page = first_page.saturating_add(options.max_pages.max(1) - 1);

        for page in first_page..=last_page {
            ctx.enter(RunPhase::Fetching { page });
            let mut records = match self.source.fetch_page(page).await {
                Ok(records) => records,
                Err(e) if page == first_page && (e.is_fatal() || matches!(e, SourceError::Transport(_))) => {
                    // Bad credentials or no connection: the run itself failed
                    error!("First page unreachable: {}", e);
                    metrics::source::error("first_page");
                    self.log.append(
                        LogLevel::Error,
                        "Import aborted: first page unreachable",
                        &json!({"run_id": ctx.result.run_id, "page": page, "error": e.to_string()}),
                    );
                    return Err(ImportError::Source(e));
                }
                Err(e) => {
                    warn!("Stopping at page {}: {}", page, e);
                    metrics::source::error(if page == first_page { "first_page" } else { "page" });
                    ctx.result.errors.push(format!("page {}: {}", page, e));
                    break;
                }
            };
            if records.is_empty() {
                debug!("Page {} is empty, paging complete", page);
                break;
            }
            ctx.result.pages_fetched += 1;
            metrics::source::page_fetched();

            let mut limit_reached = false;
            if let Some(limit) = options.record_limit {
                let room = limit.saturating_sub(ctx.result.fetched_count);
                if records.len() >= room {
                    records.truncate(room);
                    limit_reached = true;
                }
            }
            ctx.result.fetched_count += records.len();
            metrics::events::fetched(records.len());
            info!("📡 Page {}: {} events", page, records.len());

            self.process_page(&mut ctx, records, options, cancel).await;
            if ctx.result.aborted.is_some() || limit_reached {
                break;
            }
        }

        Ok(self.finish(ctx, started))
    }

    /// Fetch and import a single event by its external id
    #[instrument(skip(self, options))]
    pub async fn import_one(&self, external_id: &str, options: &ImportOptions) -> Result<ImportRunResult> {
        let _guard = self.run_lock.try_lock().map_err(|_| ImportError::AlreadyRunning)?;
        let started = Instant::now();
        let mut ctx = RunContext::new(options.dry_run);
        metrics::run::started();

        ctx.enter(RunPhase::Fetching { page: 0 });
        let raw = self.source.fetch_one(external_id).await.map_err(|e| {
            metrics::source::error("single");
            ImportError::Source(e)
        })?;
        ctx.result.fetched_count = 1;
        metrics::events::fetched(1);

        ctx.enter(RunPhase::Processing { batch: 1 });
        let outcome = self.process_record(&mut ctx, &raw, options).await;
        self.tally(&mut ctx, outcome);

        Ok(self.finish(ctx, started))
    }

    async fn process_page(
        &self,
        ctx: &mut RunContext,
        records: Vec<RawEvent>,
        options: &ImportOptions,
        cancel: &CancelFlag,
    ) {
        let total = records.len();
        let mut pending: VecDeque<RawEvent> = records.into();

        while !pending.is_empty() {
            if self.planner.is_exhausted() {
                warn!(
                    "Memory headroom below critical floor, leaving {} records unprocessed",
                    pending.len()
                );
                self.abort(ctx, AbortReason::MemoryExhausted, pending.len());
                return;
            }

            let size = self.planner.batch_size(total, pending.len());
            ctx.batches += 1;
            ctx.enter(RunPhase::Processing { batch: ctx.batches });
            metrics::events::batch_size(size);

            let batch: Vec<RawEvent> = pending.drain(..size).collect();
            for (i, raw) in batch.iter().enumerate() {
                if cancel.is_cancelled() {
                    let remaining = batch.len() - i + pending.len();
                    info!("Cancellation requested, leaving {} records unprocessed", remaining);
                    self.abort(ctx, AbortReason::Cancelled, remaining);
                    return;
                }
                let outcome = self.process_record(ctx, raw, options).await;
                self.tally(ctx, outcome);
            }
            debug!(
                "Batch {} done: {} imported, {} updated, {} failed so far",
                ctx.batches, ctx.result.imported_count, ctx.result.updated_count, ctx.result.failed_count
            );
        }
    }

    fn abort(&self, ctx: &mut RunContext, reason: AbortReason, unprocessed: usize) {
        ctx.skip_remaining(unprocessed);
        ctx.result.aborted = Some(reason);
        metrics::run::aborted(reason.as_str());
        self.log.append(
            LogLevel::Warn,
            "Import run stopped early",
            &json!({"run_id": ctx.result.run_id, "reason": reason.as_str(), "unprocessed": unprocessed}),
        );
    }

    fn tally(&self, ctx: &mut RunContext, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Imported(_) => {
                ctx.result.imported_count += 1;
                metrics::events::imported();
            }
            RecordOutcome::Updated(_) => {
                ctx.result.updated_count += 1;
                metrics::events::updated();
            }
            RecordOutcome::Skipped(reason) => {
                debug!("Skipped record: {}", reason);
                ctx.result.skipped_count += 1;
                ctx.result.warnings.push(reason);
                metrics::events::skipped(1);
            }
            RecordOutcome::Failed(err) => {
                error!("Record failed: {}", err);
                ctx.result.failed_count += 1;
                ctx.result.errors.push(err.to_string());
                metrics::events::failed();
            }
        }
    }

    /// Detect, map, resolve, match and persist one record
    async fn process_record(&self, ctx: &mut RunContext, raw: &RawEvent, options: &ImportOptions) -> RecordOutcome {
        if !raw.is_object() {
            return RecordOutcome::Skipped("record is not a JSON object".to_string());
        }

        let series = self.series.detect(raw);
        let mut event = self.mapper.map(raw);
        event.series = series;

        for warning in &event.warnings {
            metrics::events::mapping_warning(warning.label());
            ctx.result
                .warnings
                .push(format!("{} ({}): {}", event.title, event.external_id, warning));
        }
        if !event.warnings.is_empty() {
            self.log.append(
                LogLevel::Warn,
                "Event mapped with warnings",
                &json!({
                    "external_id": event.external_id,
                    "title": event.title,
                    "warnings": event.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
                }),
            );
        }

        let create_related = options.create_missing_entities && !options.dry_run;
        let venue = self
            .related
            .resolve_venue(&mut ctx.entities, event.venue.as_ref(), create_related)
            .await;
        let organizer = self
            .related
            .resolve_organizer(&mut ctx.entities, event.organizer.as_ref(), create_related)
            .await;
        for (kind, resolved) in [(EntityKind::Venue, &venue), (EntityKind::Organizer, &organizer)] {
            match resolved {
                Resolved::Created(_) => metrics::related::created(kind.as_str()),
                Resolved::Failed(e) => {
                    metrics::related::failed(kind.as_str());
                    ctx.result.warnings.push(format!(
                        "{} ({}): {} not linked: {}",
                        event.title, event.external_id, kind, e
                    ));
                }
                _ => {}
            }
        }

        let existing = match self.duplicates.find(&event.external_id).await {
            Ok(existing) => existing,
            Err(e) => return self.failed(&event, e),
        };

        // Always written so an update unlinks what the source no longer names
        let mut fields = event.to_fields();
        fields.insert("venue_id".into(), venue.id().map_or(Value::Null, |id| json!(id.0)));
        fields.insert("organizer_id".into(), organizer.id().map_or(Value::Null, |id| json!(id.0)));

        if options.dry_run {
            debug!("Dry run: would {} {}", if existing.is_some() { "update" } else { "create" }, event.external_id);
            return match existing {
                Some(id) => RecordOutcome::Updated(id),
                None => RecordOutcome::Imported(None),
            };
        }

        match self.persist(&event, fields, existing, options).await {
            Ok(outcome) => outcome,
            Err(e) => self.failed(&event, e),
        }
    }

    async fn persist(
        &self,
        event: &CanonicalEvent,
        fields: FieldSet,
        existing: Option<LocalId>,
        options: &ImportOptions,
    ) -> StoreResult<RecordOutcome> {
        let now = Utc::now().to_rfc3339();
        let outcome = match existing {
            Some(id) => {
                self.store.update(id, fields).await?;
                debug!("Updated event {} ({})", event.external_id, id);
                RecordOutcome::Updated(id)
            }
            None => {
                let id = self.store.create(EntityKind::Event, fields).await?;
                self.store.set_metadata(id, EVENT_EXTERNAL_ID_KEY, &event.external_id).await?;
                debug!("Created event {} ({})", event.external_id, id);
                RecordOutcome::Imported(Some(id))
            }
        };
        let id = match &outcome {
            RecordOutcome::Imported(Some(id)) | RecordOutcome::Updated(id) => *id,
            _ => return Ok(outcome),
        };

        self.store.set_metadata(id, LAST_IMPORTED_KEY, &now).await?;
        let stamps = match &event.series {
            Some(series) => [
                (SERIES_ID_KEY, series.series_id.clone()),
                (SERIES_PARENT_KEY, series.parent_event_id.clone()),
                (SERIES_INSTANCE_KEY, series.instance_number.to_string()),
                (SERIES_TOTAL_KEY, series.total_instances.to_string()),
                (SERIES_RRULE_KEY, series.recurrence_rule.clone()),
            ],
            None => [SERIES_ID_KEY, SERIES_PARENT_KEY, SERIES_INSTANCE_KEY, SERIES_TOTAL_KEY, SERIES_RRULE_KEY]
                .map(|key| (key, String::new())),
        };
        for (key, value) in &stamps {
            self.stamp(id, key, Some(value.as_str())).await?;
        }
        if options.fetch_images {
            self.stamp(id, IMAGE_URL_KEY, event.image_url.as_deref()).await?;
        }
        Ok(outcome)
    }

    /// Set `key`, or remove it when the value is absent or empty
    async fn stamp(&self, id: LocalId, key: &str, value: Option<&str>) -> StoreResult<()> {
        match value.filter(|v| !v.is_empty()) {
            Some(value) => self.store.set_metadata(id, key, value).await,
            None => self.store.remove_metadata(id, key).await,
        }
    }

    fn failed(&self, event: &CanonicalEvent, cause: StoreError) -> RecordOutcome {
        RecordOutcome::Failed(RecordError::new(event.title.clone(), event.external_id.clone(), cause))
    }

    fn finish(&self, mut ctx: RunContext, started: Instant) -> ImportRunResult {
        ctx.enter(RunPhase::Summarizing);
        ctx.result.duration = started.elapsed();
        let result = &ctx.result;
        debug_assert!(result.is_consistent(), "run counts do not add up: {:?}", result);

        info!("✅ Import finished: {}", result);
        let mut summary: Value = json!({
            "run_id": result.run_id,
            "imported": result.imported_count,
            "updated": result.updated_count,
            "skipped": result.skipped_count,
            "failed": result.failed_count,
            "fetched": result.fetched_count,
            "pages": result.pages_fetched,
            "duration_secs": result.duration.as_secs_f64(),
            "errors": result.error_preview(),
            "dry_run": result.dry_run,
        });
        if let Some(reason) = result.aborted {
            summary["aborted"] = json!(reason.as_str());
        }
        self.log.append(LogLevel::Info, "Import run finished", &summary);
        if !result.errors.is_empty() {
            self.log.append(
                LogLevel::Error,
                "Import run errors",
                &json!({"run_id": result.run_id, "errors": result.errors}),
            );
        }
        if result.aborted.is_none() {
            metrics::run::completed(result.duration.as_secs_f64());
        }

        ctx.enter(RunPhase::Done);
        ctx.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::{SourceError, SourceResult};
    use crate::infra::in_memory_store::InMemoryStore;
    use crate::infra::log_sink::MemoryLogSink;
    use crate::pipeline::batching::FixedMemoryProbe;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    const MB: u64 = 1024 * 1024;

    /// Serves scripted pages; anything past the script is an empty page
    struct ScriptedSource {
        pages: Vec<SourceResult<Vec<RawEvent>>>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<SourceResult<Vec<RawEvent>>>) -> Self {
            Self { pages, gate: None }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn fetch_page(&self, page: u32) -> SourceResult<Vec<RawEvent>> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            self.pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn fetch_one(&self, external_id: &str) -> SourceResult<RawEvent> {
            self.pages
                .iter()
                .filter_map(|p| p.as_ref().ok())
                .flatten()
                .find(|e| e["_id"] == external_id)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(external_id.to_string()))
        }
    }

    fn event(id: &str, title: &str) -> RawEvent {
        json!({
            "_id": id,
            "name": title,
            "description": "<p>Live music</p>",
            "startDate": "2026-03-01T19:30:00+11:00",
            "timezone": "Australia/Sydney",
            "eventLocation": {"venueName": "The Corner", "city": "Melbourne"},
            "pricing": {"minimumPrice": 20, "maximumPrice": 45},
            "bannerImage": {"url": "https://img.example/b.jpg"}
        })
    }

    struct Harness {
        orchestrator: ImportOrchestrator,
        store: Arc<InMemoryStore>,
        log: Arc<MemoryLogSink>,
        probe: Arc<FixedMemoryProbe>,
    }

    fn harness(source: ScriptedSource) -> Harness {
        harness_on(source, Arc::new(InMemoryStore::new()))
    }

    fn harness_on(source: ScriptedSource, store: Arc<InMemoryStore>) -> Harness {
        let log = Arc::new(MemoryLogSink::new());
        let probe = Arc::new(FixedMemoryProbe::new(512 * MB));
        let planner = BatchPlanner::new(2, 256 * MB, probe.clone());
        let orchestrator = ImportOrchestrator::new(
            Arc::new(source),
            store.clone(),
            log.clone(),
            FieldMapper::default(),
            planner,
        );
        Harness {
            orchestrator,
            store,
            log,
            probe,
        }
    }

    #[tokio::test]
    async fn test_run_creates_then_updates_idempotently() {
        let pages = vec![
            Ok(vec![event("a", "Alpha"), event("b", "Bravo")]),
            Ok(vec![event("c", "Charlie")]),
        ];
        let h = harness(ScriptedSource::new(pages));
        let options = ImportOptions::default();

        let first = h.orchestrator.run(&options, &CancelFlag::new()).await.unwrap();
        assert_eq!(first.imported_count, 3);
        assert_eq!(first.pages_fetched, 2);
        assert!(first.is_consistent());
        assert!(first.errors.is_empty());
        assert_eq!(h.store.count(EntityKind::Event).await, 3);
        assert_eq!(h.store.count(EntityKind::Venue).await, 1);

        let second = h.orchestrator.run(&options, &CancelFlag::new()).await.unwrap();
        assert_eq!(second.imported_count, 0);
        assert_eq!(second.updated_count, 3);
        assert_eq!(h.store.count(EntityKind::Event).await, 3);
        assert_eq!(h.store.count(EntityKind::Venue).await, 1);
    }

    #[tokio::test]
    async fn test_created_event_is_stamped() {
        let mut raw = event("s1", "Series Night");
        raw["series_id"] = json!("ser-9");
        raw["instance_number"] = json!(2);
        raw["total_instances"] = json!(4);
        raw["recurrence"] = json!({"frequency": "weekly", "interval": 1});
        let h = harness(ScriptedSource::new(vec![Ok(vec![raw])]));

        h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await.unwrap();

        let (_, stored) = h.store.all(EntityKind::Event).await.remove(0);
        let meta = |key: &str| stored.metadata.get(key).cloned();
        assert_eq!(meta(EVENT_EXTERNAL_ID_KEY).as_deref(), Some("s1"));
        assert!(meta(LAST_IMPORTED_KEY).is_some());
        assert_eq!(meta(SERIES_ID_KEY).as_deref(), Some("ser-9"));
        assert_eq!(meta(SERIES_INSTANCE_KEY).as_deref(), Some("2"));
        assert_eq!(meta(SERIES_TOTAL_KEY).as_deref(), Some("4"));
        assert_eq!(meta(SERIES_RRULE_KEY).as_deref(), Some("FREQ=WEEKLY;INTERVAL=1"));
        assert_eq!(meta(SERIES_PARENT_KEY), None);
        assert_eq!(meta(IMAGE_URL_KEY).as_deref(), Some("https://img.example/b.jpg"));
        assert!(stored.fields.contains_key("venue_id"));
    }

    #[tokio::test]
    async fn test_first_page_failure_fails_the_run() {
        let h = harness(ScriptedSource::new(vec![Err(SourceError::Auth { status: 401 })]));
        let result = h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await;

        assert!(matches!(result, Err(ImportError::Source(SourceError::Auth { status: 401 }))));
        assert_eq!(h.log.entries_at(LogLevel::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_first_page_server_error_is_recorded() {
        let h = harness(ScriptedSource::new(vec![Err(SourceError::Status {
            status: 503,
            url: "https://api.humanitix.com/v1/events?page=1".to_string(),
        })]));
        let result = h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await.unwrap();

        assert_eq!(result.fetched_count, 0);
        assert_eq!(result.pages_fetched, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("page 1: "));
        assert!(result.is_consistent());
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_first_page_transport_failure_fails_the_run() {
        let h = harness(ScriptedSource::new(vec![Err(SourceError::Transport("dns".to_string()))]));
        let result = h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await;

        assert!(matches!(result, Err(ImportError::Source(SourceError::Transport(_)))));
    }

    #[tokio::test]
    async fn test_update_clears_stale_links_and_series() {
        let store = Arc::new(InMemoryStore::new());
        let mut first = event("e1", "Hall Show");
        first["eventLocation"] = json!({"venueName": "Hall"});
        first["organiser"] = json!({"name": "Night Owls"});
        first["series_id"] = json!("S1");
        let h = harness_on(ScriptedSource::new(vec![Ok(vec![first])]), store.clone());
        h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await.unwrap();

        let (id, stored) = store.all(EntityKind::Event).await.remove(0);
        assert!(stored.fields["venue_id"].is_u64());
        assert_eq!(stored.metadata.get(SERIES_ID_KEY).map(String::as_str), Some("S1"));

        let moved_online = json!({
            "_id": "e1",
            "name": "Hall Show (streamed)",
            "startDate": "2026-03-01T19:30:00+11:00",
            "online": true
        });
        let h = harness_on(ScriptedSource::new(vec![Ok(vec![moved_online])]), store.clone());
        let result = h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await.unwrap();
        assert_eq!(result.updated_count, 1);

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.fields["venue_id"], Value::Null);
        assert_eq!(stored.fields["organizer_id"], Value::Null);
        for key in [SERIES_ID_KEY, SERIES_PARENT_KEY, SERIES_INSTANCE_KEY, SERIES_TOTAL_KEY, SERIES_RRULE_KEY] {
            assert!(!stored.metadata.contains_key(key), "{} still set", key);
        }
        assert!(!stored.metadata.contains_key(IMAGE_URL_KEY));
        assert_eq!(stored.metadata.get(EVENT_EXTERNAL_ID_KEY).map(String::as_str), Some("e1"));
    }

    #[tokio::test]
    async fn test_run_start_is_logged_with_source() {
        let h = harness(ScriptedSource::new(vec![Ok(vec![event("a", "Alpha")])]));
        h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await.unwrap();

        let started = h
            .log
            .entries()
            .into_iter()
            .find(|e| e.message == "Import run started")
            .unwrap();
        assert_eq!(started.context["source"], HUMANITIX_SOURCE);
    }

    #[tokio::test]
    async fn test_later_page_failure_keeps_earlier_work() {
        let pages = vec![
            Ok(vec![event("a", "Alpha")]),
            Err(SourceError::Transport("connection reset".to_string())),
            Ok(vec![event("z", "Never")]),
        ];
        let h = harness(ScriptedSource::new(pages));
        let result = h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await.unwrap();

        assert_eq!(result.imported_count, 1);
        assert_eq!(result.pages_fetched, 1);
        assert_eq!(result.errors, vec!["page 2: transport failure: connection reset".to_string()]);
        assert_eq!(h.store.count(EntityKind::Event).await, 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let h = harness(ScriptedSource::new(vec![Ok(vec![event("a", "Alpha"), event("b", "Bravo")])]));
        let options = ImportOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = h.orchestrator.run(&options, &CancelFlag::new()).await.unwrap();

        assert!(result.dry_run);
        assert_eq!(result.imported_count, 2);
        assert_eq!(h.store.count(EntityKind::Event).await, 0);
        assert_eq!(h.store.count(EntityKind::Venue).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_processing() {
        let h = harness(ScriptedSource::new(vec![Ok(vec![event("a", "A"), event("b", "B"), event("c", "C")])]));
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = h.orchestrator.run(&ImportOptions::default(), &cancel).await.unwrap();
        assert_eq!(result.aborted, Some(AbortReason::Cancelled));
        assert_eq!(result.skipped_count, 3);
        assert!(result.is_consistent());
        assert_eq!(h.store.count(EntityKind::Event).await, 0);
    }

    #[tokio::test]
    async fn test_memory_exhaustion_aborts_before_next_batch() {
        let records = (0..6).map(|i| event(&format!("e{}", i), "Gig")).collect();
        let h = harness(ScriptedSource::new(vec![Ok(records)]));
        h.probe.set(MB);

        let result = h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await.unwrap();
        assert_eq!(result.aborted, Some(AbortReason::MemoryExhausted));
        assert_eq!(result.fetched_count, 6);
        assert_eq!(result.skipped_count, 6);
        assert_eq!(h.store.count(EntityKind::Event).await, 0);
    }

    #[tokio::test]
    async fn test_record_limit_and_page_window() {
        let pages = vec![
            Ok(vec![event("a", "A"), event("b", "B")]),
            Ok(vec![event("c", "C"), event("d", "D")]),
        ];
        let h = harness(ScriptedSource::new(pages));
        let options = ImportOptions {
            record_limit: Some(3),
            ..Default::default()
        };
        let result = h.orchestrator.run(&options, &CancelFlag::new()).await.unwrap();
        assert_eq!(result.fetched_count, 3);
        assert_eq!(result.imported_count, 3);

        let options = ImportOptions {
            start_page: 2,
            max_pages: 1,
            ..Default::default()
        };
        let result = h.orchestrator.run(&options, &CancelFlag::new()).await.unwrap();
        assert_eq!(result.pages_fetched, 1);
        assert_eq!(result.updated_count, 1);
        assert_eq!(result.imported_count, 1);
    }

    #[tokio::test]
    async fn test_failed_record_is_collected_and_run_continues() {
        let h = harness(ScriptedSource::new(vec![Ok(vec![event("a", "Alpha"), json!("garbage")])]));
        h.store.reject_writes_for(EntityKind::Event).await;

        let result = h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await.unwrap();
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.skipped_count, 1);
        assert!(result.errors[0].starts_with("Alpha (a): "));
        assert!(result.is_consistent());
        // Full error list reaches the sink
        assert!(h
            .log
            .entries_at(LogLevel::Error)
            .iter()
            .any(|e| e.message == "Import run errors"));
    }

    #[tokio::test]
    async fn test_import_one_fetches_by_id() {
        let h = harness(ScriptedSource::new(vec![Ok(vec![event("a", "Alpha"), event("b", "Bravo")])]));

        let result = h.orchestrator.import_one("b", &ImportOptions::default()).await.unwrap();
        assert_eq!(result.fetched_count, 1);
        assert_eq!(result.imported_count, 1);

        let missing = h.orchestrator.import_one("zz", &ImportOptions::default()).await;
        assert!(matches!(missing, Err(ImportError::Source(SourceError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let source = ScriptedSource {
            pages: vec![Ok(vec![event("a", "Alpha")])],
            gate: Some((entered.clone(), release.clone())),
        };
        let h = Arc::new(harness(source));

        let running = {
            let h = h.clone();
            tokio::spawn(async move { h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await })
        };
        entered.notified().await;

        let second = h.orchestrator.run(&ImportOptions::default(), &CancelFlag::new()).await;
        assert!(matches!(second, Err(ImportError::AlreadyRunning)));

        // Let the first run page through to its empty second page
        release.notify_one();
        entered.notified().await;
        release.notify_one();
        let first = running.await.unwrap().unwrap();
        assert_eq!(first.imported_count, 1);
    }
}
