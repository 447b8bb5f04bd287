//! Metrics for the Humanitix importer
//!
//! Thin recording API over the `metrics` facade using Prometheus naming
//! conventions. Recording is a no-op until `init` installs the exporter.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Enum representing all metric names used by the importer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Run metrics
    RunsStarted,
    RunsCompleted,
    RunsAborted,
    RunDuration,

    // Record outcomes
    EventsFetched,
    EventsImported,
    EventsUpdated,
    EventsSkipped,
    EventsFailed,
    MappingWarnings,
    BatchSize,

    // Source metrics
    PagesFetched,
    SourceErrors,

    // Related entities
    RelatedCreated,
    RelatedFailed,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RunsStarted => "humanitix_runs_started_total",
            MetricName::RunsCompleted => "humanitix_runs_completed_total",
            MetricName::RunsAborted => "humanitix_runs_aborted_total",
            MetricName::RunDuration => "humanitix_run_duration_seconds",

            MetricName::EventsFetched => "humanitix_events_fetched_total",
            MetricName::EventsImported => "humanitix_events_imported_total",
            MetricName::EventsUpdated => "humanitix_events_updated_total",
            MetricName::EventsSkipped => "humanitix_events_skipped_total",
            MetricName::EventsFailed => "humanitix_events_failed_total",
            MetricName::MappingWarnings => "humanitix_mapping_warnings_total",
            MetricName::BatchSize => "humanitix_batch_size",

            MetricName::PagesFetched => "humanitix_pages_fetched_total",
            MetricName::SourceErrors => "humanitix_source_errors_total",

            MetricName::RelatedCreated => "humanitix_related_entities_created_total",
            MetricName::RelatedFailed => "humanitix_related_entities_failed_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            RunsStarted,
            RunsCompleted,
            RunsAborted,
            RunDuration,
            EventsFetched,
            EventsImported,
            EventsUpdated,
            EventsSkipped,
            EventsFailed,
            MappingWarnings,
            BatchSize,
            PagesFetched,
            SourceErrors,
            RelatedCreated,
            RelatedFailed,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is harmless.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Current metrics in Prometheus text format, if the recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn started() {
        ::metrics::counter!(MetricName::RunsStarted.as_str()).increment(1);
    }

    pub fn completed(secs: f64) {
        ::metrics::counter!(MetricName::RunsCompleted.as_str()).increment(1);
        ::metrics::histogram!(MetricName::RunDuration.as_str()).record(secs);
    }

    /// Record an aborted run, labelled by reason
    pub fn aborted(reason: &'static str) {
        ::metrics::counter!(MetricName::RunsAborted.as_str(), "reason" => reason).increment(1);
    }
}

// ============================================================================
// Record Outcome Metrics
// ============================================================================

pub mod events {
    use super::MetricName;

    pub fn fetched(count: usize) {
        ::metrics::counter!(MetricName::EventsFetched.as_str()).increment(count as u64);
    }

    pub fn imported() {
        ::metrics::counter!(MetricName::EventsImported.as_str()).increment(1);
    }

    pub fn updated() {
        ::metrics::counter!(MetricName::EventsUpdated.as_str()).increment(1);
    }

    pub fn skipped(count: usize) {
        ::metrics::counter!(MetricName::EventsSkipped.as_str()).increment(count as u64);
    }

    pub fn failed() {
        ::metrics::counter!(MetricName::EventsFailed.as_str()).increment(1);
    }

    /// Record mapping warnings, labelled by warning kind
    pub fn mapping_warning(label: &'static str) {
        ::metrics::counter!(MetricName::MappingWarnings.as_str(), "warning" => label).increment(1);
    }

    pub fn batch_size(size: usize) {
        ::metrics::histogram!(MetricName::BatchSize.as_str()).record(size as f64);
    }
}

// ============================================================================
// Source Metrics
// ============================================================================

pub mod source {
    use super::MetricName;
    use crate::common::constants::HUMANITIX_SOURCE;

    pub fn page_fetched() {
        ::metrics::counter!(MetricName::PagesFetched.as_str(), "source" => HUMANITIX_SOURCE).increment(1);
    }

    pub fn error(kind: &'static str) {
        ::metrics::counter!(MetricName::SourceErrors.as_str(), "source" => HUMANITIX_SOURCE, "kind" => kind)
            .increment(1);
    }
}

// ============================================================================
// Related Entity Metrics
// ============================================================================

pub mod related {
    use super::MetricName;

    pub fn created(kind: &'static str) {
        ::metrics::counter!(MetricName::RelatedCreated.as_str(), "kind" => kind).increment(1);
    }

    pub fn failed(kind: &'static str) {
        ::metrics::counter!(MetricName::RelatedFailed.as_str(), "kind" => kind).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_are_unique_and_prefixed() {
        let names: HashSet<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), MetricName::all_metrics().count());
        assert!(names.iter().all(|n| n.starts_with("humanitix_")));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        events::imported();
        events::mapping_warning("missing_start_date");
        run::aborted("cancelled");
        assert_eq!(MetricName::EventsImported.to_string(), "humanitix_events_imported_total");
    }
}
