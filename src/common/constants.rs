/// Metadata keys and source constants shared across the pipeline.
/// These keys are the cross-reference contract between imported records and
/// the upstream Humanitix entities, so they must stay stable across releases.

// Source name (used in logs and metric labels)
pub const HUMANITIX_SOURCE: &str = "humanitix";

// Cross-reference metadata written on local records
pub const EVENT_EXTERNAL_ID_KEY: &str = "_humanitix_event_id";
pub const VENUE_EXTERNAL_ID_KEY: &str = "_humanitix_venue_id";
pub const ORGANIZER_EXTERNAL_ID_KEY: &str = "_humanitix_organizer_id";
pub const LAST_IMPORTED_KEY: &str = "_humanitix_last_imported";

// Series metadata written on event records
pub const SERIES_ID_KEY: &str = "_humanitix_series_id";
pub const SERIES_PARENT_KEY: &str = "_humanitix_parent_event_id";
pub const SERIES_INSTANCE_KEY: &str = "_humanitix_instance_number";
pub const SERIES_TOTAL_KEY: &str = "_humanitix_total_instances";
pub const SERIES_RRULE_KEY: &str = "_humanitix_recurrence_rule";

// Media
pub const IMAGE_URL_KEY: &str = "_humanitix_image_url";

// Business defaults
pub const FREE_COST_LABEL: &str = "Free";
pub const DEFAULT_CURRENCY: &str = "AUD";
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Number of errors shown in any user-facing summary; the full list goes to the log sink
pub const ERROR_PREVIEW_LIMIT: usize = 5;

/// Character budget for derived excerpts
pub const EXCERPT_LENGTH: usize = 160;
