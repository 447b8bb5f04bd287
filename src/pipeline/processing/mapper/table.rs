use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Canonical fields a source key can map onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    ExternalId,
    Title,
    Content,
    Excerpt,
    StartAt,
    EndAt,
    Timezone,
    Cost,
    Currency,
    Venue,
    Organizer,
    ImageUrl,
    EventUrl,
    Categories,
    Online,
    Series,
}

impl TargetField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetField::ExternalId => "external_id",
            TargetField::Title => "title",
            TargetField::Content => "content",
            TargetField::Excerpt => "excerpt",
            TargetField::StartAt => "start_at",
            TargetField::EndAt => "end_at",
            TargetField::Timezone => "timezone",
            TargetField::Cost => "cost_summary",
            TargetField::Currency => "currency",
            TargetField::Venue => "venue",
            TargetField::Organizer => "organizer",
            TargetField::ImageUrl => "image_url",
            TargetField::EventUrl => "event_url",
            TargetField::Categories => "categories",
            TargetField::Online => "is_online",
            TargetField::Series => "series",
        }
    }
}

impl fmt::Display for TargetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direct `source_key -> target` renames. Order matters: for each target the
/// first key present in a record wins. Humanitix spellings come first, the
/// canonical names last so a serialized CanonicalEvent maps onto itself.
pub static RENAME_TABLE: &[(&str, TargetField)] = &[
    ("_id", TargetField::ExternalId),
    ("id", TargetField::ExternalId),
    ("eventId", TargetField::ExternalId),
    ("event_id", TargetField::ExternalId),
    ("external_id", TargetField::ExternalId),
    ("name", TargetField::Title),
    ("title", TargetField::Title),
    ("description", TargetField::Content),
    ("content", TargetField::Content),
    ("summary", TargetField::Excerpt),
    ("excerpt", TargetField::Excerpt),
    ("startDate", TargetField::StartAt),
    ("start_date", TargetField::StartAt),
    ("start_at", TargetField::StartAt),
    ("endDate", TargetField::EndAt),
    ("end_date", TargetField::EndAt),
    ("end_at", TargetField::EndAt),
    ("timezone", TargetField::Timezone),
    ("timeZone", TargetField::Timezone),
    ("ticketTypes", TargetField::Cost),
    ("ticket_types", TargetField::Cost),
    ("pricing", TargetField::Cost),
    ("price", TargetField::Cost),
    ("cost", TargetField::Cost),
    ("cost_summary", TargetField::Cost),
    ("currency", TargetField::Currency),
    ("eventLocation", TargetField::Venue),
    ("venue", TargetField::Venue),
    ("location", TargetField::Venue),
    ("organiser", TargetField::Organizer),
    ("organizer", TargetField::Organizer),
    ("bannerImage", TargetField::ImageUrl),
    ("featureImage", TargetField::ImageUrl),
    ("image", TargetField::ImageUrl),
    ("image_url", TargetField::ImageUrl),
    ("url", TargetField::EventUrl),
    ("eventUrl", TargetField::EventUrl),
    ("event_url", TargetField::EventUrl),
    ("category", TargetField::Categories),
    ("categories", TargetField::Categories),
    ("tags", TargetField::Categories),
    ("online", TargetField::Online),
    ("is_online", TargetField::Online),
    ("series_id", TargetField::Series),
    ("series", TargetField::Series),
    ("recurring", TargetField::Series),
    ("recurrence", TargetField::Series),
    ("parent_event_id", TargetField::Series),
    ("instance_number", TargetField::Series),
    ("total_instances", TargetField::Series),
];

/// Whether a key is covered by the static table
pub fn is_known_key(key: &str) -> bool {
    RENAME_TABLE.iter().any(|(source, _)| *source == key)
}

/// First non-null value among the table keys for `target`, in table order
pub fn lookup<'a>(record: &'a Map<String, Value>, target: TargetField) -> Option<&'a Value> {
    RENAME_TABLE
        .iter()
        .filter(|(_, t)| *t == target)
        .filter_map(|(source, _)| record.get(*source))
        .find(|v| !is_blank(v))
}

/// Every non-null value among the table keys for `target`, in table order
pub fn lookup_all<'a>(
    record: &'a Map<String, Value>,
    target: TargetField,
) -> impl Iterator<Item = &'a Value> + 'a {
    RENAME_TABLE
        .iter()
        .filter(move |(_, t)| *t == target)
        .filter_map(move |(source, _)| record.get(*source))
        .filter(|v| !is_blank(v))
}

/// Null and empty strings count as absent
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
